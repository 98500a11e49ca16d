//! deepchat - Terminal Chat Client
//!
//! Line-oriented REPL over the relay daemon. Answers stream to stdout as
//! they arrive; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Relay on the default address, conversations in the data directory
//! deepchat
//!
//! # Another relay, throwaway store
//! deepchat --relay-url http://10.0.0.5:3000 --store /tmp/chat.json
//! ```
//!
//! Ctrl-C while an answer streams stops that answer; at the prompt it quits.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use deepchat_client::repl::{
    live_answer, render_conversation, render_list, Command, LiveText, HELP,
};
use deepchat_client::{Attachment, ChatSession, RelayClient, StreamObserver, DEFAULT_RELAY_URL};
use relay_core::{JsonFileStore, MessageRole, StreamStatus};

/// Columns used when printing a conversation
const WRAP_WIDTH: usize = 100;

/// Chat with a local model through the deepchat relay
#[derive(Debug, Parser)]
#[command(name = "deepchat", version, about)]
struct Cli {
    /// Relay base URL
    #[arg(long, env = "DEEPCHAT_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    relay_url: String,

    /// Conversation store file (JSON)
    #[arg(long, env = "DEEPCHAT_STORE")]
    store: Option<PathBuf>,
}

/// Prints the newly arrived suffix of each update
///
/// New answers start with reasoning hidden, so only the answer part is
/// printed; `/think` then `/show` reveals the reasoning.
#[derive(Default)]
struct Printer {
    printed: usize,
    thinking_noted: bool,
}

impl StreamObserver for Printer {
    fn on_update(&mut self, content: &str) {
        let answer = match live_answer(content) {
            LiveText::Thinking => {
                if !self.thinking_noted {
                    print!("(thinking...) ");
                    let _ = std::io::stdout().flush();
                    self.thinking_noted = true;
                }
                return;
            }
            LiveText::Answer(answer) => answer,
        };
        if let Some(delta) = answer.get(self.printed..) {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        self.printed = answer.len();
    }

    fn on_done(&mut self, status: StreamStatus) {
        if status == StreamStatus::Error && self.printed == 0 {
            print!("(no answer; is the relay running?)");
        }
        println!("\n");
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Data URL for an image file, typed by extension
async fn image_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(Attachment::Image(format!("data:{mime};base64,{encoded}")))
}

/// Upload a document to the relay and attach its text
async fn document_attachment(client: &RelayClient, path: &Path) -> anyhow::Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map_or_else(|| "document".to_string(), |n| n.to_string_lossy().into_owned());
    let document = client
        .upload_documents(vec![(name, bytes)])
        .await?
        .into_iter()
        .next()
        .context("relay returned no document")?;
    println!("attached {} ({} pages)", document.name, document.numpages);
    Ok(Attachment::Document {
        name: document.name,
        text: document.text,
    })
}

/// Send one turn; Ctrl-C cancels it
async fn send_turn(
    session: &ChatSession,
    text: &str,
    attachment: Option<Attachment>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    print!("Assistant: ");
    let result = session
        .send(text, attachment, cancel, &mut Printer::default())
        .await;
    interrupt.abort();
    result?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let store_path = cli
        .store
        .or_else(JsonFileStore::default_path)
        .context("no data directory; pass --store")?;
    let store = JsonFileStore::open(&store_path)
        .with_context(|| format!("opening {}", store_path.display()))?;
    let session = ChatSession::new(Arc::new(store), RelayClient::new(cli.relay_url));

    println!(
        "deepchat: talking to {} (/help for commands)",
        session.client().base_url()
    );

    let mut pending: Option<Attachment> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        let result = match command {
            Command::Say(text) => send_turn(&session, &text, pending.take()).await,
            Command::New => session
                .new_conversation()
                .await
                .map(|_| ())
                .map_err(Into::into),
            Command::Clear => session.clear().await.map(|_| ()).map_err(Into::into),
            Command::List => {
                println!("{}", render_list(&session.store().snapshot().conversations));
                Ok(())
            }
            Command::Switch(i) => session.select(i).await.map_err(Into::into),
            Command::Remove(i) => session.remove(i).await.map_err(Into::into),
            Command::Models => session
                .client()
                .list_models()
                .await
                .map(|models| {
                    for model in models {
                        println!("{}", model.name);
                    }
                })
                .map_err(Into::into),
            Command::Model(name) => session.set_llm(&name).await.map_err(Into::into),
            Command::Think => {
                let state = session.store().snapshot();
                let last = state
                    .conversations
                    .active()
                    .messages()
                    .iter()
                    .rfind(|m| m.role() == MessageRole::Assistant)
                    .map(|m| m.id.clone());
                match last {
                    Some(id) => session
                        .toggle_reasoning(&id)
                        .await
                        .map(|shown| {
                            println!("reasoning {}", if shown { "shown" } else { "hidden" });
                        })
                        .map_err(Into::into),
                    None => {
                        println!("no answer yet");
                        Ok(())
                    }
                }
            }
            Command::Show => {
                let state = session.store().snapshot();
                println!("{}", render_conversation(state.conversations.active(), WRAP_WIDTH));
                Ok(())
            }
            Command::Image(path) => image_attachment(Path::new(&path))
                .await
                .map(|a| {
                    pending = Some(a);
                    println!("image attached to the next message");
                }),
            Command::Doc(path) => document_attachment(session.client(), Path::new(&path))
                .await
                .map(|a| pending = Some(a)),
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => break,
        };

        if let Err(e) = result {
            warn!(error = %e, "command failed");
            println!("error: {e:#}");
        }
    }

    Ok(())
}
