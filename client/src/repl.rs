//! REPL Commands and Rendering
//!
//! Line parsing and plain-text rendering for the `deepchat` binary. Lines
//! starting with `/` are commands; anything else is a chat turn.

use relay_core::reasoning::{REASONING_PREFIX, SEPARATOR};
use relay_core::{ChatMessage, Conversation, ConversationCollection, MessageRole, ReasoningSplit};

/// One parsed input line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Send a chat turn
    Say(String),
    /// Start a new conversation
    New,
    /// Empty the active conversation
    Clear,
    /// List conversations
    List,
    /// Activate conversation N (1-based, as listed)
    Switch(usize),
    /// Remove conversation N (1-based, as listed)
    Remove(usize),
    /// List backend models
    Models,
    /// Use a different chat model
    Model(String),
    /// Toggle reasoning of the last answer
    Think,
    /// Print the active conversation
    Show,
    /// Attach an image file to the next turn
    Image(String),
    /// Upload a document and attach its text to the next turn
    Doc(String),
    /// Show the command list
    Help,
    /// Leave
    Quit,
}

/// Help text listing every command
pub const HELP: &str = "\
/new             start a conversation
/clear           empty the current conversation
/list            list conversations
/switch N        switch to conversation N
/remove N        remove conversation N
/models          list models on the backend
/model NAME      use NAME for later turns
/think           show or hide reasoning of the last answer
/show            print the current conversation
/image PATH      attach an image to the next message
/doc PATH        attach a document's text to the next message
/quit            leave";

impl Command {
    /// Parse one input line; `None` for blank lines
    ///
    /// # Errors
    ///
    /// Returns a message for an unknown command or a bad argument.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Some(Self::Say(line.to_string())));
        };

        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(n, a)| (n, a.trim()));

        let parsed = match (name, arg) {
            ("new", "") => Self::New,
            ("clear", "") => Self::Clear,
            ("list", "") => Self::List,
            ("models", "") => Self::Models,
            ("think", "") => Self::Think,
            ("show", "") => Self::Show,
            ("help", "") => Self::Help,
            ("quit" | "exit", "") => Self::Quit,
            ("switch", n) => Self::Switch(position(n)?),
            ("remove", n) => Self::Remove(position(n)?),
            ("model", m) if !m.is_empty() => Self::Model(m.to_string()),
            ("image", p) if !p.is_empty() => Self::Image(p.to_string()),
            ("doc", p) if !p.is_empty() => Self::Doc(p.to_string()),
            _ => return Err(format!("unknown command '/{command}' (try /help)")),
        };
        Ok(Some(parsed))
    }
}

/// 1-based list position to index
fn position(arg: &str) -> Result<usize, String> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(format!("expected a conversation number, got '{arg}'")),
    }
}

/// One line per conversation, the active one marked with `*`
#[must_use]
pub fn render_list(collection: &ConversationCollection) -> String {
    collection
        .conversations()
        .iter()
        .enumerate()
        .map(|(i, conv)| {
            let marker = if i == collection.active_index() { '*' } else { ' ' };
            format!("{marker} {:>2}. {} ({} messages)", i + 1, conv.title(), conv.len())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Message text as displayed, honouring its reasoning toggle
#[must_use]
pub fn visible_content(message: &ChatMessage) -> String {
    let split = ReasoningSplit::of(message.content());
    if message.role() != MessageRole::Assistant || !split.has_reasoning() {
        return message.content().to_string();
    }
    if message.show_reasoning {
        format!("({})\n{}", split.reasoning.trim(), split.answer.trim_start())
    } else {
        split.answer.trim_start().to_string()
    }
}

/// Printable part of an answer that is still streaming
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveText<'a> {
    /// Only reasoning so far
    Thinking,
    /// Answer text so far; grows with every update
    Answer(&'a str),
}

/// What to print of streamed `content` while reasoning is hidden
#[must_use]
pub fn live_answer(content: &str) -> LiveText<'_> {
    match content.split_once(SEPARATOR) {
        Some((_, answer)) => LiveText::Answer(answer.trim_start()),
        None if content.starts_with(REASONING_PREFIX) => LiveText::Thinking,
        None => LiveText::Answer(content),
    }
}

/// Whole conversation wrapped to `width` columns
#[must_use]
pub fn render_conversation(conversation: &Conversation, width: usize) -> String {
    let mut lines = Vec::new();
    for message in conversation.messages() {
        let prefix = match message.role() {
            MessageRole::User => "You: ",
            MessageRole::Assistant => "Assistant: ",
            MessageRole::System => "",
        };
        let mut content = format!("{prefix}{}", visible_content(message));
        if let Some(pdf) = &message.pdf {
            content.push_str(&format!(" [document: {pdf}]"));
        }
        if message.image.is_some() {
            content.push_str(" [image]");
        }
        if message.is_streaming() {
            content.push('_');
        }
        lines.extend(textwrap::wrap(&content, width).into_iter().map(|l| l.to_string()));
        lines.push(String::new());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_plain_text_is_a_turn() {
        assert_eq!(
            Command::parse("  hello there ").unwrap(),
            Some(Command::Say("hello there".into()))
        );
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/new").unwrap(), Some(Command::New));
        assert_eq!(Command::parse("/switch 2").unwrap(), Some(Command::Switch(1)));
        assert_eq!(
            Command::parse("/model qwen2.5:7b").unwrap(),
            Some(Command::Model("qwen2.5:7b".into()))
        );
        assert_eq!(
            Command::parse("/doc notes/a file.txt").unwrap(),
            Some(Command::Doc("notes/a file.txt".into()))
        );
        assert_eq!(Command::parse("/exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Command::parse("/switch 0").is_err());
        assert!(Command::parse("/remove x").is_err());
        assert!(Command::parse("/model").is_err());
        assert!(Command::parse("/frobnicate").is_err());
        assert!(Command::parse("/new now").is_err());
    }

    #[test]
    fn test_reasoning_hidden_by_default() {
        let mut message = ChatMessage::assistant_placeholder();
        message
            .replace_streamed("I'm thinking: weigh options^^^^^^^\n\nUse a map.")
            .unwrap();
        assert_eq!(visible_content(&message), "Use a map.");

        message.show_reasoning = true;
        assert_eq!(
            visible_content(&message),
            "(I'm thinking: weigh options)\nUse a map."
        );
    }

    #[test]
    fn test_live_answer_skips_reasoning() {
        assert_eq!(live_answer("I'm thinking: wei"), LiveText::Thinking);
        assert_eq!(
            live_answer("I'm thinking: weigh options^^^^^^^\n\nUse"),
            LiveText::Answer("Use")
        );
        assert_eq!(
            live_answer("I'm thinking: weigh options^^^^^^^\n\nUse a map."),
            LiveText::Answer("Use a map.")
        );
        assert_eq!(live_answer("Plain answer"), LiveText::Answer("Plain answer"));
    }

    #[test]
    fn test_user_content_untouched() {
        let message = ChatMessage::user("what is ^^^^^^^ anyway");
        assert_eq!(visible_content(&message), "what is ^^^^^^^ anyway");
    }

    #[test]
    fn test_render_list_marks_active() {
        let collection = ConversationCollection::new().with_new_conversation();
        let rendered = render_list(&collection);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("   1."));
        assert!(lines[1].starts_with("*  2."));
    }
}
