//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in the relay and the client MUST NOT use
//! blocking I/O. Use `tokio::fs`, `tokio::net` and async `reqwest`.
//! **Acceptable**: blocking calls in plain `fn`s (store persistence, config
//! loading before the server starts) and test code.

use architectural_enforcement::{in_async_fn, scan};

const BLOCKING_CALLS: &[(&str, &str)] = &[
    ("std::fs::", "blocking file I/O"),
    ("std::net::TcpStream", "blocking network I/O"),
    ("std::net::TcpListener", "blocking network I/O"),
    ("std::net::UdpSocket", "blocking network I/O"),
    ("std::process::Command", "blocking process I/O"),
    ("std::thread::sleep", "blocking sleep"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(|lines, idx| {
        let code = lines[idx];
        if code.contains("reqwest::blocking") {
            return Some("blocking HTTP client");
        }
        BLOCKING_CALLS
            .iter()
            .find(|(pattern, _)| code.contains(pattern))
            .filter(|_| in_async_fn(lines, idx))
            .map(|(_, rule)| *rule)
    });

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs / tokio::net / tokio::process instead.");
        panic!("found {} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_detector_flags_only_async_context() {
    let lines = [
        "async fn load() {",
        "    let s = std::fs::read_to_string(p);",
        "}",
        "fn load_sync() {",
        "    let s = std::fs::read_to_string(p);",
        "}",
    ];
    assert!(in_async_fn(&lines, 1));
    assert!(!in_async_fn(&lines, 4));
}
