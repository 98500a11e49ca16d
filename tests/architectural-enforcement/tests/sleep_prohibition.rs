//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the relay and the client MUST NOT call
//! sleep. Streams wait on the backend, on the response channel or on a
//! cancellation token; bounded waits use `tokio::time::timeout`.
//! **Exceptions**: test code.

use architectural_enforcement::scan;

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|lines, idx| {
        let code = lines[idx];
        (code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until("))
            .then_some("sleep call")
    });

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on I/O, a channel or a CancellationToken instead.");
        panic!("found {} sleep violation(s)", violations.len());
    }
}

#[test]
fn test_detector_catches_sleep() {
    let lines = ["    tokio::time::sleep(Duration::from_millis(10)).await;"];
    let code = lines[0];
    assert!(code.contains("::sleep("));
}
