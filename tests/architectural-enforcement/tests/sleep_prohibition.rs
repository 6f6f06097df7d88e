//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code never blocks a runtime thread with
//! `std::thread::sleep`. Waiting is async, and the only timed wait allowed is
//! retry backoff inside the model cascade.

use architectural_enforcement::{assert_no_violations, find_violations};

/// Files allowed to call `tokio::time::sleep`
const BACKOFF_FILES: &[&str] = &["cascade.rs"];

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = find_violations(|line| line.code.contains("thread::sleep"));
    assert_no_violations("Blocking sleep", &violations);
}

#[test]
fn test_async_sleep_only_in_backoff() {
    let violations = find_violations(|line| {
        let is_sleep = line.code.contains("time::sleep(") || line.code.contains("sleep_until(");
        let allowed = line
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .is_some_and(|name| BACKOFF_FILES.contains(&name));
        is_sleep && !allowed
    });
    assert_no_violations("Sleep outside retry backoff", &violations);
}
