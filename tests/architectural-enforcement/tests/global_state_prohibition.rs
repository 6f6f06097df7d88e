//! Integration Test: Global State Prohibition
//!
//! **Policy**: Backends, cooldowns, caches and metrics are owned by a router
//! instance. Nothing in the gateway crates lives in a process-wide mutable
//! registry.

use architectural_enforcement::{assert_no_violations, find_violations};

const FORBIDDEN: &[&str] = &[
    "static mut ",
    "lazy_static!",
    "thread_local!",
    "OnceCell<",
    "OnceLock<",
    "LazyLock<",
];

#[test]
fn test_no_global_mutable_registries() {
    let violations = find_violations(|line| FORBIDDEN.iter().any(|p| line.code.contains(p)));
    assert_no_violations("Global mutable state", &violations);
}

#[test]
fn test_statics_are_immutable_values() {
    // `static` items must be plain constants; interior mutability is a registry
    let violations = find_violations(|line| {
        let code = line.code.trim_start();
        let is_static = code.starts_with("static ") || code.starts_with("pub static ");
        is_static
            && ["Mutex", "RwLock", "Atomic", "DashMap", "RefCell"]
                .iter()
                .any(|t| code.contains(t))
    });
    assert_no_violations("Mutable static", &violations);
}
