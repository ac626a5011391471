//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the farm crates MUST NOT sleep.
//! Health checks run on `tokio::time::interval`, queued requests wait on
//! channels with `tokio::time::timeout`, streams wait on the socket.

use architectural_enforcement::{assert_clean, scan_production, Rule};

const RULES: &[Rule] = &[
    Rule {
        pattern: "std::thread::sleep",
        rule: "Thread sleep",
        async_only: false,
    },
    Rule {
        pattern: "thread::sleep(",
        rule: "Thread sleep",
        async_only: false,
    },
    Rule {
        pattern: "time::sleep(",
        rule: "Async sleep",
        async_only: false,
    },
];

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production(RULES);

    assert_clean(
        "CRITICAL: Sleep calls found in production code!",
        &violations,
        &[
            "✅ Use instead:",
            "  - tokio::time::interval() for periodic tasks",
            "  - tokio::time::timeout() around the awaited operation",
            "  - channels (oneshot/mpsc) to wait for events",
        ],
    );
}
