//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: The router is async end to end. Production code MUST NOT use
//! blocking sockets or the blocking HTTP client, and MUST NOT touch the
//! blocking file system from inside an `async fn`.
//!
//! Loading the config file happens in plain functions before the server
//! starts, which is acceptable.

use architectural_enforcement::{assert_clean, scan_production, Rule};

const RULES: &[Rule] = &[
    Rule {
        pattern: "std::net::TcpListener",
        rule: "Blocking network I/O",
        async_only: false,
    },
    Rule {
        pattern: "std::net::TcpStream",
        rule: "Blocking network I/O",
        async_only: false,
    },
    Rule {
        pattern: "reqwest::blocking",
        rule: "Blocking HTTP client",
        async_only: false,
    },
    Rule {
        pattern: "std::fs::",
        rule: "Blocking file I/O in async",
        async_only: true,
    },
    Rule {
        pattern: "std::process::Command",
        rule: "Blocking process I/O",
        async_only: false,
    },
];

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = scan_production(RULES);

    assert_clean(
        "CRITICAL: Blocking I/O calls found in production code!",
        &violations,
        &[
            "❌ FORBIDDEN blocking I/O:",
            "  - std::net::TcpStream, std::net::TcpListener",
            "  - reqwest::blocking::*",
            "  - std::fs::* inside async fn",
            "✅ REQUIRED async I/O:",
            "  - tokio::net::TcpListener::bind().await",
            "  - reqwest::Client::send().await",
        ],
    );
}
