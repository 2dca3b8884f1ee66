//! Unit catalog used by the integration tests.
//!
//! Every unit is a `/bin/sh` script so the tests exercise real processes,
//! real signals and real log files.

use harvest_server::kernel::jobs::{UnitCatalog, UnitSpec};

fn shell(script: &str) -> UnitSpec {
    UnitSpec::new("/bin/sh").with_args(["-c", script])
}

/// Prints its identity, the caller-visible env and one stderr line.
pub const QUICK: &str = "quick";
/// Runs until signalled.
pub const SLEEPER: &str = "sleeper";
/// Exits 0 on SIGTERM after printing a line.
pub const GRACEFUL: &str = "graceful";
/// Ignores SIGTERM.
pub const STUBBORN: &str = "stubborn";
/// Ignores SIGTERM and keeps a background child, like a worker holding a
/// browser. The child's pid is written to [`BROWSER_PID_FILE`].
pub const BROWSER_OWNER: &str = "browser-owner";
pub const BROWSER_PID_FILE: &str = "browser.pid";
/// Exits with status 3.
pub const FAILING: &str = "failing";
/// Resolves, but its program is not on PATH.
pub const PHANTOM: &str = "phantom";
/// Does not resolve: its program path is missing.
pub const MISSING: &str = "missing";

pub fn test_catalog(base_dir: &std::path::Path) -> UnitCatalog {
    UnitCatalog::new(base_dir)
        .with_unit(
            QUICK,
            shell(
                r#"echo "job $HARVEST_JOB_ID"
echo "greeting $GREETING"
echo "log $HARVEST_LOG_PATH"
echo "oops" >&2"#,
            )
            .with_env("GREETING", "from-unit"),
        )
        .with_unit(SLEEPER, shell("echo started; exec sleep 30"))
        .with_unit(
            GRACEFUL,
            shell(r#"trap 'echo stopping; exit 0' TERM; echo ready; while true; do sleep 0.1; done"#),
        )
        .with_unit(
            STUBBORN,
            shell(r#"trap '' TERM; echo ready; while true; do sleep 0.1; done"#),
        )
        .with_unit(
            BROWSER_OWNER,
            shell(&format!(
                "sleep 300 & echo $! > {BROWSER_PID_FILE}; trap '' TERM; echo ready; while true; do sleep 0.1; done"
            )),
        )
        .with_unit(FAILING, shell("echo failing; exit 3"))
        .with_unit(PHANTOM, UnitSpec::new("harvest-no-such-worker-binary"))
        .with_unit(MISSING, UnitSpec::new("./missing_worker.sh"))
}
