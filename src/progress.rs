//! Human-readable milestone lines, separate from structured logs.

pub trait Progress: Send + Sync {
    fn milestone(&self, line: &str);
}

/// Prints each milestone on its own stdout line.
pub struct StdoutProgress;

impl Progress for StdoutProgress {
    fn milestone(&self, line: &str) {
        println!("{line}");
    }
}

pub struct SilentProgress;

impl Progress for SilentProgress {
    fn milestone(&self, _line: &str) {}
}
