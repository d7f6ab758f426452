use log::{error, info};

/// Operator-facing migration output.
///
/// Progress lines go to stdout so they show up next to the command that ran
/// them; completion and failure are also written to the log.
pub struct MigrationProgress;

impl MigrationProgress {
    /// Send a progress line.
    pub fn send(msg: &str) {
        println!("{}", Self::progress_line(msg));
    }

    pub fn send_complete() {
        info!("Migrations complete");
    }

    pub fn send_failed(msg: &str) {
        error!("Migration failed: {}", msg);
        eprintln!("Migration failed: {}", msg);
    }

    fn progress_line(msg: &str) -> String {
        format!("  {}", msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lines_are_indented() {
        assert_eq!(
            MigrationProgress::progress_line("Adding 2 analysts"),
            "  Adding 2 analysts"
        );
    }
}
