use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_MAX_IMPORT_BYTES: u64 = 16 * 1024 * 1024;

/// Sidecar configuration. Requests arrive as JSON lines on stdin; logs go to stderr.
#[derive(Parser, Debug, Clone)]
#[command(name = "practicumd")]
#[command(about = "Internship and term evaluation sidecar", long_about = None)]
pub struct Config {
    /// Workspace directory to open at startup (same as a `workspace.select` request)
    #[arg(long, env = "PRACTICUMD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "PRACTICUMD_LOG", default_value = "info")]
    pub log_level: String,

    /// Largest CSV file accepted by student import
    #[arg(long, env = "PRACTICUMD_MAX_IMPORT_BYTES", default_value_t = DEFAULT_MAX_IMPORT_BYTES)]
    pub max_import_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cfg = Config::try_parse_from([
            "practicumd",
            "--workspace",
            "/tmp/ws",
            "--log-level",
            "debug",
            "--max-import-bytes",
            "1024",
        ])
        .expect("parse");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.max_import_bytes, 1024);
    }
}
