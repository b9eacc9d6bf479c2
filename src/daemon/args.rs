use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Default, Clone)]
pub struct DaemonArgs {
    /// Run in the current process instead of detaching.
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Seconds between two samples of the foreground window (1-5).
    #[arg(long)]
    pub interval: Option<u64>,
    /// Seconds without input after which the user is considered away.
    #[arg(long = "afk-after")]
    pub afk_after: Option<u64>,
    /// Local address viewers connect to.
    #[arg(long)]
    pub addr: Option<SocketAddr>,
    /// Pending notifications kept per subscriber before the oldest are dropped.
    #[arg(long = "event-capacity")]
    pub event_capacity: Option<usize>,
    /// Start tracking as soon as the daemon is up.
    #[arg(long)]
    pub autostart: bool,
}
