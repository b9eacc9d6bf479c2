use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::warn;

use super::args::DaemonArgs;

pub const DEFAULT_IPC_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 47811));
pub const STORE_FILE_NAME: &str = "sessions.json";

const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const MAX_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_AFK_THRESHOLD: Duration = Duration::from_secs(60 * 2);
const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings of a running recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    pub sample_interval: Duration,
    pub afk_threshold: Duration,
    /// How often the open session is written to the store while tracking.
    pub checkpoint_interval: Duration,
    pub store_path: PathBuf,
    pub ipc_addr: SocketAddr,
    pub event_capacity: usize,
    pub autostart: bool,
}

impl RecorderConfig {
    pub fn new(app_dir: &Path) -> Self {
        Self {
            sample_interval: MIN_SAMPLE_INTERVAL,
            afk_threshold: DEFAULT_AFK_THRESHOLD,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            store_path: app_dir.join(STORE_FILE_NAME),
            ipc_addr: DEFAULT_IPC_ADDR,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            autostart: false,
        }
    }

    pub fn from_args(args: &DaemonArgs, app_dir: &Path) -> Self {
        let mut config = Self::new(app_dir);
        if let Some(interval) = args.interval {
            config.sample_interval = clamp_interval(Duration::from_secs(interval));
        }
        if let Some(afk_after) = args.afk_after {
            config.afk_threshold = Duration::from_secs(afk_after);
        }
        if let Some(addr) = args.addr {
            config.ipc_addr = addr;
        }
        if let Some(capacity) = args.event_capacity {
            config.event_capacity = capacity.max(1);
        }
        config.autostart = args.autostart;
        config
    }
}

fn clamp_interval(requested: Duration) -> Duration {
    let clamped = requested.clamp(MIN_SAMPLE_INTERVAL, MAX_SAMPLE_INTERVAL);
    if clamped != requested {
        warn!(
            "Sampling interval {:?} is out of range, using {:?}",
            requested, clamped
        );
    }
    clamped
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use crate::daemon::args::DaemonArgs;

    use super::{DEFAULT_IPC_ADDR, RecorderConfig};

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::from_args(&DaemonArgs::default(), Path::new("/state/traco"));
        assert_eq!(config.sample_interval, Duration::from_secs(1));
        assert_eq!(config.afk_threshold, Duration::from_secs(120));
        assert_eq!(config.store_path, Path::new("/state/traco/sessions.json"));
        assert_eq!(config.ipc_addr, DEFAULT_IPC_ADDR);
        assert!(!config.autostart);
    }

    #[test]
    fn test_interval_is_clamped() {
        let args = DaemonArgs {
            interval: Some(30),
            ..Default::default()
        };
        let config = RecorderConfig::from_args(&args, Path::new("dir"));
        assert_eq!(config.sample_interval, Duration::from_secs(5));

        let args = DaemonArgs {
            interval: Some(0),
            ..Default::default()
        };
        let config = RecorderConfig::from_args(&args, Path::new("dir"));
        assert_eq!(config.sample_interval, Duration::from_secs(1));
    }
}
