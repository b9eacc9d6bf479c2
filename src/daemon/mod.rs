use std::sync::Arc;

use anyhow::Result;
use config::RecorderConfig;
use ipc::server::IpcServer;
use service::RecorderService;
use storage::{JsonFileStore, SessionStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    utils::clock::{Clock, DefaultClock},
    window_api::{GenericWindowManager, WindowManager},
};

pub mod args;
pub mod collection;
pub mod config;
pub mod error;
pub mod ipc;
pub mod processing;
pub mod service;
pub mod shutdown;
pub mod storage;

/// Represents the starting point for the daemon
pub async fn start_daemon(config: RecorderConfig) -> Result<()> {
    let manager = GenericWindowManager::new()?;
    let shutdown_token = CancellationToken::new();
    run_daemon(manager, DefaultClock, config, shutdown_token).await
}

/// Serves viewers until `shutdown_token` is cancelled or a signal arrives, then flushes the open
/// session.
pub async fn run_daemon(
    manager: impl WindowManager + 'static,
    clock: impl Clock,
    config: RecorderConfig,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let service = create_service(manager, clock, &config)?;
    let server = IpcServer::bind(config.ipc_addr, service.clone(), shutdown_token.clone()).await?;

    if config.autostart {
        service
            .start()
            .await
            .inspect_err(|e| error!("Failed to start tracking {e:?}"))?;
    }

    let (_, serving_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        server.run(),
    );

    if let Err(serving_result) = serving_result {
        error!("Connection module got an error {:?}", serving_result);
    }

    service
        .shutdown()
        .await
        .inspect_err(|e| error!("Failed to flush the open session {e:?}"))?;
    info!("Daemon stopped");
    Ok(())
}

fn create_service(
    manager: impl WindowManager + 'static,
    clock: impl Clock,
    config: &RecorderConfig,
) -> Result<RecorderService<impl SessionStore>> {
    let store = JsonFileStore::new(config.store_path.clone())?;
    Ok(RecorderService::from_config(
        Box::new(manager),
        store,
        Arc::new(clock),
        config,
    ))
}

#[cfg(test)]
mod daemon_tests {
    use std::time::Duration;

    use anyhow::Result;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            config::RecorderConfig,
            run_daemon,
            storage::{JsonFileStore, SessionStore},
        },
        utils::{clock::TokioClock, logging::TEST_LOGGING},
        window_api::{ActiveWindowData, MockWindowManager},
    };

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn test_items() -> Vec<ActiveWindowData> {
        vec![
            ActiveWindowData {
                app: "test".into(),
                task: "test".into(),
            },
            ActiveWindowData {
                app: "test".into(),
                task: "test".into(),
            },
            ActiveWindowData {
                app: "test b".into(),
                task: "test b".into(),
            },
        ]
    }

    /// Very simple smoke test to check if the daemon is working end to end: it tracks from the
    /// start, and the open session is flushed when the daemon is cancelled.
    #[tokio::test(start_paused = true)]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let mut mock_window_manager = MockWindowManager::new();
        mock_window_manager
            .expect_get_idle_time()
            .returning(|| Ok(0));
        let mut items = test_items().into_iter().cycle();
        mock_window_manager
            .expect_get_active_window_data()
            .returning(move || Ok(items.next().unwrap()));

        let dir = tempdir()?;
        let mut config = RecorderConfig::new(dir.path());
        config.ipc_addr = "127.0.0.1:0".parse()?;
        config.autostart = true;
        let clock = TokioClock::starting_at(DateTime::<Utc>::from_naive_utc_and_offset(
            TEST_START_DATE,
            Utc,
        ));
        let shutdown_token = CancellationToken::new();

        let (_, daemon_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(4500)).await;
                shutdown_token.cancel()
            },
            run_daemon(mock_window_manager, clock, config.clone(), shutdown_token.clone()),
        );
        daemon_result?;

        let store = JsonFileStore::new(config.store_path.clone())?;
        let sessions = store.snapshot().await?;

        // Samples at 0..=4s: test, test, test b, test, test.
        assert_eq!(sessions.len(), 3);
        assert_eq!(
            sessions.last().map(|s| s.end()),
            Some(DateTime::<Utc>::from_naive_utc_and_offset(TEST_START_DATE, Utc) + chrono::Duration::seconds(4))
        );

        Ok(())
    }
}
