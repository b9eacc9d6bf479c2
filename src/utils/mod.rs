pub mod clock;
pub mod dir;
pub mod logging;
pub mod time;

/// The daemon does little CPU work, so a current-thread runtime is enough to drive sampling,
/// persistence and IPC.
pub fn single_thread_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
