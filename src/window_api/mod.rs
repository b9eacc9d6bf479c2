//! Contains logic for querying the foreground window in different environments.
//! [GenericWindowManager] is the main artifact of this module that abstracts
//! the operations.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::{path::Path, sync::Arc};

use anyhow::Result;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindowData {
    /// Executable name of the foreground process. For example 'nvim' or 'chrome.exe'
    pub app: Arc<str>,
    /// Title of the foreground window. For example 'Document 1' or 'Vibing in YouTube - Chrome'
    pub task: Arc<str>,
}

impl ActiveWindowData {
    /// Builds window data from a full executable path and a raw window title.
    pub fn from_raw(process_path: &str, window_title: &str) -> Self {
        Self {
            app: clean_process_name(process_path).into(),
            task: window_title.replace('\u{0}', "").into(),
        }
    }
}

/// Strips the directory part of an executable path.
pub fn clean_process_name(value: &str) -> String {
    Path::new(value)
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| value.to_string())
}

/// Intended to serve as a contract windows and linux systems must implement.
#[cfg_attr(test, automock)]
pub trait WindowManager: Send {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData>;

    /// Retrieve amount of time user has been inactive in milliseconds
    fn get_idle_time(&mut self) -> Result<u32>;
}

/// Serves as a cross-compatible WindowManager implementation.
pub struct GenericWindowManager {
    inner: Box<dyn WindowManager>,
}

impl GenericWindowManager {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsWindowManager;
                Ok(Self {
                    inner: Box::new(WindowsWindowManager::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::LinuxWindowManager;
                Ok(Self {
                    inner: Box::new(LinuxWindowManager::new()?),
                })
            }
            else {
                Err(anyhow::anyhow!(
                    "No window manager backend was compiled in. Enable the `win` or `x11` feature"
                ))
            }
        }
    }
}

impl WindowManager for GenericWindowManager {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        self.inner.get_active_window_data()
    }

    fn get_idle_time(&mut self) -> Result<u32> {
        self.inner.get_idle_time()
    }
}
