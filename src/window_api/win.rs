use anyhow::{Result, anyhow};
use tracing::{error, warn};
use windows::{
    Win32::{
        Foundation::{BOOL, CloseHandle, GetLastError, HANDLE, HWND},
        System::{
            Diagnostics::Debug::{
                FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS, FormatMessageW,
            },
            SystemInformation::GetTickCount64,
            SystemServices::{LANG_ENGLISH, SUBLANG_ENGLISH_US},
            Threading::{
                OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
                QueryFullProcessImageNameW,
            },
        },
        UI::{
            Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO},
            WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId},
        },
    },
    core::PWSTR,
};

use super::{ActiveWindowData, WindowManager};

const TEXT_BUFFER_LEN: usize = 4096;

/// Human readable text of the calling thread's last Win32 error.
fn last_error_message() -> String {
    let err = unsafe { GetLastError() };
    let mut buffer = [0u16; 2048];
    let size = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            err.0,
            LANG_ENGLISH | (SUBLANG_ENGLISH_US << 10),
            PWSTR::from_raw(buffer.as_mut_ptr()),
            buffer.len() as u32,
            None,
        )
    };
    if size == 0 {
        format!("error code {}", err.0)
    } else {
        String::from_utf16_lossy(&buffer[..size as usize])
            .trim_end()
            .to_owned()
    }
}

/// Process handle that is closed when dropped.
struct OwnedProcess(HANDLE);

impl OwnedProcess {
    fn open(pid: u32) -> Result<Self> {
        let handle = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
                BOOL::from(false),
                pid,
            )
        }?;
        Ok(Self(handle))
    }

    fn executable_path(&self, buffer: &mut [u16]) -> Result<String> {
        let mut length = buffer.len() as u32;
        unsafe {
            QueryFullProcessImageNameW(
                self.0,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut length,
            )
        }?;
        Ok(String::from_utf16_lossy(&buffer[..length as usize]))
    }
}

impl Drop for OwnedProcess {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.0) } {
            warn!("Failed to close process handle {e:?}");
        }
    }
}

fn window_title(window: HWND, buffer: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window, buffer) };
    String::from_utf16_lossy(&buffer[..len.max(0) as usize])
}

/// Reads the foreground window through Win32. The app is the image path of the owning process,
/// the task is the window title.
pub struct WindowsWindowManager {
    buffer: Box<[u16; TEXT_BUFFER_LEN]>,
}

impl WindowsWindowManager {
    pub fn new() -> Self {
        Self {
            buffer: Box::new([0; TEXT_BUFFER_LEN]),
        }
    }

    fn read_foreground(&mut self) -> Result<ActiveWindowData> {
        let window = unsafe { GetForegroundWindow() };
        if window.is_invalid() {
            return Err(anyhow!("No foreground window"));
        }

        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(window, Some(&mut pid)) };
        if pid == 0 {
            return Err(anyhow!(
                "Failed to get foreground window process {}",
                last_error_message()
            ));
        }

        let executable = OwnedProcess::open(pid)?.executable_path(&mut self.buffer[..])?;
        let title = window_title(window, &mut self.buffer[..]);
        Ok(ActiveWindowData::from_raw(&executable, &title))
    }
}

impl Default for WindowsWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowManager for WindowsWindowManager {
    #[tracing::instrument(skip(self))]
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        self.read_foreground()
            .inspect_err(|e| error!("Failed to get active window {e:?}"))
    }

    fn get_idle_time(&mut self) -> Result<u32> {
        let mut last = LASTINPUTINFO {
            cbSize: size_of::<LASTINPUTINFO>() as u32,
            dwTime: 0,
        };
        if !unsafe { GetLastInputInfo(&mut last) }.as_bool() {
            let message = last_error_message();
            error!("Failed to retrieve user idle time {message}");
            return Err(anyhow!("Failed to retrieve user idle time {message}"));
        }

        // GetLastInputInfo reports a 32 bit tick count that wraps every ~49 days.
        let now = unsafe { GetTickCount64() } as u32;
        Ok(now.wrapping_sub(last.dwTime))
    }
}
