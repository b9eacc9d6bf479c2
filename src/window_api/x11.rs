use anyhow::{Result, anyhow};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::instrument;
use xcb::{
    Connection,
    screensaver::{QueryInfo, QueryInfoReply},
    x::{ATOM_ANY, Atom, Drawable, GetProperty, GrabServer, InternAtom, PropEl, UngrabServer, Window},
};

use super::{ActiveWindowData, WindowManager};

/// Longest window title read from `_NET_WM_NAME`, in 32 bit units.
const MAX_TITLE_WORDS: u32 = 1024;

struct Atoms {
    active_window: Atom,
    window_name: Atom,
    pid: Atom,
}

impl Atoms {
    fn intern(conn: &Connection) -> Result<Self> {
        Ok(Self {
            active_window: intern(conn, b"_NET_ACTIVE_WINDOW")?,
            window_name: intern(conn, b"_NET_WM_NAME")?,
            pid: intern(conn, b"_NET_WM_PID")?,
        })
    }
}

fn intern(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn property<T: PropEl + Copy>(
    conn: &Connection,
    window: Window,
    property: Atom,
    long_length: u32,
) -> Result<Vec<T>> {
    let reply = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length,
    }))?;
    Ok(reply.value::<T>().to_vec())
}

/// Reads the foreground window through EWMH hints. The app is the executable of the process
/// owning the window, the task is the window title.
pub struct LinuxWindowManager {
    connection: Connection,
    preferred_screen: i32,
    atoms: Atoms,
    system: System,
}

impl LinuxWindowManager {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = Connection::connect(None)?;
        let atoms = Atoms::intern(&connection)?;
        Ok(Self {
            connection,
            preferred_screen,
            atoms,
            system: System::new(),
        })
    }

    // Only one X11 screen is supported.
    fn root(&self) -> Result<Window> {
        self.connection
            .get_setup()
            .roots()
            .nth(self.preferred_screen.max(0) as usize)
            .map(|screen| screen.root())
            .ok_or_else(|| anyhow!("X11 screen {} is missing", self.preferred_screen))
    }

    fn executable_of(&mut self, pid: u32) -> Result<String> {
        let pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .and_then(|process| process.exe())
            .and_then(|exe| exe.to_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("Process {pid} has no readable executable"))
    }

    fn read_foreground(&mut self) -> Result<ActiveWindowData> {
        let conn = &self.connection;
        let window = property::<Window>(conn, self.root()?, self.atoms.active_window, 1)?
            .first()
            .copied()
            .ok_or_else(|| anyhow!("No active window is reported by the window manager"))?;
        let title = property::<u8>(conn, window, self.atoms.window_name, MAX_TITLE_WORDS)?;
        let pid = property::<u32>(conn, window, self.atoms.pid, 1)?
            .first()
            .copied()
            .ok_or_else(|| anyhow!("Active window has no _NET_WM_PID"))?;

        let title = String::from_utf8_lossy(&title).into_owned();
        let executable = self.executable_of(pid)?;
        Ok(ActiveWindowData::from_raw(&executable, &title))
    }
}

impl WindowManager for LinuxWindowManager {
    #[instrument(skip(self))]
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        // Keeps the active window from changing between the property reads.
        let _ = self.connection.send_request(&GrabServer {});
        let result = self.read_foreground();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }

    #[instrument(skip(self))]
    fn get_idle_time(&mut self) -> Result<u32> {
        let cookie = self.connection.send_request(&QueryInfo {
            drawable: Drawable::Window(self.root()?),
        });
        let reply: QueryInfoReply = self.connection.wait_for_reply(cookie)?;
        Ok(reply.ms_since_user_input())
    }
}
