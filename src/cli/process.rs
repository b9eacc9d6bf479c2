use std::{env, net::SocketAddr, path::Path, process::Stdio};

use anyhow::{Result, anyhow};
use sysinfo::{Signal, System, get_current_pid};
use tracing::{debug, info};

use super::daemon_path::to_daemon_path;

/// Terminates every process started from the executable at `name`, except this one and its
/// children. Returns how many were stopped.
pub fn kill_previous_servers(name: &Path) -> Result<usize> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Failed to get current pid {e}"))?;
    let mut killed = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            debug!("Stopping daemon process {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            killed += 1;
        }
    }
    Ok(killed)
}

/// Shuts down previously started daemons and spawns a new detached one listening on `addr`.
pub fn restart_server(addr: SocketAddr, autostart: bool) -> Result<()> {
    let daemon_path = to_daemon_path(env::current_exe()?);
    if !daemon_path.exists() {
        return Err(anyhow!("Daemon binary is missing at {daemon_path:?}"));
    }
    kill_previous_servers(&daemon_path)?;

    let mut command = std::process::Command::new(&daemon_path);
    command.args(["--force", "--addr", &addr.to_string()]);
    if autostart {
        command.arg("--autostart");
    }

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
    }

    #[allow(clippy::zombie_processes)]
    let child = command.spawn()?;
    info!("Spawned daemon {daemon_path:?} with pid {}", child.id());
    Ok(())
}
