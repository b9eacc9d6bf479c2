// This runs daemon on windows without creating a console. Disable during development to see
// stdout.
#![windows_subsystem = "windows"]

use std::env::args;

use anyhow::Result;
use clap::Parser;
use traco::{
    daemon::{args::DaemonArgs, config::RecorderConfig, start_daemon},
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{DAEMON_PREFIX, enable_logging},
        single_thread_runtime,
    },
};

fn main() -> Result<()> {
    let command_args = args().collect::<Vec<_>>();
    let args = DaemonArgs::parse_from(&command_args);

    if !args.force && detach(command_args)? == Detached::Parent {
        println!("Created daemon");
        return Ok(());
    }
    run(args)
}

#[derive(Debug, PartialEq, Eq)]
enum Detached {
    /// The recorder keeps running elsewhere, this process should exit.
    Parent,
    /// This process is the recorder.
    Child,
}

#[cfg(feature = "win")]
fn detach(mut command_args: Vec<String>) -> Result<Detached> {
    use std::os::windows::process::CommandExt;
    use std::process::{Command, Stdio};
    use windows::Win32::System::Threading::DETACHED_PROCESS;

    command_args.push("--force".into());
    let mut command = Command::new(std::env::current_exe()?);
    command
        .args(command_args.into_iter().skip(1))
        .creation_flags(DETACHED_PROCESS.0)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[allow(clippy::zombie_processes)]
    command.spawn()?;
    Ok(Detached::Parent)
}

#[cfg(all(unix, not(feature = "win")))]
fn detach(_command_args: Vec<String>) -> Result<Detached> {
    use daemonize::{Daemonize, Outcome, Stdio};

    let outcome = Daemonize::new()
        .stdout(Stdio::devnull())
        .stderr(Stdio::devnull())
        .execute();
    match outcome {
        Outcome::Parent(parent) => {
            parent?;
            Ok(Detached::Parent)
        }
        Outcome::Child(child) => {
            child?;
            Ok(Detached::Child)
        }
    }
}

#[cfg(not(any(unix, feature = "win")))]
fn detach(_command_args: Vec<String>) -> Result<Detached> {
    Ok(Detached::Child)
}

fn run(args: DaemonArgs) -> Result<()> {
    let app_dir = args
        .dir
        .clone()
        .map_or_else(create_application_default_path, ensure_dir)?;
    enable_logging(DAEMON_PREFIX, &app_dir, args.log, args.log_console)?;
    let config = RecorderConfig::from_args(&args, &app_dir);
    single_thread_runtime()?.block_on(start_daemon(config))?;
    Ok(())
}
