pub mod daemon_path;
pub mod process;
pub mod view;

use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use daemon_path::to_daemon_path;
use process::{kill_previous_servers, restart_server};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    daemon::{
        args::DaemonArgs,
        config::{DEFAULT_IPC_ADDR, RecorderConfig},
        ipc::client::RecorderClient,
        start_daemon,
    },
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{CLI_PREFIX, enable_logging},
    },
};

#[derive(Parser, Debug)]
#[command(name = "traco", version, long_about = None)]
#[command(about = "Records which application and task you spend your time on", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(long, global = true, default_value_t = DEFAULT_IPC_ADDR, help = "Local address of the daemon")]
    addr: SocketAddr,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application, replacing a running one")]
    Init {
        #[arg(long, help = "Start tracking right away")]
        autostart: bool,
    },
    #[command(
        about = "Run a daemon directly in current console. Used for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
        #[arg(long, help = "Start tracking right away")]
        autostart: bool,
    },
    #[command(about = "Stop currently running daemon")]
    Kill {},
    #[command(about = "Start recording sessions")]
    Start {},
    #[command(about = "Stop recording and save the open session")]
    Stop {},
    #[command(about = "List recorded sessions with their total duration")]
    Sessions {},
    #[command(about = "Show whether tracking is on and the open session")]
    Status {},
    #[command(about = "Print recorder events as they happen")]
    Watch {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let app_dir = create_application_default_path()?;
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init { autostart } => {
            restart_server(args.addr, autostart)?;
            println!("Daemon started on {}", args.addr);
            Ok(())
        }
        Commands::Kill {} => {
            let daemon_path = to_daemon_path(env::current_exe()?);
            let killed = kill_previous_servers(&daemon_path)?;
            info!("Stopped {killed} daemons");
            println!("Stopped {killed} daemon(s)");
            Ok(())
        }
        Commands::Serve { dir, autostart } => {
            let app_dir = dir.map_or(Ok(app_dir), ensure_dir)?;
            let daemon_args = DaemonArgs {
                force: true,
                addr: Some(args.addr),
                autostart,
                ..Default::default()
            };
            start_daemon(RecorderConfig::from_args(&daemon_args, &app_dir)).await
        }
        Commands::Start {} => {
            RecorderClient::connect(args.addr).await?.start_tracking().await?;
            println!("Tracking started");
            Ok(())
        }
        Commands::Stop {} => {
            RecorderClient::connect(args.addr).await?.stop_tracking().await?;
            println!("Tracking stopped");
            Ok(())
        }
        Commands::Sessions {} => {
            let sessions = RecorderClient::connect(args.addr).await?.get_sessions().await?;
            print!("{}", view::render_sessions(&sessions));
            Ok(())
        }
        Commands::Status {} => {
            let status = RecorderClient::connect(args.addr).await?.status().await?;
            println!("{}", view::render_status(&status));
            Ok(())
        }
        Commands::Watch {} => {
            let mut events = RecorderClient::connect(args.addr).await?.subscribe().await?;
            while let Some(event) = events.next().await? {
                println!("{}", view::render_event(&event));
            }
            Ok(())
        }
    }
}
