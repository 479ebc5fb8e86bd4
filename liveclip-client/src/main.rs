use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    time::Duration,
};

use clap::{Parser, Subcommand};
use liveclip_client::{
    config::{
        SavedClientConfig, config_path, load_config, save_config_with_retry, validate_config,
    },
    decay::{DecayRenderer, TICK, now_unix_ms},
    endpoint::endpoint_from_origin,
    ingest::{IngestError, IngestPipeline, SystemClipboard},
    logging::init_logging,
    supervisor::{Supervisor, SupervisorHandle, SupervisorOptions},
    transport::{Delivery, DropReason, SendOutcome},
    view::render_frame,
    watcher::ClipboardWatcher,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

const SYNC_WAIT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "liveclip", about = "Share clipboard items with every device in the session")]
struct ClientArgs {
    /// Origin hosting the session, e.g. http://192.168.1.20:9000
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Seconds between resync requests; 0 disables them.
    #[arg(long, global = true)]
    resync_interval_secs: Option<u64>,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Store the effective settings as the new defaults.
    #[arg(long, global = true, default_value_t = false)]
    save_config: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live view of the shared items and their remaining lifetime.
    Watch,
    /// Send the current clipboard content once.
    Paste,
    /// Send a piece of text.
    SendText { text: String },
    /// Send a file. Only the first path is used.
    SendFile {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Send each line typed on stdin.
    Compose,
    /// Push clipboard changes automatically until interrupted.
    AutoPush {
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    init_logging(args.log_file.as_deref());

    let code = match run(args).await {
        Ok(()) => 0,
        Err(message) => {
            eprintln!("{message}");
            1
        }
    };
    std::process::exit(code);
}

fn resolve_config(args: &ClientArgs) -> Result<SavedClientConfig, String> {
    let mut cfg = match load_config() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => SavedClientConfig::default(),
        Err(err) => {
            warn!("saved config ignored: {}", err);
            SavedClientConfig::default()
        }
    };

    if let Some(origin) = &args.origin {
        cfg.origin = origin.trim().to_owned();
    }
    if let Some(secs) = args.resync_interval_secs {
        cfg.resync_interval_secs = secs;
    }
    if let Command::AutoPush {
        poll_interval_ms: Some(ms),
    } = args.command
    {
        cfg.poll_interval_ms = ms;
    }
    validate_config(&cfg)?;

    if args.save_config {
        let path = config_path();
        save_config_with_retry(&path, &cfg)
            .map_err(|err| format!("failed to save {}: {err}", path.display()))?;
        info!(path = %path.display(), "config saved");
    }
    Ok(cfg)
}

async fn run(args: ClientArgs) -> Result<(), String> {
    let cfg = resolve_config(&args)?;
    let endpoint = endpoint_from_origin(&cfg.origin).map_err(|err| err.to_string())?;
    info!(origin = %cfg.origin, endpoint = %endpoint, "starting");

    let supervisor = Supervisor::spawn(
        endpoint.clone(),
        SupervisorOptions {
            resync_interval: cfg.resync_interval(),
            ..SupervisorOptions::default()
        },
    );
    let handle = supervisor.handle();

    let needs_sync = !matches!(args.command, Command::Watch);
    let result = if needs_sync && !handle.wait_synced(SYNC_WAIT).await {
        Err(format!("could not reach {endpoint}"))
    } else {
        match args.command {
            Command::Watch => watch_view(&handle).await,
            Command::Paste => {
                let sink = handle.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    let mut clipboard = SystemClipboard::new()?;
                    IngestPipeline::new(sink).paste_clipboard(&mut clipboard)
                })
                .await
                .map_err(|err| err.to_string())?;
                report(outcome).await
            }
            Command::SendText { mut text } => {
                let outcome = IngestPipeline::new(&handle).submit_typed(&mut text);
                report(outcome).await
            }
            Command::SendFile { paths } => {
                let sink = handle.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    IngestPipeline::new(sink).capture_files(&paths)
                })
                .await
                .map_err(|err| err.to_string())?;
                report(outcome).await
            }
            Command::Compose => compose(&handle).await,
            Command::AutoPush { .. } => auto_push(&handle, cfg.poll_interval()).await,
        }
    };

    supervisor.shutdown().await;
    result
}

async fn report(outcome: Result<SendOutcome, IngestError>) -> Result<(), String> {
    let outcome = outcome.map_err(|err| err.user_message())?;
    match outcome {
        SendOutcome::Queued(receipt) => match receipt.delivery().await {
            Delivery::Written => {
                eprintln!("Sent.");
                Ok(())
            }
            Delivery::Failed => Err("Send failed: connection lost".to_owned()),
        },
        SendOutcome::Dropped(DropReason::NotConnected) => {
            Err("Send failed: not connected".to_owned())
        }
        SendOutcome::Dropped(DropReason::QueueFull) => {
            Err("Send failed: too many pending sends".to_owned())
        }
    }
}

async fn watch_view(handle: &SupervisorHandle) -> Result<(), String> {
    let mut snapshots = handle.snapshots();
    let mut states = handle.state();
    let renderer = DecayRenderer::default();
    let mut ticker = tokio::time::interval(TICK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = snapshots.changed() => if changed.is_err() { break },
            changed = states.changed() => if changed.is_err() { break },
            _ = &mut ctrl_c => break,
        }

        let snapshot = snapshots.borrow().clone();
        let state = *states.borrow();
        let frame = renderer.frame(&snapshot.items, now_unix_ms());
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\x1b[2J\x1b[H{}", render_frame(state, &frame));
        let _ = stdout.flush();
    }
    Ok(())
}

async fn compose(handle: &SupervisorHandle) -> Result<(), String> {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let pipeline = IngestPipeline::new(handle);
    while let Some(mut line) = line_rx.recv().await {
        match pipeline.submit_typed(&mut line) {
            Ok(outcome) => {
                if let Err(message) = report(Ok(outcome)).await {
                    eprintln!("{message}");
                }
            }
            Err(IngestError::EmptyText) => {}
            Err(err) => eprintln!("{}", err.user_message()),
        }
    }
    Ok(())
}

async fn auto_push(handle: &SupervisorHandle, poll_interval: Duration) -> Result<(), String> {
    let clipboard = SystemClipboard::new().map_err(|err| err.user_message())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    ClipboardWatcher::new()
        .run(clipboard, handle, poll_interval, shutdown_rx)
        .await;
    Ok(())
}
