pub mod bridge;
pub mod config;
pub mod download;
mod logger;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::bridge::process::ProcessBridge;
use crate::config::{BackendConfig, PanelConfig};
use crate::download::view::{render_list, RowAction};
use crate::download::{CommandOutcome, DownloadStateTracker};

#[derive(Debug, Parser)]
#[command(name = "vn-panel", version, about = "Active downloads panel for the visual novel manager")]
struct Cli {
    /// Path to config.json (defaults to the user config dir).
    #[arg(long, env = "VN_PANEL_CONFIG")]
    config: Option<PathBuf>,

    /// Backend command line, e.g. `python3 backend.py`. Overrides the config file.
    #[arg(long)]
    backend: Option<String>,
}

fn apply_backend_override(backend: &mut BackendConfig, cmdline: &str) -> Result<(), String> {
    let mut parts =
        shlex::split(cmdline).ok_or_else(|| format!("cannot parse backend command line: {cmdline}"))?;
    if parts.is_empty() {
        return Err("backend command line is empty".to_string());
    }
    backend.program = parts.remove(0);
    backend.args = parts;
    Ok(())
}

/// `pause <gameId>`, `resume <gameId>` or `cancel <gameId>` typed on stdin.
fn parse_panel_command(line: &str) -> Option<(RowAction, String)> {
    let mut words = line.split_whitespace();
    let action = match words.next()?.to_lowercase().as_str() {
        "pause" => RowAction::Pause,
        "resume" => RowAction::Resume,
        "cancel" => RowAction::Cancel,
        _ => return None,
    };
    let game_id = words.next()?.to_string();
    if words.next().is_some() {
        return None;
    }
    Some((action, game_id))
}

async fn dispatch(tracker: &DownloadStateTracker, action: RowAction, game_id: &str) {
    let outcome = match action {
        RowAction::Pause => tracker.pause(game_id).await,
        RowAction::Resume => tracker.resume(game_id).await,
        RowAction::Cancel => tracker.cancel(game_id).await,
    };
    if outcome != CommandOutcome::Accepted {
        eprintln!("{action:?} {game_id}: {outcome:?}");
    }
}

/// Renders on every change and runs stdin commands until `shutdown` resolves,
/// the backend dies or the view closes. `shutdown` is polled across
/// iterations, so a signal raised while a command is in flight is not lost.
async fn host_loop<R, S>(
    tracker: &DownloadStateTracker,
    input: R,
    backend_alive: impl Fn() -> bool,
    shutdown: S,
) -> Result<(), String>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut view = tracker.subscribe();
    println!("{}", render_list(&view.borrow_and_update()));

    let mut input = input.lines();
    let mut input_open = true;
    let mut health = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Interrupted, shutting down");
                return Ok(());
            }
            changed = view.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let list = view.borrow_and_update().clone();
                println!("\n{}", render_list(&list));
            }
            line = input.next_line(), if input_open => {
                match line {
                    Ok(Some(line)) => match parse_panel_command(&line) {
                        Some((action, game_id)) => dispatch(tracker, action, &game_id).await,
                        None if line.trim().is_empty() => {}
                        None => eprintln!("usage: pause|resume|cancel <gameId>"),
                    },
                    Ok(None) | Err(_) => input_open = false,
                }
            }
            _ = health.tick() => {
                if !backend_alive() {
                    return Err("backend exited".to_string());
                }
            }
        }
    }
}

async fn serve(cfg: PanelConfig) -> Result<(), String> {
    let bridge = Arc::new(ProcessBridge::spawn(&cfg.backend).map_err(|e| e.to_string())?);
    let tracker = DownloadStateTracker::new(bridge.clone(), bridge.clone(), cfg.downloads.clone());
    tracker.start();

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };
    let result = host_loop(
        &tracker,
        BufReader::new(tokio::io::stdin()),
        || !bridge.is_closed(),
        interrupted,
    )
    .await;

    tracker.stop();
    bridge.shutdown();
    result
}

fn run_with(cli: Cli) -> Result<(), String> {
    let path = cli
        .config
        .or_else(config::default_config_path)
        .ok_or_else(|| "failed to resolve config dir".to_string())?;
    let loaded = config::load(&path)?;
    let from_file = loaded.is_some();
    let mut cfg = loaded.unwrap_or_default();
    if let Some(cmdline) = cli.backend.as_deref() {
        apply_backend_override(&mut cfg.backend, cmdline)?;
    }

    logger::init(&cfg.log)?;
    if from_file {
        log::info!("config: {}", path.display());
    } else {
        log::info!("No config at {}, using defaults", path.display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    runtime.block_on(serve(cfg))
}

pub fn run() {
    let cli = Cli::parse();
    if let Err(e) = run_with(cli) {
        log::error!("vn-panel failed: {e}");
        eprintln!("vn-panel: {e}");
        std::process::exit(1);
    }
}
