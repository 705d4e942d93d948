mod actions;
mod app;
mod config;
mod host;
mod runner;
mod sequencer;
mod session;
mod template;
#[cfg(test)]
mod testing;
mod theme;
mod view;
mod wizard;

use std::fs::{self, OpenOptions};
use std::io::{self, stdout};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppEvent};
use crate::config::Settings;
use crate::host::{DryRunHost, Host, SystemHost};
use crate::runner::{CommandRunner, DryRunRunner, ShellRunner};

const TICK_RATE: Duration = Duration::from_millis(100);

/// Interactive console for nginx reverse proxies, ufw and TLS certificates
#[derive(Debug, Parser)]
#[command(name = "proxy-console", version, about)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory proxy configs are written to
    #[arg(long, value_name = "DIR")]
    configs_dir: Option<PathBuf>,

    /// Directory holding certificates and keys
    #[arg(long, value_name = "DIR")]
    cert_dir: Option<PathBuf>,

    /// Diagnostic log file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Show commands instead of running them; never modifies the system
    #[arg(long)]
    dry_run: bool,

    /// Print the effective settings as JSON and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.configs_dir {
            settings.configs_dir = dir.clone();
        }
        if let Some(dir) = &self.cert_dir {
            settings.cert_dir = dir.clone();
        }
        if let Some(path) = &self.log_file {
            settings.log_file = Some(path.clone());
        }
    }
}

/// Diagnostics go to a file; the terminal belongs to the UI.
fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let is_json = matches!(
        std::env::var("PROXY_CONSOLE_LOG_FORMAT").ok().as_deref(),
        Some("json") | Some("JSON")
    );
    if is_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    }
    Ok(())
}

/// Forward terminal input to the UI loop until the loop goes away.
fn spawn_input_thread(events: UnboundedSender<AppEvent>) {
    thread::spawn(move || {
        while !events.is_closed() {
            let event = match event::poll(TICK_RATE) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => AppEvent::Key(key),
                    Ok(Event::Resize(..)) => AppEvent::Resize,
                    Ok(_) => continue,
                    Err(e) => {
                        error!(error = %e, "Failed to read terminal event");
                        break;
                    }
                },
                Ok(false) => AppEvent::Tick,
                Err(e) => {
                    error!(error = %e, "Failed to poll terminal");
                    break;
                }
            };
            if events.send(event).is_err() {
                break;
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    cli.apply(&mut settings);

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    init_logging(&settings.log_path())?;
    info!(dry_run = cli.dry_run, configs_dir = %settings.configs_dir.display(), "Starting proxy-console");

    let (host, runner): (Arc<dyn Host>, Arc<dyn CommandRunner>) = if cli.dry_run {
        (Arc::new(DryRunHost::default()), Arc::new(DryRunRunner))
    } else {
        (
            Arc::new(SystemHost),
            Arc::new(ShellRunner::new(settings.shell.clone())),
        )
    };

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_input_thread(tx.clone());
    let mut app = App::new(settings, host, runner, tx);

    let result = run(&mut terminal, &mut app, rx).await;
    app.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    info!("Exiting");
    result
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut events: UnboundedReceiver<AppEvent>,
) -> Result<()> {
    loop {
        terminal.draw(|frame| view::render(frame, &app.session, app.tick))?;

        let Some(event) = events.recv().await else {
            break;
        };
        app.handle_event(event);
        // Apply everything already queued before drawing again
        while !app.should_quit() {
            match events.try_recv() {
                Ok(event) => app.handle_event(event),
                Err(_) => break,
            }
        }
        if app.should_quit() {
            break;
        }
    }
    Ok(())
}
