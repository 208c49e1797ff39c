use anyhow::Result;
use clap::Parser;
use crossterm::cursor::Show;
use crossterm::event::{Event, EventStream};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use futures_util::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::{self, Stdout, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tunnel_console::bridge::EventSource;
use tunnel_console::cli::Args;
use tunnel_console::config::{spawn_config_watcher, BackendKind, ConsoleConfig};
use tunnel_console::console::{ActivityLog, ConsoleDriver, KeyAction};
use tunnel_console::controller::ConnectionController;
use tunnel_console::gateway::ForwardBackend;
use tunnel_console::ipc::IpcBackend;
use tunnel_console::simulate::SimulatedBackend;
use tunnel_console::status_http::run_http_server;
use tunnel_console::ui::{self, Screen};

fn init_logging(config: &ConsoleConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot initialize logging: {e}"))
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor()?;
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = ConsoleConfig::config_path()?;
    let config_file_exists = config_path.exists();

    let mut config = ConsoleConfig::load_or_default();
    let args_provided = config.merge_with_args(&args);

    // Only write the file back when something changed, so hand edits survive.
    if args_provided || !config_file_exists {
        config.save()?;
    }

    init_logging(&config)?;
    info!("Tunnel console starting, backend {:?}", config.backend);

    match config.backend {
        BackendKind::Ipc => {
            println!("Connecting to backend at {}...", config.backend_addr);
            let backend = match IpcBackend::connect(&config.backend_addr).await {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    eprintln!("Start the backend process or run with --backend simulate");
                    return Err(e);
                }
            };
            run(Arc::new(backend), config, config_path, args.quiet).await
        }
        BackendKind::Simulate => {
            run(Arc::new(SimulatedBackend::new()), config, config_path, args.quiet).await
        }
    }
}

async fn run<B>(backend: Arc<B>, config: ConsoleConfig, config_path: PathBuf, quiet: bool) -> Result<()>
where
    B: ForwardBackend + EventSource,
{
    let mut activity = ActivityLog::new(quiet);
    let backend_label = match config.backend {
        BackendKind::Ipc => format!("ipc {}", config.backend_addr),
        BackendKind::Simulate => "simulated".to_string(),
    };
    activity.push(format!("Tunnel console started. Backend: {}", backend_label));
    activity.push(format!("Config file: {}", config_path.display()));
    activity.push(format!("Log file: {}", config.log_file));

    let controller = ConnectionController::new(config.session_draft(), config.controller_settings());
    let mut driver = ConsoleDriver::new(controller, backend, activity);

    let (config_watch, served_config) = watch::channel(config.clone());
    if config.httpd_enabled {
        let view = driver.status_receiver();
        let httpd_ip = config.httpd_ip.clone();
        let httpd_port = config.httpd_port;
        tokio::spawn(async move {
            if let Err(e) = run_http_server(httpd_ip, httpd_port, view, served_config).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let (config_tx, config_rx) = mpsc::unbounded_channel();
    spawn_config_watcher(config_path.clone(), config_tx);

    // Clear anything printed while connecting
    print!("\x1B[2J\x1B[1;1H");
    io::stdout().flush()?;

    enable_raw_mode()?;
    let mut stdout_handle = io::stdout();
    stdout_handle.execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout_handle))?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = io::stdout().execute(LeaveAlternateScreen);
        let _ = io::stdout().execute(Show);
        original_hook(panic_info);
    }));

    let status_line = format!(
        "Backend: {} | Tab/Up/Down: field | Enter: connect/stop | Esc: stop | Ctrl+C: quit",
        backend_label
    );

    let result = event_loop(
        &mut terminal,
        &mut driver,
        config,
        config_rx,
        &config_watch,
        &status_line,
    )
    .await;

    let restored = restore_terminal(&mut terminal);
    driver.shutdown().await;
    restored?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    driver: &mut ConsoleDriver,
    mut config: ConsoleConfig,
    mut config_rx: mpsc::UnboundedReceiver<ConsoleConfig>,
    config_watch: &watch::Sender<ConsoleConfig>,
    status_line: &str,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(config.tick_rate());

    loop {
        let view = driver.view();
        terminal.draw(|f| {
            ui::render(
                f,
                &Screen {
                    view: &view,
                    draft: driver.controller().draft(),
                    telemetry: driver.controller().telemetry(),
                    focus: driver.focus(),
                    activity: driver.activity().lines(),
                    status_line,
                },
            )
        })?;

        tokio::select! {
            _ = ticker.tick() => {}
            event = driver.next_event() => driver.dispatch(event),
            Some(new_config) = config_rx.recv() => {
                driver.apply_config(&config, &new_config);
                config_watch.send_replace(new_config.clone());
                config = new_config;
            }
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) => {
                    if driver.handle_key(key) == KeyAction::Quit {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
    }

    Ok(())
}
