//! livepreview CLI - The `preview` command.
//!
//! Runs a component source file through the live-preview runtime.
//!
//! # Architecture
//!
//! - **livepreview-core**: compilation pipeline, sandbox host, diagnostics
//! - **livepreview-http**: REST + WebSocket API over the runtime handle
//!
//! The CLI owns the file watcher, the terminal UI, and the threads hosting
//! the HTTP server.

mod tui;
mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livepreview_core::{
    react_vite_template, validate_source, DevServerRenderer, PreviewConfig, PreviewHandle,
    PreviewRuntime, PreviewState, ToolchainEvent, ToolchainRenderer,
};
use livepreview_core::toolchain::REACT_VITE_ENTRY;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use watch::SourceWatcher;

/// livepreview - live component previews
#[derive(Parser, Debug)]
#[command(name = "preview")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live-preview runtime for JSX-style component scripts", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Preview a component file
    Run {
        /// Path to the component source
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Recompile when the file changes
        #[arg(short, long)]
        watch: bool,

        /// Enable TUI mode (Terminal User Interface)
        #[arg(long)]
        tui: bool,

        /// Serve the HTTP API on the configured port
        #[arg(long)]
        serve: bool,

        /// Serve the HTTP API on this port (implies --serve)
        #[arg(short, long)]
        port: Option<u16>,

        /// Config file (defaults to the user config directory)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Compile and evaluate a file once, reporting errors
    Check {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Print the compiled artifact
        #[arg(long)]
        show_artifact: bool,
    },

    /// Render the file with the external dev-server toolchain
    Dev {
        /// Component source used as the app entry (a starter app if omitted)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Write a commented default config file
    InitConfig {
        /// Target path (defaults to the user config directory)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Run {
            file,
            watch,
            tui: tui_mode,
            serve,
            port,
            config,
        } => run_preview(file, watch, tui_mode, serve, port, config.as_deref()),
        Commands::Check {
            file,
            config,
            show_artifact,
        } => check_file(&file, config.as_deref(), show_artifact),
        Commands::Dev { file, config } => run_dev_server(file.as_deref(), config.as_deref()),
        Commands::InitConfig { path, force } => init_config(path, force),
        Commands::Version => {
            println!("preview {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Modular Architecture:");
            println!("  - livepreview-core: compiler, sandbox host, diagnostics");
            println!("  - livepreview-http: REST + WebSocket API");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PreviewConfig> {
    match path {
        Some(path) => PreviewConfig::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(PreviewConfig::load_or_default()),
    }
}

/// Flag set by SIGINT/SIGTERM for the plain (non-TUI) loops.
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        .context("Failed to install SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .context("Failed to install SIGTERM handler")?;
    Ok(flag)
}

fn run_preview(
    file: PathBuf,
    watch: bool,
    tui_mode: bool,
    serve: bool,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    // Initialize logger based on TUI mode
    if tui_mode {
        tui::init_tui_logger();
    } else {
        tui::init_logger();
    }

    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let config = load_config(config_path)?;
    let port = port.or(serve.then_some(config.server.port));

    log::info!("Loading: {}", file.display());
    let runtime = PreviewRuntime::start(&config).context("Failed to start preview runtime")?;
    let handle = runtime.handle().clone();

    if let Some(port) = port {
        spawn_http_server(handle.clone(), port)?;
    }

    let mut watcher = SourceWatcher::new(&file);
    handle.compile_now(watcher.read()?)?;

    let result = if tui_mode {
        run_tui_loop(&mut watcher, &handle, watch)
    } else {
        run_plain_loop(&mut watcher, &handle, watch)
    };

    runtime.shutdown();
    result
}

/// Host the HTTP API on a dedicated thread with its own tokio runtime.
fn spawn_http_server(handle: PreviewHandle, port: u16) -> Result<()> {
    std::thread::Builder::new()
        .name("preview-http".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("[HTTP] Failed to build tokio runtime: {}", e);
                    return;
                }
            };
            if let Err(e) = rt.block_on(livepreview_http::start_server(handle, port)) {
                log::error!("[HTTP] Server stopped: {}", e);
            }
        })
        .context("Failed to spawn HTTP thread")?;
    Ok(())
}

fn forward_change(watcher: &mut SourceWatcher, handle: &PreviewHandle) {
    match watcher.poll() {
        Some(Ok(text)) => {
            log::info!("File changed, recompiling...");
            tui::status(format!("Reloaded {}", watcher.path().display()));
            if let Err(e) = handle.source_changed(text) {
                log::error!("{}", e);
            }
        }
        Some(Err(e)) => log::error!("{:#}", e),
        None => {}
    }
}

/// Print the parts of a state change a terminal user cares about.
fn report_state(previous: Option<&PreviewState>, current: &PreviewState) {
    let view = &current.diagnostics;
    let error_changed = previous.map_or(true, |p| p.diagnostics.error != view.error);
    let frame_changed = previous.map_or(true, |p| p.diagnostics.frame != view.frame);

    if error_changed {
        if let Some(error) = &view.error {
            log::error!("{}", error.message);
        }
    }
    if frame_changed && !view.frame.outline.is_empty() {
        println!("── {} ──", current.generation);
        println!("{}", view.frame.outline);
    }
}

fn run_plain_loop(watcher: &mut SourceWatcher, handle: &PreviewHandle, watch: bool) -> Result<()> {
    let shutdown = shutdown_flag()?;
    if watch {
        log::info!("Watching {} (Ctrl+C to exit)", watcher.path().display());
    } else {
        log::info!("Preview running (Ctrl+C to exit)");
    }

    let mut last: Option<PreviewState> = None;
    while !shutdown.load(Ordering::Relaxed) {
        if watch {
            forward_change(watcher, handle);
        }

        let version = handle.state().version();
        if last.as_ref().map(|s| s.version) != Some(version) {
            let current = handle.snapshot();
            report_state(last.as_ref(), &current);
            last = Some(current);
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    log::info!("Interrupted, exiting");
    Ok(())
}

/// Run the TUI event loop
fn run_tui_loop(watcher: &mut SourceWatcher, handle: &PreviewHandle, watch: bool) -> Result<()> {
    // Shutdown signal shared between threads
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let tui_handle = handle.clone();
    let source_name = watcher
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tui_thread = std::thread::spawn(move || {
        run_tui_render_thread(shutdown_clone, tui_handle, source_name)
    });

    // Main thread handles file watching
    while !shutdown.load(Ordering::Relaxed) {
        if watch {
            forward_change(watcher, handle);
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    match tui_thread.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("TUI thread panicked"),
    }
}

/// TUI rendering thread - handles all UI updates and input
fn run_tui_render_thread(
    shutdown: Arc<AtomicBool>,
    handle: PreviewHandle,
    source_name: String,
) -> Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyModifiers},
        execute,
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    };
    use ratatui::{backend::CrosstermBackend, Terminal};
    use tui::app::KeyAction;

    let tui_receiver = tui::init_tui_channel();

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = tui::TuiApp::new(source_name);
    let mut seen_version = None;

    let result = loop {
        while let Ok(tui_event) = tui_receiver.try_recv() {
            app.process_event(tui_event);
        }

        let version = handle.state().version();
        if seen_version != Some(version) {
            app.update_state(handle.snapshot());
            seen_version = Some(version);
        }

        if let Err(e) = terminal.draw(|f| tui::ui::render_ui(f, &mut app)) {
            break Err(e.into());
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let action = match event::read()? {
            Event::Key(key) => match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    KeyAction::Quit
                }
                KeyCode::Esc => app.handle_escape(),
                KeyCode::Up => {
                    app.scroll_preview(-1);
                    KeyAction::None
                }
                KeyCode::Down => {
                    app.scroll_preview(1);
                    KeyAction::None
                }
                KeyCode::Char(c) => app.handle_char(c),
                _ => KeyAction::None,
            },
            // Terminal was resized, the next draw will handle it automatically
            _ => KeyAction::None,
        };

        let sent = match action {
            KeyAction::None => Ok(()),
            KeyAction::Quit => {
                shutdown.store(true, Ordering::Relaxed);
                break Ok(());
            }
            KeyAction::Refresh => handle.refresh(),
            KeyAction::ToggleArtifact => handle.toggle_artifact(),
            KeyAction::DismissError => handle.dismiss_error(),
        };
        if let Err(e) = sent {
            log::error!("{}", e);
        }
    };

    // Make sure the watcher thread stops even when drawing failed
    shutdown.store(true, Ordering::Relaxed);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn check_file(file: &Path, config_path: Option<&Path>, show_artifact: bool) -> Result<()> {
    tui::init_logger();
    let config = load_config(config_path)?;
    let source = SourceWatcher::new(file).read()?;

    let result = validate_source(&source, &config.sandbox);

    if show_artifact {
        if let Some(code) = &result.lowered {
            println!("{}", code);
        }
    }

    if result.is_ok() {
        if let Some(frame) = &result.frame {
            println!("{}", frame.outline);
        }
        println!("✓ {} OK", file.display());
        return Ok(());
    }

    for error in result.all_errors() {
        let position = match (error.line, error.column) {
            (Some(line), Some(column)) => format!(":{}:{}", line, column),
            (Some(line), None) => format!(":{}", line),
            _ => String::new(),
        };
        eprintln!("{}{}: {}", file.display(), position, error.message);
    }
    anyhow::bail!("{} error(s) in {}", result.all_errors().len(), file.display())
}

fn run_dev_server(file: Option<&Path>, config_path: Option<&Path>) -> Result<()> {
    tui::init_logger();
    let config = load_config(config_path)?;

    let app_source = match file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?,
        ),
        None => None,
    };
    let files = react_vite_template(app_source.as_deref());

    let shutdown = shutdown_flag()?;
    let mut renderer = DevServerRenderer::new(config.toolchain.clone());
    let mut server = renderer
        .launch(&files, REACT_VITE_ENTRY)
        .context("Failed to launch dev server")?;

    log::info!("Project written to {}", server.root().display());
    let url = server.wait_ready(config.toolchain.ready_timeout)?;
    println!("Dev server ready at {}", url);
    println!("(Press Ctrl+C to stop)");

    while !shutdown.load(Ordering::Relaxed) {
        while let Ok(event) = server.events().try_recv() {
            match event {
                ToolchainEvent::Status(line) => log::debug!("[TOOLCHAIN] {}", line),
                ToolchainEvent::Failed(reason) => {
                    server.stop();
                    anyhow::bail!("Dev server failed: {}", reason);
                }
                ToolchainEvent::Ready(_) => {}
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    server.stop();
    log::info!("Dev server stopped");
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => PreviewConfig::config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    PreviewConfig::create_default_config_file(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
