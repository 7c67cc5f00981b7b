mod config;
mod events;
mod persistence;
mod server;
mod simulation;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use cellmesh::{CellConfig, LinkConditions};
use config::ServerConfig;
use server::DemoServer;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "cellmesh-server")]
#[command(about = "Runs a cluster of cells in one process with wandering entities")]
struct Args {
    #[arg(short, long, default_value_t = 3)]
    cells: u32,

    #[arg(short, long, default_value_t = cellmesh::config::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 40)]
    npcs: u32,

    #[arg(short, long, default_value_t = 2)]
    observers: u32,

    #[arg(long, default_value_t = 80.0, help = "AOI radius of observers")]
    aoi_radius: f32,

    #[arg(long, default_value_t = 60.0, help = "Distance to a neighbor cell that creates a ghost")]
    ghost_distance: f32,

    #[arg(long, default_value_t = 50, help = "Ticks between forced cross-cell teleports, 0 disables")]
    teleport_interval: u32,

    #[arg(long, default_value_t = 0, help = "Extra link delay in ticks")]
    delay: u32,

    #[arg(long, default_value_t = 0, help = "Link jitter in ticks")]
    jitter: u32,

    #[arg(long, default_value_t = 0.0, help = "Message loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, help = "Directory for backup and archive files")]
    backup_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 8, help = "Concurrent persistence writes")]
    max_pending_writes: usize,

    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    #[arg(long)]
    headless: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut cell = CellConfig {
            tick_rate: self.tick_rate,
            ..CellConfig::default()
        };
        cell.aoi.default_radius = self.aoi_radius;
        cell.ghost.ghost_distance = self.ghost_distance;

        let defaults = ServerConfig::default();
        ServerConfig {
            cell,
            cells: self.cells.max(1),
            npcs_per_cell: self.npcs,
            observers_per_cell: self.observers,
            teleport_interval_ticks: self.teleport_interval,
            link: LinkConditions {
                delay_ticks: self.delay,
                jitter_ticks: self.jitter,
                loss_percent: self.loss_percent.clamp(0.0, 100.0),
            },
            backup_dir: self.backup_dir.unwrap_or(defaults.backup_dir.clone()),
            max_pending_writes: self.max_pending_writes,
            seed: self.seed,
            ..defaults
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let headless = args.headless;
    let config = args.into_config();

    if headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let mut server = DemoServer::new(config, runtime.handle().clone())?;

    if headless {
        log::info!("cluster running");
        let running = server.running();
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().read_line(&mut line);
            running.store(false, Ordering::SeqCst);
        });
        run_headless(&mut server);
        log::info!("cluster shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    runtime.shutdown_timeout(Duration::from_secs(2));
    Ok(())
}

fn run_headless(server: &mut DemoServer) {
    let running = server.running();
    while running.load(Ordering::SeqCst) {
        server.tick_once();
        for event in server.drain_events() {
            if event.is_error() {
                log::warn!("{}", event.describe());
            } else {
                log::info!("{}", event.describe());
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    server.shutdown();
}

fn run_with_tui(server: &mut DemoServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();
    tui_state.log_info("cluster running");

    while running.load(Ordering::SeqCst) {
        if tui_state.is_paused() {
            server.skip_elapsed();
        } else {
            server.tick_once();
        }

        for event in server.drain_events() {
            match event {
                events::ServerEvent::Spawned { .. } => {}
                events::ServerEvent::Error { .. } => tui_state.log_error(event.describe()),
                events::ServerEvent::TeleportFailed { .. } => tui_state.log_warn(event.describe()),
                _ => tui_state.log_info(event.describe()),
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Char('p') => tui_state.toggle_pause(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        _ => {}
                    }
                }
            }
        }

        let stats = server.stats();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats);
        })?;
    }

    tui_state.log_info("shutting down");
    server.shutdown();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
