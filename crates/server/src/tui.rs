use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};

use crate::server::ServerStats;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    log: VecDeque<(LogLevel, String)>,
    scroll: usize,
    paused: bool,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            log: VecDeque::new(),
            scroll: 0,
            paused: false,
        }
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 5).min(self.log.len());
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(5);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(stats.cells.len() as u16 + 3),
            Constraint::Length(6),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state, stats);
    render_cells(frame, chunks[1], stats);
    render_traffic(frame, chunks[2], stats);
    render_log(frame, chunks[3], state);
    render_help(frame, chunks[4]);
}

fn render_header(frame: &mut Frame, area: Rect, state: &TuiState, stats: &ServerStats) {
    let title = format!(" cellmesh - Uptime: {} ", format_duration(stats.uptime_secs));
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let reals: usize = stats.cells.iter().map(|c| c.reals).sum();
    let ghosts: usize = stats.cells.iter().map(|c| c.ghosts).sum();
    let text = format!(
        "Tick: {} @ {}Hz{}  |  Cells: {}  |  Reals: {}  |  Ghosts: {}",
        stats.tick,
        stats.tick_rate,
        if state.is_paused() { " (paused)" } else { "" },
        stats.cells.len(),
        reals,
        ghosts
    );
    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_cells(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let header = Row::new(vec![
        "Process", "Spaces", "Reals", "Ghosts", "Migrating", "Staged", "Routes", "Observers",
    ])
    .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows = stats.cells.iter().map(|cell| {
        Row::new(vec![
            cell.process.to_string(),
            cell.spaces.to_string(),
            cell.reals.to_string(),
            cell.ghosts.to_string(),
            cell.migrating.to_string(),
            cell.staged.to_string(),
            cell.routes.to_string(),
            cell.observers.to_string(),
        ])
    });

    let table = Table::new(rows, [Constraint::Length(10); 8])
        .header(header)
        .block(
            Block::default()
                .title(" Cells ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Green)),
        );
    frame.render_widget(table, area);
}

fn render_traffic(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Traffic ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let bus = &stats.bus;
    let label = Style::default().fg(Color::Gray);
    let value = Style::default().fg(Color::White);
    let lines = vec![
        Line::from(vec![
            Span::styled("Messages: ", label),
            Span::styled(
                format!(
                    "{} sent / {} delivered / {} dropped / {} in flight ({})",
                    bus.sent,
                    bus.delivered,
                    bus.dropped,
                    stats.in_flight,
                    format_bytes(bus.bytes_sent)
                ),
                value,
            ),
        ]),
        Line::from(vec![
            Span::styled("AOI: ", label),
            Span::styled(
                format!(
                    "{} packets ({})",
                    stats.aoi_packets,
                    format_bytes(stats.aoi_bytes)
                ),
                value,
            ),
        ]),
        Line::from(vec![
            Span::styled("Migrations: ", label),
            Span::styled(
                format!(
                    "{} committed / {} rolled back",
                    stats.migrations_committed, stats.migrations_rolled_back
                ),
                Style::default().fg(if stats.migrations_rolled_back > 0 {
                    Color::Yellow
                } else {
                    Color::White
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Backups: ", label),
            Span::styled(
                format!(
                    "{} stored / {} failed",
                    stats.backups_stored, stats.backups_failed
                ),
                Style::default().fg(if stats.backups_failed > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let visible = area.height.saturating_sub(2) as usize;
    let end = state.log.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(visible);
    let lines: Vec<Line> = state
        .log
        .range(start..end)
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(message.clone(), Style::default().fg(color)))
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/ESC quit  |  p pause  |  PgUp/PgDn scroll  |  End follow")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );
    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
