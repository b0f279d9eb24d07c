//! Live terminal dashboard
//!
//! One table row per active process, plus a summary line for the system
//! entity. Values come straight from each dispatcher's frontend snapshot.

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use pidmon_agent::frontend::{FrontendSnapshot, NOT_AVAILABLE, PROCESS_LABELS, SYSTEM_LABELS};
use pidmon_agent::Monitor;
use pidmon_common::EntityId;
use ratatui::{prelude::*, widgets::*};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(50);

pub struct Dashboard {
    monitor: Monitor,
    refresh: Duration,
    running: bool,
    snapshots: Vec<(EntityId, Arc<FrontendSnapshot>)>,
}

impl Dashboard {
    pub fn new(monitor: Monitor) -> Self {
        let refresh = monitor.config().dispatcher_interval;
        Self {
            monitor,
            refresh,
            running: true,
            snapshots: Vec::new(),
        }
    }

    /// Take over the terminal until the user quits or the tree is gone
    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;
        result
    }

    fn run_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
        let mut last_refresh: Option<Instant> = None;

        while self.running && self.monitor.has_live_processes() && !self.monitor.is_shutting_down() {
            if last_refresh.map_or(true, |t| t.elapsed() >= self.refresh) {
                self.snapshots = self.monitor.snapshots();
                last_refresh = Some(Instant::now());
            }

            terminal.draw(|f| self.draw(f))?;

            if event::poll(POLL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code, key.modifiers);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            // Raw mode swallows SIGINT
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.monitor.shutdown_token().cancel();
                self.running = false;
            }
            _ => {}
        }
    }

    fn draw(&self, f: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // system
                Constraint::Min(5),    // processes
                Constraint::Length(1), // keys
            ])
            .split(f.area());

        let system = system_summary(&self.snapshots)
            .unwrap_or_else(|| "system not monitored".to_string());
        let header = Paragraph::new(system).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(Span::styled(" pidmon ", Style::default().bold().fg(Color::Cyan))),
        );
        f.render_widget(header, rows[0]);

        let body: Vec<Row> = process_rows(&self.snapshots)
            .into_iter()
            .map(Row::new)
            .collect();
        let widths = [
            Constraint::Length(8),  // pid
            Constraint::Length(8),  // ppid
            Constraint::Min(16),    // name
            Constraint::Length(9),  // cpu%
            Constraint::Length(5),  // stat
            Constraint::Length(10), // cpu time
            Constraint::Length(13), // resident
            Constraint::Length(12), // threads
            Constraint::Length(18), // children
        ];
        let title = format!(" Processes ({}) ", body.len());
        let table = Table::new(body, widths)
            .header(Row::new(PROCESS_LABELS).style(Style::default().bold().fg(Color::Yellow)))
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(table, rows[1]);

        let keys = Paragraph::new(" q/Esc: leave dashboard   Ctrl-C: stop monitoring")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(keys, rows[2]);
    }
}

/// Process rows in label order, one per process entity
pub fn process_rows(snapshots: &[(EntityId, Arc<FrontendSnapshot>)]) -> Vec<Vec<String>> {
    snapshots
        .iter()
        .filter(|(id, _)| !id.is_system())
        .map(|(_, snapshot)| {
            PROCESS_LABELS
                .iter()
                .map(|label| snapshot.get(label).unwrap_or(NOT_AVAILABLE).to_string())
                .collect()
        })
        .collect()
}

/// `LABEL value` pairs of the system entity on one line
pub fn system_summary(snapshots: &[(EntityId, Arc<FrontendSnapshot>)]) -> Option<String> {
    let (_, snapshot) = snapshots.iter().find(|(id, _)| id.is_system())?;
    let parts: Vec<String> = SYSTEM_LABELS
        .iter()
        .map(|label| format!("{} {}", label, snapshot.get(label).unwrap_or(NOT_AVAILABLE)))
        .collect();
    Some(parts.join("  "))
}
