//! TUI for proxy checker with progress display

use crate::proxy::{
    CandidateEndpoint, ProbeEvent, ProxyChecker, Shutdown, ShutdownTrigger, VerificationReport,
    VerificationResult,
};
use crate::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Duration;

/// Maximum number of recent proxies to keep for display
const MAX_RECENT_PROXIES: usize = 100;

/// Proxy checker TUI application state
pub struct ProxyCheckerApp {
    candidates: Vec<CandidateEndpoint>,
    checker: ProxyChecker,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
    report: VerificationReport,
    total: usize,
    /// Recent alive proxies, newest last
    recent_alive: VecDeque<VerificationResult>,
    /// Recent dead proxies, newest last
    recent_dead: VecDeque<VerificationResult>,
    /// Selected list (0 = alive, 1 = dead)
    selected_list: usize,
    list_state: ListState,
    status_message: String,
    is_complete: bool,
    /// Stop was requested; in-flight probes are being cancelled
    stopping: bool,
    should_quit: bool,
}

impl ProxyCheckerApp {
    pub fn new(
        candidates: Vec<CandidateEndpoint>,
        checker: ProxyChecker,
        trigger: ShutdownTrigger,
        shutdown: Shutdown,
    ) -> Self {
        let total = candidates.len();
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            candidates,
            checker,
            trigger,
            shutdown,
            report: VerificationReport::default(),
            total,
            recent_alive: VecDeque::new(),
            recent_dead: VecDeque::new(),
            selected_list: 0,
            list_state,
            status_message: "Starting proxy check... Press 'q' to stop.".to_string(),
            is_complete: false,
            stopping: false,
            should_quit: false,
        }
    }

    /// Run the TUI until the user quits; returns everything that was checked
    pub async fn run(mut self) -> Result<VerificationReport> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_app(&mut terminal).await;

        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        result.map(|_| self.report)
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let candidates = std::mem::take(&mut self.candidates);
        let mut rx = self.checker.verify_stream(candidates, self.shutdown.clone());

        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        let interrupt = key.code == KeyCode::Char('c')
                            && key.modifiers.contains(KeyModifiers::CONTROL);
                        if interrupt {
                            self.should_quit = true;
                        } else {
                            self.handle_input(key.code);
                        }
                    }
                }
            }

            if self.should_quit {
                if self.is_complete {
                    break;
                }
                if !self.stopping {
                    self.stopping = true;
                    self.trigger.trigger();
                    self.status_message = "Stopping, cancelling in-flight probes...".to_string();
                }
            }

            loop {
                match rx.try_recv() {
                    Ok(event) => self.record(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.is_complete = true;
                        self.status_message = format!(
                            "Complete! Checked: {} | Alive: {} | Dead: {} | Incomplete: {} | Press 'q' to quit",
                            self.report.results.len(),
                            self.report.alive_count(),
                            self.report.dead_count(),
                            self.report.incomplete.len()
                        );
                        break;
                    }
                }
            }

            if self.is_complete && self.stopping {
                break;
            }
        }

        Ok(())
    }

    fn record(&mut self, event: ProbeEvent) {
        if let ProbeEvent::Finished(result) = &event {
            let recent = if result.is_alive() {
                &mut self.recent_alive
            } else {
                &mut self.recent_dead
            };
            recent.push_back(result.clone());
            if recent.len() > MAX_RECENT_PROXIES {
                recent.pop_front();
            }
        }
        self.report.record(event);

        if !self.stopping {
            let checked = self.report.results.len();
            let percentage = (checked as f64 / self.total.max(1) as f64 * 100.0) as u32;
            self.status_message = format!(
                "Checking... {}% ({}/{}) | Alive: {} | Dead: {}",
                percentage,
                checked,
                self.total,
                self.report.alive_count(),
                self.report.dead_count()
            );
        }
    }

    fn handle_input(&mut self, key: KeyCode) {
        let len = if self.selected_list == 0 {
            self.recent_alive.len()
        } else {
            self.recent_dead.len()
        };

        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Tab => {
                self.selected_list = (self.selected_list + 1) % 2;
                self.list_state.select(Some(0));
            }
            KeyCode::Down => {
                let i = match self.list_state.selected() {
                    Some(i) if i + 1 < len => i + 1,
                    _ => 0,
                };
                self.list_state.select(Some(i));
            }
            KeyCode::Up => {
                let i = match self.list_state.selected() {
                    Some(0) | None => len.saturating_sub(1),
                    Some(i) => i - 1,
                };
                self.list_state.select(Some(i));
            }
            _ => {}
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Progress bar
                Constraint::Min(0),    // Proxy lists
                Constraint::Length(3), // Status bar
            ])
            .split(f.size());

        let title = Paragraph::new("Proxy Checker")
            .style(Style::default().fg(Color::Cyan))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(title, chunks[0]);

        let checked = self.report.results.len();
        let progress = if self.total > 0 {
            (checked as f64 / self.total as f64 * 100.0) as u16
        } else {
            0
        };
        let progress_label = format!("{}/{} ({}%)", checked, self.total, progress);
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
            .percent(progress.min(100))
            .label(progress_label);
        f.render_widget(gauge, chunks[1]);

        let proxy_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[2]);

        let alive_count = self.report.alive_count();
        let dead_count = self.report.dead_count();

        Self::render_proxy_list(
            f,
            proxy_chunks[0],
            format!("Alive ({})", alive_count),
            &self.recent_alive,
            self.selected_list == 0,
            Color::Green,
            if self.selected_list == 0 { Some(&mut self.list_state) } else { None },
        );

        Self::render_proxy_list(
            f,
            proxy_chunks[1],
            format!("Dead ({})", dead_count),
            &self.recent_dead,
            self.selected_list == 1,
            Color::Red,
            if self.selected_list == 1 { Some(&mut self.list_state) } else { None },
        );

        let status = Paragraph::new(self.status_message.clone())
            .style(if self.is_complete {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Yellow)
            })
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(status, chunks[3]);
    }

    fn render_proxy_list(
        f: &mut Frame,
        area: Rect,
        title: String,
        results: &VecDeque<VerificationResult>,
        is_selected: bool,
        color: Color,
        list_state: Option<&mut ListState>,
    ) {
        let items: Vec<ListItem> = results
            .iter()
            .rev() // Show newest first
            .map(|result| {
                let content = match (result.latency_ms(), result.verified_protocol) {
                    (Some(ms), Some(protocol)) => {
                        format!("{} {} ({}ms)", result.endpoint, protocol, ms)
                    }
                    _ => format!("{} {}", result.endpoint, result.outcome),
                };
                ListItem::new(content).style(Style::default().fg(color))
            })
            .collect();

        let border_style = if is_selected {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(border_style),
            )
            .highlight_style(Style::default().bg(Color::DarkGray))
            .highlight_symbol(">> ");

        if let Some(state) = list_state {
            f.render_stateful_widget(list, area, state);
        } else {
            f.render_widget(list, area);
        }
    }
}
