// Terminal player screen using ratatui
// Renders one playback session and maps keys onto its controls

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;

use crate::error::PlaybackError;
use crate::player::{PlaybackSession, SessionSnapshot};
use crate::resource::HandleState;

const SEEK_STEP: f64 = 10.0;
const VOLUME_STEP: i32 = 5;

pub struct PlayerApp {
    session: PlaybackSession,
    title: String,
    volume: u32,
    status_message: String,
    should_quit: bool,
}

impl PlayerApp {
    pub fn new(session: PlaybackSession, title: impl Into<String>) -> Self {
        PlayerApp {
            session,
            title: title.into(),
            volume: 100,
            status_message: String::new(),
            should_quit: false,
        }
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    /// Steps the volume by `delta`, clamped to 0..=100. The stored level
    /// only moves when the engine took it.
    pub fn adjust_volume(&mut self, delta: i32) -> Result<u32, PlaybackError> {
        let volume = (self.volume as i32).saturating_add(delta).clamp(0, 100) as u32;
        self.session.set_volume(volume)?;
        self.volume = volume;
        Ok(volume)
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal).await;

        // Restore the terminal even if the loop failed
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        self.session.teardown();
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> anyhow::Result<()> {
        loop {
            self.session.tick();
            let snapshot = self.session.snapshot();
            terminal.draw(|f| self.draw_ui(f, &snapshot))?;

            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_input(key.code);
                    }
                }
            }

            if self.should_quit {
                return Ok(());
            }

            // let spawned load attempts make progress between frames
            tokio::task::yield_now().await;
        }
    }

    fn handle_input(&mut self, key: KeyCode) {
        self.status_message.clear();

        let result = match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
                Ok(())
            }
            KeyCode::Char(' ') => self.session.toggle().map(|_| ()),
            KeyCode::Right => self.session.seek_by(SEEK_STEP).map(|_| ()),
            KeyCode::Left => self.session.seek_by(-SEEK_STEP).map(|_| ()),
            KeyCode::Up => self.adjust_volume(VOLUME_STEP).map(|_| ()),
            KeyCode::Down => self.adjust_volume(-VOLUME_STEP).map(|_| ()),
            KeyCode::Char('r') => match self.session.reload() {
                Ok(_) => {
                    self.status_message = "Reloading...".to_string();
                    Ok(())
                }
                Err(e) => Err(e),
            },
            _ => Ok(()),
        };

        // Controls are inert until audio is ready
        if let Err(e) = result {
            tracing::debug!(key = ?key, error = %e, "Ignored key");
        }
    }

    fn draw_ui(&self, frame: &mut Frame, snapshot: &SessionSnapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
            ])
            .split(frame.size());

        let header = Paragraph::new(
            "Controls: [Space]Play/Pause [←/→]Seek 10s [↑/↓]Volume [r]Reload [q]Quit",
        )
        .block(Block::default().borders(Borders::ALL).title("Keepsake"));
        frame.render_widget(header, chunks[0]);

        let (body, style) = match &snapshot.state {
            HandleState::Failed(reason) => (
                format!("{}\n\nPress 'r' to try again", reason),
                Style::default().fg(Color::Red),
            ),
            _ => (
                format!(
                    "{}\n\n{}\nVolume: {}%",
                    self.title,
                    status_line(snapshot),
                    self.volume
                ),
                Style::default(),
            ),
        };
        let body = if self.status_message.is_empty() {
            body
        } else {
            format!("{}\n{}", body, self.status_message)
        };

        let player = Paragraph::new(body)
            .style(style)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Player"));
        frame.render_widget(player, chunks[1]);

        let ratio = if snapshot.duration > 0.0 {
            (snapshot.position / snapshot.duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let progress = Gauge::default()
            .block(Block::default().borders(Borders::ALL))
            .gauge_style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
            .ratio(ratio)
            .label(format!(
                "{} / {}",
                format_time(snapshot.position),
                format_time(snapshot.duration)
            ));
        frame.render_widget(progress, chunks[2]);
    }
}

/// `m:ss`, minutes unpadded.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// One-line description of where the session is.
pub fn status_line(snapshot: &SessionSnapshot) -> String {
    match &snapshot.state {
        HandleState::Idle => "No audio loaded".to_string(),
        HandleState::Loading => "Loading...".to_string(),
        HandleState::Retrying(attempt) => format!(
            "Retrying... (Attempt {} of {})",
            attempt, snapshot.max_attempts
        ),
        HandleState::Ready if snapshot.playing => "▶ Playing".to_string(),
        HandleState::Ready => "⏸ Paused".to_string(),
        HandleState::Failed(reason) => reason.to_string(),
        HandleState::Cancelled => "Stopped".to_string(),
    }
}
