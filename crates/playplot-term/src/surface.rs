//! Plot surface drawing into the controlling terminal.
//!
//! A worker process talks to its session over stdin/stdout, so the surface
//! writes to `/dev/tty` and falls back to stderr when that is a terminal.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - The terminal is restored on close and again on drop

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseButton as TermButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use playplot_worker::{InputEvent, Key, MarkerFrame, MouseButton, Surface};
use ratatui::{
    backend::{CrosstermBackend, TestBackend},
    layout::Rect,
    Terminal,
};
use tracing::{debug, warn};

use crate::error::{Result, TermError};
use crate::view::{self, WaveformView};

/// Events handled per poll, so a flood of mouse motion cannot stall drawing.
const MAX_EVENTS_PER_POLL: usize = 64;

/// Snapshot size used when the terminal size is unknown.
const SNAPSHOT_SIZE: (u16, u16) = (120, 40);

type TermBackend = CrosstermBackend<Box<dyn Write>>;

/// Waveform plot in the terminal.
pub struct TerminalSurface {
    terminal: Option<Terminal<TermBackend>>,
    view: WaveformView,
    title: String,
    last_frame: Option<MarkerFrame>,
    plot_area: Rect,
}

impl TerminalSurface {
    /// Takes over the terminal for `view`.
    ///
    /// # Errors
    ///
    /// * `TermError::NoTerminal` - Neither `/dev/tty` nor stderr is a terminal
    /// * `TermError::TerminalInit` - Raw mode or the alternate screen failed
    pub fn open(view: WaveformView) -> Result<Self> {
        let writer = terminal_writer()?;
        let terminal = setup_terminal(writer)?;
        debug!("Terminal surface opened");
        Ok(Self {
            terminal: Some(terminal),
            view,
            title: String::new(),
            last_frame: None,
            plot_area: Rect::default(),
        })
    }

    fn restore(&mut self) -> Result<()> {
        match self.terminal.take() {
            Some(mut terminal) => cleanup_terminal(&mut terminal),
            None => Ok(()),
        }
    }

    fn map_event(&self, event: Event) -> Option<InputEvent> {
        match event {
            Event::Key(key) => map_key(key),
            Event::Mouse(mouse) => map_mouse(mouse, self.plot_area, self.view.x_range()),
            _ => None,
        }
    }
}

impl Surface for TerminalSurface {
    fn set_title(&mut self, title: &str) -> anyhow::Result<()> {
        self.title = title.to_string();
        Ok(())
    }

    fn draw(&mut self, frame: &MarkerFrame) -> anyhow::Result<()> {
        let Some(terminal) = self.terminal.as_mut() else {
            return Ok(());
        };
        if frame.full_redraw {
            terminal.clear().context("clearing terminal")?;
        }
        let view = &self.view;
        let title = self.title.as_str();
        let mut plot_area = self.plot_area;
        terminal
            .draw(|f| plot_area = view::render(f, view, title, Some(frame)))
            .context("drawing plot")?;
        self.plot_area = plot_area;
        self.last_frame = Some(frame.clone());
        Ok(())
    }

    fn poll_input(&mut self) -> anyhow::Result<Vec<InputEvent>> {
        let mut events = Vec::new();
        if self.terminal.is_none() {
            return Ok(events);
        }
        for _ in 0..MAX_EVENTS_PER_POLL {
            if !event::poll(Duration::ZERO).context("polling terminal input")? {
                break;
            }
            let event = event::read().context("reading terminal input")?;
            if let Some(input) = self.map_event(event) {
                events.push(input);
            }
        }
        Ok(events)
    }

    fn is_open(&self) -> bool {
        self.terminal.is_some()
    }

    /// Writes the current screen as text to `{stem}.txt`.
    fn save_image(&mut self, folder: &Path, stem: &str) -> anyhow::Result<PathBuf> {
        let (width, height) = match self.terminal.as_ref().map(|t| t.size()) {
            Some(Ok(size)) => (size.width, size.height),
            _ => SNAPSHOT_SIZE,
        };
        let text = snapshot(&self.view, &self.title, self.last_frame.as_ref(), width, height)
            .context("rendering snapshot")?;
        let path = folder.join(format!("{stem}.txt"));
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.restore()?;
        debug!("Terminal surface closed");
        Ok(())
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(error = %e, "Terminal not restored");
        }
    }
}

// ============================================================================
// Terminal setup
// ============================================================================

fn terminal_writer() -> Result<Box<dyn Write>> {
    match OpenOptions::new().read(true).write(true).open("/dev/tty") {
        Ok(tty) => Ok(Box::new(tty)),
        Err(e) if io::stderr().is_terminal() => {
            debug!(error = %e, "No /dev/tty, drawing on stderr");
            Ok(Box::new(io::stderr()))
        }
        Err(e) => Err(TermError::NoTerminal(e.to_string())),
    }
}

/// Enables raw mode, the alternate screen and mouse capture.
fn setup_terminal(mut writer: Box<dyn Write>) -> Result<Terminal<TermBackend>> {
    enable_raw_mode().map_err(|e| TermError::TerminalInit(e.to_string()))?;

    if let Err(e) = execute!(writer, EnterAlternateScreen, EnableMouseCapture) {
        let _ = disable_raw_mode();
        return Err(TermError::TerminalInit(e.to_string()));
    }

    let backend = CrosstermBackend::new(writer);
    Terminal::new(backend).map_err(|e| TermError::TerminalInit(e.to_string()))
}

/// Restores cooked mode, the main screen and the cursor.
fn cleanup_terminal(terminal: &mut Terminal<TermBackend>) -> Result<()> {
    disable_raw_mode().map_err(|e| TermError::TerminalCleanup(e.to_string()))?;

    execute!(terminal.backend_mut(), DisableMouseCapture, LeaveAlternateScreen)
        .map_err(|e| TermError::TerminalCleanup(e.to_string()))?;

    terminal
        .show_cursor()
        .map_err(|e| TermError::TerminalCleanup(e.to_string()))?;

    Ok(())
}

// ============================================================================
// Input mapping
// ============================================================================

fn map_key(key: KeyEvent) -> Option<InputEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(InputEvent::CloseRequested);
    }
    let key = match key.code {
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Escape,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        _ => return None,
    };
    Some(InputEvent::Key(key))
}

fn map_button(button: TermButton) -> MouseButton {
    match button {
        TermButton::Left => MouseButton::Left,
        TermButton::Middle => MouseButton::Middle,
        TermButton::Right => MouseButton::Right,
    }
}

fn map_mouse(mouse: MouseEvent, plot_area: Rect, x_range: (f64, f64)) -> Option<InputEvent> {
    let x = view::column_to_x(plot_area, x_range, mouse.column, mouse.row);
    match mouse.kind {
        MouseEventKind::Down(button) => Some(InputEvent::Press {
            button: map_button(button),
            x,
        }),
        MouseEventKind::Drag(_) => Some(InputEvent::Drag { x }),
        MouseEventKind::Up(button) => Some(InputEvent::Release {
            button: map_button(button),
            x,
        }),
        _ => None,
    }
}

/// Renders one screen off-terminal and returns it as text.
pub fn snapshot(
    view: &WaveformView,
    title: &str,
    marker: Option<&MarkerFrame>,
    width: u16,
    height: u16,
) -> io::Result<String> {
    let mut terminal = Terminal::new(TestBackend::new(width, height))?;
    terminal.draw(|f| {
        view::render(f, view, title, marker);
    })?;
    Ok(view::buffer_to_text(terminal.backend().buffer()))
}
