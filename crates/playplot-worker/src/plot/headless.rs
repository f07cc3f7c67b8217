//! Surface without a display.
//!
//! [`HeadlessSurface`] records the frames it is asked to draw and replays
//! input pushed through its [`HeadlessProbe`]. It backs the built-in
//! `headless` plot and lets tests drive a plot worker like a user would.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context};

use super::surface::{InputEvent, MarkerFrame, Surface};

/// Frames kept for inspection.
const FRAME_HISTORY: usize = 256;

#[derive(Debug)]
struct HeadlessState {
    open: bool,
    title: String,
    frames: VecDeque<MarkerFrame>,
    frame_count: u64,
    input: VecDeque<InputEvent>,
    fail_next_draw: Option<String>,
    close_after: Option<u64>,
}

/// Recording surface.
#[derive(Debug)]
pub struct HeadlessSurface {
    state: Arc<Mutex<HeadlessState>>,
}

/// Test and diagnostic handle on a [`HeadlessSurface`].
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    state: Arc<Mutex<HeadlessState>>,
}

fn lock(state: &Mutex<HeadlessState>) -> MutexGuard<'_, HeadlessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HeadlessSurface {
    pub fn new() -> (Self, HeadlessProbe) {
        let state = Arc::new(Mutex::new(HeadlessState {
            open: true,
            title: String::new(),
            frames: VecDeque::new(),
            frame_count: 0,
            input: VecDeque::new(),
            fail_next_draw: None,
            close_after: None,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            HeadlessProbe { state },
        )
    }
}

impl Surface for HeadlessSurface {
    fn set_title(&mut self, title: &str) -> anyhow::Result<()> {
        lock(&self.state).title = title.to_string();
        Ok(())
    }

    fn draw(&mut self, frame: &MarkerFrame) -> anyhow::Result<()> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.fail_next_draw.take() {
            bail!("{reason}");
        }
        if state.frames.len() >= FRAME_HISTORY {
            state.frames.pop_front();
        }
        state.frames.push_back(frame.clone());
        state.frame_count += 1;
        if state.close_after.is_some_and(|limit| state.frame_count >= limit) {
            state.open = false;
        }
        Ok(())
    }

    fn poll_input(&mut self) -> anyhow::Result<Vec<InputEvent>> {
        Ok(lock(&self.state).input.drain(..).collect())
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn save_image(&mut self, folder: &Path, stem: &str) -> anyhow::Result<PathBuf> {
        let frame = lock(&self.state).frames.back().cloned();
        let path = folder.join(format!("{stem}.json"));
        let body = serde_json::to_vec_pretty(&frame).context("serializing frame")?;
        std::fs::write(&path, body)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        lock(&self.state).open = false;
        Ok(())
    }
}

impl HeadlessProbe {
    /// Queues an input event for the next poll.
    pub fn push_input(&self, event: InputEvent) {
        lock(&self.state).input.push_back(event);
    }

    /// Closes the surface as if the user closed its window.
    pub fn close(&self) {
        lock(&self.state).open = false;
    }

    /// Closes the surface once `frames` frames have been drawn.
    pub fn close_after_frames(&self, frames: u64) {
        lock(&self.state).close_after = Some(frames);
    }

    /// Makes the next draw fail with `reason`.
    pub fn fail_next_draw(&self, reason: impl Into<String>) {
        lock(&self.state).fail_next_draw = Some(reason.into());
    }

    pub fn last_frame(&self) -> Option<MarkerFrame> {
        lock(&self.state).frames.back().cloned()
    }

    /// Recent frames, oldest first.
    pub fn frames(&self) -> Vec<MarkerFrame> {
        lock(&self.state).frames.iter().cloned().collect()
    }

    /// Total frames drawn.
    pub fn frame_count(&self) -> u64 {
        lock(&self.state).frame_count
    }

    pub fn title(&self) -> String {
        lock(&self.state).title.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::surface::MarkerStyle;

    fn frame(time: f64) -> MarkerFrame {
        MarkerFrame {
            time,
            position: time,
            playing: false,
            visible: true,
            volume: 1.0,
            looping: false,
            duration: 2.0,
            full_redraw: false,
            style: MarkerStyle::default(),
        }
    }

    #[test]
    fn test_records_frames_and_input() {
        let (mut surface, probe) = HeadlessSurface::new();
        surface.draw(&frame(0.5)).unwrap();
        assert_eq!(probe.frame_count(), 1);
        assert_eq!(probe.last_frame().map(|f| f.time), Some(0.5));

        probe.push_input(InputEvent::CloseRequested);
        assert_eq!(surface.poll_input().unwrap(), vec![InputEvent::CloseRequested]);
        assert!(surface.poll_input().unwrap().is_empty());
    }

    #[test]
    fn test_close_after_frames() {
        let (mut surface, probe) = HeadlessSurface::new();
        probe.close_after_frames(2);
        surface.draw(&frame(0.0)).unwrap();
        assert!(surface.is_open());
        surface.draw(&frame(0.1)).unwrap();
        assert!(!surface.is_open());
    }

    #[test]
    fn test_save_image_writes_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut surface, _probe) = HeadlessSurface::new();
        surface.draw(&frame(1.25)).unwrap();
        let path = surface.save_image(dir.path(), "Fig_3").unwrap();
        assert_eq!(path, dir.path().join("Fig_3.json"));
        let saved: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved["time"], serde_json::json!(1.25));
    }

    #[test]
    fn test_injected_draw_failure() {
        let (mut surface, probe) = HeadlessSurface::new();
        probe.fail_next_draw("gpu lost");
        assert!(surface.draw(&frame(0.0)).is_err());
        assert!(surface.draw(&frame(0.0)).is_ok());
    }
}
