//! Pointer and key gestures on a plot.
//!
//! | Gesture                              | Effect                          |
//! |--------------------------------------|---------------------------------|
//! | middle click                         | toggle playback                 |
//! | left or right press inside the axis  | pause and seek                  |
//! | drag while pressed                   | seek                            |
//! | left release inside the axis         | seek, then play (unless right is held) |
//! | space / enter                        | toggle playback                 |
//! | `l`                                  | toggle looping                  |
//! | `c`                                  | show or hide the marker         |
//! | left / right arrow                   | seek back / forward             |
//! | `q` / escape / window close          | close this plot                 |
//! | `Q`                                  | close the session               |

use playplot_protocol::Command;

use super::surface::{InputEvent, Key, MouseButton};

/// Seconds moved by one arrow key press.
pub const SEEK_STEP: f64 = 5.0;

/// What a gesture asks the plot worker to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureAction {
    /// Send a transport command upstream
    Send(Command),
    /// Show or hide the marker
    ToggleMarker,
    /// Close this plot
    ClosePlot,
    /// Ask the session to stop
    CloseSession,
}

/// Pressed buttons and the last seek target of an ongoing drag.
#[derive(Debug, Default, Clone)]
pub struct GestureState {
    left: bool,
    right: bool,
    last_seek: Option<f64>,
}

impl GestureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps one input event to actions.
    ///
    /// # Arguments
    ///
    /// * `event` - Input from the surface
    /// * `to_time` - Maps an axis x coordinate to a playback time
    /// * `current_time` - Playback time shown right now (for arrow keys)
    pub fn handle(
        &mut self,
        event: &InputEvent,
        to_time: impl Fn(f64) -> f64,
        current_time: f64,
    ) -> Vec<GestureAction> {
        match *event {
            InputEvent::Press { button, x } => match button {
                MouseButton::Middle => vec![GestureAction::Send(Command::TogglePlayback)],
                MouseButton::Left | MouseButton::Right => {
                    let Some(x) = x else {
                        return Vec::new();
                    };
                    if button == MouseButton::Left {
                        self.left = true;
                    } else {
                        self.right = true;
                    }
                    let time = to_time(x);
                    self.last_seek = Some(time);
                    vec![
                        GestureAction::Send(Command::Pause),
                        GestureAction::Send(Command::Seek { time }),
                    ]
                }
            },
            InputEvent::Drag { x } => match x {
                Some(x) if self.left || self.right => self.seek_if_moved(to_time(x)),
                _ => Vec::new(),
            },
            InputEvent::Release { button, x } => match button {
                MouseButton::Middle => Vec::new(),
                MouseButton::Right => {
                    self.right = false;
                    if !self.left {
                        self.last_seek = None;
                    }
                    Vec::new()
                }
                MouseButton::Left => {
                    if !self.left {
                        return Vec::new();
                    }
                    self.left = false;
                    let Some(x) = x else {
                        return Vec::new();
                    };
                    let mut actions = self.seek_if_moved(to_time(x));
                    if !self.right {
                        self.last_seek = None;
                        actions.push(GestureAction::Send(Command::Play));
                    }
                    actions
                }
            },
            InputEvent::Key(key) => match key {
                Key::Char(' ') | Key::Enter => vec![GestureAction::Send(Command::TogglePlayback)],
                Key::Char('l') => vec![GestureAction::Send(Command::ToggleLoop)],
                Key::Char('c') => vec![GestureAction::ToggleMarker],
                Key::Left => vec![GestureAction::Send(Command::Seek {
                    time: (current_time - SEEK_STEP).max(0.0),
                })],
                Key::Right => vec![GestureAction::Send(Command::Seek {
                    time: current_time + SEEK_STEP,
                })],
                Key::Char('q') | Key::Escape => vec![GestureAction::ClosePlot],
                Key::Char('Q') => vec![GestureAction::CloseSession],
                Key::Char(_) => Vec::new(),
            },
            InputEvent::CloseRequested => vec![GestureAction::ClosePlot],
        }
    }

    fn seek_if_moved(&mut self, time: f64) -> Vec<GestureAction> {
        if self.last_seek == Some(time) {
            return Vec::new();
        }
        self.last_seek = Some(time);
        vec![GestureAction::Send(Command::Seek { time })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(x: f64) -> f64 {
        x
    }

    fn press(button: MouseButton, x: f64) -> InputEvent {
        InputEvent::Press {
            button,
            x: Some(x),
        }
    }

    fn release(button: MouseButton, x: f64) -> InputEvent {
        InputEvent::Release {
            button,
            x: Some(x),
        }
    }

    #[test]
    fn test_left_click_pauses_seeks_and_resumes() {
        let mut state = GestureState::new();
        assert_eq!(
            state.handle(&press(MouseButton::Left, 1.5), identity, 0.0),
            vec![
                GestureAction::Send(Command::Pause),
                GestureAction::Send(Command::Seek { time: 1.5 })
            ]
        );
        assert_eq!(
            state.handle(&release(MouseButton::Left, 1.5), identity, 1.5),
            vec![GestureAction::Send(Command::Play)]
        );
    }

    #[test]
    fn test_drag_seeks_only_on_change() {
        let mut state = GestureState::new();
        state.handle(&press(MouseButton::Left, 1.0), identity, 0.0);
        assert_eq!(
            state.handle(&InputEvent::Drag { x: Some(1.0) }, identity, 1.0),
            Vec::new()
        );
        assert_eq!(
            state.handle(&InputEvent::Drag { x: Some(1.2) }, identity, 1.0),
            vec![GestureAction::Send(Command::Seek { time: 1.2 })]
        );
    }

    #[test]
    fn test_drag_without_press_is_ignored() {
        let mut state = GestureState::new();
        assert!(state
            .handle(&InputEvent::Drag { x: Some(0.3) }, identity, 0.0)
            .is_empty());
    }

    #[test]
    fn test_right_held_keeps_playback_paused() {
        let mut state = GestureState::new();
        state.handle(&press(MouseButton::Right, 0.5), identity, 0.0);
        state.handle(&press(MouseButton::Left, 0.7), identity, 0.5);
        let actions = state.handle(&release(MouseButton::Left, 0.9), identity, 0.7);
        assert_eq!(
            actions,
            vec![GestureAction::Send(Command::Seek { time: 0.9 })]
        );
    }

    #[test]
    fn test_right_scrub_never_resumes() {
        let mut state = GestureState::new();
        state.handle(&press(MouseButton::Right, 0.5), identity, 0.0);
        assert!(state
            .handle(&release(MouseButton::Right, 0.6), identity, 0.5)
            .is_empty());
    }

    #[test]
    fn test_press_outside_axis_is_ignored() {
        let mut state = GestureState::new();
        let event = InputEvent::Press {
            button: MouseButton::Left,
            x: None,
        };
        assert!(state.handle(&event, identity, 0.0).is_empty());
    }

    #[test]
    fn test_mapping_is_applied() {
        let mut state = GestureState::new();
        let actions = state.handle(&press(MouseButton::Left, 10.0), |x| x / 10.0, 0.0);
        assert_eq!(actions[1], GestureAction::Send(Command::Seek { time: 1.0 }));
    }

    #[test]
    fn test_keys() {
        let mut state = GestureState::new();
        let mut key = |k| state.handle(&InputEvent::Key(k), identity, 3.0);
        assert_eq!(key(Key::Char(' ')), vec![GestureAction::Send(Command::TogglePlayback)]);
        assert_eq!(key(Key::Char('l')), vec![GestureAction::Send(Command::ToggleLoop)]);
        assert_eq!(key(Key::Char('c')), vec![GestureAction::ToggleMarker]);
        assert_eq!(key(Key::Left), vec![GestureAction::Send(Command::Seek { time: 0.0 })]);
        assert_eq!(key(Key::Right), vec![GestureAction::Send(Command::Seek { time: 8.0 })]);
        assert_eq!(key(Key::Escape), vec![GestureAction::ClosePlot]);
        assert_eq!(key(Key::Char('Q')), vec![GestureAction::CloseSession]);
        assert!(key(Key::Char('z')).is_empty());
    }

    #[test]
    fn test_middle_click_toggles() {
        let mut state = GestureState::new();
        assert_eq!(
            state.handle(&press(MouseButton::Middle, 0.0), identity, 0.0),
            vec![GestureAction::Send(Command::TogglePlayback)]
        );
    }
}
