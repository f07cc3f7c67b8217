//! Plot worker.
//!
//! Runs one figure: follows the session clock by redrawing the marker, and
//! sends the user's gestures upstream as transport commands. Each iteration:
//!
//! 1. drains downstream messages (telemetry, directives)
//! 2. polls the surface for input and maps it to commands
//! 3. exits if the surface was closed
//! 4. renders the marker (override hook, draw hook, surface)
//! 5. sleeps for the rest of the frame interval
//!
//! Between telemetry snapshots the marker is extrapolated from the last
//! known position, so it moves smoothly at the redraw rate.
//!
//! Commands sent upstream carry a plot-local sequence number. Telemetry
//! relayed to this plot acknowledges those numbers; snapshots older than the
//! last local command are held back so a fresh seek is not undone by a
//! clock reading taken before it was applied.

use std::time::Duration;

use playplot_core::{clamp_time, SessionConfig, TimeMapping};
use playplot_protocol::{Command, ControlMessage, Directive, Lifecycle, Telemetry};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use super::function::{PlotContext, PlotFunction};
use super::gesture::{GestureAction, GestureState};
use super::surface::{Figure, MarkerFrame, PlotParams, Surface};
use crate::channel::ChannelEndpoint;
use crate::error::WorkerFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// What the plot currently believes the transport is doing.
#[derive(Debug, Clone, Copy)]
struct View {
    time: f64,
    anchor: Instant,
    playing: bool,
    volume: f32,
    looping: bool,
    visible: bool,
}

/// Displays one figure and links it to the session clock.
pub struct PlotWorker {
    channel: ChannelEndpoint,
    surface: Box<dyn Surface>,
    params: PlotParams,
    mapping: TimeMapping,
    worker_id: String,
    duration: f64,
    frame_interval: Duration,
    min_sleep: Duration,
    view: View,
    gestures: GestureState,
    sent_seq: u64,
    detached: bool,
    full_redraw: bool,
}

impl PlotWorker {
    /// Runs the plot function and validates its figure.
    ///
    /// # Errors
    ///
    /// - `WorkerFailure::PlotFunction` if the function fails
    /// - `WorkerFailure::InvalidFigure` if the figure has no usable
    ///   interactive axis or its default mapping cannot be built
    pub fn build(
        channel: ChannelEndpoint,
        function: &dyn PlotFunction,
        ctx: PlotContext,
        config: &SessionConfig,
    ) -> Result<Self, WorkerFailure> {
        let figure = function
            .build(&ctx)
            .map_err(WorkerFailure::PlotFunction)?;
        Self::from_figure(channel, figure, ctx, config)
    }

    /// Wraps an already built figure.
    ///
    /// # Errors
    ///
    /// Returns `WorkerFailure::InvalidFigure` as [`PlotWorker::build`] does.
    pub fn from_figure(
        channel: ChannelEndpoint,
        figure: Figure,
        ctx: PlotContext,
        config: &SessionConfig,
    ) -> Result<Self, WorkerFailure> {
        let mut params = figure.params;

        let axis = match figure.axes.get(params.interactive_axis) {
            Some(axis) => axis,
            None if figure.axes.is_empty() => {
                return Err(WorkerFailure::InvalidFigure("figure has no axes".to_string()))
            }
            None => {
                return Err(WorkerFailure::InvalidFigure(format!(
                    "interactive axis {} out of range ({} axes)",
                    params.interactive_axis,
                    figure.axes.len()
                )))
            }
        };
        let mapping = match params.mapping.take() {
            Some(mapping) => mapping,
            None => TimeMapping::linear(ctx.duration, axis.x_min, axis.x_max)
                .map_err(|e| WorkerFailure::InvalidFigure(format!("axis {}: {e}", axis.label)))?,
        };

        debug!(
            worker = %ctx.worker_id,
            title = %params.title,
            axes = figure.axes.len(),
            "Plot figure built"
        );

        Ok(Self {
            channel,
            surface: figure.surface,
            params,
            mapping,
            worker_id: ctx.worker_id,
            duration: ctx.duration,
            frame_interval: config.frame_interval(),
            min_sleep: config.plot_min_sleep,
            view: View {
                time: clamp_time(config.start_time, ctx.duration),
                anchor: Instant::now(),
                playing: config.autoplay,
                volume: config.volume,
                looping: config.looping,
                visible: true,
            },
            gestures: GestureState::new(),
            sent_seq: 0,
            detached: false,
            full_redraw: true,
        })
    }

    /// Runs until the surface closes or the session shuts the plot down.
    ///
    /// # Errors
    ///
    /// Surface and draw hook failures end the worker with an error.
    pub async fn run(mut self) -> Result<(), WorkerFailure> {
        let title = self.params.title.clone();
        self.surface
            .set_title(&title)
            .map_err(WorkerFailure::Surface)?;
        info!(worker = %self.worker_id, title = %title, "Plot opened");
        if !self.notify(Lifecycle::Opened { title }).await {
            return self.finish();
        }

        loop {
            let started = Instant::now();

            if self.drain_downstream().await? == Flow::Exit {
                break;
            }
            if self.handle_input().await? == Flow::Exit {
                break;
            }
            if !self.surface.is_open() {
                info!(worker = %self.worker_id, "Plot surface closed");
                self.notify(Lifecycle::Closed).await;
                break;
            }

            self.render()?;

            let spent = started.elapsed();
            sleep(self.frame_interval.saturating_sub(spent).max(self.min_sleep)).await;
        }

        self.finish()
    }

    fn finish(mut self) -> Result<(), WorkerFailure> {
        self.surface.close().map_err(WorkerFailure::Surface)?;
        debug!(worker = %self.worker_id, "Plot worker finished");
        Ok(())
    }

    /// Sends a lifecycle notice; false if the session is gone.
    async fn notify(&self, event: Lifecycle) -> bool {
        self.channel
            .send(ControlMessage::lifecycle(event))
            .await
            .is_ok()
    }

    // ------------------------------------------------------------------------
    // Downstream
    // ------------------------------------------------------------------------

    async fn drain_downstream(&mut self) -> Result<Flow, WorkerFailure> {
        loop {
            match self.channel.try_receive() {
                Ok(Some(message)) => {
                    if self.handle_message(message).await? == Flow::Exit {
                        return Ok(Flow::Exit);
                    }
                }
                Ok(None) => return Ok(Flow::Continue),
                Err(_) if self.detached => return Ok(Flow::Continue),
                Err(_) => {
                    debug!(worker = %self.worker_id, "Control channel closed");
                    return Ok(Flow::Exit);
                }
            }
        }
    }

    async fn handle_message(&mut self, message: ControlMessage) -> Result<Flow, WorkerFailure> {
        match message {
            ControlMessage::Telemetry(telemetry) => self.follow(telemetry),
            ControlMessage::Directive { directive } => match directive {
                Directive::Shutdown => {
                    debug!(worker = %self.worker_id, "Shutdown requested");
                    return Ok(Flow::Exit);
                }
                Directive::Detach => {
                    info!(worker = %self.worker_id, "Detached from session");
                    self.view.time = self.current_time();
                    self.view.playing = false;
                    self.detached = true;
                }
                Directive::SaveFrame { frame, folder } => {
                    self.render()?;
                    let stem = image_stem(&self.params.title, frame);
                    let event = match self.surface.save_image(&folder, &stem) {
                        Ok(path) => {
                            debug!(worker = %self.worker_id, path = %path.display(), "Frame saved");
                            Lifecycle::FrameSaved {
                                frame,
                                path: Some(path),
                                error: None,
                            }
                        }
                        Err(e) => {
                            warn!(worker = %self.worker_id, error = %e, "Saving frame failed");
                            Lifecycle::FrameSaved {
                                frame,
                                path: None,
                                error: Some(format!("{e:#}")),
                            }
                        }
                    };
                    self.notify(event).await;
                }
            },
            other => {
                warn!(
                    worker = %self.worker_id,
                    message = other.name(),
                    "Ignoring message not meant for a plot worker"
                );
            }
        }
        Ok(Flow::Continue)
    }

    fn follow(&mut self, telemetry: Telemetry) {
        if self.detached {
            return;
        }
        if telemetry.ack_seq < self.sent_seq {
            trace!(
                worker = %self.worker_id,
                ack = telemetry.ack_seq,
                sent = self.sent_seq,
                "Holding telemetry older than local command"
            );
            return;
        }
        self.view.time = telemetry.position;
        self.view.anchor = Instant::now();
        self.view.playing = telemetry.playing;
        self.view.volume = telemetry.volume;
        self.view.looping = telemetry.looping;
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    async fn handle_input(&mut self) -> Result<Flow, WorkerFailure> {
        let events = self.surface.poll_input().map_err(WorkerFailure::Surface)?;
        for event in events {
            let current = self.current_time();
            let mapping = &self.mapping;
            let actions = self
                .gestures
                .handle(&event, |x| mapping.pos_to_time(x), current);

            for action in actions {
                match action {
                    GestureAction::Send(command) => {
                        self.apply_local(command);
                        if self.detached {
                            continue;
                        }
                        self.sent_seq += 1;
                        let message = ControlMessage::command(self.sent_seq, command);
                        if self.channel.send(message).await.is_err() {
                            debug!(worker = %self.worker_id, "Session gone, dropping gesture");
                            return Ok(Flow::Exit);
                        }
                    }
                    GestureAction::ToggleMarker => {
                        self.view.visible = !self.view.visible;
                        self.full_redraw = true;
                    }
                    GestureAction::ClosePlot => {
                        info!(worker = %self.worker_id, "Plot closed by user");
                        self.notify(Lifecycle::Closed).await;
                        return Ok(Flow::Exit);
                    }
                    GestureAction::CloseSession => {
                        info!(worker = %self.worker_id, "User asked to close the session");
                        self.notify(Lifecycle::CloseSession).await;
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Updates the view right away, ahead of the session's confirmation.
    fn apply_local(&mut self, command: Command) {
        self.view.time = self.current_time();
        self.view.anchor = Instant::now();
        match command {
            Command::Play => self.start_local(),
            Command::Pause => self.view.playing = false,
            Command::TogglePlayback => {
                if self.view.playing {
                    self.view.playing = false;
                } else {
                    self.start_local();
                }
            }
            Command::Seek { time } => self.view.time = clamp_time(time, self.duration),
            Command::SetVolume { volume } => self.view.volume = volume.clamp(0.0, 1.0),
            Command::SetLoop { looping } => self.view.looping = looping,
            Command::ToggleLoop => self.view.looping = !self.view.looping,
            Command::Stop => {}
        }
    }

    fn start_local(&mut self) {
        if self.view.time >= self.duration {
            self.view.time = 0.0;
        }
        self.view.playing = true;
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    /// Playback time extrapolated from the last known position.
    fn current_time(&self) -> f64 {
        if !self.view.playing {
            return self.view.time;
        }
        let time = self.view.time + self.view.anchor.elapsed().as_secs_f64();
        if self.view.looping && self.duration > 0.0 {
            time % self.duration
        } else {
            time.min(self.duration)
        }
    }

    fn render(&mut self) -> Result<(), WorkerFailure> {
        let mut time = self.current_time();
        let mut position = self.mapping.time_to_pos(time);
        let mut full_redraw = std::mem::take(&mut self.full_redraw);

        if let Some(update) = self.params.update_override.as_mut() {
            let (value, changed) = (update.hook)(time, position, self.view.playing);
            if update.returns_position {
                position = value;
            } else {
                time = value;
                position = self.mapping.time_to_pos(value);
            }
            full_redraw |= changed;
        }

        let mut frame = MarkerFrame {
            time,
            position,
            playing: self.view.playing,
            visible: self.view.visible,
            volume: self.view.volume,
            looping: self.view.looping,
            duration: self.duration,
            full_redraw,
            style: self.params.marker.clone(),
        };

        if let Some(hook) = self.params.draw_hook.as_mut() {
            if hook(&frame).map_err(WorkerFailure::DrawHook)? {
                frame.full_redraw = true;
            }
        }

        self.surface.draw(&frame).map_err(WorkerFailure::Surface)
    }
}

/// File stem for a saved frame: `<title>_<frame>`, path separators replaced.
fn image_stem(title: &str, frame: u64) -> String {
    let title: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
        .collect();
    format!("{title}_{frame}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_stem_sanitizes_title() {
        assert_eq!(image_stem("Fig", 3), "Fig_3");
        assert_eq!(image_stem("left/right: mix", 12), "left_right_ mix_12");
    }
}
