//! End-to-end tests for sessions running thread-isolated workers.
//!
//! These run on the real clock: every worker drives its own runtime on its
//! own thread, so a paused test clock would not be shared with them.
//!
//! Tests may use `.unwrap()` and `.expect()`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use playplot_core::{AudioData, AudioSource, InputErrorKind, SessionConfig};
use playplot_protocol::WorkerKind;
use playplot_session::{MirroredState, PlotBinding, Session, SessionError, SessionStatus};
use playplot_worker::{
    AudioOutput, Axis, Figure, HeadlessSurface, OutputError, OutputFactory, OutputLog,
    PlotContext, RecordingOutput, HEADLESS_PLOT,
};
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

const JOIN_TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

/// `seconds` of silence at 1 kHz.
fn silence(seconds: f64) -> Vec<f32> {
    vec![0.0; (seconds * 1000.0) as usize]
}

fn config() -> SessionConfig {
    SessionConfig::default().fps_target(100.0)
}

fn session(seconds: f64, config: SessionConfig) -> Session {
    Session::from_mono(silence(seconds), 1000, config)
        .unwrap()
        .with_notifier(None)
}

/// Output factory handing out one recording output.
fn recording() -> (OutputFactory, OutputLog) {
    let (output, log) = RecordingOutput::new();
    let slot = Mutex::new(Some(output));
    let factory: OutputFactory = Arc::new(
        move |_audio: &AudioData| -> Result<Box<dyn AudioOutput>, OutputError> {
            let output = slot
                .lock()
                .unwrap()
                .take()
                .expect("output requested twice");
            Ok(Box::new(output))
        },
    );
    (factory, log)
}

/// Waits until the mirrored state satisfies `predicate`.
async fn wait_for(session: &Session, predicate: impl Fn(&MirroredState) -> bool) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if predicate(&*rx.borrow_and_update()) {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("state never reached");
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_seek_is_mirrored_and_confirmed() {
    let mut session = session(2.0, config());
    session.start().await.unwrap();
    assert!(session.is_running());

    session.seek(1.5).await.unwrap();
    assert_eq!(session.time(), 1.5);

    // Still 1.5 once the audio worker has acknowledged the seek
    wait_for(&session, |state| state.acked_seq >= 1).await;
    assert!((session.time() - 1.5).abs() < 0.02);
    assert!(session.paused());

    session.stop(false).await.unwrap();
    assert!(!session.is_running());
    session.join(JOIN_TIMEOUT).await.unwrap();
    assert!(session.retrieve_errors().is_empty());
}

#[tokio::test]
async fn test_seek_is_clamped_to_clip() {
    let mut session = session(2.0, config());
    session.start().await.unwrap();
    session.seek(10.0).await.unwrap();
    assert_eq!(session.time(), 2.0);
    session.seek(-1.0).await.unwrap();
    assert_eq!(session.time(), 0.0);
    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_last_volume_before_start_wins() {
    let (factory, log) = recording();
    let mut session = session(2.0, config()).with_output_factory(factory);

    session.set_volume(0.3).await.unwrap();
    session.set_volume(0.9).await.unwrap();
    assert_eq!(session.volume(), 0.9);

    session.start().await.unwrap();
    wait_for(&session, |state| state.telemetry_sequence >= 1).await;
    assert_eq!(log.volumes(), vec![0.9]);

    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
    assert!(log.is_closed());
}

#[tokio::test]
async fn test_volume_written_while_running_takes_effect() {
    let (factory, log) = recording();
    let mut session = session(2.0, config()).with_output_factory(factory);
    session.start().await.unwrap();

    session.set_volume(0.3).await.unwrap();
    session.set_volume(0.9).await.unwrap();
    assert_eq!(session.volume(), 0.9);

    wait_for(&session, |state| state.acked_seq >= 2).await;
    assert_eq!(session.volume(), 0.9);
    assert_eq!(log.volumes().last(), Some(&0.9));

    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_looping_wraps_and_keeps_playing() {
    let mut session = session(0.2, config().looping(true).autoplay(true));
    let mut rx = session.subscribe();
    session.start().await.unwrap();

    // Wait for the playhead to jump backwards
    let mut last = 0.0;
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            rx.changed().await.unwrap();
            let time = rx.borrow_and_update().time;
            if time + 0.05 < last {
                return;
            }
            last = time;
        }
    })
    .await
    .expect("playhead never wrapped");

    assert!(session.is_running());
    assert!(!session.paused());
    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
    assert!(session.retrieve_errors().is_empty());
}

#[tokio::test]
async fn test_end_of_clip_stops_session() {
    let mut session = session(0.2, config().autoplay(true));
    session.start().await.unwrap();

    session.join(JOIN_TIMEOUT).await.unwrap();
    let state = session.state();
    assert_eq!(state.status, SessionStatus::Stopped);
    assert!(state.paused);
    assert!(state.ended);
    assert!((state.time - 0.2).abs() < 1e-9);
    assert!(session.retrieve_errors().is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_twice_is_harmless() {
    let mut session = session(2.0, config());
    session.start().await.unwrap();
    session.stop(false).await.unwrap();
    session.stop(false).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
    session.stop(true).await.unwrap();
    assert!(session.retrieve_errors().is_empty());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let mut session = session(2.0, config());
    session.seek(0.5).await.unwrap();
    session.set_looping(true).await.unwrap();
    session.start().await.unwrap();
    assert!(matches!(
        session.start().await,
        Err(SessionError::AlreadyRunning)
    ));
    assert_eq!(session.time(), 0.5);
    assert!(session.looping());

    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
    assert!(matches!(
        session.start().await,
        Err(SessionError::AlreadyStopped)
    ));
}

#[tokio::test]
async fn test_writes_after_stop_fail() {
    let mut session = session(2.0, config());
    session.start().await.unwrap();
    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
    assert!(matches!(session.seek(1.0).await, Err(SessionError::NotRunning)));
    assert!(matches!(session.play().await, Err(SessionError::NotRunning)));
}

#[tokio::test]
async fn test_join_without_start_returns_at_once() {
    let session = session(2.0, config());
    session.join(Some(Duration::from_millis(10))).await.unwrap();
}

#[tokio::test]
async fn test_join_times_out_while_running() {
    let mut session = session(5.0, config());
    session.start().await.unwrap();
    match session.join(Some(Duration::from_millis(50))).await {
        Err(SessionError::Timeout { operation, .. }) => assert_eq!(operation, "join"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(session.is_running());
    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_stop_before_start() {
    let mut session = session(1.0, config());
    session.stop(false).await.unwrap();
    assert_eq!(session.state().status, SessionStatus::Stopped);
    assert!(matches!(
        session.plot(PlotBinding::named(HEADLESS_PLOT, json!({}))),
        Err(SessionError::AlreadyStopped)
    ));
}

// ============================================================================
// Plots
// ============================================================================

#[tokio::test]
async fn test_plot_opens_and_closes_with_session() {
    let mut session = session(2.0, config());
    let index = session
        .plot(PlotBinding::named(HEADLESS_PLOT, json!({"title": "Overview"})))
        .unwrap();
    assert_eq!(index, 0);
    session.start().await.unwrap();
    assert!(matches!(
        session.plot(PlotBinding::named(HEADLESS_PLOT, json!({}))),
        Err(SessionError::PlotAfterStart)
    ));

    session
        .wait_for_plots_opening(None, Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(session.open_plots(), 1);
    assert_eq!(session.total_spawned_plots(), 1);

    session.stop(false).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
    assert_eq!(session.open_plots(), 0);
    assert!(session.retrieve_errors().is_empty());
}

#[tokio::test]
async fn test_plot_function_failure_is_reported_once() {
    let mut session = session(2.0, config());
    session
        .plot(PlotBinding::named(HEADLESS_PLOT, json!({"fail": "no spectrum"})))
        .unwrap();
    session.start().await.unwrap();

    // The only plot failed, so the session stops on its own
    session.join(JOIN_TIMEOUT).await.unwrap();

    match session.check() {
        Err(SessionError::Worker(error)) => {
            assert_eq!(error.origin, WorkerKind::Plot);
            assert_eq!(error.kind, "plot_function");
            assert_eq!(error.worker, "plot-0");
            assert!(error.formatted_trace.contains("no spectrum"));
        }
        other => panic!("expected worker error, got {other:?}"),
    }
    session.check().unwrap();
}

#[tokio::test]
async fn test_draw_hook_failure_is_reported_once() {
    let mut session = session(2.0, config());
    session
        .plot(PlotBinding::inline(|ctx: &PlotContext| -> anyhow::Result<Figure> {
            let (surface, _probe) = HeadlessSurface::new();
            let mut frames = 0;
            Ok(Figure::new(Box::new(surface))
                .axis(Axis::new("time [s]", 0.0, ctx.duration))
                .draw_hook(move |_frame| {
                    frames += 1;
                    if frames == 3 {
                        anyhow::bail!("overlay out of range");
                    }
                    Ok(false)
                }))
        }))
        .unwrap();
    session.start().await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();

    let errors = session.retrieve_errors();
    assert_eq!(errors.len(), 1, "{errors:?}");
    let error = errors.first().unwrap();
    assert_eq!(error.origin, WorkerKind::Plot);
    assert_eq!(error.kind, "draw_hook");
    assert!(error.message.contains("overlay out of range"));
    session.check().unwrap();
}

#[tokio::test]
async fn test_unknown_plot_function_is_relayed() {
    let mut session = session(2.0, config());
    session
        .plot(PlotBinding::named("spectrogram", json!({})))
        .unwrap();
    session.start().await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();

    let errors = session.retrieve_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.first().unwrap().kind, "unknown_plot_function");
}

#[tokio::test]
async fn test_session_outlives_closed_plot_without_close_with_last_plot() {
    let mut session = session(5.0, config().close_with_last_plot(false));
    session
        .plot(PlotBinding::named(HEADLESS_PLOT, json!({"close_after_frames": 3})))
        .unwrap();
    session.start().await.unwrap();

    wait_for(&session, |state| {
        state.open_plots == 0 && state.pending_plots == 0
    })
    .await;
    assert!(session.is_running());

    // Nothing left open, so join stops the session
    session.join(JOIN_TIMEOUT).await.unwrap();
    assert!(!session.is_running());
    assert!(session.retrieve_errors().is_empty());
}

#[tokio::test]
async fn test_save_plot_images_writes_one_file_per_plot() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session(2.0, config().save_folder(dir.path()));
    session
        .plot(PlotBinding::named(HEADLESS_PLOT, json!({"title": "Wave"})))
        .unwrap();
    session.start().await.unwrap();
    session
        .wait_for_plots_opening(None, Some(Duration::from_secs(10)))
        .await
        .unwrap();

    let paths = session.save_plot_images(3).await.unwrap();
    assert_eq!(paths, vec![dir.path().join("Wave_3.json")]);
    assert!(dir.path().join("Wave_3.json").is_file());

    session.stop(true).await.unwrap();
    session.join(JOIN_TIMEOUT).await.unwrap();
}

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_unreachable_url_is_a_network_error() {
    let source = AudioSource::parse("http://127.0.0.1:9/clip.wav");
    match Session::open(source, config()).await {
        Err(SessionError::Input(error)) => assert_eq!(error.kind(), InputErrorKind::Network),
        other => panic!("expected network error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_file_is_an_invalid_source() {
    let source = AudioSource::parse("/nonexistent/clip.wav");
    match Session::open(source, config()).await {
        Err(SessionError::Input(error)) => {
            assert_eq!(error.kind(), InputErrorKind::InvalidSource)
        }
        other => panic!("expected invalid source, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_buffer_is_rejected() {
    assert!(matches!(
        Session::from_mono(Vec::new(), 1000, config()),
        Err(SessionError::Input(_))
    ));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    assert!(matches!(
        Session::from_mono(silence(1.0), 1000, config().fps_target(0.0)),
        Err(SessionError::Config(_))
    ));
}
