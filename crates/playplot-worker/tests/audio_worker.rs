//! Integration tests for the audio worker.
//!
//! The worker runs against a `RecordingOutput` on a paused tokio clock, with
//! the test acting as the session on the other end of the control channel.
//!
//! Tests may use `.unwrap()` and `.expect()`.

use std::future::Future;
use std::time::Duration;

use playplot_core::{AudioData, SessionConfig};
use playplot_protocol::{Command, ControlMessage, InitialTransport, Telemetry};
use playplot_worker::{
    channel_pair, AudioWorker, ChannelEndpoint, OutputCall, OutputError, OutputLog,
    RecordingOutput, WorkerFailure,
};
use tokio::time::sleep;

// ============================================================================
// Test Helpers
// ============================================================================

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

fn clip(seconds: f64, sample_rate: u32) -> AudioData {
    let frames = (seconds * f64::from(sample_rate)) as usize;
    AudioData::from_mono(vec![0.0; frames], sample_rate).unwrap()
}

fn initial(playing: bool, looping: bool) -> InitialTransport {
    InitialTransport {
        time: 0.0,
        volume: 0.8,
        playing,
        looping,
    }
}

fn worker(
    audio: &AudioData,
    initial: InitialTransport,
    capacity: usize,
) -> (AudioWorker, ChannelEndpoint, OutputLog) {
    let (worker_end, session_end) = channel_pair(capacity);
    let (output, log) = RecordingOutput::new();
    let worker = AudioWorker::new(
        worker_end,
        audio,
        Box::new(output),
        initial,
        &SessionConfig::default(),
    );
    (worker, session_end, log)
}

/// Receives telemetry until one snapshot satisfies `predicate`.
async fn telemetry_until(
    session: &mut ChannelEndpoint,
    predicate: impl Fn(&Telemetry) -> bool,
) -> Telemetry {
    loop {
        match session.receive(Some(RECEIVE_TIMEOUT)).await.unwrap() {
            ControlMessage::Telemetry(t) if predicate(&t) => return t,
            _ => {}
        }
    }
}

async fn run_with<F>(worker: AudioWorker, driver: F) -> (Result<(), WorkerFailure>, F::Output)
where
    F: Future,
{
    tokio::join!(worker.run(), driver)
}

// ============================================================================
// Transport Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_seek_while_paused() {
    let audio = clip(2.0, 1000);
    let (worker, mut session, log) = worker(&audio, initial(false, false), 8);

    let (result, snapshot) = run_with(worker, async {
        session
            .send(ControlMessage::command(1, Command::Seek { time: 1.5 }))
            .await
            .unwrap();
        let snapshot = telemetry_until(&mut session, |t| t.ack_seq >= 1).await;
        session
            .send(ControlMessage::command(2, Command::Stop))
            .await
            .unwrap();
        snapshot
    })
    .await;

    result.unwrap();
    assert_eq!(snapshot.position, 1.5);
    assert_eq!(snapshot.position_frames, 1500);
    assert!(!snapshot.playing);
    assert!(log.seeks().contains(&1500));
    assert!(log.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_seek_is_clamped_to_clip() {
    let audio = clip(2.0, 1000);
    let (worker, mut session, _log) = worker(&audio, initial(false, false), 8);

    let (result, snapshot) = run_with(worker, async {
        session
            .send(ControlMessage::command(1, Command::Seek { time: 9.0 }))
            .await
            .unwrap();
        let snapshot = telemetry_until(&mut session, |t| t.ack_seq >= 1).await;
        session
            .send(ControlMessage::command(2, Command::Stop))
            .await
            .unwrap();
        snapshot
    })
    .await;

    result.unwrap();
    assert_eq!(snapshot.position, 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_last_volume_in_a_cycle_wins() {
    let audio = clip(2.0, 1000);
    let (worker, mut session, log) = worker(&audio, initial(false, false), 8);

    session
        .send(ControlMessage::command(1, Command::SetVolume { volume: 0.3 }))
        .await
        .unwrap();
    session
        .send(ControlMessage::command(2, Command::SetVolume { volume: 0.9 }))
        .await
        .unwrap();

    let (result, snapshot) = run_with(worker, async {
        let snapshot = telemetry_until(&mut session, |t| t.ack_seq >= 2).await;
        session
            .send(ControlMessage::command(3, Command::Stop))
            .await
            .unwrap();
        snapshot
    })
    .await;

    result.unwrap();
    assert_eq!(snapshot.volume, 0.9);
    assert_eq!(log.volumes(), vec![0.8, 0.9]);
}

#[tokio::test(start_paused = true)]
async fn test_playback_advances_with_time() {
    let audio = clip(2.0, 1000);
    let (worker, mut session, _log) = worker(&audio, initial(true, false), 8);

    let (result, snapshot) = run_with(worker, async {
        sleep(Duration::from_millis(500)).await;
        let snapshot = telemetry_until(&mut session, |t| t.position >= 0.5).await;
        session
            .send(ControlMessage::command(1, Command::Stop))
            .await
            .unwrap();
        snapshot
    })
    .await;

    result.unwrap();
    assert!(snapshot.playing);
    assert!(snapshot.position < 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_end_of_clip_without_loop() {
    let audio = clip(0.2, 1000);
    let (worker, mut session, log) = worker(&audio, initial(true, false), 8);

    let (result, (ended, restarted)) = run_with(worker, async {
        let ended = telemetry_until(&mut session, |t| t.ended).await;
        session
            .send(ControlMessage::command(1, Command::Play))
            .await
            .unwrap();
        let restarted = telemetry_until(&mut session, |t| t.ack_seq >= 1).await;
        session
            .send(ControlMessage::command(2, Command::Stop))
            .await
            .unwrap();
        (ended, restarted)
    })
    .await;

    result.unwrap();
    assert!(!ended.playing);
    assert!((ended.position - 0.2).abs() < 1e-9);
    assert!(log.calls().contains(&OutputCall::Pause));

    assert!(restarted.playing);
    assert!(!restarted.ended);
    assert!(restarted.position < 0.2);
}

#[tokio::test(start_paused = true)]
async fn test_looping_wraps_to_start() {
    let audio = clip(0.3, 1000);
    let (worker, mut session, log) = worker(&audio, initial(true, true), 8);

    let (result, wrapped) = run_with(worker, async {
        let first = telemetry_until(&mut session, |t| t.position > 0.1).await;
        let wrapped = telemetry_until(&mut session, |t| t.position < first.position).await;
        session
            .send(ControlMessage::command(1, Command::Stop))
            .await
            .unwrap();
        wrapped
    })
    .await;

    result.unwrap();
    assert!(wrapped.playing);
    assert!(!wrapped.ended);
    // Initial positioning plus at least one wrap.
    assert!(log.seeks().iter().filter(|frame| **frame == 0).count() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_commands() {
    let audio = clip(2.0, 1000);
    let (worker, mut session, _log) = worker(&audio, initial(false, false), 8);

    let (result, snapshot) = run_with(worker, async {
        session
            .send(ControlMessage::command(1, Command::TogglePlayback))
            .await
            .unwrap();
        session
            .send(ControlMessage::command(2, Command::ToggleLoop))
            .await
            .unwrap();
        let snapshot = telemetry_until(&mut session, |t| t.ack_seq >= 2).await;
        session
            .send(ControlMessage::command(3, Command::Stop))
            .await
            .unwrap();
        snapshot
    })
    .await;

    result.unwrap();
    assert!(snapshot.playing);
    assert!(snapshot.looping);
}

// ============================================================================
// Robustness Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_does_not_block_worker() {
    let audio = clip(60.0, 100);
    let (worker, mut session, _log) = worker(&audio, initial(true, false), 1);

    let (result, latest) = run_with(worker, async {
        // Leave the single-slot queue full for a while.
        sleep(Duration::from_secs(2)).await;
        let stale = telemetry_until(&mut session, |_| true).await;
        let latest = telemetry_until(&mut session, |t| t.sequence > stale.sequence).await;
        session
            .send(ControlMessage::command(1, Command::Stop))
            .await
            .unwrap();
        latest
    })
    .await;

    result.unwrap();
    assert!(latest.position > 1.9);
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_stops_worker() {
    let audio = clip(1.0, 1000);
    let (worker, session, log) = worker(&audio, initial(true, false), 8);
    drop(session);

    worker.run().await.unwrap();
    assert!(log.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_output_failure_ends_worker() {
    let audio = clip(1.0, 1000);
    let (worker, _session, log) = worker(&audio, initial(false, false), 8);
    log.fail_next("device unplugged");

    match worker.run().await {
        Err(WorkerFailure::Output(OutputError::Device(reason))) => {
            assert_eq!(reason, "device unplugged");
        }
        other => panic!("expected output failure, got {other:?}"),
    }
}
