//! End-to-end pipeline tests against the deterministic fake engine.
//!
//! Paused-clock tokio tests: the flush scheduler's polling sleeps and the
//! frame pacer's waits auto-advance, so even the two-second flush deadline
//! paths run instantly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use visage_core::{
    AudioChunk, FakeRuntime, FakeRuntimeConfig, FrameEvent, PipelineConfig, PipelineState,
    PipelineStatusEvent, RuntimeHandle, VisageEngine,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        check_interval: Duration::from_millis(5),
        flush_delay: Duration::from_millis(100),
        ..Default::default()
    }
}

fn engine_with(fake: &Arc<FakeRuntime>) -> VisageEngine {
    VisageEngine::new(fast_config(), RuntimeHandle(fake.clone()))
}

/// A renderer that emits normally-sized frames as soon as audio arrives.
fn responsive_fake() -> Arc<FakeRuntime> {
    Arc::new(FakeRuntime::new(FakeRuntimeConfig::default()))
}

/// A renderer whose internal batcher holds everything back until it sees a
/// `last_chunk` push — output duration stays at zero, forcing the flush
/// scheduler down its waiting paths.
fn stalled_fake() -> Arc<FakeRuntime> {
    Arc::new(FakeRuntime::new(FakeRuntimeConfig {
        frame_samples: 64_000,
        ..Default::default()
    }))
}

async fn wait_for_state(
    rx: &mut broadcast::Receiver<PipelineStatusEvent>,
    want: PipelineState,
) -> PipelineStatusEvent {
    timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.state == want => break event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("status channel closed: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
}

async fn wait_for_speech_completed(rx: &mut broadcast::Receiver<FrameEvent>) {
    timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Ok(FrameEvent::SpeechCompleted) => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("frame channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for SpeechCompleted");
}

#[tokio::test(start_paused = true)]
async fn utterance_renders_to_completion_and_returns_to_idle() {
    init_tracing();
    let fake = responsive_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    let mut frames = engine.subscribe_frames();
    engine.start().unwrap();

    // One second of speech in 100 ms chunks.
    for _ in 0..10 {
        engine
            .push_audio(AudioChunk::new(vec![500; 1_600], 16_000))
            .unwrap();
    }
    wait_for_state(&mut status, PipelineState::Active).await;

    engine.end_of_speech().unwrap();
    wait_for_state(&mut status, PipelineState::Draining).await;
    wait_for_state(&mut status, PipelineState::Idle).await;
    wait_for_speech_completed(&mut frames).await;

    assert_eq!(fake.flush_count(), 1);

    let snap = engine.completion();
    assert!(
        (snap.input_secs - 1.0).abs() < 1e-6,
        "input {:.4}s",
        snap.input_secs
    );
    // All pushed audio plus the 10 ms last-chunk silence tail came back out;
    // the engine cannot fabricate more than it was given.
    assert!(snap.output_secs >= 1.0 - 1e-6, "output {:.4}s", snap.output_secs);
    assert!(
        snap.output_secs <= snap.input_secs + 0.010 + 1e-6,
        "output {:.4}s exceeds input + silence tail",
        snap.output_secs
    );

    // Exactly one SpeechCompleted for the utterance.
    let mut extra_completed = 0;
    while let Ok(event) = frames.try_recv() {
        if matches!(event, FrameEvent::SpeechCompleted) {
            extra_completed += 1;
        }
    }
    assert_eq!(extra_completed, 0, "saw a second SpeechCompleted");

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn audio_during_drain_cancels_the_flush_and_extends_the_utterance() {
    init_tracing();
    let fake = stalled_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    let mut frames = engine.subscribe_frames();
    engine.start().unwrap();

    // 1 s of speech, then speech-end: the stalled renderer emits nothing,
    // so the flush task sits in its polling loop.
    for _ in 0..10 {
        engine
            .push_audio(AudioChunk::new(vec![500; 1_600], 16_000))
            .unwrap();
    }
    engine.end_of_speech().unwrap();
    wait_for_state(&mut status, PipelineState::Draining).await;
    assert_eq!(fake.flush_count(), 0, "flush must still be pending");

    // Synthesis resumes with another 0.5 s burst before the flush lands.
    for _ in 0..5 {
        engine
            .push_audio(AudioChunk::new(vec![500; 1_600], 16_000))
            .unwrap();
    }
    wait_for_state(&mut status, PipelineState::Active).await;

    engine.end_of_speech().unwrap();
    wait_for_state(&mut status, PipelineState::Draining).await;
    wait_for_state(&mut status, PipelineState::Idle).await;
    wait_for_speech_completed(&mut frames).await;

    // One utterance, one flush, all 1.5 s accounted on both sides.
    assert_eq!(fake.flush_count(), 1);
    let snap = engine.completion();
    assert!(
        (snap.input_secs - 1.5).abs() < 1e-6,
        "input {:.4}s",
        snap.input_secs
    );
    assert!(snap.output_secs >= 1.5 - 1e-6, "output {:.4}s", snap.output_secs);

    let mut extra_completed = 0;
    while let Ok(event) = frames.try_recv() {
        if matches!(event, FrameEvent::SpeechCompleted) {
            extra_completed += 1;
        }
    }
    assert_eq!(extra_completed, 0, "end_of_speech frame must occur once");

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stalled_renderer_still_reaches_idle_within_the_deadline() {
    init_tracing();
    let fake = stalled_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    engine.start().unwrap();

    engine
        .push_audio(AudioChunk::new(vec![500; 8_000], 16_000))
        .unwrap();
    engine.end_of_speech().unwrap();

    // Bounded liveness: deadline (2 s floor) + post-flush wait + slack.
    let start = tokio::time::Instant::now();
    wait_for_state(&mut status, PipelineState::Idle).await;
    let elapsed = start.elapsed();
    assert!(
        elapsed <= Duration::from_secs(4),
        "took {elapsed:?} to settle"
    );
    assert_eq!(fake.flush_count(), 1, "best-effort flush must still happen");

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn interrupt_discards_the_utterance_everywhere() {
    init_tracing();
    // Audio-only frames: without video pacing the render loop forwards each
    // frame without suspending, so the discard cannot interleave with a
    // half-delivered frame.
    let fake = Arc::new(FakeRuntime::new(FakeRuntimeConfig {
        emit_video: false,
        ..Default::default()
    }));
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    let mut frames = engine.subscribe_frames();
    engine.start().unwrap();

    for _ in 0..10 {
        engine
            .push_audio(AudioChunk::new(vec![500; 1_600], 16_000))
            .unwrap();
    }
    wait_for_state(&mut status, PipelineState::Active).await;

    engine.interrupt().unwrap();
    wait_for_state(&mut status, PipelineState::Interrupted).await;
    wait_for_state(&mut status, PipelineState::Idle).await;

    assert_eq!(fake.interrupt_count(), 1);
    assert!(engine.playback().is_empty(), "playout queue must be cleared");
    let snap = engine.completion();
    assert_eq!(snap.input_secs, 0.0, "counters must be reset");
    assert_eq!(snap.ratio, 0.0);

    // Nothing from the discarded utterance may arrive after the interrupt:
    // drain what was forwarded beforehand, then verify silence.
    while frames.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(event) = frames.try_recv() {
        assert!(
            matches!(event, FrameEvent::SpeechCompleted),
            "unexpected media after interrupt: {event:?}"
        );
    }

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_drain_cancels_the_pending_flush() {
    init_tracing();
    let fake = stalled_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    engine.start().unwrap();

    engine
        .push_audio(AudioChunk::new(vec![500; 16_000], 16_000))
        .unwrap();
    engine.end_of_speech().unwrap();
    wait_for_state(&mut status, PipelineState::Draining).await;

    engine.interrupt().unwrap();
    wait_for_state(&mut status, PipelineState::Idle).await;

    assert_eq!(fake.interrupt_count(), 1);
    // The only flush the engine saw is the interrupt's buffer-discard
    // flush, not the cancelled smart flush.
    assert_eq!(fake.flush_count(), 1);
    assert_eq!(fake.buffered_samples(), 0);

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn zero_input_speech_end_skips_the_engine_flush() {
    init_tracing();
    let fake = responsive_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    engine.start().unwrap();

    // An empty chunk opens the utterance but is dropped as invalid.
    engine.push_audio(AudioChunk::new(vec![], 16_000)).unwrap();
    wait_for_state(&mut status, PipelineState::Active).await;

    engine.end_of_speech().unwrap();
    wait_for_state(&mut status, PipelineState::Idle).await;

    assert_eq!(fake.flush_count(), 0, "no-op utterance must not flush");
    assert_eq!(fake.push_count(), 0);

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn engine_push_failure_surfaces_and_resets() {
    init_tracing();
    let fake = responsive_fake();
    fake.set_fail_pushes(true);
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    engine.start().unwrap();

    engine
        .push_audio(AudioChunk::new(vec![500; 1_600], 16_000))
        .unwrap();

    let event = timeout(Duration::from_secs(10), async {
        loop {
            match status.recv().await {
                Ok(event) if event.state == PipelineState::Idle && event.detail.is_some() => {
                    break event
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("status channel closed: {e}"),
            }
        }
    })
    .await
    .expect("expected a fatal reset status event");

    assert!(
        event.detail.unwrap().contains("push rejected"),
        "detail should carry the engine error"
    );
    assert_eq!(engine.state(), PipelineState::Idle);

    // The pipeline is usable again once the engine behaves.
    fake.set_fail_pushes(false);
    engine
        .push_audio(AudioChunk::new(vec![500; 1_600], 16_000))
        .unwrap();
    wait_for_state(&mut status, PipelineState::Active).await;

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn engine_flush_failure_is_surfaced() {
    init_tracing();
    let fake = responsive_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    engine.start().unwrap();

    engine
        .push_audio(AudioChunk::new(vec![500; 1_600], 16_000))
        .unwrap();
    wait_for_state(&mut status, PipelineState::Active).await;

    fake.set_fail_flushes(true);
    engine.end_of_speech().unwrap();

    let event = timeout(Duration::from_secs(10), async {
        loop {
            match status.recv().await {
                Ok(event) if event.state == PipelineState::Idle && event.detail.is_some() => {
                    break event
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("status channel closed: {e}"),
            }
        }
    })
    .await
    .expect("expected a failed-flush status event");

    assert!(
        event.detail.unwrap().contains("flush rejected"),
        "detail should carry the engine error"
    );
    assert_eq!(engine.state(), PipelineState::Idle);

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn resampled_input_is_accounted_at_the_engine_rate() {
    init_tracing();
    let fake = responsive_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    engine.start().unwrap();

    // One second of 24 kHz speech → one second at the 16 kHz engine rate.
    for _ in 0..10 {
        engine
            .push_audio(AudioChunk::new(vec![500; 2_400], 24_000))
            .unwrap();
    }
    engine.end_of_speech().unwrap();
    wait_for_state(&mut status, PipelineState::Idle).await;

    let snap = engine.completion();
    assert!(
        (snap.input_secs - 1.0).abs() < 1e-3,
        "post-resample input {:.4}s",
        snap.input_secs
    );
    assert_eq!(fake.flush_count(), 1);

    engine.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn wav_clip_streams_as_one_utterance() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.wav");
    {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..8_000 {
            writer.write_sample(((i % 200) * 50) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    let fake = responsive_fake();
    let engine = engine_with(&fake);
    let mut status = engine.subscribe_status();
    engine.start().unwrap();

    engine
        .stream_wav_file(&path, Duration::from_millis(50))
        .await
        .unwrap();
    wait_for_state(&mut status, PipelineState::Idle).await;

    let snap = engine.completion();
    assert!(
        (snap.input_secs - 0.5).abs() < 1e-3,
        "clip is 0.5 s, accounted {:.4}s",
        snap.input_secs
    );
    assert_eq!(fake.flush_count(), 1);

    engine.stop().unwrap();
}
