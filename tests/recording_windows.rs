use std::time::Duration;

use anyhow::Result;

use clipwatch::detect::{shared, Detection, NormalizedRect, StubBackend};
use clipwatch::frame::{Frame, Rotation, TrackInfo};
use clipwatch::ingest::{FileConfig, FileSource};
use clipwatch::pipeline::{EndReason, Session, SessionSettings};
use clipwatch::record::{
    ClipOutcome, CloseReason, ClosedWindow, OutputPlan, Recorder, RecordingPolicy, Step,
    TriggerRule,
};
use clipwatch::sink::MemorySinkFactory;
use clipwatch::{ClipArchive, RecordError};

const FPS: f32 = 30.0;

fn track() -> TrackInfo {
    TrackInfo {
        width: 4,
        height: 2,
        rotation: Rotation::Deg0,
        nominal_frame_rate: FPS,
    }
}

fn frame(index: u64) -> Frame {
    Frame::new(
        index,
        Duration::from_secs_f64(index as f64 / FPS as f64),
        4,
        2,
        vec![0; 24],
    )
}

fn person(confidence: f32) -> Vec<Detection> {
    vec![Detection::new("person", confidence, NormalizedRect::default())]
}

fn recorder(policy: RecordingPolicy, factory: &MemorySinkFactory) -> Recorder {
    Recorder::new(
        policy,
        TriggerRule::default(),
        factory.clone(),
        OutputPlan::new(std::env::temp_dir().join("clipwatch-it"), track()),
    )
    .expect("valid policy")
}

/// Feed frames `0..frames`, with a qualifying person on the frames `seen` accepts.
fn drive(
    recorder: &mut Recorder,
    frames: u64,
    seen: impl Fn(u64) -> bool,
) -> Vec<ClosedWindow> {
    let mut closed = Vec::new();
    for index in 0..frames {
        let detections = if seen(index) { person(0.95) } else { Vec::new() };
        if let Step::Closed(window) = recorder.process(&frame(index), &detections).unwrap() {
            closed.push(window);
        }
    }
    closed.extend(recorder.finish());
    closed
}

fn session_settings(policy: RecordingPolicy) -> SessionSettings {
    SessionSettings {
        policy,
        output_dir: std::env::temp_dir().join("clipwatch-it"),
        ..SessionSettings::default()
    }
}

fn stub_source(url: &str) -> Box<dyn clipwatch::FrameSource> {
    Box::new(FileSource::new(FileConfig::new(url)).expect("stub source"))
}

#[test]
fn no_qualifying_detection_creates_no_sink() {
    let factory = MemorySinkFactory::new();
    let mut rec = recorder(RecordingPolicy::default(), &factory);
    for index in 0..100 {
        let detections = match index % 3 {
            0 => person(0.89),
            1 => vec![Detection::new("dog", 0.99, NormalizedRect::default())],
            _ => Vec::new(),
        };
        assert!(matches!(
            rec.process(&frame(index), &detections).unwrap(),
            Step::Idle
        ));
    }
    assert!(rec.finish().is_none());
    assert_eq!(factory.open_attempts(), 0);
    assert!(factory.clips().is_empty());
}

#[test]
fn fixed_duration_writes_exact_frame_count_from_trigger() {
    let factory = MemorySinkFactory::new();
    let mut rec = recorder(RecordingPolicy::fixed(10.0), &factory);
    let closed = drive(&mut rec, 400, |index| index == 50);

    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].start_frame_index, 50);
    assert_eq!(closed[0].last_frame_index, 349);
    assert_eq!(closed[0].reason, CloseReason::DurationReached);
    assert_eq!(closed[0].frames_written, 300);

    let clips = factory.clips();
    assert_eq!(clips[0].frame_indices(), (50..=349).collect::<Vec<_>>());
    assert_eq!(clips[0].frames[0].1, Duration::ZERO);
}

#[test]
fn trailing_silence_closes_after_last_sighting() {
    let factory = MemorySinkFactory::new();
    let mut rec = recorder(RecordingPolicy::trailing_silence(10.0, 5.0), &factory);
    let closed = drive(&mut rec, 400, |index| (50..=80).contains(&index));

    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].last_person_frame_index, 80);
    assert_eq!(closed[0].last_frame_index, 230);
    assert_eq!(closed[0].reason, CloseReason::SilenceReached);
    assert_eq!(factory.clips()[0].frame_indices(), (50..=230).collect::<Vec<_>>());
}

#[test]
fn reappearance_extends_the_window() {
    let factory = MemorySinkFactory::new();
    let mut rec = recorder(RecordingPolicy::trailing_silence(10.0, 5.0), &factory);
    let closed = drive(&mut rec, 400, |index| index == 50 || index == 190);

    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].last_frame_index, 340);
    assert_eq!(closed[0].reason, CloseReason::SilenceReached);
}

#[test]
fn fixed_bound_caps_a_subject_that_never_leaves() {
    let factory = MemorySinkFactory::new();
    let mut rec = recorder(RecordingPolicy::trailing_silence(10.0, 5.0), &factory);
    let closed = drive(&mut rec, 360, |index| index >= 50);

    // A new window opens on the frame right after the capped one.
    assert_eq!(closed[0].last_frame_index, 349);
    assert_eq!(closed[0].reason, CloseReason::DurationReached);
    assert_eq!(closed[1].start_frame_index, 350);
    assert_eq!(closed[1].reason, CloseReason::StreamEnded);
}

#[test]
fn closed_windows_reset_and_reopen_independently() {
    let factory = MemorySinkFactory::new();
    let mut rec = recorder(RecordingPolicy::fixed(1.0), &factory);
    let closed = drive(&mut rec, 200, |index| index == 10 || index == 100);

    assert_eq!(closed.len(), 2);
    assert_eq!(
        (closed[0].start_frame_index, closed[0].last_frame_index),
        (10, 39)
    );
    assert_eq!(
        (closed[1].start_frame_index, closed[1].last_frame_index),
        (100, 129)
    );

    let clips = factory.clips();
    assert_eq!(clips.len(), 2);
    assert_eq!(clips[1].request.origin, frame(100).timestamp);
    assert_eq!(clips[1].frames[0], (100, Duration::ZERO));
    assert!(clips.iter().all(|clip| clip.finalize_calls == 1));
}

#[test]
fn never_writes_frames_before_the_trigger() {
    let factory = MemorySinkFactory::new();
    let mut rec = recorder(RecordingPolicy::fixed(2.0), &factory);
    drive(&mut rec, 120, |index| index == 77);
    assert!(factory.clips()[0].frame_indices().iter().all(|&i| i >= 77));
}

#[test]
fn huge_durations_leave_closing_to_the_stream_end() {
    for policy in [
        RecordingPolicy::fixed(1e30),
        RecordingPolicy::trailing_silence(10.0, 1e30),
        RecordingPolicy::trailing_silence(1e30, 1e30),
    ] {
        let factory = MemorySinkFactory::new();
        let mut rec = recorder(policy, &factory);
        let closed = drive(&mut rec, 400, |index| index == 5);

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].start_frame_index, 5);
        if policy.seconds_to_record > 1e29 {
            assert_eq!(closed[0].last_frame_index, 399);
            assert_eq!(closed[0].reason, CloseReason::StreamEnded);
        } else {
            assert_eq!(closed[0].last_frame_index, 304);
            assert_eq!(closed[0].reason, CloseReason::DurationReached);
        }
        assert_eq!(factory.clips()[0].finalize_calls, 1);
    }
}

#[test]
fn read_failure_finalizes_open_window_once() -> Result<()> {
    let factory = MemorySinkFactory::new();
    let session = Session::new(
        stub_source("stub://porch?frames=100&fps=30&width=4&height=2&fail_at=60"),
        shared(StubBackend::new().with_detection(50..=55, "person", 0.97)),
        factory.clone(),
        session_settings(RecordingPolicy::default()),
    )?;
    let summary = session.run()?;

    assert!(matches!(summary.ended, EndReason::ReadFailed(_)));
    assert_eq!(summary.frames_processed, 60);
    assert_eq!(summary.clips.len(), 1);
    assert_eq!(summary.clips[0].reason, CloseReason::StreamEnded);
    assert_eq!(summary.clips[0].last_frame_index, 59);

    let clips = factory.clips();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].finalize_calls, 1);
    assert_eq!(clips[0].frame_indices(), (50..60).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn sink_creation_failure_keeps_window_bookkeeping() -> Result<()> {
    let factory = MemorySinkFactory::new().failing_open();
    let session = Session::new(
        stub_source("stub://porch?frames=120&fps=30&width=4&height=2"),
        shared(
            StubBackend::new()
                .with_detection(5..=5, "person", 0.95)
                .with_detection(80..=80, "person", 0.95),
        ),
        factory.clone(),
        session_settings(RecordingPolicy::fixed(1.0)),
    )?;
    let summary = session.run()?;

    assert_eq!(summary.clips.len(), 2);
    for clip in &summary.clips {
        assert_eq!(clip.frames_written, 0);
        assert_eq!(clip.reason, CloseReason::DurationReached);
        assert!(matches!(
            clip.outcome,
            ClipOutcome::NotWritten(RecordError::SinkCreationFailed { .. })
        ));
    }
    assert_eq!(summary.clips[0].last_frame_index, 34);
    // One open attempt per window, not per frame.
    assert_eq!(factory.open_attempts(), 2);
    Ok(())
}

#[test]
fn finalize_failure_is_reported_once() -> Result<()> {
    let factory = MemorySinkFactory::new().failing_finalize();
    let session = Session::new(
        stub_source("stub://porch?frames=40&fps=30&width=4&height=2"),
        shared(StubBackend::new().with_detection(0..=0, "person", 0.95)),
        factory.clone(),
        session_settings(RecordingPolicy::fixed(0.5)),
    )?;
    let summary = session.run()?;

    assert_eq!(summary.clips.len(), 1);
    assert!(matches!(
        summary.clips[0].outcome,
        ClipOutcome::FinalizeFailed(RecordError::FinalizeFailed { .. })
    ));
    assert_eq!(factory.clips()[0].finalize_calls, 1);
    Ok(())
}

#[test]
fn missing_working_file_is_a_persistence_failure() -> Result<()> {
    let archive_dir = tempfile::tempdir()?;
    let session = Session::new(
        stub_source("stub://porch?frames=20&fps=30&width=4&height=2"),
        shared(StubBackend::new().with_detection(2..=2, "person", 0.95)),
        MemorySinkFactory::new(),
        session_settings(RecordingPolicy::fixed(0.1)),
    )?
    .with_archive(ClipArchive::new(archive_dir.path()));
    let summary = session.run()?;

    // The in-memory sink never writes a file, so there is nothing to copy.
    assert_eq!(summary.saved().count(), 1);
    assert!(summary.persisted.is_empty());
    assert!(matches!(
        summary.persistence_failures.as_slice(),
        [RecordError::PersistenceFailed { .. }]
    ));
    Ok(())
}

#[test]
fn rotated_track_requests_swapped_dimensions() -> Result<()> {
    let factory = MemorySinkFactory::new();
    let session = Session::new(
        stub_source("stub://phone?frames=10&fps=30&width=8&height=4&rotation=90"),
        shared(StubBackend::new().with_detection(0..=0, "person", 0.95)),
        factory.clone(),
        session_settings(RecordingPolicy::fixed(0.1)),
    )?;
    session.run()?;

    let request = &factory.clips()[0].request;
    assert_eq!((request.width, request.height), (4, 8));
    Ok(())
}
