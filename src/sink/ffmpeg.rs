//! H.264/MP4 sink backed by an `ffmpeg` child process.
//!
//! Raw RGB24 frames are queued on a bounded channel and a writer thread pipes
//! them into the encoder's stdin. The queue depth is the sink's readiness
//! signal: once it is full, `is_ready` reports false until the encoder drains.
//!
//! The encoder input runs at the request's constant frame rate. Each frame is
//! placed on that grid by its presentation time: a gap repeats the frame to
//! fill the missing slots, and a frame landing on an already filled slot is
//! skipped, so clip time tracks source time for variable-rate input.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Codec, OutputSink, SinkFactory, SinkRequest};
use crate::error::RecordError;
use crate::frame::Frame;

const DEFAULT_PROGRAM: &str = "ffmpeg";
const DEFAULT_QUEUE_CAPACITY: usize = 8;
/// Lines of encoder stderr kept for error reports.
const STDERR_TAIL: usize = 20;

/// Spawns one `ffmpeg` encoder per clip.
#[derive(Clone, Debug)]
pub struct FfmpegSinkFactory {
    program: PathBuf,
    queue_capacity: usize,
}

impl FfmpegSinkFactory {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Use a specific ffmpeg binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

impl Default for FfmpegSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&mut self, request: &SinkRequest) -> Result<Box<dyn OutputSink>, RecordError> {
        FfmpegSink::spawn(&self.program, self.queue_capacity, request)
            .map(|sink| Box::new(sink) as Box<dyn OutputSink>)
    }
}

pub struct FfmpegSink {
    request: SinkRequest,
    child: Child,
    sender: Option<SyncSender<(Vec<u8>, u64)>>,
    writer: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
    stderr_tail: Arc<Mutex<Vec<String>>>,
    capacity: usize,
    last_pts: Option<Duration>,
    /// Encoder frames queued so far; the next frame's grid slot.
    next_slot: u64,
    frames_written: u64,
}

impl FfmpegSink {
    fn spawn(program: &Path, capacity: usize, request: &SinkRequest) -> Result<Self, RecordError> {
        let creation_failed = |reason: String| RecordError::SinkCreationFailed {
            path: request.path.clone(),
            reason,
        };
        if request.width == 0 || request.height == 0 {
            return Err(creation_failed("zero output dimensions".to_string()));
        }
        if !(request.frame_rate.is_finite() && request.frame_rate > 0.0) {
            return Err(creation_failed(format!(
                "invalid frame rate {}",
                request.frame_rate
            )));
        }

        let mut child = Command::new(program)
            .args(encoder_args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| creation_failed(format!("spawn {}: {}", program.display(), err)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| creation_failed("encoder stdin unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| creation_failed("encoder stderr unavailable".to_string()))?;

        let pending = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        let (sender, receiver) = mpsc::sync_channel::<(Vec<u8>, u64)>(capacity);

        let writer = {
            let pending = pending.clone();
            let failed = failed.clone();
            thread::Builder::new()
                .name("clipwatch-encoder-writer".to_string())
                .spawn(move || pump_frames(stdin, receiver, pending, failed))
                .map_err(|err| creation_failed(format!("spawn writer thread: {}", err)))?
        };

        let stderr_reader = {
            let tail = stderr_tail.clone();
            thread::Builder::new()
                .name("clipwatch-encoder-stderr".to_string())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        log::debug!("ffmpeg: {}", line);
                        if let Ok(mut tail) = tail.lock() {
                            if tail.len() == STDERR_TAIL {
                                tail.remove(0);
                            }
                            tail.push(line);
                        }
                    }
                })
                .map_err(|err| creation_failed(format!("spawn stderr thread: {}", err)))?
        };

        log::info!(
            "FfmpegSink: writing {}x{} @ {:.2} fps to {}",
            request.width,
            request.height,
            request.frame_rate,
            request.path.display()
        );

        Ok(Self {
            request: request.clone(),
            child,
            sender: Some(sender),
            writer: Some(writer),
            stderr_reader: Some(stderr_reader),
            pending,
            failed,
            stderr_tail,
            capacity,
            last_pts: None,
            next_slot: 0,
            frames_written: 0,
        })
    }

    fn stderr_summary(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.join("\n"))
            .unwrap_or_default()
    }
}

fn pump_frames(
    mut stdin: ChildStdin,
    receiver: mpsc::Receiver<(Vec<u8>, u64)>,
    pending: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
) {
    for (buffer, copies) in receiver {
        let result = (0..copies).try_for_each(|_| stdin.write_all(&buffer));
        pending.fetch_sub(1, Ordering::AcqRel);
        if let Err(err) = result {
            log::warn!("FfmpegSink: encoder stdin closed: {}", err);
            failed.store(true, Ordering::Release);
            break;
        }
    }
    // Dropping stdin signals end-of-stream to the encoder.
}

/// Encoder frames to emit for a frame at `pts`, given `next_slot` frames
/// already queued. Zero means the frame's slot is already filled.
fn slot_copies(next_slot: u64, pts: Duration, frame_rate: f32) -> u64 {
    let slot = (pts.as_secs_f64() * frame_rate as f64).round() as u64;
    if next_slot == 0 {
        // The first frame always starts the clip at time zero.
        return 1;
    }
    slot.saturating_add(1).saturating_sub(next_slot)
}

fn encoder_args(request: &SinkRequest) -> Vec<String> {
    let codec = match request.codec {
        Codec::H264 => "libx264",
    };
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pixel_format".into(),
        "rgb24".into(),
        "-video_size".into(),
        format!("{}x{}", request.width, request.height),
        "-framerate".into(),
        format!("{}", request.frame_rate),
        "-i".into(),
        "pipe:0".into(),
        "-an".into(),
        // yuv420p needs even dimensions.
        "-vf".into(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
        "-c:v".into(),
        codec.into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        request.path.display().to_string(),
    ]
}

impl OutputSink for FfmpegSink {
    fn path(&self) -> &Path {
        &self.request.path
    }

    fn is_ready(&self) -> bool {
        // A dead encoder reports ready so the next append surfaces the failure.
        self.failed.load(Ordering::Acquire) || self.pending.load(Ordering::Acquire) < self.capacity
    }

    fn append(&mut self, frame: &Frame, pts: Duration) -> Result<(), RecordError> {
        let append_failed = |reason: String| RecordError::AppendFailed {
            index: frame.index,
            reason,
        };
        if self.failed.load(Ordering::Acquire) {
            return Err(append_failed(format!(
                "encoder exited early: {}",
                self.stderr_summary()
            )));
        }
        if frame.width != self.request.width || frame.height != self.request.height {
            return Err(append_failed(format!(
                "frame is {}x{}, clip is {}x{}",
                frame.width, frame.height, self.request.width, self.request.height
            )));
        }
        if self.last_pts.is_some_and(|last| pts < last) {
            return Err(append_failed(format!("timestamp {:?} goes backwards", pts)));
        }
        if !self.is_ready() {
            return Err(RecordError::SinkNotReady);
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| append_failed("sink already finalized".to_string()))?;

        let copies = slot_copies(self.next_slot, pts, self.request.frame_rate);
        if copies == 0 {
            log::debug!(
                "FfmpegSink: frame {} at {:?} shares a slot with the previous frame; skipped",
                frame.index,
                pts
            );
            self.last_pts = Some(pts);
            return Ok(());
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        match sender.try_send((frame.pixels().to_vec(), copies)) {
            Ok(()) => {
                self.last_pts = Some(pts);
                self.next_slot += copies;
                self.frames_written += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(RecordError::SinkNotReady)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(append_failed("encoder writer stopped".to_string()))
            }
        }
    }

    fn finalize(mut self: Box<Self>) -> Result<PathBuf, RecordError> {
        drop(self.sender.take());
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        let status = self.child.wait();
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }

        let path = self.request.path.clone();
        let finalize_failed = |reason: String| RecordError::FinalizeFailed {
            path: path.clone(),
            reason,
        };
        let status = status.map_err(|err| finalize_failed(format!("wait for encoder: {}", err)))?;
        if !status.success() {
            return Err(finalize_failed(format!(
                "encoder exited with {}: {}",
                status,
                self.stderr_summary()
            )));
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(finalize_failed(format!(
                "encoder input failed: {}",
                self.stderr_summary()
            )));
        }

        log::info!(
            "FfmpegSink: finished {} ({} frames)",
            path.display(),
            self.frames_written
        );
        Ok(path)
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        // Only reached without finalize on error paths; don't leave the encoder running.
        if self.sender.is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
