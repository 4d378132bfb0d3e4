//! Local file frame source.
//!
//! This module provides `FileSource` for reading frames from a local video
//! file, one decoded frame per call. `stub://` paths produce a synthetic
//! stream; real files need the `ingest-file-ffmpeg` feature.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{StubParams, SyntheticStream};
use super::FrameSource;
use crate::frame::{Frame, TrackInfo};

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "/srv/clips/entrance.mp4") or a `stub://` url.
    pub path: String,
    /// Used when the container reports no usable nominal frame rate.
    pub fallback_frame_rate: Option<f32>,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fallback_frame_rate: None,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with("stub://") {
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticStream::new(StubParams::parse(
                    &config.path,
                )?)),
            })
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                Ok(Self {
                    backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
                })
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                Err(anyhow!(
                    "file ingestion requires the ingest-file-ffmpeg feature"
                ))
            }
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(stream) => {
                log::info!("FileSource: opened {} (synthetic)", stream.params().name);
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn track(&self) -> TrackInfo {
        match &self.backend {
            FileBackend::Synthetic(stream) => stream.track(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.track(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(stream) => stream.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(stream) => stream.frames_read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_read(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
