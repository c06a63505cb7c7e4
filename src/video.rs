//! Camera streams and the boundary to an external video decoder.
//!
//! Decoding compressed video is not done here. A [`FrameBackend`] opens a
//! container and hands back a [`FrameDecoder`]; [`FrameReader`] owns that
//! handle for the lifetime of its segment and turns every failure into an
//! empty [`Image`].
use crate::error::VideoError;
use log::debug;
use std::fmt;
use std::path::{Path, PathBuf};

/// Camera channel of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Camera {
    /// Low-fidelity road camera, `qcamera.ts`.
    QRoad,
    /// Primary road camera, `fcamera`.
    Road,
    /// Driver-facing camera, `dcamera`.
    Driver,
    /// Wide road camera, `ecamera`.
    WideRoad,
}

impl Camera {
    pub const ALL: [Camera; 4] = [Camera::QRoad, Camera::Road, Camera::Driver, Camera::WideRoad];

    /// File names recognized for this channel, preferred first.
    pub fn file_names(self) -> &'static [&'static str] {
        match self {
            Camera::QRoad => &["qcamera.ts"],
            Camera::Road => &["fcamera.hevc", "fcamera.ts"],
            Camera::Driver => &["dcamera.hevc", "dcamera.ts"],
            Camera::WideRoad => &["ecamera.hevc", "ecamera.ts"],
        }
    }

    /// Everything except `qcamera` is only loaded for full replay.
    pub fn is_full_fidelity(self) -> bool {
        !matches!(self, Camera::QRoad)
    }
}

/// Decoded frame. An empty image stands for "no frame available".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// Packed pixel data, row-major.
    pub data: Vec<u8>,
}

impl Image {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An opened video stream.
pub trait FrameDecoder: Send {
    fn frame_count(&self) -> usize;

    fn decode(&mut self, index: usize) -> Result<Image, VideoError>;
}

/// Opens camera files. Shared across preload workers.
pub trait FrameBackend: Send + Sync {
    fn open(&self, path: &Path, camera: Camera) -> Result<Box<dyn FrameDecoder>, VideoError>;
}

/// Backend used when no decoder is plugged in. Every camera stays unloaded,
/// so every frame resolves to an empty image.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVideoBackend;

impl FrameBackend for NoVideoBackend {
    fn open(&self, path: &Path, _camera: Camera) -> Result<Box<dyn FrameDecoder>, VideoError> {
        Err(VideoError::Unsupported(path.to_path_buf()))
    }
}

pub struct FrameReader {
    path: PathBuf,
    camera: Camera,
    decoder: Option<Box<dyn FrameDecoder>>,
}

impl fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReader")
            .field("path", &self.path)
            .field("camera", &self.camera)
            .field("frames", &self.frame_count())
            .finish()
    }
}

impl FrameReader {
    pub fn new(path: impl Into<PathBuf>, camera: Camera) -> Self {
        Self { path: path.into(), camera, decoder: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn is_loaded(&self) -> bool {
        self.decoder.is_some()
    }

    /// Total frames, zero until loaded.
    pub fn frame_count(&self) -> usize {
        self.decoder.as_ref().map_or(0, |d| d.frame_count())
    }

    /// Open the stream through `backend`. No-op once open.
    pub fn load(&mut self, backend: &dyn FrameBackend) -> Result<(), VideoError> {
        if self.decoder.is_none() {
            let decoder = backend.open(&self.path, self.camera)?;
            debug!("Opened {:?}: {} frames", self.path, decoder.frame_count());
            self.decoder = Some(decoder);
        }
        Ok(())
    }

    /// Frame at `index`, or an empty image when unloaded, out of range or
    /// undecodable.
    pub fn get(&mut self, index: usize) -> Image {
        let Some(decoder) = self.decoder.as_mut() else {
            return Image::empty();
        };
        let count = decoder.frame_count();
        if index >= count {
            debug!("{:?}: {}", self.path, VideoError::OutOfRange { index, count });
            return Image::empty();
        }
        decoder.decode(index).unwrap_or_else(|e| {
            debug!("{:?}: frame {index}: {e}", self.path);
            Image::empty()
        })
    }
}
