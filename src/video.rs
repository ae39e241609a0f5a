/// Directories of still images used as frame sources and sinks
pub mod image_sequence;

/// OpenCV backed video files
#[cfg(feature = "opencv")]
pub mod capture;

use crate::video::image_sequence::{ImageSequence, ImageSequenceWriter};
use crate::Errors;
use anyhow::{Context, Result};
use image::RgbImage;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Framerate assumed for sources that do not carry one (image sequences)
pub const DEFAULT_FRAMERATE: f64 = 25.0;

/// File extensions that are treated as encoded video files
pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "avi", "mkv", "mov", "m4v", "webm", "wmv", "mpg"];

/// Decoded frame with its position in the source
///
#[derive(Debug, Clone)]
pub struct Frame {
    /// 0-based frame index
    pub index: usize,
    /// Presentation time in milliseconds
    pub timestamp: f64,
    pub image: RgbImage,
}

/// Source of decoded frames.
///
/// The source keeps a read position: `read` returns the frame at the position and
/// moves it forward by one.
///
pub trait FrameSource: Send {
    /// Total amount of frames. Encoded videos may report an inaccurate value when the
    /// container header does not carry it.
    fn frames(&self) -> usize;
    fn framerate(&self) -> f64;
    /// Resolution as (width, height)
    fn resolution(&self) -> (u32, u32);
    fn fourcc(&self) -> String;
    fn position(&self) -> usize;
    fn seek(&mut self, index: usize) -> Result<()>;
    /// Next frame or `None` when the source is exhausted
    fn read(&mut self) -> Result<Option<RgbImage>>;
}

/// Destination for annotated frames
///
pub trait FrameSink: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_video_file(path: &Path) -> bool {
    extension(path).map_or(false, |e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

/// Opens the matching source for `path`: encoded video files go to OpenCV, directories and
/// still images to the image sequence reader.
///
/// # Parameters
/// * `path` - video file, image or directory of images
/// * `framerate` - framerate override, required for image sequences that should not run at the default rate
///
pub fn open_source(path: &Path, framerate: Option<f64>) -> Result<Box<dyn FrameSource>> {
    if !path.exists() {
        return Err(Errors::MissingInput(path.display().to_string()).into());
    }

    if is_video_file(path) {
        open_video_file(path, framerate)
    } else {
        let sequence =
            ImageSequence::open(path, framerate.unwrap_or(DEFAULT_FRAMERATE)).with_context(
                || format!("Unable to open image sequence `{}`", path.display()),
            )?;
        Ok(Box::new(sequence))
    }
}

#[cfg(feature = "opencv")]
fn open_video_file(path: &Path, _framerate: Option<f64>) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(capture::Capture::open(path)?))
}

#[cfg(not(feature = "opencv"))]
fn open_video_file(path: &Path, _framerate: Option<f64>) -> Result<Box<dyn FrameSource>> {
    Err(Errors::UnsupportedFormat(extension(path).unwrap_or_default()).into())
}

/// Opens the sink for `path`: a video file when the extension is a known video extension,
/// a directory of PNG frames otherwise.
///
pub fn open_sink(path: &Path, framerate: f64, resolution: (u32, u32)) -> Result<Box<dyn FrameSink>> {
    if is_video_file(path) {
        open_video_writer(path, framerate, resolution)
    } else {
        Ok(Box::new(ImageSequenceWriter::create(path)?))
    }
}

#[cfg(feature = "opencv")]
fn open_video_writer(
    path: &Path,
    framerate: f64,
    resolution: (u32, u32),
) -> Result<Box<dyn FrameSink>> {
    Ok(Box::new(capture::CaptureWriter::create(
        path, framerate, resolution,
    )?))
}

#[cfg(not(feature = "opencv"))]
fn open_video_writer(
    path: &Path,
    _framerate: f64,
    _resolution: (u32, u32),
) -> Result<Box<dyn FrameSink>> {
    Err(Errors::UnsupportedFormat(extension(path).unwrap_or_default()).into())
}

/// Index of the last frame of the source at `path`
///
/// Fails with `MissingInput` if the path does not exist and with `NotAVideo` if no frame can be found.
///
pub fn last_frame(path: &Path) -> Result<usize> {
    let source = open_source(path, None)?;
    match source.frames() {
        0 => Err(Errors::NotAVideo(path.display().to_string()).into()),
        n => Ok(n - 1),
    }
}

/// Random access abstraction over a frame source.
///
/// `Video` can be used in two ways:
/// * addressing individual frames with [`Video::set_position`], [`Video::frame`] and [`Video::grab`];
///   the frame at the current position is decoded once and cached;
/// * as an iterator that yields every frame from the current position until the source runs out.
///   Afterwards the video stays stopped until [`Video::reset`] is called.
///
pub struct Video {
    path: PathBuf,
    source: Box<dyn FrameSource>,
    position: usize,
    cached: Option<Frame>,
    stopped: bool,
}

impl std::fmt::Debug for Video {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Video at {}>", self.path.display())
    }
}

impl Video {
    pub fn open(path: impl AsRef<Path>, framerate: Option<f64>) -> Result<Self> {
        let path = path.as_ref();
        let source = open_source(path, framerate)?;
        info!(
            "Opened {} ({} frames, {:.2} fps, {:?}, fourcc `{}`)",
            path.display(),
            source.frames(),
            source.framerate(),
            source.resolution(),
            source.fourcc()
        );
        Ok(Self::from_source(path, source))
    }

    /// Wraps an already opened source
    ///
    pub fn from_source(path: impl Into<PathBuf>, source: Box<dyn FrameSource>) -> Self {
        Self {
            path: path.into(),
            source,
            position: 0,
            cached: None,
            stopped: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current frame index
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves to the frame `index`. The frame itself is decoded lazily.
    ///
    pub fn set_position(&mut self, index: usize) -> Result<()> {
        let frames = self.frames();
        if frames > 0 && index >= frames {
            return Err(Errors::FrameOutOfRange(index).into());
        }
        self.position = index;
        Ok(())
    }

    /// Time of the current position in milliseconds
    pub fn time(&self) -> f64 {
        self.timestamp(self.position)
    }

    pub fn set_time(&mut self, time: f64) -> Result<()> {
        let index = (time.max(0.0) * self.framerate() / 1000.0).round() as usize;
        self.set_position(index)
    }

    pub fn framerate(&self) -> f64 {
        self.source.framerate()
    }

    pub fn frames(&self) -> usize {
        self.source.frames()
    }

    /// Total length in seconds
    pub fn length(&self) -> f64 {
        self.frames() as f64 / self.framerate()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.source.resolution()
    }

    pub fn fourcc(&self) -> String {
        self.source.fourcc()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn timestamp(&self, index: usize) -> f64 {
        index as f64 * 1000.0 / self.framerate()
    }

    fn decode(&mut self, index: usize) -> Result<Option<Frame>> {
        if self.source.position() != index {
            self.source.seek(index)?;
        }
        let timestamp = self.timestamp(index);
        Ok(self.source.read()?.map(|image| Frame {
            index,
            timestamp,
            image,
        }))
    }

    /// Frame at the current position. Repeated calls do not decode again.
    ///
    pub fn frame(&mut self) -> Result<&Frame> {
        let stale = self
            .cached
            .as_ref()
            .map_or(true, |f| f.index != self.position);
        if stale {
            debug!("Decoding frame {} of {}", self.position, self.path.display());
            let frame = self
                .decode(self.position)?
                .ok_or(Errors::FrameOutOfRange(self.position))?;
            self.cached = Some(frame);
        }
        self.cached
            .as_ref()
            .ok_or_else(|| Errors::FrameOutOfRange(self.position).into())
    }

    /// Moves to `index` and returns the frame there
    ///
    pub fn grab(&mut self, index: usize) -> Result<&Frame> {
        self.set_position(index)?;
        self.frame()
    }

    /// Moves one frame forward and returns it
    ///
    pub fn grab_next(&mut self) -> Result<&Frame> {
        self.grab(self.position + 1)
    }

    /// Rewinds a stopped video so it can be iterated again
    ///
    pub fn reset(&mut self) {
        self.position = 0;
        self.stopped = false;
    }
}

impl Iterator for Video {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        let index = self.position;
        let frame = match self.cached.take() {
            Some(f) if f.index == index => Ok(Some(f)),
            _ => self.decode(index),
        };
        match frame {
            Ok(Some(f)) => {
                self.position = index + 1;
                Some(Ok(f))
            }
            Ok(None) => {
                self.stopped = true;
                None
            }
            Err(e) => {
                self.stopped = true;
                Some(Err(e))
            }
        }
    }
}
