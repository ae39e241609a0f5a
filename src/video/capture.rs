use crate::video::{FrameSink, FrameSource, DEFAULT_FRAMERATE};
use crate::Errors;
use anyhow::Result;
use image::RgbImage;
use log::warn;
use opencv::core::{Mat, Size};
use opencv::prelude::*;
use opencv::{imgproc, videoio};
use std::path::Path;

/// Video file decoded with OpenCV
///
pub struct Capture {
    capture: videoio::VideoCapture,
    position: usize,
}

impl Capture {
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy().to_string();
        let capture = videoio::VideoCapture::from_file(&name, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(Errors::NotAVideo(name).into());
        }
        Ok(Self {
            capture,
            position: 0,
        })
    }

    fn prop(&self, id: i32) -> f64 {
        self.capture.get(id).unwrap_or(0.0)
    }
}

impl FrameSource for Capture {
    fn frames(&self) -> usize {
        self.prop(videoio::CAP_PROP_FRAME_COUNT).max(0.0) as usize
    }

    fn framerate(&self) -> f64 {
        match self.prop(videoio::CAP_PROP_FPS) {
            fps if fps > 0.0 => fps,
            _ => DEFAULT_FRAMERATE,
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (
            self.prop(videoio::CAP_PROP_FRAME_WIDTH) as u32,
            self.prop(videoio::CAP_PROP_FRAME_HEIGHT) as u32,
        )
    }

    fn fourcc(&self) -> String {
        let fcc = self.prop(videoio::CAP_PROP_FOURCC) as i64;
        (0..4)
            .map(|i| ((fcc >> (8 * i)) & 0xFF) as u8 as char)
            .collect()
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if !self
            .capture
            .set(videoio::CAP_PROP_POS_FRAMES, index as f64)?
        {
            warn!("Backend refused to seek to frame {}", index);
        }
        self.position = index;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<RgbImage>> {
        let mut bgr = Mat::default();
        if !self.capture.read(&mut bgr)? || bgr.empty() {
            return Ok(None);
        }
        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        let data = rgb.data_bytes()?.to_vec();
        self.position += 1;
        let image = RgbImage::from_raw(width, height, data)
            .ok_or(Errors::FrameOutOfRange(self.position - 1))?;
        Ok(Some(image))
    }
}

/// Video file encoded with OpenCV (`mp4v`)
///
pub struct CaptureWriter {
    writer: videoio::VideoWriter,
}

impl CaptureWriter {
    pub fn create(path: &Path, framerate: f64, resolution: (u32, u32)) -> Result<Self> {
        let name = path.to_string_lossy().to_string();
        let fourcc = videoio::VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = videoio::VideoWriter::new(
            &name,
            fourcc,
            framerate,
            Size::new(resolution.0 as i32, resolution.1 as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(Errors::UnsupportedFormat(name).into());
        }
        Ok(Self { writer })
    }
}

impl FrameSink for CaptureWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let flat = Mat::from_slice(frame.as_raw())?;
        let rgb = flat.reshape(3, frame.height() as i32)?.try_clone()?;
        let mut bgr = Mat::default();
        imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
        self.writer.write(&bgr)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}
