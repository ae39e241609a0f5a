use crate::video::{FrameSink, FrameSource};
use crate::Errors;
use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use itertools::Itertools;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// File extensions accepted as frames
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "gif"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| {
            IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str())
        })
}

/// Frames stored as still images, ordered by file name
///
#[derive(Debug)]
pub struct ImageSequence {
    files: Vec<PathBuf>,
    position: usize,
    framerate: f64,
    resolution: (u32, u32),
}

impl ImageSequence {
    /// Opens a directory of images or a single image
    ///
    /// # Parameters
    /// * `path` - directory or image file
    /// * `framerate` - rate that is used to compute timestamps
    ///
    pub fn open(path: &Path, framerate: f64) -> Result<Self> {
        if framerate <= 0.0 {
            return Err(
                Errors::InvalidParam("framerate".into(), format!("{} is not positive", framerate))
                    .into(),
            );
        }
        let files = if path.is_dir() {
            fs::read_dir(path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .sorted()
                .collect::<Vec<_>>()
        } else if is_image(path) {
            vec![path.to_path_buf()]
        } else {
            Vec::default()
        };

        let first = files
            .first()
            .ok_or_else(|| Errors::NotAVideo(path.display().to_string()))?;
        let resolution = image::image_dimensions(first)
            .with_context(|| format!("Unable to read `{}`", first.display()))
            .context(Errors::NotAVideo(path.display().to_string()))?;

        Ok(Self {
            files,
            position: 0,
            framerate,
            resolution,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl FrameSource for ImageSequence {
    fn frames(&self) -> usize {
        self.files.len()
    }

    fn framerate(&self) -> f64 {
        self.framerate
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn fourcc(&self) -> String {
        let ext = self.files[0]
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_uppercase();
        format!("{:<4.4}", ext)
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if index > self.files.len() {
            return Err(Errors::FrameOutOfRange(index).into());
        }
        self.position = index;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<RgbImage>> {
        let Some(file) = self.files.get(self.position) else {
            return Ok(None);
        };
        let mut image = image::open(file)
            .with_context(|| format!("Unable to decode `{}`", file.display()))?
            .to_rgb8();
        if image.dimensions() != self.resolution {
            warn!(
                "Frame `{}` has size {:?}, resizing to {:?}",
                file.display(),
                image.dimensions(),
                self.resolution
            );
            image = image::imageops::resize(
                &image,
                self.resolution.0,
                self.resolution.1,
                FilterType::Triangle,
            );
        }
        self.position += 1;
        Ok(Some(image))
    }
}

/// Writes frames as numbered PNG files into a directory
///
#[derive(Debug)]
pub struct ImageSequenceWriter {
    dir: PathBuf,
    written: usize,
}

impl ImageSequenceWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create output directory `{}`", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameSink for ImageSequenceWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let file = self.dir.join(format!("frame_{:06}.png", self.written));
        frame
            .save(&file)
            .with_context(|| format!("Unable to write `{}`", file.display()))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!("Wrote {} frames to {}", self.written, self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_stuff::{dark_disks, temp_dir};
    use crate::video::image_sequence::{ImageSequence, ImageSequenceWriter};
    use crate::video::{FrameSink, FrameSource};

    #[test]
    fn write_then_read() {
        let dir = temp_dir("sequence");
        let mut w = ImageSequenceWriter::create(&dir).unwrap();
        for i in 0..3 {
            w.write(&dark_disks(32, 16, &[(5.0 + i as f32, 8.0, 3.0)]))
                .unwrap();
        }
        w.finish().unwrap();
        assert_eq!(w.written(), 3);

        let mut s = ImageSequence::open(&dir, 30.0).unwrap();
        assert_eq!(s.frames(), 3);
        assert_eq!(s.resolution(), (32, 16));
        assert_eq!(s.fourcc(), "PNG ");
        assert!(s.files()[0].ends_with("frame_000000.png"));

        s.seek(2).unwrap();
        assert!(s.read().unwrap().is_some());
        assert_eq!(s.position(), 3);
        assert!(s.read().unwrap().is_none());
        assert!(s.seek(4).is_err());
    }

    #[test]
    fn single_image() {
        let dir = temp_dir("single");
        let file = dir.join("still.png");
        dark_disks(8, 8, &[]).save(&file).unwrap();
        let s = ImageSequence::open(&file, 25.0).unwrap();
        assert_eq!(s.frames(), 1);
        assert!(ImageSequence::open(&file, 0.0).is_err());
    }

    #[test]
    fn other_files_are_ignored() {
        let dir = temp_dir("mixed");
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();
        dark_disks(8, 8, &[]).save(dir.join("a.png")).unwrap();
        let s = ImageSequence::open(&dir, 25.0).unwrap();
        assert_eq!(s.frames(), 1);
    }
}
