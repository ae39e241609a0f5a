use crate::contours::{Detection, FEATURES};
use crate::stack::functions::draw_contours;
use crate::tracking::PathTracker;
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use itertools::Itertools;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Number of past positions drawn behind each path
pub const TRAIL_LENGTH: usize = 25;

#[derive(Debug, Serialize)]
struct Row {
    timestamp: f64,
    frame: usize,
    id: u64,
    x: f64,
    y: f64,
    area: f64,
    orientation: Option<f64>,
    mean_value: Option<f64>,
}

/// Writes detections as CSV rows, one row per detection
///
pub struct CsvExporter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl CsvExporter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Unable to create CSV file `{}`", path.display()))?;
        info!("Writing CSV to {}", path.display());
        Self::from_writer(file)
    }
}

impl<W: Write> CsvExporter<W> {
    /// Wraps `writer` and writes the header row
    pub fn from_writer(writer: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        writer.write_record(FEATURES)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write(&mut self, id: u64, d: &Detection) -> Result<()> {
        self.writer.serialize(Row {
            timestamp: d.timestamp,
            frame: d.frame,
            id,
            x: d.x,
            y: d.y,
            area: d.area,
            orientation: d.orientation,
            mean_value: d.mean_value,
        })?;
        self.rows += 1;
        Ok(())
    }

    /// Writes the detections of one frame together with their path ids
    pub fn write_frame(&mut self, ids: &[u64], detections: &[Detection]) -> Result<()> {
        assert_eq!(ids.len(), detections.len());
        for (id, d) in ids.iter().zip(detections) {
            self.write(*id, d)?;
        }
        Ok(())
    }

    /// Rows written so far, without the header
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow!("Unable to flush CSV output: {}", e.error()))
    }
}

/// Colour of a path, the same id always gets the same colour
///
pub fn path_color(id: u64) -> [u8; 3] {
    let mut rng = StdRng::seed_from_u64(id);
    // keep one channel saturated so colours stay visible on gray frames
    let mut c = [
        rng.gen_range(0..=255u8),
        rng.gen_range(0..=255u8),
        rng.gen_range(0..=255u8),
    ];
    c[rng.gen_range(0..3)] = 255;
    c
}

/// Draws the current detections and the trails of the live paths onto a copy of `frame`
///
/// # Parameters
/// * `frame` - frame the detections were found in
/// * `ids` - path id of each detection
/// * `detections` - detections of the frame
/// * `tracker` - tracker the trails are taken from
///
pub fn annotate(
    frame: &RgbImage,
    ids: &[u64],
    detections: &[Detection],
    tracker: &PathTracker,
) -> RgbImage {
    let mut canvas = frame.clone();

    for path in tracker.paths() {
        let color = Rgb(path_color(path.id()));
        let trail = path
            .detections()
            .iter()
            .rev()
            .take(TRAIL_LENGTH)
            .map(|d| (d.x as f32, d.y as f32))
            .collect::<Vec<_>>();
        for (end, start) in trail.iter().tuple_windows() {
            draw_line_segment_mut(&mut canvas, *start, *end, color);
        }
    }

    for (id, d) in ids.iter().zip(detections) {
        let color = path_color(*id);
        draw_contours(&mut canvas, std::slice::from_ref(&d.contour), color, 2);
        draw_filled_circle_mut(
            &mut canvas,
            (d.x.round() as i32, d.y.round() as i32),
            2,
            Rgb(color),
        );
    }
    canvas
}
