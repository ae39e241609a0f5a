use image::{Rgb, RgbImage};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

pub const BACKGROUND: u8 = 200;
pub const FOREGROUND: u8 = 20;

/// Fresh directory below the system temp dir
pub fn temp_dir(prefix: &str) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    let dir = std::env::temp_dir().join(format!("videotracker-{}-{}", prefix, suffix));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Light frame with dark filled disks `(cx, cy, radius)`
pub fn dark_disks(width: u32, height: u32, disks: &[(f32, f32, f32)]) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let inside = disks.iter().any(|(cx, cy, r)| {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            dx * dx + dy * dy <= r * r
        });
        if inside {
            Rgb([FOREGROUND; 3])
        } else {
            Rgb([BACKGROUND; 3])
        }
    })
}

/// Light frame with dark filled rectangles `(x, y, width, height)`
pub fn dark_rects(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let inside = rects
            .iter()
            .any(|(rx, ry, w, h)| x >= *rx && x < rx + w && y >= *ry && y < ry + h);
        if inside {
            Rgb([FOREGROUND; 3])
        } else {
            Rgb([BACKGROUND; 3])
        }
    })
}

pub fn write_sequence(dir: &Path, frames: &[RgbImage]) {
    for (i, f) in frames.iter().enumerate() {
        f.save(dir.join(format!("{:04}.png", i))).unwrap();
    }
}

/// Image sequence of `n` frames with disks moving right by `step` pixels per frame
pub fn moving_disks(dir: &Path, n: usize, step: f32) {
    let frames = (0..n)
        .map(|i| {
            let dx = i as f32 * step;
            dark_disks(
                96,
                64,
                &[(12.0 + dx, 16.0, 5.0), (12.0 + dx, 46.0, 6.0)],
            )
        })
        .collect::<Vec<_>>();
    write_sequence(dir, &frames);
}
