/// Video sources and sinks (image sequences, OpenCV capture)
pub mod video;

/// Segmentation stacks: parameterised image functions wired into a dependency graph
pub mod stack;

/// Contour geometry and per-object feature extraction
pub mod contours;

/// Path assembly: linking per-frame detections into object paths
pub mod tracking;

/// CSV and annotated frame exporters
pub mod export;

/// Background processing worker
pub mod worker;

/// Loaded/running state and worker control
pub mod session;

/// JSON settings file
pub mod config;

/// Frequently used types
pub mod prelude;

#[cfg(test)]
mod test_stuff;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Input `{0}` does not exist.")]
    MissingInput(String),
    #[error("`{0}` is not a readable video or image sequence.")]
    NotAVideo(String),
    #[error("Video frame {0} does not exist.")]
    FrameOutOfRange(usize),
    #[error("Format `{0}` is only supported with the `opencv` feature.")]
    UnsupportedFormat(String),
    #[error("Unknown segmentation module `{0}`.")]
    UnknownModule(String),
    #[error("Stage `{0}` is not part of the stack.")]
    UnknownStage(String),
    #[error("Stage `{0}` has no parameter `{1}`.")]
    UnknownParam(String, String),
    #[error("Invalid value for `{0}`: {1}.")]
    InvalidParam(String, String),
    #[error("Stage `{0}` did not receive its `{1}` input.")]
    MissingStageInput(String, String),
    #[error("The stage graph contains a cycle through `{0}`.")]
    CyclicGraph(String),
    #[error("Frame {0} does not follow the last tracked frame {1}.")]
    FrameOrder(usize, usize),
    #[error("No video is loaded.")]
    NotLoaded,
    #[error("Processing is running, stop it first.")]
    Busy,
    #[error("Processing is not running.")]
    NotRunning,
    #[error("Worker failed: {0}")]
    WorkerFailed(String),
}

pub(crate) const EPS: f64 = 0.00001;
