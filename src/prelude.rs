pub use crate::config::Settings;
pub use crate::contours::{extract_features, Contour, Detection};
pub use crate::export::{annotate, CsvExporter};
pub use crate::session::Session;
pub use crate::stack::params::ParamValue;
pub use crate::stack::Stack;
pub use crate::tracking::{PathTracker, PositionalMetric, TrackerOptions};
pub use crate::video::Video;
pub use crate::worker::{Event, Job, Summary, Worker};
pub use crate::Errors;
