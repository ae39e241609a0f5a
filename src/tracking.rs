use crate::contours::Detection;
use crate::tracking::kalman::{KalmanState, Point2DKalmanFilter, CHI2INV95, DIM_2D_POINT_X2};
use crate::tracking::voting::PathVoting;
use crate::Errors;
use anyhow::Result;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Constant velocity Kalman filter for centroids
pub mod kalman;

/// Voting engine with Hungarian algorithm
///
pub mod voting;

/// How predicted path positions are compared with detections
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionalMetric {
    /// Distance in pixels, pairs further apart than `max_distance` never match
    Euclidean { max_distance: f32 },
    /// Squared Mahalanobis distance gated at the 95% quantile
    Mahalanobis,
}

impl Default for PositionalMetric {
    fn default() -> Self {
        PositionalMetric::Euclidean { max_distance: 20.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    pub metric: PositionalMetric,
    /// Frames a path may go without detections before it is wasted
    pub max_idle_frames: usize,
    /// Detections kept per path, 0 keeps all of them
    pub history_length: usize,
    pub position_weight: f32,
    pub velocity_weight: f32,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            metric: PositionalMetric::default(),
            max_idle_frames: 5,
            history_length: 0,
            position_weight: 1.0 / 20.0,
            velocity_weight: 1.0 / 160.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Updated in the last processed frame
    Active,
    /// Not updated in the last frame, may still be continued
    Idle,
    /// Idle for too long, will not be continued
    Wasted,
}

/// Detections of one object linked across frames
///
#[derive(Debug, Clone)]
pub struct Path {
    id: u64,
    detections: VecDeque<Detection>,
    observed: usize,
    state: KalmanState<DIM_2D_POINT_X2>,
    scale: f32,
    last_updated: usize,
    status: PathStatus,
}

impl Path {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> PathStatus {
        self.status
    }

    /// Kept detections, oldest first
    pub fn detections(&self) -> &VecDeque<Detection> {
        &self.detections
    }

    pub fn last(&self) -> Option<&Detection> {
        self.detections.back()
    }

    /// Number of detections the path received, including the ones dropped from history
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Frame of the last detection
    pub fn last_updated(&self) -> usize {
        self.last_updated
    }

    /// Position the filter expects for the current frame
    pub fn predicted(&self) -> (f64, f64) {
        let p = self.state.position();
        (p.x as f64, p.y as f64)
    }

    pub fn velocity(&self) -> (f64, f64) {
        let (vx, vy) = self.state.velocity();
        (vx as f64, vy as f64)
    }
}

fn centroid(d: &Detection) -> Point2<f32> {
    Point2::new(d.x as f32, d.y as f32)
}

fn scale(d: &Detection) -> f32 {
    (d.area as f32).sqrt().max(1.0)
}

/// Links per-frame detections into paths
///
/// Every call to [`PathTracker::predict`] is one epoch: live paths are moved forward by
/// their filters, detections are matched against the predictions and unmatched
/// detections start new paths.
///
#[derive(Debug)]
pub struct PathTracker {
    options: TrackerOptions,
    filter: Point2DKalmanFilter,
    paths: BTreeMap<u64, Path>,
    wasted: Vec<Path>,
    next_id: u64,
    epoch: Option<usize>,
}

impl Default for PathTracker {
    fn default() -> Self {
        Self::new(TrackerOptions::default())
    }
}

impl PathTracker {
    pub fn new(options: TrackerOptions) -> Self {
        let filter = Point2DKalmanFilter::new(options.position_weight, options.velocity_weight);
        Self {
            options,
            filter,
            paths: BTreeMap::default(),
            wasted: Vec::default(),
            next_id: 1,
            epoch: None,
        }
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    /// Frame index of the last epoch
    pub fn epoch(&self) -> Option<usize> {
        self.epoch
    }

    /// Number of paths started so far
    pub fn started(&self) -> u64 {
        self.next_id - 1
    }

    /// Weight of a path/detection pair in `[1, 2]`, `None` when outside of the gate
    fn weight(&self, path: &Path, detection: &Detection) -> Option<f32> {
        let p = centroid(detection);
        match self.options.metric {
            PositionalMetric::Euclidean { max_distance } => {
                let d = (path.state.position() - p).norm();
                (d <= max_distance).then(|| 1.0 + (max_distance - d) / max_distance.max(f32::EPSILON))
            }
            PositionalMetric::Mahalanobis => {
                let d = self.filter.distance(&path.state, &p, path.scale);
                (d <= CHI2INV95[1]).then(|| 1.0 + (CHI2INV95[1] - d) / CHI2INV95[1])
            }
        }
    }

    /// Processes the detections of one frame
    ///
    /// Returns the id of the path every detection was assigned to, in input order.
    /// Frames skipped since the previous call advance the filters once per frame.
    /// A `frame` that does not follow the previous one fails with `FrameOrder` and leaves
    /// the tracker unchanged.
    ///
    /// # Parameters
    /// * `frame` - index of the frame, expected to grow between calls
    /// * `detections` - detections of that frame
    ///
    pub fn predict(&mut self, frame: usize, detections: &[Detection]) -> Result<Vec<u64>> {
        let steps = match self.epoch {
            Some(last) if frame <= last => return Err(Errors::FrameOrder(frame, last).into()),
            Some(last) => frame - last,
            None => 1,
        };
        self.epoch = Some(frame);

        for path in self.paths.values_mut() {
            for _ in 0..steps {
                path.state = self.filter.predict(&path.state, path.scale);
            }
        }

        let this = &*self;
        let weights = detections
            .iter()
            .enumerate()
            .flat_map(|(i, d)| {
                this.paths
                    .values()
                    .filter_map(move |p| this.weight(p, d).map(|w| (i, p.id, w)))
            })
            .collect::<Vec<_>>();
        let winners = PathVoting::new(0.0).winners(detections.len(), weights);

        let mut ids = Vec::with_capacity(detections.len());
        for (i, d) in detections.iter().enumerate() {
            let id = match winners.get(&i).and_then(|id| self.paths.get_mut(id)) {
                Some(path) => {
                    path.scale = scale(d);
                    path.state = self.filter.update(&path.state, &centroid(d), path.scale);
                    path.detections.push_back(d.clone());
                    path.observed += 1;
                    path.last_updated = frame;
                    path.status = PathStatus::Active;
                    if self.options.history_length > 0 {
                        while path.detections.len() > self.options.history_length {
                            path.detections.pop_front();
                        }
                    }
                    path.id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    let s = scale(d);
                    debug!("Path {} starts at frame {}", id, frame);
                    self.paths.insert(
                        id,
                        Path {
                            id,
                            detections: VecDeque::from([d.clone()]),
                            observed: 1,
                            state: self.filter.initiate(&centroid(d), s),
                            scale: s,
                            last_updated: frame,
                            status: PathStatus::Active,
                        },
                    );
                    id
                }
            };
            ids.push(id);
        }

        let max_idle = self.options.max_idle_frames;
        let wasted = self
            .paths
            .values_mut()
            .filter(|p| p.last_updated != frame)
            .filter_map(|p| {
                if p.last_updated + max_idle < frame {
                    p.status = PathStatus::Wasted;
                    Some(p.id)
                } else {
                    p.status = PathStatus::Idle;
                    None
                }
            })
            .collect::<Vec<_>>();
        for id in wasted {
            if let Some(p) = self.paths.remove(&id) {
                debug!("Path {} wasted after frame {}", id, p.last_updated);
                self.wasted.push(p);
            }
        }

        Ok(ids)
    }

    /// Live paths, ordered by id
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.values()
    }

    pub fn path(&self, id: u64) -> Option<&Path> {
        self.paths.get(&id)
    }

    /// Paths that missed the last frame but are still alive
    pub fn idle_paths(&self) -> Vec<&Path> {
        self.paths
            .values()
            .filter(|p| p.status == PathStatus::Idle)
            .collect()
    }

    /// Takes the paths wasted so far
    pub fn wasted(&mut self) -> Vec<Path> {
        std::mem::take(&mut self.wasted)
    }

    /// Takes every remaining path, wasted ones first
    pub fn finish(&mut self) -> Vec<Path> {
        let mut paths = self.wasted();
        paths.extend(std::mem::take(&mut self.paths).into_values());
        paths
    }
}

#[cfg(test)]
mod tests {
    use crate::contours::{Contour, Detection};
    use crate::tracking::{PathStatus, PathTracker, PositionalMetric, TrackerOptions};
    use crate::Errors;

    fn det(frame: usize, x: f64, y: f64) -> Detection {
        Detection {
            frame,
            timestamp: frame as f64 * 40.0,
            x,
            y,
            area: 100.0,
            orientation: None,
            mean_value: None,
            contour: Contour::new(vec![]),
        }
    }

    #[test]
    fn links_moving_objects() {
        let mut t = PathTracker::default();
        let mut first = Vec::default();
        for f in 0..10 {
            let dx = 3.0 * f as f64;
            let ids = t.predict(f, &[det(f, 10.0 + dx, 10.0), det(f, 10.0 + dx, 60.0)]).unwrap();
            if f == 0 {
                first = ids.clone();
            }
            assert_eq!(ids, first);
        }
        assert_eq!(first, vec![1, 2]);
        let p = t.path(1).unwrap();
        assert_eq!(p.observed(), 10);
        assert_eq!(p.status(), PathStatus::Active);
        let (vx, _) = p.velocity();
        assert!((vx - 3.0).abs() < 0.5);
    }

    #[test]
    fn swapped_input_order() {
        let mut t = PathTracker::default();
        assert_eq!(t.predict(0, &[det(0, 10.0, 10.0), det(0, 50.0, 10.0)]).unwrap(), vec![1, 2]);
        assert_eq!(t.predict(1, &[det(1, 52.0, 10.0), det(1, 12.0, 10.0)]).unwrap(), vec![2, 1]);
    }

    #[test]
    fn far_detections_start_new_paths() {
        let mut t = PathTracker::default();
        t.predict(0, &[det(0, 10.0, 10.0)]).unwrap();
        let ids = t.predict(1, &[det(1, 80.0, 80.0)]).unwrap();
        assert_eq!(ids, vec![2]);
        assert_eq!(t.idle_paths().len(), 1);
        assert_eq!(t.idle_paths()[0].id(), 1);
    }

    #[test]
    fn idle_then_wasted() {
        let mut t = PathTracker::new(TrackerOptions {
            max_idle_frames: 2,
            ..TrackerOptions::default()
        });
        t.predict(0, &[det(0, 10.0, 10.0)]).unwrap();
        t.predict(1, &[]).unwrap();
        t.predict(2, &[]).unwrap();
        assert_eq!(t.idle_paths().len(), 1);
        assert!(t.wasted().is_empty());

        // path reappears within the idle window
        assert_eq!(t.predict(3, &[det(3, 11.0, 10.0)]).unwrap(), vec![1]);

        for f in 4..7 {
            t.predict(f, &[]).unwrap();
        }
        let wasted = t.wasted();
        assert_eq!(wasted.len(), 1);
        assert_eq!(wasted[0].status(), PathStatus::Wasted);
        assert_eq!(wasted[0].observed(), 2);
        assert!(t.wasted().is_empty());
        assert_eq!(t.paths().count(), 0);

        // ids are never reused
        assert_eq!(t.predict(7, &[det(7, 11.0, 10.0)]).unwrap(), vec![2]);
    }

    #[test]
    fn skipped_frames() {
        let mut t = PathTracker::new(TrackerOptions {
            max_idle_frames: 1,
            ..TrackerOptions::default()
        });
        t.predict(0, &[det(0, 10.0, 10.0)]).unwrap();
        t.predict(10, &[]).unwrap();
        assert_eq!(t.wasted().len(), 1);
    }

    #[test]
    fn mahalanobis() {
        let mut t = PathTracker::new(TrackerOptions {
            metric: PositionalMetric::Mahalanobis,
            ..TrackerOptions::default()
        });
        for f in 0..5 {
            let ids = t.predict(f, &[det(f, 10.0 + f as f64, 10.0)]).unwrap();
            assert_eq!(ids, vec![1]);
        }
        // a jump far beyond the predicted spread
        assert_eq!(t.predict(5, &[det(5, 60.0, 10.0)]).unwrap(), vec![2]);
    }

    #[test]
    fn history_and_finish() {
        let mut t = PathTracker::new(TrackerOptions {
            history_length: 3,
            ..TrackerOptions::default()
        });
        for f in 0..6 {
            t.predict(f, &[det(f, 10.0, 10.0)]).unwrap();
        }
        let p = t.path(1).unwrap();
        assert_eq!(p.detections().len(), 3);
        assert_eq!(p.observed(), 6);
        assert_eq!(p.detections().front().unwrap().frame, 3);
        assert_eq!(p.last().unwrap().frame, 5);

        let all = t.finish();
        assert_eq!(all.len(), 1);
        assert_eq!(t.paths().count(), 0);
    }

    #[test]
    fn frames_must_advance() {
        let mut t = PathTracker::default();
        assert_eq!(t.predict(5, &[det(5, 10.0, 10.0)]).unwrap(), vec![1]);
        for f in [5, 3] {
            let err = t.predict(f, &[det(f, 10.0, 10.0)]).unwrap_err();
            assert_eq!(err.downcast_ref::<Errors>(), Some(&Errors::FrameOrder(f, 5)));
        }
        assert_eq!(t.epoch(), Some(5));
        assert_eq!(t.path(1).unwrap().observed(), 1);

        assert_eq!(t.predict(6, &[det(6, 11.0, 10.0)]).unwrap(), vec![1]);
        let frames = t
            .path(1)
            .unwrap()
            .detections()
            .iter()
            .map(|d| d.frame)
            .collect::<Vec<_>>();
        assert_eq!(frames, vec![5, 6]);
    }

    #[test]
    fn options_json() {
        let o: TrackerOptions =
            serde_json::from_str(r#"{"metric": "mahalanobis", "max_idle_frames": 2}"#).unwrap();
        assert_eq!(o.metric, PositionalMetric::Mahalanobis);
        assert_eq!(o.max_idle_frames, 2);
        assert_eq!(o.history_length, 0);

        let json = serde_json::to_string(&TrackerOptions::default()).unwrap();
        assert!(json.contains(r#""euclidean":{"max_distance":20.0}"#));
    }
}
