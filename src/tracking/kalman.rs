// Filter layout follows
// https://github.com/nwojke/deep_sort/blob/master/deep_sort/kalman_filter.py
//
use nalgebra::{Point2, SMatrix, SVector};

/// 0.95 quantiles of the chi-square distribution for 1..9 degrees of freedom
pub const CHI2INV95: [f32; 9] = [
    3.8415, 5.9915, 7.8147, 9.4877, 11.070, 12.592, 14.067, 15.507, 16.919,
];

/// Cost assigned to pairs outside of the gate
pub const CHI2_UPPER_BOUND: f32 = 100.0;

pub const DIM_2D_POINT: usize = 2;
pub const DIM_2D_POINT_X2: usize = DIM_2D_POINT * 2;

const DT: f32 = 1.0;

/// Gaussian state of a filter: mean and covariance
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanState<const X: usize> {
    pub mean: SVector<f32, X>,
    pub covariance: SMatrix<f32, X, X>,
}

impl KalmanState<DIM_2D_POINT_X2> {
    pub fn position(&self) -> Point2<f32> {
        Point2::new(self.mean[0], self.mean[1])
    }

    /// Displacement per frame
    pub fn velocity(&self) -> (f32, f32) {
        (self.mean[2], self.mean[3])
    }
}

/// Constant velocity Kalman filter for a point in the image plane
///
/// Noise levels are relative: every call takes the `scale` of the tracked object
/// (its linear size in pixels) and the weights are multiplied by it.
///
#[derive(Debug, Clone)]
pub struct Point2DKalmanFilter {
    motion_matrix: SMatrix<f32, DIM_2D_POINT_X2, DIM_2D_POINT_X2>,
    update_matrix: SMatrix<f32, DIM_2D_POINT, DIM_2D_POINT_X2>,
    std_position_weight: f32,
    std_velocity_weight: f32,
}

impl Default for Point2DKalmanFilter {
    fn default() -> Self {
        Point2DKalmanFilter::new(1.0 / 20.0, 1.0 / 160.0)
    }
}

impl Point2DKalmanFilter {
    pub fn new(position_weight: f32, velocity_weight: f32) -> Self {
        let mut motion_matrix: SMatrix<f32, DIM_2D_POINT_X2, DIM_2D_POINT_X2> = SMatrix::identity();

        for i in 0..DIM_2D_POINT {
            motion_matrix[(i, DIM_2D_POINT + i)] = DT;
        }

        Point2DKalmanFilter {
            motion_matrix,
            update_matrix: SMatrix::identity(),
            std_position_weight: position_weight,
            std_velocity_weight: velocity_weight,
        }
    }

    fn variance(&self, position: f32, velocity: f32) -> SMatrix<f32, DIM_2D_POINT_X2, DIM_2D_POINT_X2> {
        let p = position * self.std_position_weight;
        let v = velocity * self.std_velocity_weight;
        let std: SVector<f32, DIM_2D_POINT_X2> = SVector::from_iterator([p, p, v, v]);
        SMatrix::from_diagonal(&std.component_mul(&std))
    }

    pub fn initiate(&self, p: &Point2<f32>, scale: f32) -> KalmanState<DIM_2D_POINT_X2> {
        KalmanState {
            mean: SVector::from_iterator([p.x, p.y, 0.0, 0.0]),
            covariance: self.variance(2.0 * scale, 10.0 * scale),
        }
    }

    pub fn predict(
        &self,
        state: &KalmanState<DIM_2D_POINT_X2>,
        scale: f32,
    ) -> KalmanState<DIM_2D_POINT_X2> {
        let mean = self.motion_matrix * state.mean;
        let covariance = self.motion_matrix * state.covariance * self.motion_matrix.transpose()
            + self.variance(scale, scale);
        KalmanState { mean, covariance }
    }

    fn project(&self, state: &KalmanState<DIM_2D_POINT_X2>, scale: f32) -> KalmanState<DIM_2D_POINT> {
        let std = scale * self.std_position_weight;
        let innovation_cov: SMatrix<f32, DIM_2D_POINT, DIM_2D_POINT> =
            SMatrix::from_diagonal(&SVector::from_iterator([std * std, std * std]));

        let mean = self.update_matrix * state.mean;
        let covariance =
            self.update_matrix * state.covariance * self.update_matrix.transpose() + innovation_cov;
        KalmanState { mean, covariance }
    }

    /// Corrects the state with a measured position
    ///
    /// A state whose projected covariance is not positive definite is restarted at `p`.
    ///
    pub fn update(
        &self,
        state: &KalmanState<DIM_2D_POINT_X2>,
        p: &Point2<f32>,
        scale: f32,
    ) -> KalmanState<DIM_2D_POINT_X2> {
        let projected = self.project(state, scale);
        let Some(cholesky) = projected.covariance.cholesky() else {
            return self.initiate(p, scale);
        };
        let b = (state.covariance * self.update_matrix.transpose()).transpose();
        // transposed gain
        let kalman_gain = cholesky.solve(&b);

        let innovation: SMatrix<f32, 1, DIM_2D_POINT> =
            (SVector::from_iterator([p.x, p.y]) - projected.mean).transpose();

        let mean = state.mean + (innovation * kalman_gain).transpose();
        let covariance =
            state.covariance - kalman_gain.transpose() * projected.covariance * kalman_gain;
        KalmanState { mean, covariance }
    }

    /// Squared Mahalanobis distance between the projected state and `p`
    ///
    pub fn distance(&self, state: &KalmanState<DIM_2D_POINT_X2>, p: &Point2<f32>, scale: f32) -> f32 {
        let projected = self.project(state, scale);
        let measurement: SVector<f32, DIM_2D_POINT> =
            SVector::from_iterator([p.x, p.y]) - projected.mean;

        projected
            .covariance
            .cholesky()
            .and_then(|c| c.l().solve_lower_triangular(&measurement))
            .map(|r| r.component_mul(&r).sum())
            .unwrap_or(f32::MAX)
    }

    /// Gated cost of a distance, `inverted` turns it into a weight where larger is better
    ///
    pub fn calculate_cost(distance: f32, inverted: bool) -> f32 {
        if !inverted {
            if distance > CHI2INV95[1] {
                CHI2_UPPER_BOUND
            } else {
                distance
            }
        } else if distance > CHI2INV95[1] {
            0.0
        } else {
            CHI2_UPPER_BOUND - distance
        }
    }
}
