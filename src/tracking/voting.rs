use itertools::Itertools;
use pathfinding::kuhn_munkres::kuhn_munkres;
use pathfinding::matrix::Matrix;
use std::collections::HashMap;

const F32_I64_MULT: f32 = 1_000_000.0;

/// Assigns detections to paths with the Hungarian algorithm
///
/// Every detection competes for the paths it has a weight for; a detection keeps its own
/// column with the `threshold` weight, so it stays unassigned unless some path beats it.
///
pub struct PathVoting {
    threshold: i64,
}

impl PathVoting {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: (threshold * F32_I64_MULT) as i64,
        }
    }

    /// Winning path for each detection that got one
    ///
    /// # Parameters
    /// * `candidates` - number of detections
    /// * `weights` - `(detection index, path id, weight)`, larger weights are better
    ///
    pub fn winners<T>(&self, candidates: usize, weights: T) -> HashMap<usize, u64>
    where
        T: IntoIterator<Item = (usize, u64, f32)>,
    {
        let weights = weights.into_iter().collect::<Vec<_>>();
        let paths = weights
            .iter()
            .map(|(_, path, _)| *path)
            .unique()
            .sorted()
            .collect::<Vec<_>>();
        if candidates == 0 || paths.is_empty() {
            return HashMap::default();
        }
        let columns = paths
            .iter()
            .enumerate()
            .map(|(i, p)| (*p, candidates + i))
            .collect::<HashMap<_, _>>();

        let mut cost_matrix = Matrix::new(candidates, candidates + paths.len(), 0i64);
        for (candidate, path, weight) in weights {
            assert!(candidate < candidates);
            if let Some(v) = cost_matrix.get_mut((candidate, columns[&path])) {
                *v = (weight * F32_I64_MULT) as i64;
            }
        }
        for i in 0..candidates {
            if let Some(v) = cost_matrix.get_mut((i, i)) {
                *v = self.threshold;
            }
        }

        let (_, solution) = kuhn_munkres(&cost_matrix);

        solution
            .into_iter()
            .enumerate()
            .filter(|(row, col)| *col >= candidates && cost_matrix[(*row, *col)] > self.threshold)
            .map(|(row, col)| (row, paths[col - candidates]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::tracking::voting::PathVoting;
    use std::collections::HashMap;

    #[test]
    fn best_total_assignment() {
        let v = PathVoting::new(0.0);
        let winners = v.winners(
            2,
            [
                (0, 20, 1.9),
                (0, 25, 1.5),
                (1, 20, 1.2),
            ],
        );
        // 1.5 + 1.2 beats 1.9 alone
        assert_eq!(winners, HashMap::from([(0, 25), (1, 20)]));
    }

    #[test]
    fn threshold_keeps_candidates_free() {
        let v = PathVoting::new(0.5);
        let winners = v.winners(3, [(0, 7, 0.4), (1, 7, 0.6), (2, 8, 0.7)]);
        assert_eq!(winners, HashMap::from([(1, 7), (2, 8)]));
    }

    #[test]
    fn empty() {
        let v = PathVoting::new(0.0);
        assert!(v.winners(0, []).is_empty());
        assert!(v.winners(3, []).is_empty());
    }

    #[test]
    fn unrelated_paths_are_not_assigned() {
        let v = PathVoting::new(0.0);
        // candidate 1 has no admissible path, even though path 3 is free
        let winners = v.winners(2, [(0, 3, 1.0), (0, 4, 1.5)]);
        assert_eq!(winners, HashMap::from([(0, 4)]));
    }
}
