use cubist::{
    progress::{Progress, Stage},
    Dataset, Summary, Value,
};
use log::info;
use ndarray::{Array1, ArrayView1};
use rand::Rng;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::distance::{distance, round_distance};
use crate::error::{NnError, Result};
use crate::index::{InstanceIndex, Neighbour};
use crate::{MAX_TRIES, NNMAX};

/// Sampled errors of the three ways of predicting the training cases
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Assessment {
    /// Sum of absolute errors of the neighbours alone
    pub instances: f64,
    /// Sum of absolute errors of the rulesets alone
    pub rules: f64,
    /// Sum of absolute errors of the rulesets corrected by the neighbours
    pub composite: f64,
    /// Number of cases the sums run over
    pub tries: usize,
}

/// Nearest neighbour predictor over the training instances
///
/// When the predictions of a rule-based model are known for every instance, neighbours do not
/// vote with their own target but with the target shifted by how far the model's prediction
/// for the query is from its prediction for the neighbour.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct NnEngine {
    index: InstanceIndex,
    targets: Array1<f64>,
    rule_predictions: Option<Array1<f64>>,
    neighbors: usize,
    max_d: f64,
    mean: f64,
    floor: f64,
    ceiling: f64,
}

impl NnEngine {
    /// Indexes the imputed training cases of `dataset` and sets the neighbourhood
    ///
    /// `neighbors` of zero chooses the number of neighbours from the training data.
    pub fn new(
        dataset: &Dataset,
        summary: &Summary,
        rule_predictions: Option<Array1<f64>>,
        neighbors: usize,
        rng: &mut impl Rng,
        progress: &mut dyn Progress,
    ) -> Result<Self> {
        if let Some(pred) = &rule_predictions {
            if pred.len() != dataset.nsamples() {
                return Err(NnError::PredictionCount(pred.len(), dataset.nsamples()));
            }
        }

        progress.start(Stage::IndexInstances, dataset.nsamples());
        let index = InstanceIndex::new(dataset.records().clone(), dataset.attributes(), summary)?;
        progress.advance(dataset.nsamples());

        let mut engine = NnEngine {
            index,
            targets: dataset.targets().clone(),
            rule_predictions,
            neighbors: 1,
            max_d: 0.0,
            mean: summary.target().mean,
            floor: summary.floor(),
            ceiling: summary.ceiling(),
        };
        engine.set_parameters(neighbors, rng, progress)?;

        Ok(engine)
    }

    pub fn index(&self) -> &InstanceIndex {
        &self.index
    }

    /// Number of neighbours averaged by a prediction
    pub fn neighbors(&self) -> usize {
        self.neighbors
    }

    /// Neighbours farther than this are never used
    pub fn max_distance(&self) -> f64 {
        self.max_d
    }

    /// Whether neighbours correct the predictions of a rule-based model
    pub fn is_corrective(&self) -> bool {
        self.rule_predictions.is_some()
    }

    fn tries(&self) -> usize {
        self.index.len().min(MAX_TRIES)
    }

    /// The `t`-th training case used for estimates
    fn select(&self, t: usize) -> usize {
        let n = self.index.len();
        let tries = self.tries();
        if tries == n {
            t
        } else {
            (n as f64 * ((2 * t + 1) as f64 / (2.0 * tries as f64))) as usize
        }
    }

    /// Sets the distance beyond which neighbours are ignored to the average distance between
    /// instances, and the number of neighbours
    ///
    /// With `neighbors` of zero every count from one to `NNMAX` is tried on a sample of the
    /// training cases, and the smallest count whose error is within 1% of the best is kept.
    pub fn set_parameters(
        &mut self,
        neighbors: usize,
        rng: &mut impl Rng,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        if neighbors > NNMAX {
            return Err(NnError::TooManyNeighbours(neighbors));
        }

        let n = self.index.len();
        let tries = self.tries();
        self.max_d = if n < 2 {
            0.0
        } else {
            let mut sum = 0.0;
            for t in 0..tries {
                let i = self.select(t);
                let mut j = rng.gen_range(0..n);
                while j == i {
                    j = rng.gen_range(0..n);
                }
                sum += distance(
                    self.index.scales(),
                    self.index.records().row(j),
                    self.index.records().row(i),
                    1e10,
                );
            }
            round_distance(sum / tries as f64)
        };

        if neighbors > 0 {
            self.neighbors = neighbors;
            return Ok(());
        }

        progress.start(Stage::SetNeighbors, tries);
        let mut errors = [0.0; NNMAX + 1];
        for t in 0..tries {
            let i = self.select(t);
            let case = self.index.records().row(i);
            let found = self
                .index
                .find_nearest(case, NNMAX, self.max_d, Some(i));
            let base = self.base_estimate(i);

            for (k, err) in errors.iter_mut().enumerate().skip(1) {
                let estimate = self.average(&found, k, base, self.is_corrective());
                *err += (self.targets[i] - estimate).abs();
            }
            progress.advance(1);
        }

        let mut best = 1;
        for k in 2..=NNMAX {
            if errors[k] < errors[best] {
                best = k;
            }
        }
        if let Some(k) = (1..best).find(|k| errors[*k] < 1.01 * errors[best]) {
            best = k;
        }

        self.neighbors = best;
        info!("setting neighbors to {}", best);
        Ok(())
    }

    /// What a training instance is predicted to be without neighbours
    fn base_estimate(&self, instance: usize) -> f64 {
        match &self.rule_predictions {
            Some(pred) => pred[instance],
            None => self.mean,
        }
    }

    fn clamp(&self, v: f64) -> f64 {
        v.max(self.floor).min(self.ceiling)
    }

    /// Weighted average of the values of the `k` nearest neighbours
    ///
    /// Neighbours at the same distance are taken as a group, and a group that does not fit
    /// within `k` contributes in proportion to the places left. Each neighbour is weighted by
    /// `1 / (distance + 0.5)`. Fewer than `(k + 1) / 2` neighbours give `base` itself.
    pub fn average(&self, found: &[Neighbour], k: usize, base: f64, corrective: bool) -> f64 {
        if found.len() < (k + 1) / 2 {
            return base;
        }

        let max_count = self.index.len().saturating_sub(1);
        let (mut total, mut total_weight) = (0.0, 0.0);
        let mut count = 0;
        let mut d = 0;
        while d < found.len() && count < k && count < max_count {
            let weight = 1.0 / (found[d].distance + 0.5);
            let (mut same_sum, mut same_weight, mut same) = (0.0, 0.0, 0);
            loop {
                let instance = found[d].instance;
                let value = match (&self.rule_predictions, corrective) {
                    (Some(pred), true) => self.targets[instance] + base - pred[instance],
                    _ => self.targets[instance],
                };
                same_sum += weight * self.clamp(value);
                same_weight += weight;
                same += 1;
                d += 1;
                if d >= found.len() || found[d].distance != found[d - 1].distance {
                    break;
                }
            }

            if count + same > k {
                let share = (k - count) as f64 / same as f64;
                total += share * same_sum;
                total_weight += share * same_weight;
                count = k;
            } else {
                total += same_sum;
                total_weight += same_weight;
                count += same;
            }
        }

        if total_weight > 0.0 {
            self.clamp(total / total_weight)
        } else {
            base
        }
    }

    /// Prediction for a case, given what the rule-based model predicts for it
    ///
    /// Without rule predictions for the instances, `base` only serves as the fallback when too
    /// few neighbours are close enough.
    pub fn predict(&self, case: ArrayView1<'_, Value>, base: f64) -> f64 {
        let found = self
            .index
            .find_nearest(case, self.neighbors, self.max_d, None);
        self.average(&found, self.neighbors, base, self.is_corrective())
    }

    /// Compares neighbours alone, rules alone and rules corrected by neighbours on a sample of
    /// the training cases
    ///
    /// Returns `None` when the rule predictions of the instances are unknown.
    pub fn assess(&self, progress: &mut dyn Progress) -> Option<Assessment> {
        let pred = self.rule_predictions.as_ref()?;
        let tries = self.tries();
        let mut assessment = Assessment {
            tries,
            ..Default::default()
        };

        progress.start(Stage::AssessComposite, tries);
        for t in 0..tries {
            let i = self.select(t);
            let y = self.targets[i];
            let found = self
                .index
                .find_nearest(self.index.records().row(i), self.neighbors, self.max_d, Some(i));

            assessment.instances += (y - self.average(&found, self.neighbors, self.mean, false)).abs();
            assessment.rules += (y - pred[i]).abs();
            assessment.composite += (y - self.average(&found, self.neighbors, pred[i], true)).abs();
            progress.advance(1);
        }

        Some(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cubist::progress::{Counter, Silent};
    use ndarray::{array, Array2};
    use rand::{rngs::SmallRng, SeedableRng};

    fn line(n: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(n, |i| 10.0 * i as f64);
        Dataset::from_continuous(x, y).unwrap()
    }

    fn engine(data: &Dataset, pred: Option<Array1<f64>>, neighbors: usize) -> NnEngine {
        let summary = data.summarize(0.1).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        NnEngine::new(data, &summary, pred, neighbors, &mut rng, &mut Silent).unwrap()
    }

    #[test]
    fn too_many_neighbours() {
        let data = line(10);
        let summary = data.summarize(0.1).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let res = NnEngine::new(&data, &summary, None, NNMAX + 1, &mut rng, &mut Silent);
        assert!(matches!(res, Err(NnError::TooManyNeighbours(10))));
    }

    #[test]
    fn prediction_count_must_match() {
        let data = line(10);
        let summary = data.summarize(0.1).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let res = NnEngine::new(
            &data,
            &summary,
            Some(Array1::zeros(3)),
            1,
            &mut rng,
            &mut Silent,
        );
        assert!(matches!(res, Err(NnError::PredictionCount(3, 10))));
    }

    #[test]
    fn single_neighbour_copies_its_target() {
        let data = line(20);
        let engine = engine(&data, None, 1);
        assert!(engine.max_distance() > 0.0);

        let pred = engine.predict(array![Value::Continuous(7.0)].view(), 0.0);
        assert_abs_diff_eq!(pred, 70.0);
    }

    #[test]
    fn ties_share_the_remaining_places() {
        let data = line(20);
        let engine = engine(&data, None, 1);
        let found = vec![
            Neighbour {
                distance: 0.0,
                instance: 4,
            },
            Neighbour {
                distance: 0.0,
                instance: 6,
            },
        ];

        // both neighbours are at the same distance and share the single place
        assert_abs_diff_eq!(engine.average(&found, 1, 0.0, false), 50.0);
    }

    #[test]
    fn neighbours_correct_the_rules() {
        let data = line(20);
        // the rules are off by a constant for every case
        let pred = data.targets().mapv(|y| y - 3.0);
        let engine = engine(&data, Some(pred), 3);
        assert!(engine.is_corrective());

        let case = array![Value::Continuous(7.0)];
        assert_abs_diff_eq!(engine.predict(case.view(), 67.0), 70.0, epsilon = 1e-9);
    }

    #[test]
    fn too_few_neighbours_fall_back() {
        let data = line(20);
        let engine = engine(&data, None, 5);
        assert_abs_diff_eq!(engine.average(&[], 5, 12.5, false), 12.5);
    }

    #[test]
    fn neighbours_are_chosen_automatically() {
        let data = line(50);
        let pred = data.targets().mapv(|y| y + 1.0);
        let summary = data.summarize(0.1).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut progress = Counter::default();
        let engine =
            NnEngine::new(&data, &summary, Some(pred), 0, &mut rng, &mut progress).unwrap();

        assert!((1..=NNMAX).contains(&engine.neighbors()));
        assert_eq!(
            progress.stages,
            vec![(Stage::IndexInstances, 50), (Stage::SetNeighbors, 50)]
        );

        let assessment = engine.assess(&mut Silent).unwrap();
        assert_eq!(assessment.tries, 50);
        assert_abs_diff_eq!(assessment.rules, 50.0, epsilon = 1e-9);
        assert!(assessment.composite < assessment.rules);
    }
}
