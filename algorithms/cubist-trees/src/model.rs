use std::fmt;

use cubist::{
    metrics::Regression,
    progress::{LogProgress, Progress, Stage},
    stats::estimate_err,
    traits::{Fit, PredictInplace},
    Attribute, Dataset, Summary, Value,
};
use cubist_nn::NnEngine;
use log::{debug, info};
use ndarray::{Array1, ArrayView1, Axis};
use rand::{rngs::SmallRng, SeedableRng};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::error::{CubistError, Result};
use crate::extract::RuleExtractor;
use crate::hyperparams::{CubistValidParams, InstanceMode};
use crate::prune::Pruner;
use crate::rules::{AttributeUsage, RuleSet};
use crate::tree::{adjust_thresholds, Environment, TreeBuilder};
use crate::EVAL_SAMPLE;

/// How well a model predicts a set of cases
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    /// Number of cases evaluated
    pub cases: usize,
    pub mean_abs_error: f64,
    /// Mean absolute error relative to always predicting the mean training target
    pub relative_error: f64,
    /// Correlation between predictions and targets, zero when negative
    pub correlation: f64,
}

/// A committee of rulesets, optionally corrected by the nearest training instances
///
/// Each ruleset is read off a pruned model tree. The prediction for a case is the average
/// prediction of the committee members. When instances are kept, this average is then adjusted
/// by the targets of the training cases closest to the case, each shifted by how much the
/// committee's prediction for the case differs from its prediction for the neighbour.
/// Predictions always lie within the target range seen in training, extended by the
/// extrapolation allowance.
///
/// See [`CubistParams`](struct.CubistParams.html) for the hyperparameters.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct Cubist {
    attributes: Vec<Attribute>,
    target_name: String,
    summary: Summary,
    committee: Vec<RuleSet>,
    instances: Option<NnEngine>,
    training_error: Evaluation,
    test_error: Option<Evaluation>,
    error_reduction: Option<f64>,
}

impl Fit<CubistError> for CubistValidParams {
    type Object = Cubist;

    /// Fits a model, reporting the progress of each stage through the `log` facade
    fn fit(&self, dataset: &Dataset) -> Result<Self::Object> {
        self.fit_with_progress(dataset, &mut LogProgress::default())
    }
}

impl CubistValidParams {
    /// Fits a model, reporting the progress of each stage to `progress`
    pub fn fit_with_progress(&self, dataset: &Dataset, progress: &mut dyn Progress) -> Result<Cubist> {
        if let Some(case) = dataset.targets().iter().position(|y| !y.is_finite()) {
            return Err(cubist::Error::UnknownTarget(case).into());
        }
        if dataset.attributes().iter().all(|att| att.is_ignored()) {
            return Err(cubist::Error::NoPredictors.into());
        }

        let mut rng = SmallRng::seed_from_u64(self.seed());
        let (mut data, test) = match self.sample() {
            Some(fraction) => {
                let (train, test) = dataset.sample_split(fraction, &mut rng);
                (train, Some(test).filter(|t| t.nsamples() > 0))
            }
            None => (dataset.clone(), None),
        };

        let summary = data.summarize(self.extrapolation())?;
        data.impute(&summary);
        data.normalize_weights();

        let env = Environment::new(&data, &summary, self.max_rules());
        let n = data.nsamples();
        let y = data.targets();

        let members = self.committees();
        let mut committee = Vec::with_capacity(members);
        let mut target = y.to_vec();
        let mut sum_err = 0.0;
        for m in 0..members {
            let ruleset = self.grow_member(&env, &target, progress);
            if ruleset.is_empty() {
                return Err(CubistError::EmptyTree(m + 1));
            }
            debug!("committee member {}: {} rules", m + 1, ruleset.len());

            if m + 1 < members {
                for (i, t) in target.iter_mut().enumerate() {
                    let pred = ruleset.prediction(data.row(i));
                    sum_err += (y[i] - pred).abs();
                    *t = 2.0 * y[i] - pred;
                }
            }
            committee.push(ruleset);
        }

        let rule_predictions: Array1<f64> = (0..n)
            .map(|i| committee_value(&committee, data.row(i)))
            .collect();

        let error_reduction = if members > 1 && sum_err > 0.0 {
            let final_err = rule_predictions.mean_absolute_error(&y.view()) * n as f64;
            Some(final_err / (sum_err / (members - 1) as f64))
        } else {
            None
        };

        let instances = match self.instances() {
            InstanceMode::Never => None,
            mode => {
                let engine = NnEngine::new(
                    &data,
                    &summary,
                    Some(rule_predictions),
                    self.neighbors(),
                    &mut rng,
                    progress,
                )?;
                info!("using {} nearest neighbours", engine.neighbors());

                let av_rules = committee.iter().map(|rs| rs.len()).sum::<usize>() as f64 / members as f64;
                if mode == InstanceMode::Auto && !composite_helps(&engine, av_rules, n, progress) {
                    info!("instances do not improve the rules and are dropped");
                    None
                } else {
                    Some(engine)
                }
            }
        };

        let mut model = Cubist {
            attributes: data.attributes().to_vec(),
            target_name: data.target_name().to_string(),
            summary,
            committee,
            instances,
            training_error: Evaluation {
                cases: 0,
                mean_abs_error: 0.0,
                relative_error: 0.0,
                correlation: 0.0,
            },
            test_error: None,
            error_reduction,
        };
        model.training_error = model.evaluate(&data);
        model.test_error = test.map(|test| model.evaluate(&test));

        Ok(model)
    }

    /// Grows, prunes and converts one model tree to rules
    fn grow_member(&self, env: &Environment, target: &[f64], progress: &mut dyn Progress) -> RuleSet {
        let n = env.nsamples();
        let mut cases: Vec<usize> = (0..n).collect();
        let mut builder = TreeBuilder::new(env, target);

        progress.start(Stage::GroupData, n);
        let mut tree = builder.grow(&mut cases, progress);
        let root = tree.root();

        progress.start(Stage::AddModels, tree.size(root));
        builder.add_models(&mut tree, root, &cases, progress);

        progress.start(Stage::SimplifyGroups, tree.size(root));
        Pruner::new(env, target, &cases).prune(&mut tree, progress);
        adjust_thresholds(&mut tree, env.dataset);

        progress.start(Stage::FormRules, n);
        RuleExtractor::new(env, self.extrapolation(), self.unbiased()).extract(&tree, progress)
    }
}

/// Average prediction of the committee members
fn committee_value(committee: &[RuleSet], case: ArrayView1<'_, Value>) -> f64 {
    committee.iter().map(|rs| rs.prediction(case)).sum::<f64>() / committee.len() as f64
}

/// Whether correcting the rules with instances lowers the estimated error
///
/// The rules alone are charged twice the parameters of the composite model.
fn composite_helps(engine: &NnEngine, av_rules: f64, n: usize, progress: &mut dyn Progress) -> bool {
    match engine.assess(progress) {
        Some(a) => {
            let tries = a.tries.max(1) as f64;
            info!(
                "average |error| on {} training cases: instances {:.4}, rules {:.4}, rules + instances {:.4}",
                a.tries,
                a.instances / tries,
                a.rules / tries,
                a.composite / tries
            );

            let n = n as f64;
            estimate_err(a.rules, n, 2.0 * av_rules) >= estimate_err(a.composite, n, av_rules)
        }
        None => true,
    }
}

impl Cubist {
    /// The rulesets of the committee, in training order
    pub fn committee(&self) -> &[RuleSet] {
        &self.committee
    }

    /// The instance correction, if it was kept
    pub fn instances(&self) -> Option<&NnEngine> {
        self.instances.as_ref()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Statistics of the training cases, used to impute and bound predictions
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn training_error(&self) -> &Evaluation {
        &self.training_error
    }

    /// Error on the cases left out of training by sampling
    pub fn test_error(&self) -> Option<&Evaluation> {
        self.test_error.as_ref()
    }

    /// Error of the committee relative to the average error of its members but the last
    ///
    /// Only defined for committees of two or more members.
    pub fn error_reduction(&self) -> Option<f64> {
        self.error_reduction
    }

    /// How often each attribute is used by the rules covering the training cases
    pub fn attribute_usage(&self) -> Vec<AttributeUsage> {
        AttributeUsage::compute(&self.committee, &self.attributes)
    }

    /// Prediction for an imputed case
    fn predict_case(&self, case: ArrayView1<'_, Value>) -> f64 {
        let base = committee_value(&self.committee, case);
        let value = match &self.instances {
            Some(engine) => engine.predict(case, base),
            None => base,
        };

        self.summary.clamp(value)
    }

    /// Compares predictions with the targets of `dataset`
    ///
    /// With instance correction, large datasets are evaluated on an evenly spaced sample.
    fn evaluate(&self, dataset: &Dataset) -> Evaluation {
        let n = dataset.nsamples();
        let cases: Vec<usize> = if self.instances.is_some() && n >= 2 * EVAL_SAMPLE {
            let step = n as f64 / EVAL_SAMPLE as f64;
            (0..EVAL_SAMPLE).map(|i| (i as f64 * step) as usize).collect()
        } else {
            (0..n).collect()
        };

        let truth = dataset.targets().select(Axis(0), &cases);
        let pred: Array1<f64> = cases
            .iter()
            .map(|&i| {
                let case = self.summary.impute_case(dataset.attributes(), dataset.row(i));
                self.predict_case(case.view())
            })
            .collect();

        Evaluation {
            cases: cases.len(),
            mean_abs_error: pred.mean_absolute_error(&truth.view()),
            relative_error: pred.relative_error_to(&truth.view(), self.summary.target().mean),
            correlation: pred.correlation(&truth.view()).max(0.0),
        }
    }
}

impl PredictInplace for Cubist {
    /// Make predictions for each case of `x`, imputing unknown values first
    fn predict_inplace(&self, x: &Dataset, y: &mut Array1<f64>) {
        assert_eq!(
            x.nsamples(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        for (i, target) in y.iter_mut().enumerate() {
            let case = self.summary.impute_case(x.attributes(), x.row(i));
            *target = self.predict_case(case.view());
        }
    }
}

impl fmt::Display for Cubist {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (m, ruleset) in self.committee.iter().enumerate() {
            if self.committee.len() > 1 {
                writeln!(f, "Model {}:", m + 1)?;
                writeln!(f)?;
            }
            for rule in ruleset.rules() {
                writeln!(f, "{}", rule.display(&self.attributes, &self.target_name))?;
                writeln!(f)?;
            }
        }

        if let Some(engine) = &self.instances {
            writeln!(f, "Predictions are adjusted by {} nearest neighbours", engine.neighbors())?;
        }
        write!(
            f,
            "Training error on {} cases: mean |error| {:.4}, relative |error| {:.2}, correlation {:.2}",
            self.training_error.cases,
            self.training_error.mean_abs_error,
            self.training_error.relative_error,
            self.training_error.correlation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cubist::progress::{Counter, Silent};
    use cubist::traits::Predict;
    use cubist::ParamGuard;
    use ndarray::{array, Array2};

    fn jump(n: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(n, |i| {
            if i < n / 2 {
                i as f64
            } else {
                (n + n / 2 - i) as f64
            }
        });
        Dataset::from_continuous(x, y).unwrap()
    }

    #[test]
    fn rejects_unknown_targets() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, f64::NAN, 3.0];
        let dataset = Dataset::from_continuous(x, y).unwrap();

        let res = Cubist::params().fit(&dataset);
        assert!(matches!(
            res,
            Err(CubistError::BaseCrate(cubist::Error::UnknownTarget(1)))
        ));
    }

    #[test]
    fn rejects_ignored_predictors() {
        let atts = vec![Attribute::continuous("x").ignored()];
        let dataset = Dataset::new(atts, array![[Value::Continuous(1.0)]], array![1.0]).unwrap();

        let res = Cubist::params().fit(&dataset);
        assert!(matches!(
            res,
            Err(CubistError::BaseCrate(cubist::Error::NoPredictors))
        ));
    }

    #[test]
    fn reports_every_stage() -> Result<()> {
        let mut counter = Counter::default();
        let params = Cubist::params().committees(2).check_unwrap();
        params.fit_with_progress(&jump(100), &mut counter)?;

        let stages: Vec<Stage> = counter.stages.iter().map(|(s, _)| *s).collect();
        let member = [
            Stage::GroupData,
            Stage::AddModels,
            Stage::SimplifyGroups,
            Stage::FormRules,
        ];
        assert_eq!(stages, [member, member].concat());
        Ok(())
    }

    #[test]
    fn exact_pieces_are_recovered() -> Result<()> {
        let dataset = jump(100);
        let model = Cubist::params().fit(&dataset)?;

        assert_eq!(model.committee().len(), 1);
        assert_eq!(model.committee()[0].len(), 2);
        assert!(model.instances().is_none());
        assert!(model.error_reduction().is_none());

        let err = model.training_error();
        assert_eq!(err.cases, 100);
        assert_abs_diff_eq!(err.mean_abs_error, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(err.correlation, 1.0, epsilon = 1e-6);

        let pred = model.predict(&dataset);
        assert_abs_diff_eq!(pred, dataset.targets().clone(), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn sampling_holds_out_cases() -> Result<()> {
        let model = Cubist::params()
            .sample(Some(0.7))
            .seed(3)
            .check_unwrap()
            .fit_with_progress(&jump(100), &mut Silent)?;

        assert_eq!(model.training_error().cases, 70);
        assert_eq!(model.test_error().map(|e| e.cases), Some(30));
        Ok(())
    }

    #[test]
    fn errors_are_relative_to_the_training_mean() -> Result<()> {
        // a single rule cannot follow both pieces
        let model = Cubist::params().max_rules(1).fit(&jump(100))?;
        let low = jump(100).select(&(0..50).collect::<Vec<_>>());
        let truth = low.targets();
        let mean = model.summary().target().mean;
        assert_abs_diff_eq!(mean, 50.0, epsilon = 1e-9);

        let eval = model.evaluate(&low);
        let baseline = truth.mapv(|y| (y - mean).abs()).sum() / 50.0;
        assert!(eval.mean_abs_error > 1.0);
        assert_abs_diff_eq!(eval.relative_error, eval.mean_abs_error / baseline, epsilon = 1e-9);

        let pred = model.predict(&low);
        assert!((eval.relative_error - pred.relative_error(&truth.view())).abs() > 1e-3);
        Ok(())
    }

    #[test]
    fn display_lists_rules() -> Result<()> {
        let model = Cubist::params().fit(&jump(100))?;
        let text = model.to_string();

        assert!(text.contains("Rule 1:"));
        assert!(text.contains("Rule 2:"));
        assert!(text.contains("x0 <= 49"));
        assert!(!text.contains("Model 1:"));
        Ok(())
    }
}
