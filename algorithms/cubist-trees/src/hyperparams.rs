use cubist::{
    error::{Error, Result},
    ParamGuard,
};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::Cubist;

/// Whether predictions are corrected by the nearest training instances
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceMode {
    /// Predict with the rulesets alone
    Never,
    /// Always correct the rulesets with the nearest instances
    Always,
    /// Estimate on the training cases whether the correction helps and keep the better model
    Auto,
}

/// The set of hyperparameters that can be specified for fitting a [Cubist](struct.Cubist.html)
/// model.
///
/// ### Example
///
/// ```rust
/// use cubist::prelude::*;
/// use cubist_trees::{Cubist, InstanceMode};
/// use ndarray::{Array1, Array2};
///
/// let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64 / 2.0);
/// let y = Array1::from_shape_fn(60, |i| 3.0 * i as f64 / 2.0 + 1.0);
/// let dataset = Dataset::from_continuous(x, y).unwrap();
///
/// let model = Cubist::params()
///     .committees(3)
///     .instances(InstanceMode::Never)
///     .fit(&dataset)
///     .unwrap();
///
/// let pred = model.predict(&dataset);
/// assert!((pred[10] - 16.0).abs() < 0.5);
/// ```
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CubistValidParams {
    committees: usize,
    max_rules: usize,
    extrapolation: f64,
    unbiased: bool,
    instances: InstanceMode,
    neighbors: usize,
    sample: Option<f64>,
    seed: u64,
}

impl CubistValidParams {
    pub fn committees(&self) -> usize {
        self.committees
    }

    pub fn max_rules(&self) -> usize {
        self.max_rules
    }

    pub fn extrapolation(&self) -> f64 {
        self.extrapolation
    }

    pub fn unbiased(&self) -> bool {
        self.unbiased
    }

    pub fn instances(&self) -> InstanceMode {
        self.instances
    }

    pub fn neighbors(&self) -> usize {
        self.neighbors
    }

    pub fn sample(&self) -> Option<f64> {
        self.sample
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CubistParams(CubistValidParams);

impl CubistParams {
    pub fn new() -> Self {
        Self(CubistValidParams {
            committees: 1,
            max_rules: 100,
            extrapolation: 0.1,
            unbiased: false,
            instances: InstanceMode::Never,
            neighbors: 0,
            sample: None,
            seed: 0,
        })
    }

    /// Sets the number of rulesets in the committee
    ///
    /// Each member after the first is trained on targets adjusted by the errors of its
    /// predecessor, and predictions average all members.
    pub fn committees(mut self, committees: usize) -> Self {
        self.0.committees = committees;
        self
    }

    /// Sets the largest number of rules a ruleset may have
    pub fn max_rules(mut self, max_rules: usize) -> Self {
        self.0.max_rules = max_rules;
        self
    }

    /// Sets the fraction of the target range by which predictions may extend past the observed
    /// targets
    pub fn extrapolation(mut self, extrapolation: f64) -> Self {
        self.0.extrapolation = extrapolation;
        self
    }

    /// Corrects the intercept of every rule so that its mean error on the cases it covers is
    /// zero
    pub fn unbiased(mut self, unbiased: bool) -> Self {
        self.0.unbiased = unbiased;
        self
    }

    pub fn instances(mut self, instances: InstanceMode) -> Self {
        self.0.instances = instances;
        self
    }

    /// Sets the number of neighbours used by instance correction, zero to choose it from the
    /// training data
    pub fn neighbors(mut self, neighbors: usize) -> Self {
        self.0.neighbors = neighbors;
        self
    }

    /// Trains on a random sample holding this fraction of the cases
    pub fn sample(mut self, sample: Option<f64>) -> Self {
        self.0.sample = sample;
        self
    }

    /// Sets the seed of the random choices made during training
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl Default for CubistParams {
    fn default() -> Self {
        Self::new()
    }
}

impl Cubist {
    /// Defaults are provided if the optional parameters are not specified:
    /// * `committees = 1`
    /// * `max_rules = 100`
    /// * `extrapolation = 0.1`
    /// * `unbiased = false`
    /// * `instances = InstanceMode::Never`
    /// * `neighbors = 0`
    /// * `sample = None`
    /// * `seed = 0`
    // Violates the convention that new should return a value of type `Self`
    #[allow(clippy::new_ret_no_self)]
    pub fn params() -> CubistParams {
        CubistParams::new()
    }
}

impl ParamGuard for CubistParams {
    type Checked = CubistValidParams;
    type Error = Error;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let p = &self.0;
        if p.committees < 1 || p.committees > 100 {
            Err(Error::Parameters(format!(
                "The number of committee members should be between 1 and 100, but was {}",
                p.committees
            )))
        } else if p.max_rules < 1 {
            Err(Error::Parameters(
                "The maximum number of rules should be at least one".to_string(),
            ))
        } else if !(0.0..=1.0).contains(&p.extrapolation) {
            Err(Error::Parameters(format!(
                "Extrapolation should be between 0 and 1, but was {}",
                p.extrapolation
            )))
        } else if p.neighbors > cubist_nn::NNMAX {
            Err(Error::Parameters(format!(
                "The number of neighbors should be at most {}, but was {}",
                cubist_nn::NNMAX,
                p.neighbors
            )))
        } else if let Some(f) = p.sample.filter(|f| !(*f > 0.0 && *f < 1.0)) {
            Err(Error::Parameters(format!(
                "The sampled fraction should lie strictly between 0 and 1, but was {}",
                f
            )))
        } else {
            Ok(&self.0)
        }
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
