//!
//! `cubist-linear` provides the linear models found at every node of a Cubist model tree and in
//! every rule, together with the solver that fits them.
//!
//! ## The Big Picture
//!
//! The solver fits least-squares models over a subset of cases and a subset of the continuous
//! attributes. Unlike a plain least-squares fit it
//!
//! - recovers from singular tables by excluding the offending attributes,
//! - simplifies the model by greedy coefficient elimination, keeping the variant with the lowest
//!   pessimistic error estimate, and
//! - refits once without the cases whose residuals are far above average.
//!
//! [`LinearRegression`](struct.LinearRegression.html) applies the solver to a whole dataset.
//!
//! ## Example
//!
//! ```rust
//! use cubist::prelude::*;
//! use cubist_linear::LinearRegression;
//! use ndarray::{Array1, Array2};
//!
//! let x = Array2::from_shape_fn((50, 1), |(i, _)| i as f64);
//! let y = Array1::from_shape_fn(50, |i| 2.0 * i as f64 + 1.0);
//! let dataset = Dataset::from_continuous(x, y).unwrap();
//!
//! let model = LinearRegression::default().fit(&dataset).unwrap();
//! assert!((model.model().coefficients[0] - 2.0).abs() < 1e-6);
//! ```

mod error;
mod model;
mod solver;

pub use error::*;
pub use model::*;
pub use solver::*;

use cubist::{
    traits::{Fit, PredictInplace},
    Dataset, Summary,
};
use ndarray::Array1;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// Fits one simplified linear model to all cases of a dataset
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearRegression {
    extrapolation: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        LinearRegression { extrapolation: 0.1 }
    }
}

impl LinearRegression {
    /// Sets the fraction of the target range by which predictions may extend past the observed
    /// targets
    pub fn extrapolation(mut self, extrapolation: f64) -> Self {
        self.extrapolation = extrapolation;
        self
    }
}

/// A fitted model together with the statistics needed to apply it to new cases
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct FittedLinearRegression {
    model: LinearModel,
    summary: Summary,
}

impl FittedLinearRegression {
    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }
}

impl Fit<LinearError> for LinearRegression {
    type Object = FittedLinearRegression;

    fn fit(&self, dataset: &Dataset) -> Result<Self::Object> {
        if dataset.targets().iter().any(|y| !y.is_finite()) {
            let case = dataset
                .targets()
                .iter()
                .position(|y| !y.is_finite())
                .unwrap_or(0);
            return Err(cubist::Error::UnknownTarget(case).into());
        }

        let summary = dataset.summarize(self.extrapolation)?;
        let mut data = dataset.clone();
        data.impute(&summary);
        data.normalize_weights();

        let usable: Vec<bool> = data
            .attributes()
            .iter()
            .enumerate()
            .map(|(a, att)| {
                att.is_continuous() && !att.is_ignored() && !summary.attribute(a).skipped
            })
            .collect();
        if !usable.iter().any(|u| *u) {
            return Err(LinearError::NoContinuousAttributes);
        }

        let target = data.targets().to_vec();
        let ws = Workspace {
            dataset: &data,
            target: &target,
            usable: &usable,
            floor: summary.floor(),
            ceiling: summary.ceiling(),
        };
        let cases: Vec<usize> = (0..data.nsamples()).collect();
        let model = Solver::new(data.nattributes()).regress(&ws, &cases, None);

        Ok(FittedLinearRegression { model, summary })
    }
}

impl PredictInplace for FittedLinearRegression {
    fn predict_inplace(&self, x: &Dataset, y: &mut Array1<f64>) {
        assert_eq!(
            x.nsamples(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        for (i, target) in y.iter_mut().enumerate() {
            let case = self.summary.impute_case(x.attributes(), x.row(i));
            *target = self
                .model
                .value(case.view(), self.summary.floor(), self.summary.ceiling());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cubist::{traits::Predict, Attribute, Value};
    use ndarray::{array, Array2};

    #[test]
    fn fit_and_predict_clamped() -> Result<()> {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(20, |i| 3.0 * i as f64);
        let dataset = Dataset::from_continuous(x, y)?;

        let model = LinearRegression::default().fit(&dataset)?;
        assert_abs_diff_eq!(model.model().coefficients[0], 3.0, epsilon = 1e-6);

        let unseen = Dataset::unlabeled(
            dataset.attributes().to_vec(),
            array![[Value::Continuous(10.0)], [Value::Continuous(1000.0)], [Value::Missing]],
        )?;
        let pred = model.predict(&unseen);

        assert_abs_diff_eq!(pred[0], 30.0, epsilon = 1e-4);
        // the range of targets is [0, 57], extended by a tenth
        assert_abs_diff_eq!(pred[1], 62.7, epsilon = 1e-9);
        // imputed with the rounded mean 9.5
        assert_abs_diff_eq!(pred[2], 28.5, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn no_continuous_attributes() {
        let atts = vec![Attribute::discrete("c", vec!["a", "b"])];
        let records = array![[Value::Discrete(2)], [Value::Discrete(3)]];
        let dataset = Dataset::new(atts, records, array![1.0, 2.0]).unwrap();

        let res = LinearRegression::default().fit(&dataset);
        assert!(matches!(res, Err(LinearError::NoContinuousAttributes)));
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let dataset =
            Dataset::from_continuous(array![[1.0], [2.0]], array![1.0, f64::NAN]).unwrap();

        let res = LinearRegression::default().fit(&dataset);
        assert!(matches!(
            res,
            Err(LinearError::BaseCrate(cubist::Error::UnknownTarget(1)))
        ));
    }
}
