//! Provide traits for the model-construction and prediction stages
//!

use ndarray::Array1;

use crate::dataset::Dataset;

/// Fittable algorithms
///
/// A fittable algorithm takes a dataset and creates a concept of some kind about it. For Cubist
/// this is a committee of rulesets, optionally backed by an instance index.
pub trait Fit<E: std::error::Error + From<crate::error::Error>> {
    type Object;

    fn fit(&self, dataset: &Dataset) -> Result<Self::Object, E>;
}

/// Predict with model into a mutable reference of targets.
pub trait PredictInplace {
    /// Predict something in place
    fn predict_inplace(&self, x: &Dataset, y: &mut Array1<f64>);

    /// Create targets that `predict_inplace` works with.
    fn default_target(&self, x: &Dataset) -> Array1<f64> {
        Array1::zeros(x.nsamples())
    }
}

/// Predict with model
///
/// This trait assumes the `PredictInplace` implementation and provides additional input/output
/// combinations.
pub trait Predict<R> {
    fn predict(&self, x: R) -> Array1<f64>;
}

impl<'a, O: PredictInplace> Predict<&'a Dataset> for O {
    fn predict(&self, x: &'a Dataset) -> Array1<f64> {
        let mut y = self.default_target(x);
        self.predict_inplace(x, &mut y);

        y
    }
}
