use std::fmt;

use cubist::dataset::{Attribute, Value};
use ndarray::{Array1, ArrayView1};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// A linear model over the continuous attributes of a case
///
/// Coefficients are indexed by attribute; a zero coefficient means the attribute takes no part
/// in the model. Values which are not applicable contribute nothing.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl LinearModel {
    /// The model that always predicts `value`
    pub fn constant(value: f64, nattributes: usize) -> Self {
        LinearModel {
            intercept: value,
            coefficients: Array1::zeros(nattributes),
        }
    }

    /// Builds a model from a vector whose first entry is the intercept
    pub(crate) fn from_columns(columns: &[f64]) -> Self {
        LinearModel {
            intercept: columns[0],
            coefficients: Array1::from(columns[1..].to_vec()),
        }
    }

    /// Unbounded value of the model for a case
    pub fn raw_value(&self, case: ArrayView1<'_, Value>) -> f64 {
        self.coefficients
            .iter()
            .zip(case.iter())
            .filter(|(c, _)| **c != 0.0)
            .fold(self.intercept, |acc, (c, v)| acc + c * v.as_f64())
    }

    /// Value of the model for a case, clamped to `[floor, ceiling]`
    pub fn value(&self, case: ArrayView1<'_, Value>, floor: f64, ceiling: f64) -> f64 {
        self.raw_value(case).max(floor).min(ceiling)
    }

    /// Number of parameters: the intercept plus every nonzero coefficient
    pub fn count_coefficients(&self) -> usize {
        1 + self.coefficients.iter().filter(|c| **c != 0.0).count()
    }

    /// Indices of the attributes with a nonzero coefficient
    pub fn attributes(&self) -> impl Iterator<Item = usize> + '_ {
        self.coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != 0.0)
            .map(|(a, _)| a)
    }

    /// Replaces this model by `p * self + (1 - p) * other`
    pub fn blend(&mut self, other: &LinearModel, p: f64) {
        self.intercept = p * self.intercept + (1.0 - p) * other.intercept;
        self.coefficients
            .zip_mut_with(&other.coefficients, |c, o| *c = p * *c + (1.0 - p) * o);
    }

    /// Formats the model with attribute names, e.g. `1.5 + 3 x - 0.2 z`
    pub fn display<'a>(&'a self, attributes: &'a [Attribute]) -> DisplayModel<'a> {
        DisplayModel {
            model: self,
            attributes,
        }
    }
}

pub struct DisplayModel<'a> {
    model: &'a LinearModel,
    attributes: &'a [Attribute],
}

impl<'a> fmt::Display for DisplayModel<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.model.intercept)?;
        for a in self.model.attributes() {
            let c = self.model.coefficients[a];
            let sign = if c < 0.0 { '-' } else { '+' };
            write!(f, " {} {} {}", sign, c.abs(), self.attributes[a].name())?;
        }
        Ok(())
    }
}
