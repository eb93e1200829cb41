//! Distance between cases
//!
//! Cases are compared with a Manhattan distance in which every attribute contributes at most
//! one unit (two for an unordered attribute with very few categories):
//!
//! * a value which is not applicable in only one of the cases contributes `1`
//! * continuous values contribute their difference divided by five standard deviations, capped
//!   at `1`
//! * ordered discrete values contribute their code difference divided by the number of
//!   categories
//! * unordered discrete values contribute `2 / #categories` when they differ
use cubist::{dataset::FIRST_CODE, Attribute, Summary, Value};
use ndarray::ArrayView1;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// Distances between cases are rounded to multiples of `1 / DISTANCE_PRECISION`
pub const DISTANCE_PRECISION: f64 = 16.0;

/// How one attribute contributes to the distance between two cases
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scale {
    /// The attribute takes no part
    Skip,
    Continuous { sd: f64 },
    Ordered { categories: f64 },
    Unordered { categories: f64 },
}

impl Scale {
    /// The scale of every attribute, taken from the statistics of the training cases
    pub fn from_summary(attributes: &[Attribute], summary: &Summary) -> Vec<Scale> {
        attributes
            .iter()
            .enumerate()
            .map(|(a, att)| {
                let stats = summary.attribute(a);
                if att.is_ignored() || stats.skipped {
                    Scale::Skip
                } else if att.is_continuous() {
                    Scale::Continuous { sd: stats.sd }
                } else {
                    let categories = (att.max_value() + 1).saturating_sub(FIRST_CODE) as f64;
                    if categories < 1.0 {
                        Scale::Skip
                    } else if att.is_ordered() {
                        Scale::Ordered { categories }
                    } else {
                        Scale::Unordered { categories }
                    }
                }
            })
            .collect()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Scale::Skip)
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, Scale::Continuous { .. })
    }

    /// Contribution of this attribute to the distance between values `a` and `b`
    pub fn difference(&self, a: Value, b: Value) -> f64 {
        if self.is_skipped() {
            return 0.0;
        }
        if a.is_not_applicable() != b.is_not_applicable() {
            return 1.0;
        }

        match *self {
            Scale::Skip => 0.0,
            Scale::Continuous { sd } => self.continuous_difference(a.as_f64(), b.as_f64(), sd),
            Scale::Ordered { categories } => {
                (a.code() as f64 - b.code() as f64).abs() / categories
            }
            Scale::Unordered { categories } => {
                if a.code() != b.code() {
                    2.0 / categories
                } else {
                    0.0
                }
            }
        }
    }

    fn continuous_difference(&self, a: f64, b: f64, sd: f64) -> f64 {
        ((a - b).abs() / (5.0 * sd)).min(1.0)
    }

    /// Smallest contribution of a continuous attribute between `x` and any value on the far
    /// side of `cut`
    pub(crate) fn beyond_cut(&self, x: f64, cut: f64) -> f64 {
        match *self {
            Scale::Continuous { sd } => self.continuous_difference(x, cut, sd),
            _ => 0.0,
        }
    }

    /// Smallest contribution between a discrete code `first` and any other code `v`
    pub(crate) fn between_codes(&self, first: usize, v: usize) -> f64 {
        match *self {
            Scale::Ordered { categories } => (first as f64 - v as f64).abs() / categories,
            Scale::Unordered { categories } => 2.0 / categories,
            _ => 0.0,
        }
    }
}

/// Distance between two cases
///
/// The sum stops as soon as it reaches `thresh`, so the result is only exact when it is below
/// `thresh`.
pub fn distance(
    scales: &[Scale],
    a: ArrayView1<'_, Value>,
    b: ArrayView1<'_, Value>,
    thresh: f64,
) -> f64 {
    let mut total = 0.0;
    for ((scale, x), y) in scales.iter().zip(a.iter()).zip(b.iter()) {
        if total >= thresh {
            break;
        }
        total += scale.difference(*x, *y);
    }
    total
}

/// Rounds a distance to the precision used when comparing neighbours
pub fn round_distance(d: f64) -> f64 {
    (d * DISTANCE_PRECISION).round() / DISTANCE_PRECISION
}
