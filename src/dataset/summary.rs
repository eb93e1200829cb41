//! Global statistics of a training set
//!
//! The statistics are computed once over the training cases. They provide the replacement
//! values for missing data, the scale used by the distance between cases and the bounds that
//! every prediction is clamped to.
use log::warn;
use ndarray::{Array1, ArrayView1};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use super::{Attribute, Dataset, Value, FIRST_CODE, MISSING_CODE};
use crate::error::{Error, Result};
use crate::stats::decimals;

/// Statistics of one attribute, or of the target
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeSummary {
    /// Mean of the known values, rounded to the attribute precision
    pub mean: f64,
    /// Sample standard deviation, never zero
    pub sd: f64,
    pub min: f64,
    pub max: f64,
    /// Most frequent category of a discrete attribute
    pub modal: usize,
    /// Ten times the power of ten needed to represent every value exactly
    pub prec: f64,
    /// The attribute has too few known values to be of any use
    pub skipped: bool,
}

impl Default for AttributeSummary {
    fn default() -> Self {
        AttributeSummary {
            mean: 0.0,
            sd: 1.0,
            min: 0.0,
            max: 0.0,
            modal: MISSING_CODE,
            prec: 0.0,
            skipped: true,
        }
    }
}

impl AttributeSummary {
    fn continuous(values: &[f64]) -> Self {
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        if values.len() < 2 {
            return AttributeSummary {
                min: if values.is_empty() { 0.0 } else { min },
                max: if values.is_empty() { 0.0 } else { max },
                ..Default::default()
            };
        }

        let count = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let sum_sq: f64 = values.iter().map(|v| v * v).sum();
        let prec = 10.0 * 10f64.powi(decimals(values.iter().cloned()) as i32);

        AttributeSummary {
            mean: ((sum / count) * prec + 0.1).floor() / prec,
            sd: ((sum_sq - sum * sum / count) / (count - 1.0)).max(0.0).sqrt() + 1e-6,
            min,
            max,
            modal: MISSING_CODE,
            prec,
            skipped: false,
        }
    }

    /// The value `lo - extrapolation * range`, which cannot cross zero if `lo` did not
    fn floor(&self, extrapolation: f64) -> f64 {
        let floor = self.min - extrapolation * (self.max - self.min);
        if self.min >= 0.0 && floor < 0.0 {
            0.0
        } else {
            floor
        }
    }

    fn ceiling(&self, extrapolation: f64) -> f64 {
        let ceiling = self.max + extrapolation * (self.max - self.min);
        if self.max <= 0.0 && ceiling > 0.0 {
            0.0
        } else {
            ceiling
        }
    }
}

/// Statistics of a training set
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    attributes: Vec<AttributeSummary>,
    target: AttributeSummary,
    floor: f64,
    ceiling: f64,
}

impl Summary {
    pub fn attribute(&self, att: usize) -> &AttributeSummary {
        &self.attributes[att]
    }

    pub fn target(&self) -> &AttributeSummary {
        &self.target
    }

    /// Lowest value a prediction may take
    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Highest value a prediction may take
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.floor).min(self.ceiling)
    }

    /// Number of decimal places of the target
    pub fn precision(&self) -> usize {
        ((self.target.prec / 10.0).log10() + 0.5).max(0.0) as usize
    }

    /// Copy of a case with its missing values replaced as `Dataset::impute` would
    pub fn impute_case(&self, attributes: &[Attribute], case: ArrayView1<'_, Value>) -> Array1<Value> {
        let mut case = case.to_owned();
        for (a, v) in case.iter_mut().enumerate() {
            if v.is_missing() {
                if attributes[a].is_continuous() {
                    *v = Value::Continuous(self.attributes[a].mean);
                } else if !self.attributes[a].skipped {
                    *v = Value::Discrete(self.attributes[a].modal);
                }
            }
        }
        case
    }
}

impl Dataset {
    /// Computes the statistics of all attributes and the target
    ///
    /// `extrapolation` is the fraction of the target range by which predictions may exceed the
    /// observed targets.
    pub fn summarize(&self, extrapolation: f64) -> Result<Summary> {
        if self.nsamples() == 0 {
            return Err(Error::NotEnoughSamples);
        }

        let attributes = self
            .attributes()
            .iter()
            .enumerate()
            .map(|(a, att)| {
                if att.is_continuous() {
                    let known: Vec<f64> = self
                        .records()
                        .column(a)
                        .iter()
                        .filter_map(|v| match v {
                            Value::Continuous(x) => Some(*x),
                            _ => None,
                        })
                        .collect();
                    AttributeSummary::continuous(&known)
                } else {
                    let mut freq = vec![0usize; att.max_value() + 1];
                    for v in self.records().column(a) {
                        if let Value::Discrete(c) = v {
                            if *c < freq.len() {
                                freq[*c] += 1;
                            }
                        }
                    }

                    let mut modal = MISSING_CODE;
                    for c in FIRST_CODE..freq.len() {
                        if freq[c] > freq[modal] {
                            modal = c;
                        }
                    }

                    AttributeSummary {
                        modal,
                        skipped: modal == MISSING_CODE,
                        ..Default::default()
                    }
                }
            })
            .collect();

        let known_targets: Vec<f64> = self
            .targets()
            .iter()
            .cloned()
            .filter(|y| y.is_finite())
            .collect();
        let mut target = AttributeSummary::continuous(&known_targets);
        if target.prec == 0.0 {
            target.mean = known_targets.first().cloned().unwrap_or(0.0);
            target.prec = 10.0;
        }

        Ok(Summary {
            attributes,
            floor: target.floor(extrapolation),
            ceiling: target.ceiling(extrapolation),
            target,
        })
    }

    /// Replaces missing values by the mean or modal value of the attribute
    ///
    /// Not-applicable values are left alone, and so are attributes that have no known values
    /// at all.
    pub fn impute(&mut self, summary: &Summary) {
        let mut replaced = vec![false; self.nattributes()];

        for a in 0..self.nattributes() {
            let stats = summary.attribute(a);
            if stats.skipped && self.attribute(a).is_discrete() {
                continue;
            }
            let replacement = if self.attribute(a).is_continuous() {
                Value::Continuous(stats.mean)
            } else {
                Value::Discrete(stats.modal)
            };

            for v in self.records.column_mut(a) {
                if v.is_missing() {
                    *v = replacement;
                    replaced[a] = true;
                }
            }
        }

        for (a, _) in replaced.iter().enumerate().filter(|(_, r)| **r) {
            warn!(
                "unknown values of `{}` replaced by {:?}",
                self.attribute(a).name(),
                if self.attribute(a).is_continuous() {
                    summary.attribute(a).mean.to_string()
                } else {
                    self.attribute(a)
                        .value_name(summary.attribute(a).modal)
                        .unwrap_or("?")
                        .to_string()
                }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn mixed() -> Dataset {
        let atts = vec![
            Attribute::continuous("x"),
            Attribute::discrete("c", vec!["a", "b", "c"]),
            Attribute::continuous("empty"),
        ];
        let records = array![
            [Value::Continuous(1.0), Value::Discrete(2), Value::NotApplicable],
            [Value::Continuous(2.0), Value::Discrete(3), Value::Missing],
            [Value::Missing, Value::Discrete(3), Value::Missing],
            [Value::Continuous(4.5), Value::Missing, Value::NotApplicable]
        ];
        Dataset::new(atts, records, array![10.0, 20.0, 30.0, 40.0]).unwrap()
    }

    #[test]
    fn continuous_statistics() {
        let summary = mixed().summarize(0.1).unwrap();
        let x = summary.attribute(0);

        assert_abs_diff_eq!(x.prec, 100.0);
        assert_abs_diff_eq!(x.mean, 2.5);
        assert_abs_diff_eq!(x.min, 1.0);
        assert_abs_diff_eq!(x.max, 4.5);
        assert!(!x.skipped);
        assert!(summary.attribute(2).skipped);
        assert_eq!(summary.attribute(1).modal, 3);
    }

    #[test]
    fn floor_and_ceiling() {
        let summary = mixed().summarize(0.1).unwrap();

        assert_abs_diff_eq!(summary.floor(), 7.0);
        assert_abs_diff_eq!(summary.ceiling(), 43.0);
        assert_abs_diff_eq!(summary.clamp(100.0), 43.0);
        assert_eq!(summary.precision(), 0);

        let data = Dataset::from_continuous(array![[0.0], [1.0]], array![0.5, 20.0]).unwrap();
        let summary = data.summarize(0.1).unwrap();
        // a non-negative target is never extrapolated below zero
        assert_abs_diff_eq!(summary.floor(), 0.0);
        assert_eq!(summary.precision(), 1);
    }

    #[test]
    fn impute_replaces_only_missing() {
        let mut data = mixed();
        let summary = data.summarize(0.1).unwrap();
        data.impute(&summary);

        assert_eq!(data.value(2, 0), Value::Continuous(2.5));
        assert_eq!(data.value(3, 1), Value::Discrete(3));
        assert_eq!(data.value(0, 2), Value::NotApplicable);
        assert_eq!(data.value(1, 2), Value::Continuous(0.0));

        let fresh = array![Value::Missing, Value::Missing, Value::NotApplicable];
        let imputed = summary.impute_case(data.attributes(), fresh.view());
        assert_eq!(imputed[0], Value::Continuous(2.5));
        assert_eq!(imputed[1], Value::Discrete(3));
        assert_eq!(imputed[2], Value::NotApplicable);
    }
}
