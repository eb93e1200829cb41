use std::collections::HashSet;

use ndarray::{Array1, Array2, Axis};
use rand::{seq::SliceRandom, Rng};

use super::{Attribute, Dataset, Value};
use crate::error::{Error, Result};

impl Dataset {
    /// Creates a dataset from attribute metadata, one row of values per case and the targets
    ///
    /// Derived attributes need a column as well; whatever it holds is replaced by the value of
    /// the definition.
    pub fn new(
        attributes: Vec<Attribute>,
        records: Array2<Value>,
        targets: Array1<f64>,
    ) -> Result<Self> {
        if records.ncols() != attributes.len() {
            return Err(Error::Parameters(format!(
                "records have {} columns but {} attributes were given",
                records.ncols(),
                attributes.len()
            )));
        }
        if records.nrows() != targets.len() {
            return Err(Error::Parameters(format!(
                "{} cases but {} targets",
                records.nrows(),
                targets.len()
            )));
        }

        let mut names = HashSet::new();
        for att in &attributes {
            if !names.insert(att.name()) {
                return Err(Error::DuplicateName(att.name().to_string()));
            }
        }

        for (a, att) in attributes.iter().enumerate() {
            if let Some(def) = att.definition() {
                if let Some(bad) = def.attributes_used().into_iter().find(|&u| u >= a) {
                    let name = attributes
                        .get(bad)
                        .map(|b| b.name().to_string())
                        .unwrap_or_else(|| format!("#{}", bad));
                    return Err(Error::UnknownAttribute(name));
                }
            }
        }

        let nsamples = records.nrows();
        let mut dataset = Dataset {
            attributes,
            records,
            targets,
            weights: Array1::ones(nsamples),
            target_name: "target".to_string(),
        };
        dataset.evaluate_definitions();

        Ok(dataset)
    }

    /// Creates a dataset of continuous attributes `x0, x1, ..` from a numeric matrix
    pub fn from_continuous(records: Array2<f64>, targets: Array1<f64>) -> Result<Self> {
        let attributes = (0..records.ncols())
            .map(|a| Attribute::continuous(format!("x{}", a)))
            .collect();

        Dataset::new(attributes, records.mapv(Value::Continuous), targets)
    }

    /// Creates a dataset of cases whose target is unknown, for prediction
    pub fn unlabeled(attributes: Vec<Attribute>, records: Array2<Value>) -> Result<Self> {
        let targets = Array1::from_elem(records.nrows(), f64::NAN);
        Dataset::new(attributes, records, targets)
    }

    /// Updates the case weights
    pub fn with_weights(mut self, weights: Array1<f64>) -> Result<Self> {
        if weights.len() != self.nsamples() {
            return Err(Error::Parameters(format!(
                "{} weights for {} cases",
                weights.len(),
                self.nsamples()
            )));
        }
        self.weights = weights;
        Ok(self)
    }

    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = name.into();
        self
    }

    /// Replaces the targets, keeping everything else
    pub fn with_targets(mut self, targets: Array1<f64>) -> Result<Self> {
        if targets.len() != self.nsamples() {
            return Err(Error::Parameters(format!(
                "{} targets for {} cases",
                targets.len(),
                self.nsamples()
            )));
        }
        self.targets = targets;
        Ok(self)
    }

    /// Rescales the weights to an average of one
    ///
    /// Weights which are not positive or not finite count as one.
    pub fn normalize_weights(&mut self) {
        self.weights.mapv_inplace(|w| if w.is_finite() && w > 0.0 { w } else { 1.0 });

        let n = self.nsamples();
        if n > 0 {
            let mean = self.weights.sum() / n as f64;
            self.weights.mapv_inplace(|w| w / mean);
        }
    }

    /// Computes the values of all derived attributes, in attribute order
    pub(crate) fn evaluate_definitions(&mut self) {
        for a in 0..self.attributes.len() {
            if let Some(def) = self.attributes[a].definition().cloned() {
                for i in 0..self.nsamples() {
                    let v = def.evaluate(&self.attributes, self.records.row(i));
                    self.records[(i, a)] = v;
                }
            }
        }
    }

    /// Creates a new dataset holding the given cases, in the given order
    pub fn select(&self, cases: &[usize]) -> Dataset {
        Dataset {
            attributes: self.attributes.clone(),
            records: self.records.select(Axis(0), cases),
            targets: self.targets.select(Axis(0), cases),
            weights: self.weights.select(Axis(0), cases),
            target_name: self.target_name.clone(),
        }
    }

    /// Randomly splits the cases into a training part holding `fraction` of them and the rest
    pub fn sample_split(&self, fraction: f64, rng: &mut impl Rng) -> (Dataset, Dataset) {
        let mut order: Vec<usize> = (0..self.nsamples()).collect();
        order.shuffle(rng);

        let ntrain = ((self.nsamples() as f64 * fraction).round() as usize)
            .max(1)
            .min(self.nsamples());
        let (train, rest) = order.split_at(ntrain);
        let (mut train, mut rest) = (train.to_vec(), rest.to_vec());
        train.sort_unstable();
        rest.sort_unstable();

        (self.select(&train), self.select(&rest))
    }
}
