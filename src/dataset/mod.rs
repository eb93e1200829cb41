//! Datasets
//!
//! This module implements the case store used by every stage of model construction: attribute
//! metadata, the records of each case and their targets and weights.
use ndarray::{Array1, Array2, ArrayView1};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::derived::Expr;
use crate::error::{Error, Result};

mod impl_dataset;
mod summary;

pub use summary::{AttributeSummary, Summary};

/// Code of a missing discrete value
pub const MISSING_CODE: usize = 0;
/// Code of a not-applicable discrete value
pub const NA_CODE: usize = 1;
/// Code of the first category of a discrete attribute
pub const FIRST_CODE: usize = 2;

/// A single attribute value of a case
///
/// Discrete values are stored as codes: `Discrete(c)` with `c >= 2` is category `c - 2` of the
/// attribute. `Missing` only appears before the dataset has been imputed.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Continuous(f64),
    Discrete(usize),
    NotApplicable,
    Missing,
}

impl Default for Value {
    fn default() -> Self {
        Value::Missing
    }
}

impl Value {
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Value::NotApplicable)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Numeric value of a continuous attribute
    ///
    /// Anything which is not a known continuous value counts as zero, so that linear models
    /// ignore it.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Continuous(v) => *v,
            _ => 0.0,
        }
    }

    /// Discrete code, with `NA_CODE` for not-applicable and `MISSING_CODE` for missing values
    pub fn code(&self) -> usize {
        match self {
            Value::Discrete(c) => *c,
            Value::NotApplicable => NA_CODE,
            _ => MISSING_CODE,
        }
    }
}

/// Value domain of an attribute
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeKind {
    Continuous,
    Discrete { values: Vec<String>, ordered: bool },
}

/// Metadata of a predictor attribute
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    name: String,
    kind: AttributeKind,
    ignored: bool,
    definition: Option<Expr>,
}

impl Attribute {
    pub fn continuous(name: impl Into<String>) -> Self {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Continuous,
            ignored: false,
            definition: None,
        }
    }

    pub fn discrete<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Discrete {
                values: values.into_iter().map(Into::into).collect(),
                ordered: false,
            },
            ignored: false,
            definition: None,
        }
    }

    /// An attribute computed from other attributes of the same case
    ///
    /// Logical definitions give a discrete attribute with values `t` and `f`, numeric ones a
    /// continuous attribute.
    pub fn derived(name: impl Into<String>, definition: Expr) -> Self {
        let kind = if definition.is_logical() {
            AttributeKind::Discrete {
                values: vec!["t".to_string(), "f".to_string()],
                ordered: false,
            }
        } else {
            AttributeKind::Continuous
        };

        Attribute {
            name: name.into(),
            kind,
            ignored: false,
            definition: Some(definition),
        }
    }

    /// Marks the categories of a discrete attribute as ordered
    pub fn ordered(mut self) -> Self {
        if let AttributeKind::Discrete { ordered, .. } = &mut self.kind {
            *ordered = true;
        }
        self
    }

    /// Keeps the attribute in the data but never uses it in tests or models
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    pub fn definition(&self) -> Option<&Expr> {
        self.definition.as_ref()
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self.kind, AttributeKind::Continuous)
    }

    pub fn is_discrete(&self) -> bool {
        !self.is_continuous()
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self.kind, AttributeKind::Discrete { ordered: true, .. })
    }

    /// Highest discrete code, counting the not-applicable code as well
    pub fn max_value(&self) -> usize {
        match &self.kind {
            AttributeKind::Discrete { values, .. } => values.len() + 1,
            AttributeKind::Continuous => 0,
        }
    }

    /// Name of the category with code `code`
    pub fn value_name(&self, code: usize) -> Option<&str> {
        match &self.kind {
            AttributeKind::Discrete { values, .. } if code >= FIRST_CODE => {
                values.get(code - FIRST_CODE).map(String::as_str)
            }
            _ => None,
        }
    }

    /// Code of the category called `name`
    pub fn code_of(&self, name: &str) -> Option<usize> {
        match &self.kind {
            AttributeKind::Discrete { values, .. } => values
                .iter()
                .position(|v| v == name)
                .map(|p| p + FIRST_CODE),
            AttributeKind::Continuous => None,
        }
    }

    /// Parses a textual value, with `?` for missing and `N/A` for not applicable
    pub fn parse_value(&self, text: &str) -> Result<Value> {
        let text = text.trim();
        match text {
            "?" | "" => return Ok(Value::Missing),
            "N/A" => return Ok(Value::NotApplicable),
            _ => {}
        }

        let parsed = match &self.kind {
            AttributeKind::Continuous => text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::Continuous),
            AttributeKind::Discrete { .. } => self.code_of(text).map(Value::Discrete),
        };

        parsed.ok_or_else(|| Error::InvalidValue {
            attribute: self.name.clone(),
            value: text.to_string(),
        })
    }
}

/// Case store
///
/// Each row of `records` is one case, holding one value per attribute. The row index is the
/// identity of a case: stages which need to reorder cases do so on their own permutation of row
/// indices and never move the rows themselves.
///
/// Unknown targets are stored as `NaN`, which is only valid for cases that are to be predicted.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug)]
pub struct Dataset {
    attributes: Vec<Attribute>,
    records: Array2<Value>,
    targets: Array1<f64>,
    weights: Array1<f64>,
    target_name: String,
}

impl Dataset {
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, att: usize) -> &Attribute {
        &self.attributes[att]
    }

    pub fn records(&self) -> &Array2<Value> {
        &self.records
    }

    pub fn targets(&self) -> &Array1<f64> {
        &self.targets
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn nsamples(&self) -> usize {
        self.records.nrows()
    }

    pub fn nattributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn row(&self, case: usize) -> ArrayView1<'_, Value> {
        self.records.row(case)
    }

    pub fn value(&self, case: usize, att: usize) -> Value {
        self.records[(case, att)]
    }

    pub fn cont(&self, case: usize, att: usize) -> f64 {
        self.records[(case, att)].as_f64()
    }

    pub fn discrete(&self, case: usize, att: usize) -> usize {
        self.records[(case, att)].code()
    }

    pub fn target(&self, case: usize) -> f64 {
        self.targets[case]
    }

    pub fn weight(&self, case: usize) -> f64 {
        self.weights[case]
    }
}
