//! `cubist` builds regression models that can be read by people: rulesets whose rules each
//! carry a linear model, optionally combined into committees and corrected by the targets of
//! the nearest training cases.
//!
//! This crate holds what every stage of the pipeline shares:
//!
//! * the case store [`Dataset`](dataset/struct.Dataset.html), with attribute metadata, values
//!   that may be missing or not applicable, case weights, and the training
//!   [`Summary`](dataset/struct.Summary.html) used for imputation and prediction bounds
//! * derived attributes, defined by an [`Expr`](derived/enum.Expr.html)
//! * the pessimistic error estimate used by model simplification, pruning and rule construction
//! * the `Fit`/`Predict` traits and the `ParamGuard` pattern for hyperparameters
//! * a progress sink for the long-running stages
//!
//! The algorithms live in their own crates: `cubist-linear` (the linear model solver),
//! `cubist-trees` (model trees, rules and committees) and `cubist-nn` (the instance index).
//!

pub mod dataset;
pub mod derived;
pub mod error;
mod metrics_regression;
mod param_guard;
pub mod prelude;
pub mod progress;
pub mod stats;
pub mod traits;

pub use dataset::{Attribute, AttributeKind, Dataset, Summary, Value};
pub use error::{Error, Result};
pub use param_guard::ParamGuard;

/// Common metrics functions for regression
pub mod metrics {
    pub use crate::metrics_regression::Regression;
}
