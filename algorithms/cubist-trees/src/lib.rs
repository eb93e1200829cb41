//!
//! # Model trees, rules and committees
//! `cubist-trees` grows regression model trees, turns them into rulesets and combines rulesets
//! into committees.
//!
//! # The big picture
//!
//! `cubist-trees` is the top of the `cubist` workspace. It relies on `cubist` for the case store
//! and shared statistics, on `cubist-linear` for the linear models and on `cubist-nn` for the
//! optional instance correction.
//!
//! A model is built in stages:
//!
//! * a tree is grown by recursively splitting the cases so as to reduce the standard deviation
//!   of the target, and a simplified linear model is fitted at every node,
//! * the tree is pruned bottom-up, keeping a subtree only when its pessimistic error estimate
//!   beats the model of its root, and the leaf models are smoothed with their ancestors,
//! * every path to a leaf becomes a rule, and conditions that do not help the predictions of
//!   the cases they exclude are dropped,
//! * each further committee member is trained on targets adjusted by the errors of the previous
//!   member,
//! * optionally, predictions are corrected by the nearest training instances.
//!
//! # Example
//!
//! ```rust
//! use cubist::prelude::*;
//! use cubist_trees::Cubist;
//! use ndarray::{Array1, Array2};
//!
//! // two linear pieces
//! let x = Array2::from_shape_fn((100, 1), |(i, _)| i as f64);
//! let y = Array1::from_shape_fn(100, |i| if i < 50 { i as f64 } else { 150.0 - i as f64 });
//! let dataset = Dataset::from_continuous(x, y).unwrap();
//!
//! let model = Cubist::params().fit(&dataset).unwrap();
//! assert_eq!(model.committee()[0].len(), 2);
//!
//! let pred = model.predict(&dataset);
//! assert!((pred[60] - 90.0).abs() < 1e-3);
//! ```

mod error;
mod extract;
mod hyperparams;
mod model;
mod prune;
mod rules;
mod tree;

pub use error::{CubistError, Result};
pub use hyperparams::{CubistParams, CubistValidParams, InstanceMode};
pub use model::{Cubist, Evaluation};
pub use rules::{AttributeUsage, Condition, DisplayCondition, DisplayRule, Rule, RuleSet, Split};
pub use tree::{ModelTree, Node, NodeId, NodeIter, Test};

/// Smallest number of cases on each of at least two branches of a split
pub const MINSPLIT: usize = 3;

/// Tolerance on the gain of a split
pub const EPSILON: f64 = 1e-4;

/// Largest number of cases evaluated after training with instance correction
pub const EVAL_SAMPLE: usize = 10000;
