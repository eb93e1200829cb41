//!
//! `cubist-nn` corrects the predictions of a rule-based model with the targets of the most
//! similar training cases.
//!
//! ## The Big Picture
//!
//! The training cases are kept as instances in an [`InstanceIndex`](struct.InstanceIndex.html),
//! a K-D tree extended with the distances to two reference points so that whole subtrees can
//! be discarded without looking at their instances. The
//! [`NnEngine`](struct.NnEngine.html) averages the targets of the nearest instances, each
//! shifted by the difference between the model's prediction for the query and for the
//! instance.
//!
//! Distances are a Manhattan distance in which every attribute contributes at most about one
//! unit; see the [`distance`](distance/index.html) module.

pub mod distance;
mod engine;
mod error;
mod index;

pub use engine::*;
pub use error::*;
pub use index::*;

/// Most neighbours kept by a query
pub const MAXN: usize = 20;
/// Most neighbours averaged by a prediction
pub const NNMAX: usize = 9;
/// Most training cases used to estimate the average distance and the best neighbour count
pub const MAX_TRIES: usize = 1000;
