//! `cubist-datasets` provides synthetic regression datasets ready to be used in tests, examples
//! and benchmarks of the `cubist` crates.
//!
//! ## Current State
//!
//! The following generators are provided in [`generate`](generate/index.html):
//!
//! * `linear` : a noisy linear function of uniformly drawn attributes
//! * `piecewise` : two linear pieces of one attribute, with an irrelevant second attribute
//! * `categorical` : a slope shared by every category of a discrete attribute, with an offset
//!   per category
//! * `friedman1` : Friedman's first benchmark function of ten attributes, five of them
//!   irrelevant
//!
//! `with_missing` blanks out a fraction of the values of any dataset.
//!
//! ## Using a dataset
//!
//! ```
//! use cubist_datasets::generate;
//! use rand::{rngs::SmallRng, SeedableRng};
//!
//! let mut rng = SmallRng::seed_from_u64(42);
//! let dataset = generate::friedman1(500, 1.0, &mut rng).unwrap();
//! assert_eq!(dataset.nattributes(), 10);
//! ```

pub mod generate;
