//! Error types in Cubist
//!

use thiserror::Error;

use ndarray::ShapeError;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("invalid parameter {0}")]
    Parameters(String),
    #[error("invalid ndarray shape {0}")]
    NdShape(#[from] ShapeError),
    #[error("not enough samples to build a model")]
    NotEnoughSamples,
    #[error("no usable predictor attributes")]
    NoPredictors,
    #[error("bad value `{value}` for attribute `{attribute}`")]
    InvalidValue { attribute: String, value: String },
    #[error("duplicate attribute name `{0}`")]
    DuplicateName(String),
    #[error("definition refers to unknown attribute `{0}`")]
    UnknownAttribute(String),
    #[error("case {0} has an unknown target value")]
    UnknownTarget(usize),
}
