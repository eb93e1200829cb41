use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinearError>;

/// An error when fitting a linear model over a whole dataset
#[derive(Error, Debug)]
pub enum LinearError {
    #[error("the dataset has no usable continuous attribute")]
    NoContinuousAttributes,
    #[error(transparent)]
    BaseCrate(#[from] cubist::Error),
}
