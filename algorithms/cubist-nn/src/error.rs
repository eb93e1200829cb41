use thiserror::Error;

pub type Result<T> = std::result::Result<T, NnError>;

/// An error when building the instance index
#[derive(Error, Debug)]
pub enum NnError {
    #[error("no instances to index")]
    EmptyIndex,
    #[error("at most {max} neighbours can be used, got {0}", max = crate::NNMAX)]
    TooManyNeighbours(usize),
    #[error("{0} rule predictions for {1} instances")]
    PredictionCount(usize, usize),
    #[error(transparent)]
    BaseCrate(#[from] cubist::Error),
}
