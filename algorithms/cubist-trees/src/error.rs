use cubist_nn::NnError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CubistError>;

#[derive(Error, Debug)]
pub enum CubistError {
    #[error("committee member {0} has no rules")]
    EmptyTree(usize),
    #[error(transparent)]
    Instances(#[from] NnError),
    #[error(transparent)]
    BaseCrate(#[from] cubist::Error),
}
