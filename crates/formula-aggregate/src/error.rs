use crate::value::ValueError;

pub type AggregateResult<T> = Result<T, AggregateError>;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("index {index} does not occur in this collection (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown aggregate: {0}")]
    UnknownAggregate(String),

    #[error("extrapolation was interrupted before completing")]
    ExtrapolationInterrupted,

    #[error(transparent)]
    Value(#[from] ValueError),
}
