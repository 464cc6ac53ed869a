// Copyright © 2024 Pathway

use std::error;
use std::result;

use super::Value;

#[allow(clippy::module_name_repetitions)]
pub type DynError = Box<dyn error::Error + Send + Sync>;
pub type DynResult<T> = result::Result<T, DynError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("graph already finalized")]
    GraphFinalized,

    #[error("graph not finalized")]
    GraphNotFinalized,

    #[error("stream does not belong to this graph")]
    GraphMismatch,

    #[error("fractional index bounds out of order")]
    FractionalIndexBounds,

    #[error("type mismatch: expected {expected}, got {value:?}")]
    TypeMismatch {
        expected: &'static str,
        value: Value,
    },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    Other(DynError),
}

impl From<DynError> for Error {
    fn from(value: DynError) -> Self {
        match value.downcast::<Self>() {
            Ok(this) => *this,
            Err(other) => Self::Other(other),
        }
    }
}

pub type Result<T, E = Error> = result::Result<T, E>;
