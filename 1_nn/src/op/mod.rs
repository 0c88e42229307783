mod conv;

pub use conv::{AutoPad, Conv, ConvAttrs, ConvGeometry, GeometryProvider};

use crate::{Arg, TensorMeta};

/// Backend-agnostic half of an operator: derives output metadata from input
/// metadata and attributes.
pub trait Operator {
    fn infer(&self, inputs: &[TensorMeta], args: Option<&Arg>) -> Result<Vec<TensorMeta>, OpError>;
}

#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum OpError {
    #[error("invalid attribute: {0}")]
    ArgError(#[from] arg::ArgError),
    #[error("unexpected number of inputs or input rank")]
    ShapeError,
    #[error("inputs have different data types")]
    DataTypeMismatch,
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

pub(crate) mod macros {
    macro_rules! destruct {
        ([$( $name:ident ),+] = $inputs:expr) => {
            let [$( $name ),+] = $inputs else {
                return Err($crate::op::OpError::ShapeError);
            };
        };
    }

    macro_rules! invalid {
        ($($arg:tt)*) => {
            $crate::op::OpError::InvalidGeometry(format!($($arg)*))
        };
    }

    pub(crate) use {destruct, invalid};
}
