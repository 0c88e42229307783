pub mod op;

pub use arg::Arg;
pub use op::{
    AutoPad, Conv, ConvAttrs, ConvGeometry, GeometryProvider, OpError, Operator,
};

use tensor::digit_layout::DigitLayout;

/// Data type and shape of a tensor, without its storage.
#[derive(Clone)]
pub struct TensorMeta {
    pub dt: DigitLayout,
    shape: Vec<usize>,
}

impl TensorMeta {
    pub fn new(dt: DigitLayout, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            dt,
            shape: shape.into(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}
