mod kernel;

use super::{CpuContext, CpuOperator};
use crate::{Backend, ExecError, OperatorEntry};
use mem::Tensor;
use nn::{Arg, ConvAttrs, ConvGeometry, GeometryProvider};
use std::mem::size_of;

/// 2-D convolution by im2col and matmul.
///
/// The im2col buffer grows with the batch; once it would exceed the context's
/// `im2col_numel_limit` the batch is processed in chunks that each fit.
#[derive(Default)]
pub struct CpuConv {
    attrs: ConvAttrs,
}

pub(super) fn op_entries() -> Vec<OperatorEntry<dyn CpuOperator>> {
    fn factory() -> Box<dyn CpuOperator> {
        Box::new(CpuConv::default())
    }
    vec![OperatorEntry {
        op_type: "Conv",
        backend: Backend::Cpu,
        opset_min: 1,
        factory,
    }]
}

impl CpuConv {
    pub fn new(attrs: ConvAttrs) -> Self {
        Self { attrs }
    }

    fn forward(&self, ctx: &CpuContext, inputs: &[&Tensor]) -> Result<Tensor, ExecError> {
        let (x, w, b) = match *inputs {
            [x, w] => (x, w, None),
            [x, w, b] => (x, w, Some(b)),
            _ => {
                return Err(ExecError::InputCount {
                    expected: "2 or 3",
                    found: inputs.len(),
                });
            }
        };
        for (name, t) in [("input", x), ("weight", w)] {
            if t.ndim() != 4 {
                return Err(ExecError::UnsupportedRank {
                    name,
                    rank: t.ndim(),
                });
            }
        }

        let geo = self.attrs.geometry(x.dims(), w.dims())?;
        let x_data = x.data::<f32>().ok_or(ExecError::UnsupportedDataType("input"))?;
        let w_data = w.data::<f32>().ok_or(ExecError::UnsupportedDataType("weight"))?;
        let b_data = b
            .map(|b| b.data::<f32>().ok_or(ExecError::UnsupportedDataType("bias")))
            .transpose()?;
        if let Some(b_data) = b_data {
            if b_data.len() != geo.ch_out {
                return Err(nn::OpError::InvalidGeometry(format!(
                    "bias has {} elements, expected {}",
                    b_data.len(),
                    geo.ch_out
                ))
                .into());
            }
        }

        let limit = ctx.config().im2col_numel_limit;
        let mut y = if geo.im2col_numel() > limit {
            self.run_split_batch(ctx, x, w, &geo)?
        } else {
            let mut y = vec![0.; geo.output_shape().iter().product()];
            compute(&geo, x_data, w_data, &mut y, geo.batch);
            Tensor::from_vec(geo.output_shape(), y)?
        };

        if let Some(b_data) = b_data {
            let dims = geo.output_shape();
            let mut out = y.view_mut::<f32>(&dims, 0)?;
            kernel::bias(b_data, out.data_mut(), geo.out_area());
        }
        Ok(y)
    }

    /// Fills the output chunk by chunk so that no im2col buffer exceeds the limit.
    fn run_split_batch(
        &self,
        ctx: &CpuContext,
        x: &Tensor,
        w: &Tensor,
        geo: &ConvGeometry,
    ) -> Result<Tensor, ExecError> {
        if geo.group > 1 {
            return Err(ExecError::UnsupportedGroupedSplit);
        }

        let limit = ctx.config().im2col_numel_limit;
        let per_batch = geo.im2col_numel_per_batch();
        let iter_batch = limit / per_batch;
        if iter_batch == 0 {
            return Err(ExecError::BufferTooLarge {
                input: x.dims().to_vec(),
                weight: w.dims().to_vec(),
            });
        }
        log::debug!(
            "conv: im2col of {} elements exceeds limit {limit}, splitting batch {} into chunks of {iter_batch}",
            geo.im2col_numel(),
            geo.batch,
        );

        let w_data = w.data::<f32>().ok_or(ExecError::UnsupportedDataType("weight"))?;
        let &ConvGeometry {
            ch_in,
            in_shape: [h, w_],
            ..
        } = geo;
        let [_, ch_out, oh, ow] = geo.output_shape();
        let x_stride = ch_in * h * w_ * size_of::<f32>();
        let y_stride = ch_out * oh * ow * size_of::<f32>();

        let mut y = ctx.empty_tensor::<f32>(geo.output_shape());
        for start in (0..geo.batch).step_by(iter_batch) {
            let batch = iter_batch.min(geo.batch - start);
            log::trace!("conv: batch {start}..{}", start + batch);

            let x_chunk = x.view::<f32>(&[batch, ch_in, h, w_], start * x_stride)?;
            let mut y_chunk = y.view_mut::<f32>(&[batch, ch_out, oh, ow], start * y_stride)?;
            compute(geo, x_chunk.data(), w_data, y_chunk.data_mut(), batch);
        }
        Ok(y)
    }
}

/// im2col, matmul and transpose of `batch` samples, written straight into `y`.
fn compute(geo: &ConvGeometry, x: &[f32], w: &[f32], y: &mut [f32], batch: usize) {
    let mut col = vec![0.; batch * geo.im2col_numel_per_batch()];
    let mut mm = vec![0.; kernel::matmul_numel(geo, batch)];
    kernel::im2col(x, &mut col, geo, batch);
    kernel::matmul(&col, w, &mut mm, geo, batch);
    kernel::transpose(&mm, y, geo, batch);
}

#[async_trait::async_trait]
impl CpuOperator for CpuConv {
    fn initialize(&mut self, args: Option<&Arg>) -> Result<(), ExecError> {
        self.attrs = ConvAttrs::new(args)?;
        Ok(())
    }

    async fn run(&self, ctx: &CpuContext, inputs: &[&Tensor]) -> Result<Vec<Tensor>, ExecError> {
        self.forward(ctx, inputs).map(|y| vec![y])
    }
}
