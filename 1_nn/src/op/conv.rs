use super::{
    OpError, Operator,
    macros::{destruct, invalid},
};
use crate::{Arg, TensorMeta};
use itertools::izip;

/// 2-D convolution, `y = conv(x, w) + b`.
pub struct Conv;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AutoPad {
    NotSet,
    Valid,
    SameUpper,
    SameLower,
}

/// Attributes of a single `Conv` node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConvAttrs {
    pub group: usize,
    pub kernel_shape: Option<[usize; 2]>,
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    /// `[top, left, bottom, right]`
    pub pads: [usize; 4],
    pub auto_pad: AutoPad,
}

/// Everything the kernels need to know about one convolution call.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConvGeometry {
    pub batch: usize,
    pub group: usize,
    pub ch_in: usize,
    pub ch_in_per_group: usize,
    pub ch_out: usize,
    pub ch_out_per_group: usize,
    pub kernel_shape: [usize; 2],
    pub strides: [usize; 2],
    /// `[top, left, bottom, right]`
    pub pads: [usize; 4],
    pub dilations: [usize; 2],
    pub in_shape: [usize; 2],
    pub out_shape: [usize; 2],
}

/// Derives [`ConvGeometry`] from input and weight dimensions.
pub trait GeometryProvider {
    fn geometry(&self, x: &[usize], w: &[usize]) -> Result<ConvGeometry, OpError>;
}

impl Default for ConvAttrs {
    fn default() -> Self {
        Self {
            group: 1,
            kernel_shape: None,
            strides: [1; 2],
            dilations: [1; 2],
            pads: [0; 4],
            auto_pad: AutoPad::NotSet,
        }
    }
}

impl ConvAttrs {
    pub fn new(args: Option<&Arg>) -> Result<Self, OpError> {
        let mut ans = Self::default();
        let Some(args) = args else {
            return Ok(ans);
        };
        if !matches!(args, Arg::Dict(_)) {
            return Err(arg::ArgError::TypeMismatch {
                expected: "dict",
                found: args.kind(),
            }
            .into());
        }

        if let Some(group) = args.get("group") {
            ans.group = group.to_usize()?
        }
        if let Some(kernel_shape) = args.get("kernel_shape") {
            ans.kernel_shape = Some(kernel_shape.to_usize_array()?)
        }
        if let Some(strides) = args.get("strides") {
            ans.strides = strides.to_usize_array()?
        }
        if let Some(dilations) = args.get("dilations") {
            ans.dilations = dilations.to_usize_array()?
        }
        if let Some(pads) = args.get("pads") {
            ans.pads = match pads.to_usize_vec()?.as_slice() {
                &[y, x] => [y, x, y, x],
                &[t, l, b, r] => [t, l, b, r],
                other => {
                    return Err(arg::ArgError::LenMismatch {
                        expected: 4,
                        found: other.len(),
                    }
                    .into());
                }
            }
        }
        if let Some(auto_pad) = args.get("auto_pad") {
            ans.auto_pad = match auto_pad.to_str()? {
                "NOTSET" => AutoPad::NotSet,
                "VALID" => AutoPad::Valid,
                "SAME_UPPER" => AutoPad::SameUpper,
                "SAME_LOWER" => AutoPad::SameLower,
                other => return Err(arg::ArgError::Unknown(other.into()).into()),
            }
        }
        Ok(ans)
    }

    /// Resolves the begin and end pad of one spatial axis, `None` on overflow.
    fn pads_of(&self, axis: usize, len: usize, span: usize, stride: usize) -> Option<[usize; 2]> {
        match self.auto_pad {
            AutoPad::NotSet => Some([self.pads[axis], self.pads[axis + 2]]),
            AutoPad::Valid => Some([0, 0]),
            AutoPad::SameUpper | AutoPad::SameLower => {
                let out = len.div_ceil(stride);
                let total = ((out - 1) * stride).checked_add(span)?.saturating_sub(len);
                let half = total / 2;
                Some(if self.auto_pad == AutoPad::SameUpper {
                    [half, total - half]
                } else {
                    [total - half, half]
                })
            }
        }
    }
}

impl GeometryProvider for ConvAttrs {
    fn geometry(&self, x: &[usize], w: &[usize]) -> Result<ConvGeometry, OpError> {
        let &[batch, ch_in, h, w_] = x else {
            return Err(OpError::ShapeError);
        };
        let &[ch_out, ch_in_per_group, kh, kw] = w else {
            return Err(OpError::ShapeError);
        };
        let group = self.group;

        if group == 0 {
            return Err(invalid!("group must be positive"));
        }
        if ch_in % group != 0 {
            return Err(invalid!("input channels {ch_in} not divisible by group {group}"));
        }
        if ch_out % group != 0 {
            return Err(invalid!("output channels {ch_out} not divisible by group {group}"));
        }
        if ch_in / group != ch_in_per_group {
            return Err(invalid!(
                "weight expects {ch_in_per_group} channels per group, input has {}",
                ch_in / group
            ));
        }
        if [batch, ch_in, h, w_, ch_out, kh, kw].contains(&0) {
            return Err(invalid!("zero-sized dimension in input {x:?} or weight {w:?}"));
        }
        let kernel_shape = [kh, kw];
        if let Some(declared) = self.kernel_shape {
            if declared != kernel_shape {
                return Err(invalid!(
                    "kernel_shape {declared:?} disagrees with weight {w:?}"
                ));
            }
        }
        if self.strides.contains(&0) || self.dilations.contains(&0) {
            return Err(invalid!(
                "strides {:?} and dilations {:?} must be positive",
                self.strides,
                self.dilations
            ));
        }

        let overflow = || {
            invalid!(
                "sizes overflow for input {x:?}, weight {w:?} and pads {:?}",
                self.pads
            )
        };
        let in_shape = [h, w_];
        let mut pads = [0; 4];
        let mut out_shape = [0; 2];
        for (axis, (&len, &k, &s, &d)) in
            izip!(&in_shape, &kernel_shape, &self.strides, &self.dilations).enumerate()
        {
            let span = d
                .checked_mul(k - 1)
                .and_then(|n| n.checked_add(1))
                .ok_or_else(overflow)?;
            let [begin, end] = self.pads_of(axis, len, span, s).ok_or_else(overflow)?;
            let padded = len
                .checked_add(begin)
                .and_then(|n| n.checked_add(end))
                .ok_or_else(overflow)?;
            if padded < span {
                return Err(invalid!(
                    "output size of axis {axis} is not positive: input {x:?}, weight {w:?}"
                ));
            }
            pads[axis] = begin;
            pads[axis + 2] = end;
            out_shape[axis] = (padded - span) / s + 1;
        }
        // every buffer the kernels allocate must be addressable
        let [oh, ow] = out_shape;
        let col = [batch, group, oh, ow, ch_in_per_group, kh, kw];
        let out = [batch, ch_out, oh, ow];
        if checked_product(&col).is_none() || checked_product(&out).is_none() {
            return Err(overflow());
        }

        Ok(ConvGeometry {
            batch,
            group,
            ch_in,
            ch_in_per_group,
            ch_out,
            ch_out_per_group: ch_out / group,
            kernel_shape,
            strides: self.strides,
            pads,
            dilations: self.dilations,
            in_shape,
            out_shape,
        })
    }
}

fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl ConvGeometry {
    pub fn out_area(&self) -> usize {
        let [h, w] = self.out_shape;
        h * w
    }

    /// Length of one im2col row, `ch_in_per_group * kh * kw`.
    pub fn patch_len(&self) -> usize {
        let [kh, kw] = self.kernel_shape;
        self.ch_in_per_group * kh * kw
    }

    pub fn im2col_numel_per_batch(&self) -> usize {
        self.group * self.out_area() * self.patch_len()
    }

    pub fn im2col_numel(&self) -> usize {
        self.batch * self.im2col_numel_per_batch()
    }

    pub fn output_shape(&self) -> [usize; 4] {
        let [h, w] = self.out_shape;
        [self.batch, self.ch_out, h, w]
    }
}

impl Operator for Conv {
    fn infer(&self, inputs: &[TensorMeta], args: Option<&Arg>) -> Result<Vec<TensorMeta>, OpError> {
        let attrs = ConvAttrs::new(args)?;
        let (x, w) = match inputs {
            [x, w] => (x, w),
            [x, w, b] => {
                if b.dt != x.dt {
                    return Err(OpError::DataTypeMismatch);
                }
                (x, w)
            }
            _ => return Err(OpError::ShapeError),
        };
        if x.dt != w.dt {
            return Err(OpError::DataTypeMismatch);
        }

        let geometry = attrs.geometry(x.shape(), w.shape())?;
        if let [_, _, b] = inputs {
            destruct!([ch_out] = b.shape());
            if *ch_out != geometry.ch_out {
                return Err(invalid!(
                    "bias has {ch_out} elements, expected {}",
                    geometry.ch_out
                ));
            }
        }
        Ok(vec![TensorMeta::new(x.dt, geometry.output_shape())])
    }
}
