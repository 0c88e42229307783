//! im2col convolution kernels over flat `f32` buffers.

use itertools::{iproduct, izip};
use nn::ConvGeometry;

/// Number of elements the matmul result of `batch` samples occupies.
pub(super) fn matmul_numel(geo: &ConvGeometry, batch: usize) -> usize {
    geo.group * batch * geo.out_area() * geo.ch_out_per_group
}

/// Gathers every receptive field of `x` into one row of `col`, zero for taps
/// that fall into the padding.
pub(super) fn im2col(x: &[f32], col: &mut [f32], geo: &ConvGeometry, batch: usize) {
    let &ConvGeometry {
        group,
        ch_in,
        ch_in_per_group,
        kernel_shape: [kh, kw],
        strides: [sy, sx],
        pads: [pt, pl, _, _],
        dilations: [dy, dx],
        in_shape: [h, w],
        out_shape: [oh, ow],
        ..
    } = geo;
    debug_assert_eq!(x.len(), batch * ch_in * h * w);
    debug_assert_eq!(col.len(), batch * geo.im2col_numel_per_batch());

    let rows = iproduct!(0..group, 0..batch, 0..oh, 0..ow);
    for ((g, b, oy, ox), row) in rows.zip(col.chunks_exact_mut(geo.patch_len())) {
        let taps = iproduct!(0..ch_in_per_group, 0..kh, 0..kw);
        for ((ci, ky, kx), v) in taps.zip(row) {
            let iy = (oy * sy + ky * dy).checked_sub(pt).filter(|&iy| iy < h);
            let ix = (ox * sx + kx * dx).checked_sub(pl).filter(|&ix| ix < w);
            *v = match (iy, ix) {
                (Some(iy), Some(ix)) => x[((b * ch_in + g * ch_in_per_group + ci) * h + iy) * w + ix],
                _ => 0.,
            }
        }
    }
}

/// `y[g] = col[g] · w[g]ᵀ` for every group.
///
/// Per group `col` is `m × k`, `w` is `n × k` and `y` is `m × n`, where
/// `m = batch * out_h * out_w`, `k = ch_in_per_group * kh * kw` and
/// `n = ch_out_per_group`.
pub(super) fn matmul(col: &[f32], w: &[f32], y: &mut [f32], geo: &ConvGeometry, batch: usize) {
    let m = batch * geo.out_area();
    let k = geo.patch_len();
    let n = geo.ch_out_per_group;
    debug_assert_eq!(col.len(), geo.group * m * k);
    debug_assert_eq!(w.len(), geo.group * n * k);
    debug_assert_eq!(y.len(), geo.group * m * n);

    for (col, w, y) in izip!(
        col.chunks_exact(m * k),
        w.chunks_exact(n * k),
        y.chunks_exact_mut(m * n),
    ) {
        for (a, y) in col.chunks_exact(k).zip(y.chunks_exact_mut(n)) {
            for (b, y) in w.chunks_exact(k).zip(y) {
                *y = a.iter().zip(b).map(|(a, b)| a * b).sum()
            }
        }
    }
}

/// `(group, batch, area, c)` to `(batch, group, c, area)`.
pub(super) fn transpose(t: &[f32], y: &mut [f32], geo: &ConvGeometry, batch: usize) {
    let group = geo.group;
    let area = geo.out_area();
    let c = geo.ch_out_per_group;
    debug_assert_eq!(t.len(), y.len());

    let dst = iproduct!(0..batch, 0..group, 0..c, 0..area);
    for ((b, g, c_, a), y) in dst.zip(y) {
        *y = t[((g * batch + b) * area + a) * c + c_]
    }
}

/// Adds `bias[c]` to every element of channel `c` of an `(n, ch_out, area)` buffer.
pub(super) fn bias(bias: &[f32], y: &mut [f32], area: usize) {
    debug_assert_eq!(y.len() % (bias.len() * area), 0);

    for (plane, &b) in y.chunks_exact_mut(area).zip(bias.iter().cycle()) {
        plane.iter_mut().for_each(|y| *y += b)
    }
}
