use super::{CpuContext, CpuConv, CpuOperator, registry};
use crate::{Backend, CpuConfig, ExecError};
use mem::Tensor;
use nn::{Arg, ConvAttrs, GeometryProvider, OpError};
use pollster::block_on;
use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

fn tensor(dims: &[usize], data: Vec<f32>) -> Tensor {
    Tensor::from_vec(dims.to_vec(), data).unwrap()
}

fn ones(dims: &[usize]) -> Tensor {
    tensor(dims, vec![1.; dims.iter().product()])
}

fn random(dims: &[usize], seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..dims.iter().product::<usize>())
        .map(|_| rng.random_range(-1.0..1.0))
        .collect();
    tensor(dims, data)
}

fn values(t: &Tensor) -> &[f32] {
    t.data::<f32>().unwrap()
}

fn ctx(im2col_numel_limit: usize) -> CpuContext {
    CpuContext::new(CpuConfig { im2col_numel_limit })
}

fn conv(attrs: &ConvAttrs, ctx: &CpuContext, inputs: &[&Tensor]) -> Result<Tensor, ExecError> {
    let mut ys = block_on(CpuConv::new(attrs.clone()).run(ctx, inputs))?;
    assert_eq!(ys.len(), 1);
    Ok(ys.pop().unwrap())
}

/// Direct definition of the convolution, one dot product per output element.
fn reference(attrs: &ConvAttrs, x: &Tensor, w: &Tensor, b: Option<&Tensor>) -> Vec<f32> {
    let geo = attrs.geometry(x.dims(), w.dims()).unwrap();
    let [n, c_out, oh, ow] = geo.output_shape();
    let [h, w_] = geo.in_shape;
    let [kh, kw] = geo.kernel_shape;
    let (xs, ws) = (values(x), values(w));

    let mut ans = Vec::with_capacity(n * c_out * oh * ow);
    for b_ in 0..n {
        for co in 0..c_out {
            let g = co / geo.ch_out_per_group;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut sum = b.map_or(0., |b| values(b)[co]);
                    for ci in 0..geo.ch_in_per_group {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iy = (oy * geo.strides[0] + ky * geo.dilations[0]) as isize
                                    - geo.pads[0] as isize;
                                let ix = (ox * geo.strides[1] + kx * geo.dilations[1]) as isize
                                    - geo.pads[1] as isize;
                                if iy < 0 || ix < 0 || iy as usize >= h || ix as usize >= w_ {
                                    continue;
                                }
                                let c = g * geo.ch_in_per_group + ci;
                                let xv = xs[((b_ * geo.ch_in + c) * h + iy as usize) * w_ + ix as usize];
                                let wv = ws[((co * geo.ch_in_per_group + ci) * kh + ky) * kw + kx];
                                sum += xv * wv;
                            }
                        }
                    }
                    ans.push(sum)
                }
            }
        }
    }
    ans
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= 1e-4, "element {i}: {a} != {e}");
    }
}

#[test]
fn test_ones() {
    let x = ones(&[2, 1, 3, 3]);
    let w = ones(&[1, 1, 2, 2]);
    let y = conv(&ConvAttrs::default(), &CpuContext::default(), &[&x, &w]).unwrap();
    assert_eq!(y.dims(), [2, 1, 2, 2]);
    assert!(values(&y).iter().all(|&v| v == 4.));
}

#[test]
fn test_ones_padded() {
    let attrs = ConvAttrs::new(Some(&Arg::dict([("pads", Arg::arr([1, 1].map(Arg::int)))]))).unwrap();
    let x = ones(&[2, 1, 3, 3]);
    let w = ones(&[1, 1, 2, 2]);
    let y = conv(&attrs, &CpuContext::default(), &[&x, &w]).unwrap();
    assert_eq!(y.dims(), [2, 1, 4, 4]);
    #[rustfmt::skip]
    let plane: [f32; 16] = [
        1., 2., 2., 1.,
        2., 4., 4., 2.,
        2., 4., 4., 2.,
        1., 2., 2., 1.,
    ];
    assert_eq!(values(&y), [plane, plane].concat());
}

#[test]
fn test_against_reference() {
    let cases = [
        (ConvAttrs::default(), [2usize, 3, 7, 6], [4usize, 3, 3, 3]),
        (
            ConvAttrs {
                strides: [2, 1],
                pads: [1, 0, 2, 1],
                ..Default::default()
            },
            [1, 2, 8, 5],
            [3, 2, 3, 2],
        ),
        (
            ConvAttrs {
                dilations: [2, 3],
                pads: [2; 4],
                ..Default::default()
            },
            [2, 1, 6, 7],
            [2, 1, 3, 2],
        ),
        (
            ConvAttrs {
                group: 3,
                strides: [2; 2],
                pads: [1; 4],
                ..Default::default()
            },
            [2, 6, 5, 5],
            [9, 2, 3, 3],
        ),
    ];
    for (seed, (attrs, x_dims, w_dims)) in cases.into_iter().enumerate() {
        let seed = seed as u64 * 3;
        let x = random(&x_dims, seed);
        let w = random(&w_dims, seed + 1);
        let b = random(&[w_dims[0]], seed + 2);
        let y = conv(&attrs, &CpuContext::default(), &[&x, &w, &b]).unwrap();
        assert_eq!(y.dims(), attrs.geometry(&x_dims, &w_dims).unwrap().output_shape());
        assert_close(values(&y), &reference(&attrs, &x, &w, Some(&b)));
    }
}

#[test]
fn test_zero_padding() {
    let attrs = ConvAttrs {
        pads: [1, 2, 1, 2],
        ..Default::default()
    };
    let x = random(&[2, 2, 4, 5], 7);
    let w = random(&[3, 2, 3, 3], 8);

    let mut padded = vec![0.; 2 * 2 * 6 * 9];
    for (src, dst) in values(&x).chunks_exact(5).zip(
        padded
            .chunks_exact_mut(9 * 6)
            .flat_map(|plane| plane.chunks_exact_mut(9).skip(1).take(4)),
    ) {
        dst[2..7].copy_from_slice(src)
    }
    let padded = tensor(&[2, 2, 6, 9], padded);

    let ctx = CpuContext::default();
    let y = conv(&attrs, &ctx, &[&x, &w]).unwrap();
    let y_explicit = conv(&ConvAttrs::default(), &ctx, &[&padded, &w]).unwrap();
    assert_eq!(y.dims(), y_explicit.dims());
    assert_eq!(values(&y), values(&y_explicit));
}

#[test]
fn test_group_independence() {
    let attrs = ConvAttrs {
        group: 2,
        pads: [1; 4],
        ..Default::default()
    };
    let ctx = CpuContext::default();
    let x = random(&[2, 4, 5, 5], 11);
    let w = random(&[4, 2, 3, 3], 12);
    let y = conv(&attrs, &ctx, &[&x, &w]).unwrap();

    // output channels 2..4 and input channels 2..4 belong to group 1
    let group1 = |t: &Tensor, len: usize, seed| {
        let mut data = values(t).to_vec();
        let other = random(t.dims(), seed);
        for (dst, src) in data
            .chunks_exact_mut(len)
            .zip(values(&other).chunks_exact(len))
            .skip(1)
            .step_by(2)
        {
            dst.copy_from_slice(src)
        }
        tensor(t.dims(), data)
    };
    let w1 = group1(&w, 2 * 2 * 3 * 3, 13);
    let x1 = group1(&x, 2 * 5 * 5, 14);
    let y_w = conv(&attrs, &ctx, &[&x, &w1]).unwrap();
    let y_x = conv(&attrs, &ctx, &[&x1, &w]).unwrap();

    let half = 2 * 5 * 5;
    for (i, ((a, b), c)) in values(&y)
        .chunks_exact(half)
        .zip(values(&y_w).chunks_exact(half))
        .zip(values(&y_x).chunks_exact(half))
        .enumerate()
    {
        if i % 2 == 0 {
            assert_eq!(a, b);
            assert_eq!(a, c);
        } else {
            assert_ne!(a, b);
            assert_ne!(a, c);
        }
    }
}

#[test]
fn test_bias() {
    let ctx = CpuContext::default();
    let x = random(&[2, 2, 4, 4], 21);
    let w = random(&[3, 2, 2, 2], 22);
    let bias = [0., 2.5, -0.75];
    let b = tensor(&[3], bias.to_vec());

    let attrs = ConvAttrs::default();
    let y = conv(&attrs, &ctx, &[&x, &w]).unwrap();
    let y_b = conv(&attrs, &ctx, &[&x, &w, &b]).unwrap();
    for ((plane, plane_b), &c) in values(&y)
        .chunks_exact(9)
        .zip(values(&y_b).chunks_exact(9))
        .zip(bias.iter().cycle())
    {
        for (&v, &v_b) in plane.iter().zip(plane_b) {
            assert_eq!(v_b, v + c)
        }
    }
}

#[test]
fn test_split_batch() {
    let attrs = ConvAttrs {
        pads: [1; 4],
        strides: [2; 2],
        ..Default::default()
    };
    let x = random(&[5, 3, 6, 6], 31);
    let w = random(&[4, 3, 3, 3], 32);
    let b = random(&[4], 33);
    let geo = attrs.geometry(x.dims(), w.dims()).unwrap();

    let single = conv(&attrs, &CpuContext::default(), &[&x, &w, &b]).unwrap();
    for chunk in 1..5 {
        let ctx = ctx(geo.im2col_numel_per_batch() * chunk + chunk - 1);
        let split = conv(&attrs, &ctx, &[&x, &w, &b]).unwrap();
        assert_eq!(split.dims(), single.dims());
        assert_eq!(values(&split), values(&single));
    }
}

#[test]
fn test_split_threshold() {
    let attrs = ConvAttrs {
        group: 2,
        ..Default::default()
    };
    let x = random(&[3, 4, 4, 4], 41);
    let w = random(&[2, 2, 2, 2], 42);
    let numel = attrs.geometry(x.dims(), w.dims()).unwrap().im2col_numel();

    assert!(conv(&attrs, &ctx(numel), &[&x, &w]).is_ok());
    assert!(matches!(
        conv(&attrs, &ctx(numel - 1), &[&x, &w]),
        Err(ExecError::UnsupportedGroupedSplit)
    ));
}

#[test]
fn test_buffer_too_large() {
    let x = ones(&[2, 1, 3, 3]);
    let w = ones(&[1, 1, 2, 2]);
    let err = conv(&ConvAttrs::default(), &ctx(1), &[&x, &w]).unwrap_err();
    let msg = err.to_string();
    match err {
        ExecError::BufferTooLarge { input, weight } => {
            assert_eq!(input, [2, 1, 3, 3]);
            assert_eq!(weight, [1, 1, 2, 2]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(msg.contains("[2, 1, 3, 3]"), "{msg}");
    assert!(msg.contains("[1, 1, 2, 2]"), "{msg}");
}

#[test]
fn test_rejects() {
    let ctx = CpuContext::default();
    let attrs = ConvAttrs::default();
    let w = ones(&[1, 1, 2, 2]);
    for dims in [&[1, 3, 3][..], &[1, 1, 3, 3, 3]] {
        let x = ones(dims);
        assert!(matches!(
            conv(&attrs, &ctx, &[&x, &w]),
            Err(ExecError::UnsupportedRank { name: "input", rank }) if rank == dims.len()
        ));
    }

    let x = ones(&[1, 1, 4, 4]);
    for dims in [&[1, 2, 2][..], &[1, 1, 1, 2, 2]] {
        assert!(matches!(
            conv(&attrs, &ctx, &[&x, &ones(dims)]),
            Err(ExecError::UnsupportedRank { name: "weight", rank }) if rank == dims.len()
        ));
    }

    for bad in [
        ConvAttrs {
            group: 0,
            ..Default::default()
        },
        ConvAttrs {
            strides: [1, 0],
            ..Default::default()
        },
        ConvAttrs {
            dilations: [0, 1],
            ..Default::default()
        },
        ConvAttrs {
            pads: [i64::MAX as usize; 4],
            ..Default::default()
        },
    ] {
        assert!(matches!(
            conv(&bad, &ctx, &[&x, &w]),
            Err(ExecError::Op(OpError::InvalidGeometry(_)))
        ));
    }
    for (x_dims, w_dims) in [([0usize, 1, 4, 4], [1usize, 1, 2, 2]), ([1, 1, 4, 4], [1, 1, 0, 2])] {
        assert!(matches!(
            conv(&attrs, &ctx, &[&ones(&x_dims), &ones(&w_dims)]),
            Err(ExecError::Op(OpError::InvalidGeometry(_)))
        ));
    }

    let x = ones(&[1, 3, 4, 4]);
    let grouped = ConvAttrs {
        group: 2,
        ..Default::default()
    };
    assert!(matches!(
        conv(&grouped, &ctx, &[&x, &ones(&[2, 1, 2, 2])]),
        Err(ExecError::Op(OpError::InvalidGeometry(_)))
    ));
    let x = ones(&[1, 1, 4, 4]);
    assert!(matches!(
        conv(&attrs, &ctx, &[&x, &w, &ones(&[2])]),
        Err(ExecError::Op(OpError::InvalidGeometry(_)))
    ));
    assert!(matches!(
        conv(&attrs, &ctx, &[&x]),
        Err(ExecError::InputCount { found: 1, .. })
    ));
    let x64 = Tensor::from_vec(vec![1, 1, 4, 4], vec![1f64; 16]).unwrap();
    assert!(matches!(
        conv(&attrs, &ctx, &[&x64, &w]),
        Err(ExecError::UnsupportedDataType("input"))
    ));
    let w64 = Tensor::from_vec(vec![1, 1, 2, 2], vec![1f64; 4]).unwrap();
    assert!(matches!(
        conv(&attrs, &ctx, &[&x, &w64]),
        Err(ExecError::UnsupportedDataType("weight"))
    ));
    let b64 = Tensor::from_vec(vec![1], vec![1i64]).unwrap();
    assert!(matches!(
        conv(&attrs, &ctx, &[&x, &w, &b64]),
        Err(ExecError::UnsupportedDataType("bias"))
    ));
}

#[test]
fn test_registry() {
    let registry = registry();
    assert!(registry.lookup("Conv", Backend::Cpu, 0).is_none());
    assert!(registry.lookup("Reshape", Backend::Cpu, 13).is_none());

    let mut op = registry.create("Conv", Backend::Cpu, 13).unwrap();
    let args = Arg::dict([("pads", Arg::arr([1, 1, 1, 1].map(Arg::int)))]);
    op.initialize(Some(&args)).unwrap();
    let x = ones(&[2, 1, 3, 3]);
    let w = ones(&[1, 1, 2, 2]);
    let ys = block_on(op.run(&CpuContext::default(), &[&x, &w])).unwrap();
    assert_eq!(ys.len(), 1);
    assert_eq!(ys[0].dims(), [2, 1, 4, 4]);

    assert!(matches!(
        op.initialize(Some(&Arg::dict([("strides", Arg::int(2))]))),
        Err(ExecError::Op(OpError::ArgError(_)))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn split_matches_single_pass(
        n in 2usize..6,
        c_in in 1usize..4,
        c_out in 1usize..4,
        h in 3usize..8,
        w in 3usize..8,
        k in 1usize..4,
        s in 1usize..3,
        p in 0usize..2,
        chunk in 1usize..6,
        seed in any::<u64>(),
    ) {
        prop_assume!(chunk < n);
        let attrs = ConvAttrs {
            strides: [s; 2],
            pads: [p; 4],
            ..Default::default()
        };
        let x = random(&[n, c_in, h, w], seed);
        let wt = random(&[c_out, c_in, k, k], seed ^ 1);
        let b = random(&[c_out], seed ^ 2);
        let geo = attrs.geometry(x.dims(), wt.dims()).unwrap();

        let single = conv(&attrs, &CpuContext::default(), &[&x, &wt, &b]).unwrap();
        let split = conv(&attrs, &ctx(geo.im2col_numel_per_batch() * chunk), &[&x, &wt, &b]).unwrap();
        prop_assert_eq!(split.dims(), single.dims());
        prop_assert_eq!(values(&split), values(&single));
    }
}
