//! Dense float kernels: GEMM, GEMV, fused batch-norm + ReLU, softmax.
//!
//! Row-major throughout with BLAS-style leading dimensions; these loops are
//! the authoritative semantics even where a vendor BLAS could stand in.

/// `C <- alpha * op(A) * op(B) + beta * C` where `op` is transpose when the
/// corresponding flag is set. `A` is `m x k` (or `k x m` transposed), `B` is
/// `k x n` (or `n x k`), `C` is `m x n`.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    trans_a: bool,
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) {
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for l in 0..k {
                let av = if trans_a { a[l * lda + i] } else { a[i * lda + l] };
                let bv = if trans_b { b[j * ldb + l] } else { b[l * ldb + j] };
                acc += av * bv;
            }
            let out = &mut c[i * ldc + j];
            *out = alpha * acc + beta * *out;
        }
    }
}

/// `y <- A * x` for row-major `A` of shape `m x n`.
pub fn gemv(m: usize, n: usize, a: &[f32], x: &[f32], y: &mut [f32]) {
    for i in 0..m {
        let row = &a[i * n..i * n + n];
        let mut acc = 0.0f32;
        for (av, xv) in row.iter().zip(x) {
            acc += av * xv;
        }
        y[i] = acc;
    }
}

/// Fully-connected layer: `output = op(weights * input + biases)` with an
/// optional fused ReLU.
pub fn innerproduct(
    outputs: usize,
    input: &[f32],
    weights: &[f32],
    biases: &[f32],
    output: &mut [f32],
    relu: bool,
) {
    gemv(outputs, input.len(), weights, input, output);
    for (o, &b) in output.iter_mut().zip(biases) {
        let val = *o + b;
        *o = if relu { val.max(0.0) } else { val };
    }
}

/// Batch normalization with folded means/stddevs, fused ReLU and an
/// optional element-wise residual input:
/// `out = max(0, stddev[c] * (x - mean[c]) + eltwise)`.
pub fn batchnorm(
    channels: usize,
    spatial: usize,
    data: &mut [f32],
    means: &[f32],
    stddevs: &[f32],
    eltwise: Option<&[f32]>,
) {
    debug_assert!(data.len() >= channels * spatial);
    for c in 0..channels {
        let mean = means[c];
        let scale = stddevs[c];
        let row = &mut data[c * spatial..(c + 1) * spatial];
        match eltwise {
            None => {
                for v in row {
                    *v = (scale * (*v - mean)).max(0.0);
                }
            }
            Some(res) => {
                let res_row = &res[c * spatial..(c + 1) * spatial];
                for (v, r) in row.iter_mut().zip(res_row) {
                    *v = (r + scale * (*v - mean)).max(0.0);
                }
            }
        }
    }
}

/// Temperature softmax. Shifts by `max/T` before exponentiating; `input`
/// and `output` must not alias (enforced by distinct borrows).
pub fn softmax(input: &[f32], output: &mut [f32], temperature: f32) {
    debug_assert_eq!(input.len(), output.len());
    let alpha = input
        .iter()
        .fold(f32::NEG_INFINITY, |m, &v| m.max(v))
        / temperature;

    let mut denom = 0.0f32;
    for (o, &x) in output.iter_mut().zip(input) {
        let val = (x / temperature - alpha).exp();
        *o = val;
        denom += val;
    }
    for o in output.iter_mut() {
        *o /= denom;
    }
}
