//! The F(2x2, 3x3) Winograd convolution pipeline.
//!
//! A 3x3 convolution over the 8x8 board is computed as sixteen 4x4-tile
//! GEMMs: filters are pre-transformed once at load (`U = G g G^T`), each
//! input map is transformed per call (`V = B^T d B`), the transformed
//! tensors are multiplied per tile coordinate, and the result is
//! transformed back (`Y = A^T m A`) into 2x2 output tiles.

use crate::kernels::gemm;

pub const WINOGRAD_ALPHA: usize = 4;
pub const WINOGRAD_TILE: usize = WINOGRAD_ALPHA * WINOGRAD_ALPHA;

const BOARD_SIZE: usize = 8;
/// 2x2 output tiles per row/column.
const WTILES: usize = BOARD_SIZE / 2;
/// Output tiles per feature map.
pub const TILES: usize = WTILES * WTILES;

/// Offline filter transform `U = G g G^T` for every (output, channel) pair
/// of a `[outputs, channels, 3, 3]` filter tensor.
///
/// `U` is stored as `U[xi, nu, c, o]` - outputs fastest - so the per-tile
/// GEMM sees a `channels x outputs` matrix it can multiply transposed,
/// putting `outputs` in the rows of the result.
pub fn transform_filter(f: &[f32], outputs: usize, channels: usize) -> Vec<f32> {
    debug_assert_eq!(f.len(), outputs * channels * 9);
    let mut u = vec![0.0f32; WINOGRAD_TILE * outputs * channels];
    let g: [f32; 12] = [
        1.0, 0.0, 0.0, //
        0.5, 0.5, 0.5, //
        0.5, -0.5, 0.5, //
        0.0, 0.0, 1.0,
    ];
    let mut temp = [0.0f32; 12];

    for o in 0..outputs {
        for c in 0..channels {
            let tile = &f[(o * channels + c) * 9..(o * channels + c) * 9 + 9];
            // temp = G * g (4x3)
            for i in 0..4 {
                for j in 0..3 {
                    let mut acc = 0.0f32;
                    for k in 0..3 {
                        acc += g[i * 3 + k] * tile[k * 3 + j];
                    }
                    temp[i * 3 + j] = acc;
                }
            }
            // U = temp * G^T (4x4)
            for xi in 0..4 {
                for nu in 0..4 {
                    let mut acc = 0.0f32;
                    for k in 0..3 {
                        acc += temp[xi * 3 + k] * g[nu * 3 + k];
                    }
                    u[xi * (4 * outputs * channels)
                        + nu * (outputs * channels)
                        + c * outputs
                        + o] = acc;
                }
            }
        }
    }

    u
}

/// Zero-pad a transformed filter tensor up to accelerator tile multiples.
/// The live entries keep their `[xi, nu, c, o]` positions; the rest is 0.
pub fn zeropad_u(
    u: &[f32],
    outputs: usize,
    channels: usize,
    outputs_pad: usize,
    channels_pad: usize,
) -> Vec<f32> {
    let mut padded = vec![0.0f32; WINOGRAD_TILE * outputs_pad * channels_pad];
    for o in 0..outputs {
        for c in 0..channels {
            for xi in 0..WINOGRAD_ALPHA {
                for nu in 0..WINOGRAD_ALPHA {
                    padded[xi * (WINOGRAD_ALPHA * outputs_pad * channels_pad)
                        + nu * (outputs_pad * channels_pad)
                        + c * outputs_pad
                        + o] = u[xi * (WINOGRAD_ALPHA * outputs * channels)
                        + nu * (outputs * channels)
                        + c * outputs
                        + o];
                }
            }
        }
    }
    padded
}

/// Input transform `V = B^T d B` over the sixteen overlapping 4x4 tiles of
/// each channel. Tile origins sit at `(2 by - 1, 2 bx - 1)`; reads outside
/// the board are zero. `V` is laid out `V[xi, nu, c, p]`.
pub fn transform_in(input: &[f32], v: &mut [f32], channels: usize) {
    for ch in 0..channels {
        for block_y in 0..WTILES {
            for block_x in 0..WTILES {
                let yin = 2 * block_y as i32 - 1;
                let xin = 2 * block_x as i32 - 1;

                let mut x = [[0.0f32; WINOGRAD_ALPHA]; WINOGRAD_ALPHA];
                for (i, row) in x.iter_mut().enumerate() {
                    let y = yin + i as i32;
                    if !(0..BOARD_SIZE as i32).contains(&y) {
                        continue;
                    }
                    for (j, cell) in row.iter_mut().enumerate() {
                        let xcol = xin + j as i32;
                        if (0..BOARD_SIZE as i32).contains(&xcol) {
                            *cell = input
                                [ch * BOARD_SIZE * BOARD_SIZE + y as usize * BOARD_SIZE + xcol as usize];
                        }
                    }
                }

                // t1 = B^T x, t2 = t1 B with
                // B = [[ 1,  0,  0,  0],
                //      [ 0,  1, -1,  1],
                //      [-1,  1,  1,  0],
                //      [ 0,  0,  0, -1]]
                let mut t1 = [[0.0f32; 4]; 4];
                for j in 0..4 {
                    t1[0][j] = x[0][j] - x[2][j];
                    t1[1][j] = x[1][j] + x[2][j];
                    t1[2][j] = x[2][j] - x[1][j];
                    t1[3][j] = x[1][j] - x[3][j];
                }
                let mut t2 = [[0.0f32; 4]; 4];
                for i in 0..4 {
                    t2[i][0] = t1[i][0] - t1[i][2];
                    t2[i][1] = t1[i][1] + t1[i][2];
                    t2[i][2] = t1[i][2] - t1[i][1];
                    t2[i][3] = t1[i][1] - t1[i][3];
                }

                let offset = ch * TILES + block_y * WTILES + block_x;
                for i in 0..WINOGRAD_ALPHA {
                    for j in 0..WINOGRAD_ALPHA {
                        v[(i * WINOGRAD_ALPHA + j) * channels * TILES + offset] = t2[i][j];
                    }
                }
            }
        }
    }
}

/// One GEMM per tile coordinate: `M[b] = U[b]^T V[b]`, leaving `outputs`
/// as the row dimension of each `M` slice.
pub fn winograd_gemm(u: &[f32], v: &[f32], m: &mut [f32], channels: usize, outputs: usize) {
    for b in 0..WINOGRAD_TILE {
        let off_u = b * outputs * channels;
        let off_v = b * channels * TILES;
        let off_m = b * outputs * TILES;
        gemm(
            true,
            false,
            outputs,
            TILES,
            channels,
            1.0,
            &u[off_u..off_u + outputs * channels],
            outputs,
            &v[off_v..off_v + channels * TILES],
            TILES,
            0.0,
            &mut m[off_m..off_m + outputs * TILES],
            TILES,
        );
    }
}

/// Output transform `Y = A^T m A`, writing each 2x2 tile at `(2 by, 2 bx)`
/// and skipping pixels past the board edge.
pub fn transform_out(m: &[f32], y: &mut [f32], outputs: usize) {
    for k in 0..outputs {
        for block_y in 0..WTILES {
            for block_x in 0..WTILES {
                let b = block_y * WTILES + block_x;
                let mut tile = [0.0f32; WINOGRAD_TILE];
                for (xi, row) in tile.chunks_mut(WINOGRAD_ALPHA).enumerate() {
                    for (nu, cell) in row.iter_mut().enumerate() {
                        *cell = m[xi * (WINOGRAD_ALPHA * outputs * TILES)
                            + nu * (outputs * TILES)
                            + k * TILES
                            + b];
                    }
                }

                // A = [[1,  0],
                //      [1,  1],
                //      [1, -1],
                //      [0, -1]]
                let o11 = tile[0] + tile[1] + tile[2] //
                    + tile[4] + tile[5] + tile[6]
                    + tile[8] + tile[9] + tile[10];
                let o12 = tile[1] - tile[2] - tile[3] //
                    + tile[5] - tile[6] - tile[7]
                    + tile[9] - tile[10] - tile[11];
                let o21 = tile[4] + tile[5] + tile[6] //
                    - tile[8] - tile[9] - tile[10]
                    - tile[12] - tile[13] - tile[14];
                let o22 = tile[5] - tile[6] - tile[7] //
                    - tile[9] + tile[10] + tile[11]
                    - tile[13] + tile[14] + tile[15];

                let row = 2 * block_y;
                let col = 2 * block_x;
                y[k * BOARD_SIZE * BOARD_SIZE + row * BOARD_SIZE + col] = o11;
                if col + 1 < BOARD_SIZE {
                    y[k * BOARD_SIZE * BOARD_SIZE + row * BOARD_SIZE + col + 1] = o12;
                }
                if row + 1 < BOARD_SIZE {
                    y[k * BOARD_SIZE * BOARD_SIZE + (row + 1) * BOARD_SIZE + col] = o21;
                    if col + 1 < BOARD_SIZE {
                        y[k * BOARD_SIZE * BOARD_SIZE + (row + 1) * BOARD_SIZE + col + 1] = o22;
                    }
                }
            }
        }
    }
}

/// Full 3x3 convolution of `input` with the pre-transformed filter `u`.
/// `v` and `m` are caller-owned scratch sized for the largest layer.
pub fn convolve3(
    outputs: usize,
    input: &[f32],
    u: &[f32],
    v: &mut [f32],
    m: &mut [f32],
    output: &mut [f32],
) {
    let channels = u.len() / (outputs * WINOGRAD_TILE);
    transform_in(input, v, channels);
    winograd_gemm(u, v, m, channels, outputs);
    transform_out(m, output, outputs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Direct 3x3 convolution with zero padding, the semantics Winograd
    /// must reproduce.
    fn conv3x3_direct(input: &[f32], channels: usize, outputs: usize, filters: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; outputs * 64];
        for o in 0..outputs {
            for row in 0..8i32 {
                for col in 0..8i32 {
                    let mut acc = 0.0f32;
                    for c in 0..channels {
                        for dr in -1..=1i32 {
                            for dc in -1..=1i32 {
                                let r = row + dr;
                                let f = col + dc;
                                if !(0..8).contains(&r) || !(0..8).contains(&f) {
                                    continue;
                                }
                                let w = filters[(o * channels + c) * 9
                                    + (dr + 1) as usize * 3
                                    + (dc + 1) as usize];
                                acc += w * input[c * 64 + r as usize * 8 + f as usize];
                            }
                        }
                    }
                    out[o * 64 + row as usize * 8 + col as usize] = acc;
                }
            }
        }
        out
    }

    fn random_buffer(rng: &mut ChaCha8Rng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn winograd_matches_direct_convolution() {
        let (channels, outputs) = (2usize, 4usize);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let filters = random_buffer(&mut rng, outputs * channels * 9);
        let input = random_buffer(&mut rng, channels * 64);

        let u = transform_filter(&filters, outputs, channels);
        let mut v = vec![0.0f32; WINOGRAD_TILE * channels * TILES];
        let mut m = vec![0.0f32; WINOGRAD_TILE * outputs * TILES];
        let mut y = vec![0.0f32; outputs * 64];
        convolve3(outputs, &input, &u, &mut v, &mut m, &mut y);

        let reference = conv3x3_direct(&input, channels, outputs, &filters);
        for (i, (&got, &want)) in y.iter().zip(&reference).enumerate() {
            let denom = want.abs().max(1.0);
            assert!(
                (got - want).abs() / denom < 1e-4,
                "pixel {}: winograd {} direct {}",
                i,
                got,
                want
            );
        }
    }

    #[test]
    fn identity_filter_passes_input_through() {
        // One channel, one output, center tap 1.0.
        let mut filters = vec![0.0f32; 9];
        filters[4] = 1.0;
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let input = random_buffer(&mut rng, 64);

        let u = transform_filter(&filters, 1, 1);
        let mut v = vec![0.0f32; WINOGRAD_TILE * TILES];
        let mut m = vec![0.0f32; WINOGRAD_TILE * TILES];
        let mut y = vec![0.0f32; 64];
        convolve3(1, &input, &u, &mut v, &mut m, &mut y);

        for (got, want) in y.iter().zip(&input) {
            assert!((got - want).abs() < 1e-5);
        }
    }

    #[test]
    fn zeropad_keeps_live_entries_and_zeroes_the_rest() {
        let (channels, outputs) = (3usize, 2usize);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let filters = random_buffer(&mut rng, outputs * channels * 9);
        let u = transform_filter(&filters, outputs, channels);
        let (outputs_pad, channels_pad) = (8usize, 4usize);
        let padded = zeropad_u(&u, outputs, channels, outputs_pad, channels_pad);

        let mut live_sum = 0.0f32;
        for xi in 0..WINOGRAD_ALPHA {
            for nu in 0..WINOGRAD_ALPHA {
                for c in 0..channels_pad {
                    for o in 0..outputs_pad {
                        let pv = padded[xi * (WINOGRAD_ALPHA * outputs_pad * channels_pad)
                            + nu * (outputs_pad * channels_pad)
                            + c * outputs_pad
                            + o];
                        if c < channels && o < outputs {
                            let uv = u[xi * (WINOGRAD_ALPHA * outputs * channels)
                                + nu * (outputs * channels)
                                + c * outputs
                                + o];
                            assert_eq!(pv, uv);
                            live_sum += pv.abs();
                        } else {
                            assert_eq!(pv, 0.0);
                        }
                    }
                }
            }
        }
        assert!(live_sum > 0.0, "transform produced a nonzero tensor");
    }
}
