//! F(2,3) domain transforms, padding and unpadding.
//!
//! ```text
//!   U = G g Gᵀ     G  = [[1, 0, 0], [-½, ½, -½], [-½, -½, -½], [0, 0, -1]]
//!   V = Bᵀ d B     Bᵀ = [[1, 0, -1, 0], [0, 1, -1, 0], [0, -1, -1, 0], [0, 1, 0, -1]]
//!   Y = Aᵀ M A     Aᵀ = [[1, 1, 1, 0], [0, -1, 1, 1]]
//! ```
//!
//! Tap `t` of a 4×4 tile is element `(t / 4, t % 4)`.

use super::{WinogradPlan, IN_TILE, OUT_TILE, TILE_AREA};

const BT: [[f32; 4]; 4] = [
    [1.0, 0.0, -1.0, 0.0],
    [0.0, 1.0, -1.0, 0.0],
    [0.0, -1.0, -1.0, 0.0],
    [0.0, 1.0, 0.0, -1.0],
];

const AT: [[f32; 4]; 2] = [[1.0, 1.0, 1.0, 0.0], [0.0, -1.0, 1.0, 1.0]];

/// The 16 taps of `G g Gᵀ` for one 3×3 kernel `g` (row-major).
pub fn filter_taps(g: &[f32]) -> [f32; TILE_AREA] {
    let mut s = [0.0f32; TILE_AREA];
    s[0] = g[0];
    s[1] = (-g[0] + g[1] - g[2]) * 0.5;
    s[2] = (-g[0] - g[1] - g[2]) * 0.5;
    s[3] = -g[2];
    s[4] = (-g[0] + g[3] - g[6]) * 0.5;
    s[5] = (g[0] - g[1] + g[2] - g[3] + g[4] - g[5] + g[6] - g[7] + g[8]) * 0.25;
    s[6] = (g[0] + g[1] + g[2] - g[3] - g[4] - g[5] + g[6] + g[7] + g[8]) * 0.25;
    s[7] = (g[2] - g[5] + g[8]) * 0.5;
    s[8] = (-g[0] - g[3] - g[6]) * 0.5;
    s[9] = (g[0] - g[1] + g[2] + g[3] - g[4] + g[5] + g[6] - g[7] + g[8]) * 0.25;
    s[10] = (g[0] + g[1] + g[2] + g[3] + g[4] + g[5] + g[6] + g[7] + g[8]) * 0.25;
    s[11] = (g[2] + g[5] + g[8]) * 0.5;
    s[12] = -g[6];
    s[13] = (g[6] - g[7] + g[8]) * 0.5;
    s[14] = (g[6] + g[7] + g[8]) * 0.5;
    s[15] = g[8];
    s
}

/// Filter `[M][C][3][3]` → `[16][M][C]`.
pub fn transform_filter(filter: &[f32], filters: usize, channels: usize, out: &mut [f32]) {
    let plane = filters * channels;
    for m in 0..filters {
        for c in 0..channels {
            let base = (m * channels + c) * 9;
            let taps = filter_taps(&filter[base..base + 9]);
            for (t, v) in taps.iter().enumerate() {
                out[t * plane + m * channels + c] = *v;
            }
        }
    }
}

/// `Bᵀ d B` for one 4×4 tile.
pub fn input_tile(d: &[[f32; 4]; 4]) -> [f32; TILE_AREA] {
    let mut tmp = [[0.0f32; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            tmp[i][j] = (0..4).map(|k| BT[i][k] * d[k][j]).sum();
        }
    }
    let mut v = [0.0f32; TILE_AREA];
    for i in 0..4 {
        for j in 0..4 {
            v[i * 4 + j] = (0..4).map(|k| tmp[i][k] * BT[j][k]).sum();
        }
    }
    v
}

/// `Aᵀ M A` for one tile of products.
pub fn output_tile(mt: &[f32; TILE_AREA]) -> [[f32; 2]; 2] {
    let mut tmp = [[0.0f32; 4]; 2];
    for i in 0..2 {
        for j in 0..4 {
            tmp[i][j] = (0..4).map(|k| AT[i][k] * mt[k * 4 + j]).sum();
        }
    }
    let mut y = [[0.0f32; 2]; 2];
    for i in 0..2 {
        for j in 0..2 {
            y[i][j] = (0..4).map(|k| tmp[i][k] * AT[j][k]).sum();
        }
    }
    y
}

/// Copy `[batch][C][H][W]` into the top-left of the zeroed padded planes.
pub fn pad_input(input: &[f32], plan: &WinogradPlan, out: &mut [f32]) {
    let (h, w) = (plan.in_h, plan.in_w);
    let (ph, pw) = (plan.padded_in_h, plan.padded_in_w);
    for plane in 0..plan.batch * plan.channels {
        for y in 0..h {
            let src = &input[(plane * h + y) * w..][..w];
            out[(plane * ph + y) * pw..][..w].copy_from_slice(src);
        }
    }
}

/// Padded input → `[batch][16][C][T]`, sixteen tiles per vector on
/// AVX-512 hosts.
pub fn transform_input(padded: &[f32], plan: &WinogradPlan, out: &mut [f32]) {
    #[cfg(target_arch = "x86_64")]
    if crate::isa::has_avx512() {
        // SAFETY: AVX-512F checked above; buffer extents follow the plan.
        unsafe { avx512::transform_input(padded, plan, out) };
        return;
    }
    transform_input_scalar(padded, plan, out);
}

/// Portable form of [`transform_input`].
pub fn transform_input_scalar(padded: &[f32], plan: &WinogradPlan, out: &mut [f32]) {
    let (ph, pw) = (plan.padded_in_h, plan.padded_in_w);
    let (c_n, t_n) = (plan.channels, plan.tile_count);
    let tiles_w = plan.padded_out_w / OUT_TILE;
    for n in 0..plan.batch {
        for c in 0..c_n {
            let src = &padded[(n * c_n + c) * ph * pw..][..ph * pw];
            for tile in 0..t_n {
                let (y0, x0) = ((tile / tiles_w) * OUT_TILE, (tile % tiles_w) * OUT_TILE);
                let mut d = [[0.0f32; 4]; 4];
                for (r, row) in d.iter_mut().enumerate() {
                    row.copy_from_slice(&src[(y0 + r) * pw + x0..][..IN_TILE]);
                }
                let v = input_tile(&d);
                for (t, val) in v.iter().enumerate() {
                    out[((n * TILE_AREA + t) * c_n + c) * t_n + tile] = *val;
                }
            }
        }
    }
}

/// Products `[batch][16][M][T]` → padded output `[batch][M][PH][PW]`.
pub fn transform_output(product: &[f32], plan: &WinogradPlan, out: &mut [f32]) {
    let (m_n, t_n) = (plan.filters, plan.tile_count);
    let (oh, ow) = (plan.padded_out_h, plan.padded_out_w);
    let tiles_w = ow / OUT_TILE;
    for n in 0..plan.batch {
        for m in 0..m_n {
            let dst = &mut out[(n * m_n + m) * oh * ow..][..oh * ow];
            for tile in 0..t_n {
                let mut mt = [0.0f32; TILE_AREA];
                for (t, v) in mt.iter_mut().enumerate() {
                    *v = product[((n * TILE_AREA + t) * m_n + m) * t_n + tile];
                }
                let y = output_tile(&mt);
                let (y0, x0) = ((tile / tiles_w) * OUT_TILE, (tile % tiles_w) * OUT_TILE);
                for (r, row) in y.iter().enumerate() {
                    dst[(y0 + r) * ow + x0..][..OUT_TILE].copy_from_slice(row);
                }
            }
        }
    }
}

/// Crop the padded output to `[batch][M][P][Q]`.
pub fn unpad_output(padded: &[f32], plan: &WinogradPlan, out: &mut [f32]) {
    let (ph, pw) = (plan.padded_out_h, plan.padded_out_w);
    let (oh, ow) = (plan.out_h, plan.out_w);
    for plane in 0..plan.batch * plan.filters {
        for y in 0..oh {
            out[(plane * oh + y) * ow..][..ow].copy_from_slice(&padded[(plane * ph + y) * pw..][..ow]);
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod avx512 {
    use std::arch::x86_64::*;

    use super::{WinogradPlan, OUT_TILE, TILE_AREA};
    use crate::gemm::kernels::gather_col;

    const LANES: usize = 16;

    /// `Bᵀ d B` with lane `i` holding tile `tile + i`. Every entry of `Bᵀ`
    /// is 0 or ±1, so both passes are adds and subtracts.
    #[target_feature(enable = "avx512f")]
    pub(super) unsafe fn transform_input(padded: &[f32], plan: &WinogradPlan, out: &mut [f32]) {
        let (ph, pw) = (plan.padded_in_h, plan.padded_in_w);
        let (c_n, t_n) = (plan.channels, plan.tile_count);
        let tiles_w = plan.padded_out_w / OUT_TILE;
        let y = out.as_mut_ptr();
        let zero = _mm512_setzero_ps();
        let mut origin = [0i32; LANES];

        for tile in (0..t_n).step_by(LANES) {
            let lanes = (t_n - tile).min(LANES);
            let mask: __mmask16 = if lanes == LANES { 0xFFFF } else { (1u16 << lanes) - 1 };
            for (i, o) in origin.iter_mut().enumerate() {
                let t = tile + i.min(lanes - 1);
                *o = ((t / tiles_w) * OUT_TILE * pw + (t % tiles_w) * OUT_TILE) as i32;
            }
            let origin_v = _mm512_loadu_si512(origin.as_ptr().cast());

            for n in 0..plan.batch {
                for c in 0..c_n {
                    let src = padded[(n * c_n + c) * ph * pw..].as_ptr();
                    let mut d = [[zero; 4]; 4];
                    for (r, row) in d.iter_mut().enumerate() {
                        for (s, v) in row.iter_mut().enumerate() {
                            *v = gather_col(src.add(r * pw + s), origin_v, mask);
                        }
                    }

                    let mut tmp = [[zero; 4]; 4];
                    for j in 0..4 {
                        tmp[0][j] = _mm512_sub_ps(d[0][j], d[2][j]);
                        tmp[1][j] = _mm512_sub_ps(d[1][j], d[2][j]);
                        tmp[2][j] = _mm512_sub_ps(_mm512_sub_ps(zero, d[1][j]), d[2][j]);
                        tmp[3][j] = _mm512_sub_ps(d[1][j], d[3][j]);
                    }

                    for (i, row) in tmp.iter().enumerate() {
                        let v = [
                            _mm512_sub_ps(row[0], row[2]),
                            _mm512_sub_ps(row[1], row[2]),
                            _mm512_sub_ps(_mm512_sub_ps(zero, row[1]), row[2]),
                            _mm512_sub_ps(row[1], row[3]),
                        ];
                        for (j, vj) in v.iter().enumerate() {
                            let t = i * 4 + j;
                            let dst = y.add(((n * TILE_AREA + t) * c_n + c) * t_n + tile);
                            _mm512_mask_storeu_ps(dst, mask, *vj);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g_matrix() -> [[f32; 3]; 4] {
        [[1.0, 0.0, 0.0], [-0.5, 0.5, -0.5], [-0.5, -0.5, -0.5], [0.0, 0.0, -1.0]]
    }

    #[test]
    fn test_filter_taps_match_g_g_gt() {
        let g: Vec<f32> = (1..=9).map(|v| v as f32 * 0.5 - 2.0).collect();
        let gm = g_matrix();
        let taps = filter_taps(&g);
        for i in 0..4 {
            for j in 0..4 {
                let mut acc = 0.0f32;
                for a in 0..3 {
                    for b in 0..3 {
                        acc += gm[i][a] * g[a * 3 + b] * gm[j][b];
                    }
                }
                assert!((acc - taps[i * 4 + j]).abs() < 1e-5, "tap {i},{j}");
            }
        }
    }

    #[test]
    fn test_single_tile_equals_correlation() {
        // one 4×4 input tile and one 3×3 kernel give the 2×2 valid correlation
        let d: [[f32; 4]; 4] = [
            [1.0, 2.0, 0.0, -1.0],
            [3.0, 1.0, 4.0, 2.0],
            [0.0, -2.0, 1.0, 1.0],
            [2.0, 0.0, 3.0, 5.0],
        ];
        let g = [1.0, 0.0, -1.0, 2.0, 1.0, 0.0, 0.5, -1.0, 1.0];
        let u = filter_taps(&g);
        let v = input_tile(&d);
        let mut mt = [0.0f32; TILE_AREA];
        for t in 0..TILE_AREA {
            mt[t] = u[t] * v[t];
        }
        let y = output_tile(&mt);
        for i in 0..2 {
            for j in 0..2 {
                let mut want = 0.0f32;
                for r in 0..3 {
                    for s in 0..3 {
                        want += d[i + r][j + s] * g[r * 3 + s];
                    }
                }
                assert!((y[i][j] - want).abs() < 1e-4, "({i},{j}): {} vs {want}", y[i][j]);
            }
        }
    }

    #[test]
    fn test_vector_input_transform_matches_scalar() {
        crate::skip_without_avx512!();
        // 9x13 output pads to 10x14: 35 tiles, so the last vector is partial.
        let plan = WinogradPlan::new(2, 3, 1, 11, 15).unwrap();
        let len = plan.batch * plan.channels * plan.padded_in_h * plan.padded_in_w;
        let padded: Vec<f32> = (0..len).map(|i| ((i * 37 + 11) % 23) as f32 * 0.25 - 2.5).collect();
        let out_len = plan.batch * TILE_AREA * plan.channels * plan.tile_count;

        let mut want = vec![0.0f32; out_len];
        transform_input_scalar(&padded, &plan, &mut want);
        let mut got = vec![f32::NAN; out_len];
        transform_input(&padded, &plan, &mut got);
        assert_eq!(got, want);
    }
}
