//! 精确欧氏距离变换.
//!
//! 按轴分离的下包络抛物线算法 (Felzenszwalb & Huttenlocher), 支持各向异性体素.

use ndarray::{Array3, ArrayViewMut1, Axis, Zip};

/// 无特征体素时的距离替代值, 避免 `inf - inf`.
const FAR: f64 = 1e30;

/// 一维平方距离变换. `f` 为输入代价, `w` 为相邻下标间距的平方.
fn transform_1d(f: &[f64], w: f64, d: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    let intersect = |q: usize, p: usize| {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + w * qf * qf) - (f[p] + w * pf * pf)) / (2.0 * w * (qf - pf))
    };

    for q in 1..n {
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let dq = q as f64 - v[k] as f64;
        *out = w * dq * dq + f[v[k]];
    }
}

/// 每个体素到最近特征体素 (`features` 为 `true`) 的欧氏距离.
///
/// `spacing` 按 `(z, h, w)` 排列; 传入 `[1.0; 3]` 即得体素单位距离.
/// 不存在特征体素时, 所有距离为 `f64::INFINITY`.
pub fn distance_transform(features: &Array3<bool>, spacing: [f64; 3]) -> Array3<f64> {
    let mut cost = features.mapv(|b| if b { 0.0 } else { FAR });
    for (a, sp) in spacing.into_iter().enumerate() {
        let w = sp * sp;
        let op = |mut lane: ArrayViewMut1<f64>| {
            let f: Vec<f64> = lane.to_vec();
            let mut d = vec![0.0; f.len()];
            transform_1d(&f, w, &mut d);
            lane.iter_mut().zip(d).for_each(|(o, v)| *o = v);
        };
        let zip = Zip::from(cost.lanes_mut(Axis(a)));
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                zip.par_for_each(op);
            } else {
                zip.for_each(op);
            }
        }
    }
    cost.mapv_into(|v| if v >= FAR / 2.0 { f64::INFINITY } else { v.sqrt() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    /// 与暴力求解对比.
    #[test]
    fn test_against_brute_force() {
        let shape = (6, 7, 8);
        let features = Array3::from_shape_fn(shape, |(z, h, w)| {
            (z * 7 + h * 3 + w * 5) % 11 == 0 && z != 2
        });
        let spacing = [2.0, 0.5, 1.0];
        let d = distance_transform(&features, spacing);

        let pts: Vec<_> = features
            .indexed_iter()
            .filter(|(_, &b)| b)
            .map(|(i, _)| i)
            .collect();
        for ((z, h, w), v) in d.indexed_iter() {
            let brute = pts
                .iter()
                .map(|&(fz, fh, fw)| {
                    let dz = (z as f64 - fz as f64) * spacing[0];
                    let dh = (h as f64 - fh as f64) * spacing[1];
                    let dw = (w as f64 - fw as f64) * spacing[2];
                    (dz * dz + dh * dh + dw * dw).sqrt()
                })
                .fold(f64::INFINITY, f64::min);
            assert!(f64_eq(*v, brute), "{:?}: {} vs {}", (z, h, w), v, brute);
        }
    }

    #[test]
    fn test_no_feature() {
        let d = distance_transform(&Array3::from_elem((2, 2, 2), false), [1.0; 3]);
        assert!(d.iter().all(|v| v.is_infinite()));
    }
}
