//! 多尺度体素特征.

use log::debug;
use ndarray::{Array3, Zip};

use crate::data::{ScalarVolume, VolumeGeometry};
use crate::filter::{blur_array, hessian_at_voxel, sorted_eigenvalues};
use crate::Idx3d;

/// 逐体素特征通道.
///
/// 通道 0 为原始强度; 其后每个尺度两个通道: 该尺度模糊后的强度,
/// 以及尺度归一化的亮脊响应 `sigma^2 * max(0, -(λ1 + λ2) / 2)` (仅当 `λ1, λ2 < 0`).
#[derive(Debug, Clone)]
pub struct FeatureStack {
    channels: Vec<Array3<f32>>,
}

impl FeatureStack {
    /// 以物理标准差列表 `scales` 计算特征.
    pub fn compute(input: &ScalarVolume, scales: &[f64]) -> Self {
        let spacing = input.pix_dim();
        let mut channels = Vec::with_capacity(1 + 2 * scales.len());
        channels.push(input.raw().clone());
        for &sigma in scales {
            let blurred = blur_array(input.raw(), spacing.map(|s| sigma / s));
            let ridge = ridge_response(&blurred, spacing, sigma);
            debug!("features at scale {:.3} computed", sigma);
            channels.push(blurred);
            channels.push(ridge);
        }
        Self { channels }
    }

    /// 通道个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// 是否没有任何通道?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// 获取第 `k` 个通道.
    #[inline]
    pub fn channel(&self, k: usize) -> &Array3<f32> {
        &self.channels[k]
    }

    /// 体素 `idx` 处的特征向量.
    pub fn at(&self, idx: Idx3d) -> Vec<f64> {
        self.channels.iter().map(|c| c[idx] as f64).collect()
    }

    /// 体素 `idx` 处特征与 `weights` 的内积.
    #[inline]
    pub fn dot(&self, idx: Idx3d, weights: &[f64]) -> f64 {
        self.channels
            .iter()
            .zip(weights)
            .map(|(c, w)| c[idx] as f64 * w)
            .sum()
    }
}

/// 在已模糊的数组上逐体素计算尺度归一化的亮脊响应.
fn ridge_response(blurred: &Array3<f32>, spacing: [f64; 3], sigma: f64) -> Array3<f32> {
    let s2 = sigma * sigma;
    let op = |idx: Idx3d, _: &f32| {
        let [l1, l2, _] = sorted_eigenvalues(&hessian_at_voxel(blurred, idx, spacing));
        if l1 < 0.0 && l2 < 0.0 {
            (s2 * -(l1 + l2) / 2.0) as f32
        } else {
            0.0
        }
    };
    let zip = Zip::indexed(blurred);
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            let out = zip.par_map_collect(op);
        } else {
            let out = zip.map_collect(op);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::phantom::straight_tube;

    #[test]
    fn test_ridge_channel_peaks_on_tube() {
        let v = straight_tube();
        let f = FeatureStack::compute(&v, &[0.45, 0.9]);
        assert_eq!(f.len(), 5);
        let center = (18, 18, 40);
        let outside = (18, 5, 40);
        // 尺度 0.9 mm 的脊响应在管中心明显高于背景.
        assert!(f.channel(4)[center] > 10.0 * f.channel(4)[outside].max(0.1));
        assert!(f.channel(3)[center] > f.channel(3)[outside]);
        let x = f.at(center);
        assert_eq!(x.len(), 5);
        assert!((f.dot(center, &[1.0, 0.0, 0.0, 0.0, 0.0]) - x[0]).abs() < 1e-12);
    }
}
