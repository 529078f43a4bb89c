//! 强度归一化.
//!
//! 归一化把掩膜内的强度经 z-score 压缩并线性拉伸到 `[0, 100]`.
//! 统计量一经计算即被冻结, 可原样用于另一幅已配准的体数据.

use log::info;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::NORMALIZED_MAX;
use crate::data::{BinaryMask, ScalarVolume, VolumeGeometry};
use crate::error::{Stage, VesselError, VesselResult};

/// 体数据中非零体素的强度统计.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VolumeStats {
    /// 均值.
    pub mean: f64,
    /// 标准差 (总体标准差, 除以 `count`).
    pub std: f64,
    /// 参与统计的体素个数.
    pub count: usize,
}

impl VolumeStats {
    /// 统计 `vol` 中所有非零体素.
    ///
    /// 没有非零体素时返回 `Input` 错误.
    pub fn of_nonzero(vol: &ScalarVolume) -> VesselResult<Self> {
        let (count, sum) = vol
            .raw()
            .iter()
            .filter(|&&v| v != 0.0)
            .fold((0usize, 0.0f64), |(n, s), &v| (n + 1, s + v as f64));
        if count == 0 {
            return Err(VesselError::input("no non-zero voxel inside the tissue mask"));
        }
        let mean = sum / count as f64;
        let ss: f64 = vol
            .raw()
            .iter()
            .filter(|&&v| v != 0.0)
            .map(|&v| (v as f64 - mean).powi(2))
            .sum();
        let std = (ss / count as f64).sqrt();
        Ok(Self { mean, std, count })
    }
}

/// 冻结的归一化参数. 同一组参数总是产生相同的仿射映射.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NormalizationStats {
    /// 掩膜内强度统计.
    pub stats: VolumeStats,
    /// z-score 压缩后, 线性拉伸前的最小值.
    pub min: f64,
    /// z-score 压缩后, 线性拉伸前的最大值.
    pub max: f64,
}

/// 归一化器.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    scale: f64,
    z_score_range: f64,
}

impl Normalizer {
    /// `scale` 为血管尺度 (模糊半径 = 分辨率 * scale), `z_score_range` 为 z-score 范围.
    pub fn new(scale: f64, z_score_range: f64) -> Self {
        Self {
            scale,
            z_score_range,
        }
    }

    /// 对 `vol` 做归一化, 返回结果与冻结的参数.
    ///
    /// # 注意
    ///
    /// 1. 掩膜为空, 或掩膜内强度方差为 0 时返回 `Input` 错误;
    /// 2. 压缩后的最小值等于最大值时返回 `NumericDegeneracy` 错误.
    pub fn normalize(
        &self,
        vol: &ScalarVolume,
        tissue: &BinaryMask,
    ) -> VesselResult<(ScalarVolume, NormalizationStats)> {
        if tissue.count_inside() == 0 {
            return Err(VesselError::input("valid-tissue mask is empty"));
        }
        let masked = vol.blur_by_spacing(self.scale).masked(tissue)?;
        let stats = VolumeStats::of_nonzero(&masked)?;
        if !(stats.std > 0.0) {
            return Err(VesselError::input(format!(
                "zero variance inside tissue mask (mean {:.4}, {} voxels)",
                stats.mean, stats.count
            )));
        }

        let k = stats.std * 1.5 * self.z_score_range;
        let z = masked.map(|&v| {
            if v == 0.0 {
                0.0
            } else {
                z_score(v as f64, stats.mean, k) as f32
            }
        });
        let (min, max) = z
            .min_max()
            .map(|(lo, hi)| (lo as f64, hi as f64))
            .unwrap_or((0.0, 0.0));
        let factor = rescale_factor(min, max)?;
        let out = z.map(|&v| ((v as f64 - min) * factor) as f32);

        info!(
            "normalized: mean {:.4}, std {:.4}, window [{:.4}, {:.4}] over {} voxels",
            stats.mean, stats.std, min, max, stats.count
        );
        Ok((out, NormalizationStats { stats, min, max }))
    }

    /// 以冻结的参数归一化另一幅已配准的体数据.
    ///
    /// 不使用掩膜, 所有体素都按同一仿射映射变换, 结果截断到 `[0, 100]`.
    /// 同一输入重复调用得到逐位相同的结果.
    pub fn apply(&self, vol: &ScalarVolume, frozen: &NormalizationStats) -> VesselResult<ScalarVolume> {
        let factor = rescale_factor(frozen.min, frozen.max)?;
        let k = frozen.stats.std * 1.5 * self.z_score_range;
        if !(k > 0.0) {
            return Err(VesselError::degenerate(
                Stage::Normalize,
                "frozen statistics have zero variance",
            ));
        }
        let mean = frozen.stats.mean;
        let min = frozen.min;
        let out = vol.blur_by_spacing(self.scale).map(|&v| {
            let z = z_score(v as f64, mean, k);
            ((z - min) * factor).clamp(0.0, NORMALIZED_MAX) as f32
        });
        info!("second volume normalized with frozen statistics, shape {:?}", out.shape());
        Ok(out)
    }
}

/// `((v - mean) / k + 0.5) / 2`, 截断到 `[0, 1]`.
#[inline]
fn z_score(v: f64, mean: f64, k: f64) -> f64 {
    (((v - mean) / k + 0.5) / 2.0).clamp(0.0, 1.0)
}

/// 把 `[min, max]` 线性拉伸到 `[0, 100]` 的比例.
fn rescale_factor(min: f64, max: f64) -> VesselResult<f64> {
    let span = max - min;
    if !(span > 0.0) || !span.is_finite() {
        return Err(VesselError::degenerate(
            Stage::Normalize,
            format!("rescale window is empty: min {min}, max {max}"),
        ));
    }
    Ok(NORMALIZED_MAX / span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::mask::{INSIDE, OUTSIDE};
    use crate::data::phantom::straight_tube;

    fn tissue(v: &ScalarVolume) -> BinaryMask {
        // 周边一圈置为组织外.
        let (nz, nh, nw) = v.shape();
        let data = ndarray::Array3::from_shape_fn((nz, nh, nw), |(z, h, w)| {
            if z > 1 && h > 1 && w > 1 && z < nz - 2 && h < nh - 2 && w < nw - 2 {
                INSIDE
            } else {
                OUTSIDE
            }
        });
        v.with_data(data).unwrap()
    }

    #[test]
    fn test_normalize_range() {
        let v = straight_tube();
        let m = tissue(&v);
        let (n, frozen) = Normalizer::new(1.0, 10.0).normalize(&v, &m).unwrap();
        let (lo, hi) = n.min_max().unwrap();
        assert_eq!(lo, 0.0);
        assert!((hi as f64 - NORMALIZED_MAX).abs() < 1e-3);
        // 组织外保持为 0.
        assert_eq!(n[(0, 0, 0)], 0.0);
        assert_eq!(n[(35, 20, 83)], 0.0);
        // 管内比背景亮.
        assert!(n[(18, 18, 40)] > n[(5, 5, 40)]);
        assert!(frozen.stats.std > 0.0);
        assert!(frozen.max > frozen.min);
    }

    #[test]
    fn test_apply_frozen_is_repeatable() {
        let v = straight_tube();
        let m = tissue(&v);
        let norm = Normalizer::new(1.0, 10.0);
        let (_, frozen) = norm.normalize(&v, &m).unwrap();
        let alt = v.map(|x| x * 1.1);
        let a = norm.apply(&alt, &frozen).unwrap();
        let b = norm.apply(&alt, &frozen).unwrap();
        assert_eq!(a.raw(), b.raw());
        let (lo, hi) = a.min_max().unwrap();
        assert!(lo >= 0.0 && hi <= NORMALIZED_MAX as f32);
    }

    #[test]
    fn test_stats_of_nonzero() {
        let g = crate::data::Geometry::isotropic(1.0).unwrap();
        let data = ndarray::Array3::from_shape_vec((1, 1, 9), vec![0.0, 2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        let s = VolumeStats::of_nonzero(&crate::data::Volume::new(data, g.clone())).unwrap();
        assert_eq!(s.count, 8);
        assert!((s.mean - 5.0).abs() < 1e-12);
        // 总体标准差.
        assert!((s.std - 2.0).abs() < 1e-12);

        let one = ndarray::Array3::from_shape_vec((1, 1, 2), vec![0.0, 3.0]).unwrap();
        let s = VolumeStats::of_nonzero(&crate::data::Volume::new(one, g)).unwrap();
        assert_eq!((s.count, s.std), (1, 0.0));
    }

    #[test]
    fn test_degenerate_inputs() {
        let v = straight_tube();
        let norm = Normalizer::new(1.0, 10.0);
        let empty = v.filled_like(OUTSIDE);
        assert!(matches!(norm.normalize(&v, &empty), Err(VesselError::Input { .. })));

        let flat = v.filled_like(7.0f32);
        let full = v.filled_like(INSIDE);
        assert!(matches!(norm.normalize(&flat, &full), Err(VesselError::Input { .. })));

        assert!(matches!(
            rescale_factor(0.3, 0.3),
            Err(VesselError::NumericDegeneracy { stage: Stage::Normalize, .. })
        ));
        assert!(f64::abs(rescale_factor(0.0, 0.5).unwrap() - 200.0) < 1e-12);
    }
}
