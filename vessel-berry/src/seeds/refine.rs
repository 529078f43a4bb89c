//! 基于增强结果的种子精化.

use log::info;
use ndarray::Zip;

use crate::consts::mask::{self, INSIDE, OUTSIDE};
use crate::data::{BinaryMask, ScalarVolume, Volume, VolumeGeometry};
use crate::error::{Stage, VesselError, VesselResult};
use crate::filter::distance_transform;

/// 种子精化结果.
#[derive(Debug, Clone)]
pub struct RefinedSeeds {
    /// 粗血管种子掩膜 (二值化, 连通分量过滤后, 剪枝前).
    pub initial_mask: BinaryMask,
    /// 掩膜内每个体素到最近非血管体素的物理距离, 作为半径估计.
    pub radius: ScalarVolume,
    /// 剪枝后的种子概率: 保留体素处为增强值, 其余为 0.
    pub seeds: ScalarVolume,
    /// 保留的种子体素个数.
    pub count: usize,
}

/// 种子精化器.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedRefiner {
    threshold: f64,
    min_component_volume: usize,
    pruning_bound: f64,
}

impl SeedRefiner {
    /// `threshold` 为增强结果的二值化阈值, `min_component_volume` 为连通分量最小体素数,
    /// `pruning_bound` 为半径估计的上界 (物理单位).
    pub fn new(threshold: f64, min_component_volume: usize, pruning_bound: f64) -> Self {
        Self {
            threshold,
            min_component_volume,
            pruning_bound,
        }
    }

    /// 精化种子.
    ///
    /// 1. 增强结果大于阈值且位于 `eroded` 内的体素构成初始掩膜;
    /// 2. 删除体素数小于下限的连通分量;
    /// 3. 对掩膜之外的体素做距离变换, 得到掩膜内的半径估计;
    /// 4. 删除半径估计超过上界的体素.
    ///
    /// 没有种子保留下来时返回 `StageFailure` 错误.
    pub fn refine(&self, enhanced: &ScalarVolume, eroded: &BinaryMask) -> VesselResult<RefinedSeeds> {
        let threshold = self.threshold;
        let above = enhanced.map(|&v| {
            if v as f64 > threshold {
                INSIDE
            } else {
                OUTSIDE
            }
        });
        let initial_mask = above
            .and(eroded)?
            .remove_small_components(self.min_component_volume);
        if initial_mask.count_inside() == 0 {
            return Err(VesselError::stage(
                Stage::SeedRefine,
                format!(
                    "no vessel component of at least {} voxels above {:e}",
                    self.min_component_volume, threshold
                ),
            ));
        }

        let outside = initial_mask.raw().mapv(|v| !mask::is_inside(v));
        let d = distance_transform(&outside, initial_mask.pix_dim());
        let radius_data = Zip::from(initial_mask.raw())
            .and(&d)
            .map_collect(|&m, &d| if mask::is_inside(m) && d.is_finite() { d as f32 } else { 0.0 });
        let radius = initial_mask.with_data(radius_data)?;

        let bound = self.pruning_bound;
        let seed_data = Zip::from(enhanced.raw())
            .and(initial_mask.raw())
            .and(&d)
            .map_collect(|&e, &m, &d| if mask::is_inside(m) && d <= bound { e } else { 0.0 });
        let seeds: ScalarVolume = Volume::new(seed_data, enhanced.geometry().clone());
        let count = Zip::from(initial_mask.raw())
            .and(&d)
            .fold(0usize, |n, &m, &d| n + (mask::is_inside(m) && d <= bound) as usize);
        if count == 0 {
            return Err(VesselError::stage(
                Stage::SeedRefine,
                format!("all seeds pruned by radius bound {bound:.3}"),
            ));
        }
        info!(
            "refined seeds: {} mask voxels, {} kept under radius bound {:.3}",
            initial_mask.count_inside(),
            count,
            bound
        );
        Ok(RefinedSeeds {
            initial_mask,
            radius,
            seeds,
            count,
        })
    }
}
