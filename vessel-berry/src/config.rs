//! 管线参数.

use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::ENHANCEMENT_SCALES;
use crate::trace::TraceThresholds;

/// 一次血管提取的全部参数. 每个字段都有默认值, 可从部分 JSON 反序列化.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct PipelineConfig {
    /// 血管尺度. 较小的值偏向细血管, 较大的值偏向粗血管.
    pub vessel_scale: f64,

    /// 归一化时的 z-score 范围.
    pub z_score_range: f64,

    /// 有效组织的强度范围 `[lo, hi]`. 仅在未显式提供掩膜时使用.
    pub tissue_range: (f64, f64),

    /// 有效组织掩膜的腐蚀半径, 以体素为单位.
    pub erode_radius: f64,

    /// 训练种子个数.
    pub num_training_seeds: usize,

    /// 训练种子搜索的抑制半宽, 以体素为单位.
    pub seed_coverage: usize,

    /// 训练追踪使用的固定半径, 物理单位.
    pub training_radius: f64,

    /// 训练追踪阈值.
    pub training_thresholds: TraceThresholds,

    /// 训练掩膜中背景带与目标的间隔, 以体素为单位.
    pub training_gap: f64,

    /// 训练掩膜中目标的宽度, 以体素为单位.
    pub object_width: f64,

    /// 训练掩膜中背景带的宽度, 以体素为单位.
    pub not_object_width: f64,

    /// 增强的尺度列表 (乘以血管尺度和分辨率之前).
    pub enhancement_scales: Vec<f64>,

    /// 增强结果二值化的阈值.
    pub seed_threshold: f64,

    /// 保留的连通分量的最小体素个数.
    pub min_component_volume: usize,

    /// 追踪时最多尝试的种子个数.
    pub num_seeds: usize,

    /// 种子的最小接受概率.
    pub seed_min_probability: f64,

    /// 种子排除边界, 以体素为单位.
    pub border: usize,

    /// 提取追踪阈值.
    pub extraction_thresholds: TraceThresholds,

    /// 中心线平滑的高斯标准差, 以点下标为单位.
    pub smooth_sigma: f64,

    /// 半径平滑的高斯标准差, 以点下标为单位.
    pub radius_smooth_sigma: f64,

    /// 调试文件前缀. 为 `None` 时不写出中间结果.
    pub debug_prefix: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vessel_scale: 1.0,
            z_score_range: 10.0,
            tissue_range: (1.0, 99999.0),
            erode_radius: 10.0,
            num_training_seeds: 50,
            seed_coverage: 10,
            training_radius: 1.5,
            training_thresholds: TraceThresholds::training(),
            training_gap: 10.0,
            object_width: 1.0,
            not_object_width: 1.0,
            enhancement_scales: ENHANCEMENT_SCALES.to_vec(),
            seed_threshold: 1e-10,
            min_component_volume: 50,
            num_seeds: 1000,
            seed_min_probability: 0.1,
            border: 3,
            extraction_thresholds: TraceThresholds::default(),
            smooth_sigma: 4.0,
            radius_smooth_sigma: 2.0,
            debug_prefix: None,
        }
    }
}

impl PipelineConfig {
    /// 修改血管尺度.
    pub fn with_vessel_scale(mut self, scale: f64) -> Self {
        self.vessel_scale = scale;
        self
    }

    /// 修改提取时的最小血管长度.
    pub fn with_min_vessel_length(mut self, len: f64) -> Self {
        self.extraction_thresholds.min_length = len;
        self
    }

    /// 设定调试文件前缀.
    pub fn with_debug_prefix<P: Into<PathBuf>>(mut self, prefix: P) -> Self {
        self.debug_prefix = Some(prefix.into());
        self
    }

    /// 各增强尺度的物理标准差: `scale * vessel_scale * spacing`.
    pub fn physical_scales(&self, spacing: f64) -> Vec<f64> {
        self.enhancement_scales
            .iter()
            .map(|s| s * self.vessel_scale * spacing)
            .collect()
    }

    /// 种子精化的剪枝上界 (物理单位): `spacing * max(enhancement_scales) * 2`.
    #[inline]
    pub fn pruning_bound(&self, spacing: f64) -> f64 {
        spacing * self.enhancement_scales.iter().copied().fold(0.0, f64::max) * 2.0
    }

    /// 增强阶段概率图的模糊尺度 (物理单位).
    #[inline]
    pub fn probability_blur(&self, spacing: f64) -> f64 {
        0.5 * spacing * self.vessel_scale
    }
}
