//! 判别分析血管增强.
//!
//! 由训练标签训练两类线性判别器, 对每个体素给出目标 (脊) 与背景的概率,
//! 两幅概率图轻度模糊后取差并按最大值归一化, 得到 `[0, 1]` 内的血管度.
//! 血管度以脊为正: 越接近 1 越像血管.

use log::info;
use ndarray::Zip;

use crate::config::PipelineConfig;
use crate::consts::label;
use crate::consts::mask;
use crate::data::{BinaryMask, LabelVolume, ScalarVolume, VolumeGeometry};
use crate::error::{Stage, VesselError, VesselResult};
use crate::Idx3d;

pub mod features;
pub mod lda;

pub use features::FeatureStack;
pub use lda::{sigmoid, LinearDiscriminant};

/// 每一类最多使用的训练样本数. 超出时等间隔抽样.
const MAX_SAMPLES_PER_CLASS: usize = 200_000;

/// 增强结果.
#[derive(Debug, Clone)]
pub struct EnhancedVessels {
    /// 血管度, `[0, 1]`, 有效组织外为 0.
    pub vesselness: ScalarVolume,
    /// 模糊前的目标类概率.
    pub object_probability: ScalarVolume,
    /// 训练得到的判别器.
    pub discriminant: LinearDiscriminant,
}

/// 血管增强器.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselEnhancer {
    scales: Vec<f64>,
    probability_blur: f64,
}

impl VesselEnhancer {
    /// `scales` 为特征的物理尺度列表, `probability_blur` 为概率图模糊的物理标准差.
    pub fn new(scales: Vec<f64>, probability_blur: f64) -> Self {
        Self {
            scales,
            probability_blur,
        }
    }

    /// 由管线参数和体素分辨率构造.
    pub fn from_config(cfg: &PipelineConfig, spacing: f64) -> Self {
        Self::new(cfg.physical_scales(spacing), cfg.probability_blur(spacing))
    }

    /// 训练判别器并计算血管度.
    ///
    /// # 注意
    ///
    /// 1. `labels` 和 `tissue` 的形状必须与 `input` 一致;
    /// 2. 标签中缺少任一类时返回 `StageFailure` 错误;
    /// 3. 概率差的最大值不为正时返回 `NumericDegeneracy` 错误.
    pub fn enhance(
        &self,
        input: &ScalarVolume,
        labels: &LabelVolume,
        tissue: &BinaryMask,
    ) -> VesselResult<EnhancedVessels> {
        if !input.same_shape(labels) || !input.same_shape(tissue) {
            return Err(VesselError::input(format!(
                "enhancement inputs disagree in shape: {:?}, {:?}, {:?}",
                input.shape(),
                labels.shape(),
                tissue.shape()
            )));
        }
        let features = FeatureStack::compute(input, &self.scales);
        let object = samples(&features, labels, label::RIDGE);
        let background = samples(&features, labels, label::BACKGROUND);
        info!(
            "training discriminant on {} channels: {} object, {} background samples",
            features.len(),
            object.len(),
            background.len()
        );
        let discriminant = LinearDiscriminant::fit(&object, &background)?;

        let (weights, bias) = (discriminant.weights(), discriminant.bias());
        let op = |idx: Idx3d, _: &f32| sigmoid(features.dot(idx, weights) + bias) as f32;
        let zip = Zip::indexed(input.raw());
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let prob = zip.par_map_collect(op);
            } else {
                let prob = zip.map_collect(op);
            }
        }
        let object_probability = input.with_data(prob)?;
        let background_probability = object_probability.map(|&p| 1.0 - p);

        let ob = object_probability.blur(self.probability_blur);
        let bb = background_probability.blur(self.probability_blur);
        let diff = ob.zip_map(&bb, |&o, &b| o - b)?;
        let max = diff
            .raw()
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max) as f64;
        if !(max > 0.0) || !max.is_finite() {
            return Err(VesselError::degenerate(
                Stage::Enhance,
                format!("maximum probability difference is {max}, cannot normalize"),
            ));
        }
        let vesselness = diff.zip_map(tissue, |&d, &m| {
            if mask::is_inside(m) {
                (d as f64 / max).clamp(0.0, 1.0) as f32
            } else {
                0.0
            }
        })?;
        info!(
            "vesselness computed at {} scales, max difference {:.4}",
            self.scales.len(),
            max
        );
        Ok(EnhancedVessels {
            vesselness,
            object_probability,
            discriminant,
        })
    }
}

/// 收集标签为 `class` 的体素的特征, 超过上限时等间隔抽样.
fn samples(features: &FeatureStack, labels: &LabelVolume, class: u8) -> Vec<Vec<f64>> {
    let total = labels.count(class);
    let stride = total.div_ceil(MAX_SAMPLES_PER_CLASS).max(1);
    labels
        .raw()
        .indexed_iter()
        .filter(|&(_, &l)| l == class)
        .step_by(stride)
        .map(|(idx, _)| features.at(idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::mask::INSIDE;
    use crate::data::phantom::straight_tube;

    /// 直接按到中心线的距离构造标签.
    fn labels(v: &ScalarVolume) -> LabelVolume {
        let c = 18.0 * 0.3;
        v.with_data(ndarray::Array3::from_shape_fn(v.shape(), |(z, h, w)| {
            let (x, y, zz) = (w as f64 * 0.3, h as f64 * 0.3, z as f64 * 0.3);
            let r = ((y - c).powi(2) + (zz - c).powi(2)).sqrt();
            if !(4.0..=22.0).contains(&x) {
                label::UNKNOWN
            } else if r < 1.0 {
                label::RIDGE
            } else if (4.5..4.8).contains(&r) {
                label::BACKGROUND
            } else {
                label::UNKNOWN
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_enhance_phantom() {
        let v = straight_tube();
        let l = labels(&v);
        let tissue = v.filled_like(INSIDE);
        let cfg = PipelineConfig::default();
        let e = VesselEnhancer::from_config(&cfg, 0.3).enhance(&v, &l, &tissue).unwrap();
        let ves = &e.vesselness;
        assert!(ves[(18, 18, 40)] > 0.5);
        assert!(ves[(18, 5, 40)] < 0.1);
        let (lo, hi) = ves.min_max().unwrap();
        assert!(lo >= 0.0);
        assert!((hi - 1.0).abs() < 1e-6);
        assert!(e.object_probability[(18, 18, 40)] > 0.9);
    }

    #[test]
    fn test_missing_background() {
        let v = straight_tube();
        let l = labels(&v).map(|&x| if x == label::BACKGROUND { label::UNKNOWN } else { x });
        let tissue = v.filled_like(INSIDE);
        let err = VesselEnhancer::new(vec![0.5], 0.15).enhance(&v, &l, &tissue).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Enhance));
    }
}
