//! 训练掩膜合成.
//!
//! 先用保守阈值从训练种子追踪出少量样例管道, 再按到管道的距离生成三类标签:
//! 管道本身为脊, 与管道相隔 `gap` 的一圈为背景, 其余为未知.

use log::{debug, info};
use ndarray::Zip;

use crate::config::PipelineConfig;
use crate::consts::label::{BACKGROUND, RIDGE, UNKNOWN};
use crate::consts::mask::{self, INSIDE, OUTSIDE};
use crate::data::group::TubeGroup;
use crate::data::seed::Seed;
use crate::data::{BinaryMask, LabelVolume, ScalarVolume, VolumeGeometry};
use crate::error::{Stage, VesselError, VesselResult};
use crate::filter::distance_transform;
use crate::trace::{RadiusMode, TraceThresholds, TubeTracer};

/// 训练掩膜合成结果.
#[derive(Debug, Clone)]
pub struct TrainingMask {
    /// 样例管道.
    pub tubes: TubeGroup,
    /// 样例管道栅格化后的二值掩膜.
    pub tube_mask: BinaryMask,
    /// 三类标签.
    pub labels: LabelVolume,
}

/// 训练掩膜合成器.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingMaskBuilder {
    thresholds: TraceThresholds,
    radius: f64,
    border: usize,
    gap: f64,
    object_width: f64,
    not_object_width: f64,
}

impl TrainingMaskBuilder {
    /// 由管线参数构造.
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            thresholds: cfg.training_thresholds,
            radius: cfg.training_radius,
            border: cfg.border,
            gap: cfg.training_gap,
            object_width: cfg.object_width,
            not_object_width: cfg.not_object_width,
        }
    }

    /// 追踪样例管道并生成训练标签.
    ///
    /// `eroded` 之外的体素一律标为未知. 没有追踪出任何管道, 或标签中缺少脊或背景时,
    /// 返回 `StageFailure` 错误.
    pub fn build(&self, input: &ScalarVolume, seeds: &[Seed], eroded: &BinaryMask) -> VesselResult<TrainingMask> {
        let mut tracer =
            TubeTracer::new(input, self.thresholds, RadiusMode::Fixed(self.radius)).border(self.border);
        let mut tubes = TubeGroup::new(0);
        for seed in seeds {
            let id = tubes.len() as u32 + 1;
            match tracer.extract_tube(seed, id) {
                Some(t) => tubes.push_tube(t),
                None => debug!("training seed at {:?} produced no tube", seed.position),
            }
        }
        if tubes.is_empty() {
            return Err(VesselError::stage(
                Stage::TrainingMask,
                format!(
                    "no training tube traced from {} seeds (radius {}, min length {})",
                    seeds.len(),
                    self.radius,
                    self.thresholds.min_length
                ),
            ));
        }

        let raster = tubes.rasterize(input);
        let tube_mask = raster.map(|&id| if id != 0 { INSIDE } else { OUTSIDE });
        let labels = self.label(&tube_mask, eroded)?;
        let (ridge, background) = (labels.count(RIDGE), labels.count(BACKGROUND));
        info!(
            "training mask: {} tubes, {} ridge voxels, {} background voxels",
            tubes.len(),
            ridge,
            background
        );
        if ridge == 0 || background == 0 {
            return Err(VesselError::stage(
                Stage::TrainingMask,
                format!("training labels incomplete: {ridge} ridge, {background} background voxels"),
            ));
        }
        Ok(TrainingMask {
            tubes,
            tube_mask,
            labels,
        })
    }

    /// 按到目标掩膜的距离 (体素单位) 生成三类标签, 并限制在 `eroded` 内.
    ///
    /// 1. `d < object_width`: 脊;
    /// 2. `gap <= d < gap + not_object_width`: 背景;
    /// 3. 其余: 未知.
    pub fn label(&self, object: &BinaryMask, eroded: &BinaryMask) -> VesselResult<LabelVolume> {
        let features = object.raw().mapv(mask::is_inside);
        let d = distance_transform(&features, [1.0; 3]);
        let (obj, gap, not_obj) = (self.object_width, self.gap, self.not_object_width);
        let data = Zip::from(&d).map_collect(|&d| {
            if d < obj {
                RIDGE
            } else if d >= gap && d < gap + not_obj {
                BACKGROUND
            } else {
                UNKNOWN
            }
        });
        let labels = object.with_data(data)?;
        labels.zip_map(eroded, |&l, &m| if mask::is_inside(m) { l } else { UNKNOWN })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::phantom::straight_tube;
    use crate::data::Volume;
    use nalgebra::Point3;
    use ndarray::Array3;

    fn builder() -> TrainingMaskBuilder {
        let mut cfg = PipelineConfig::default();
        cfg.training_thresholds.min_length = 10.0;
        TrainingMaskBuilder::from_config(&cfg)
    }

    #[test]
    fn test_label_bands() {
        let mut data = Array3::<u8>::zeros((1, 1, 30));
        data[(0, 0, 5)] = INSIDE;
        let object = Volume::new(data, crate::data::Geometry::isotropic(0.5).unwrap());
        let mut eroded = object.filled_like(INSIDE);
        let labels = builder().label(&object, &eroded).unwrap();
        assert_eq!(labels[(0, 0, 5)], RIDGE);
        assert_eq!(labels[(0, 0, 6)], UNKNOWN);
        assert_eq!(labels[(0, 0, 15)], BACKGROUND);
        assert_eq!(labels[(0, 0, 16)], UNKNOWN);
        assert_eq!(labels.count(BACKGROUND), 1);

        let mut e = eroded.into_raw();
        e[(0, 0, 15)] = OUTSIDE;
        eroded = object.with_data(e).unwrap();
        let labels = builder().label(&object, &eroded).unwrap();
        assert_eq!(labels.count(BACKGROUND), 0);
    }

    #[test]
    fn test_build_on_phantom() {
        let v = straight_tube();
        let c = 18.0 * 0.3;
        let seeds = vec![
            Seed::new(Point3::new(12.0, c, c), 100.0),
            // 紧邻第一个种子, 所在区域已被占据.
            Seed::new(Point3::new(12.3, c, c), 99.0),
        ];
        let eroded = v.filled_like(INSIDE);
        let m = builder().build(&v, &seeds, &eroded).unwrap();
        assert_eq!(m.tubes.len(), 1);
        assert_eq!(m.labels[(18, 18, 40)], RIDGE);
        assert_eq!(m.labels[(18, 0, 40)], UNKNOWN);
        assert!(m.labels.count(BACKGROUND) > 0);
        assert_eq!(m.tube_mask.count_inside(), m.labels.count(RIDGE));
    }

    #[test]
    fn test_no_training_tube() {
        // 常数体数据中不存在亮脊.
        let v = straight_tube().filled_like(40.0f32);
        let seeds = vec![Seed::new(Point3::new(5.0, 5.0, 5.0), 1.0)];
        let err = builder().build(&v, &seeds, &v.filled_like(INSIDE)).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::TrainingMask));
    }
}
