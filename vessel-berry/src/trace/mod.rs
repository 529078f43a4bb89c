//! 沿强度脊线的管道追踪.
//!
//! 每个种子先对齐到最近的亮脊点, 再沿脊线的切向双向行进, 直到形状度量不满足阈值,
//! 到达边界, 或碰到其他管道已占据的体素. 总长度不足的候选管道整体丢弃.
//!
//! 已提取管道按 "先写者胜" 的规则占据体素: 先被追踪的管道拥有重叠段,
//! 后续管道行进到这些体素时停止.

use std::cmp::Reverse;

use binary_heap_plus::BinaryHeap;
use log::{debug, info};
use nalgebra::{Point3, Vector3};
use ndarray::Array3;
use ordered_float::OrderedFloat;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consts::mask::{INSIDE, OUTSIDE};
use crate::data::group::TubeGroup;
use crate::data::seed::Seed;
use crate::data::raster::ball_voxels;
use crate::data::tube::{Tube, TubePoint};
use crate::data::{BinaryMask, ScalarVolume, Volume, VolumeGeometry};
use crate::error::{VesselError, VesselResult};
use crate::Idx3d;

pub mod radius;
pub mod ridge;

use radius::{branchness, edge_response, medialness, optimize_radius};
use ridge::{local_ridge, RidgeMeasures, RidgeSample};

/// 步长相对半径的比例.
const STEP_RATIO: f64 = 0.2;

/// 单步失败后最多折半的次数.
const MAX_STEP_HALVINGS: usize = 2;

/// 相邻两点切向夹角的余弦下限 (45°).
const MAX_TURN_COS: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// 每一步沿行进方向的最小前进量 (相对步长).
const MIN_PROGRESS: f64 = 0.25;

/// 单个方向上最多追踪的点数.
const DEFAULT_MAX_POINTS: usize = 5000;

/// 追踪时的形状阈值. 任何一项不满足, 该方向的追踪即终止.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct TraceThresholds {
    /// 最小圆度.
    pub min_roundness: f64,
    /// 最小脊度.
    pub min_ridgeness: f64,
    /// 最小曲率.
    pub min_curvature: f64,
    /// 最小平坦度.
    pub min_levelness: f64,
    /// 最小管道长度, 物理单位.
    pub min_length: f64,
}

impl Default for TraceThresholds {
    /// 提取全部血管时使用的阈值.
    fn default() -> Self {
        Self {
            min_roundness: 0.1,
            min_ridgeness: 0.1,
            min_curvature: 0.001,
            min_levelness: 0.001,
            min_length: 500.0,
        }
    }
}

impl TraceThresholds {
    /// 生成训练样本时使用的保守阈值 (偏向精确).
    pub fn training() -> Self {
        Self {
            min_roundness: 0.1,
            min_ridgeness: 0.8,
            min_curvature: 1e-6,
            min_levelness: 0.0,
            min_length: 300.0,
        }
    }

    /// 修改最小长度.
    pub fn with_min_length(mut self, min_length: f64) -> Self {
        self.min_length = min_length;
        self
    }
}

/// 追踪时半径的确定方式.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadiusMode {
    /// 使用固定半径.
    Fixed(f64),
    /// 在每个点上按边缘响应优化半径.
    Optimize,
}

/// 管道追踪器.
///
/// 追踪器持有占据表: 每个体素记录拥有它的管道编号, 0 表示未被占据.
pub struct TubeTracer<'a> {
    input: &'a ScalarVolume,
    thresholds: TraceThresholds,
    radius_mode: RadiusMode,
    border: f64,
    max_points: usize,
    min_spacing: f64,
    occupancy: Array3<u32>,
    attempted: Array3<bool>,
}

impl<'a> TubeTracer<'a> {
    /// 在 `input` 上构造追踪器. 边界默认为 0 个体素.
    pub fn new(input: &'a ScalarVolume, thresholds: TraceThresholds, radius_mode: RadiusMode) -> Self {
        let shape = input.shape();
        Self {
            input,
            thresholds,
            radius_mode,
            border: 0.0,
            max_points: DEFAULT_MAX_POINTS,
            min_spacing: input.geometry().min_spacing(),
            occupancy: Array3::zeros(shape),
            attempted: Array3::from_elem(shape, false),
        }
    }

    /// 设定索引空间的边界宽度. 距离数据边界不足 `border` 个体素的种子和点均被排除.
    pub fn border(mut self, border: usize) -> Self {
        self.border = border as f64;
        self
    }

    /// 设定单个方向上最多追踪的点数.
    pub fn max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.max(1);
        self
    }

    /// 获取形状阈值.
    #[inline]
    pub fn thresholds(&self) -> &TraceThresholds {
        &self.thresholds
    }

    /// 获取占据表, 体素值为拥有它的管道编号.
    pub fn occupancy(&self) -> Volume<u32> {
        Volume::new(self.occupancy.clone(), self.input.geometry().clone())
    }

    /// 所有已提取管道覆盖的体素构成的二值掩膜.
    pub fn tube_mask(&self) -> BinaryMask {
        let data = self.occupancy.mapv(|v| if v != 0 { INSIDE } else { OUTSIDE });
        Volume::new(data, self.input.geometry().clone())
    }

    /// 从单个种子提取一条管道, 编号为 `id`.
    ///
    /// # 返回值
    ///
    /// 以下情况返回 `None`:
    ///
    /// 1. 种子超出边界, 或已被占据, 或此前已尝试过;
    /// 2. 种子附近找不到满足阈值的脊点;
    /// 3. 追踪得到的管道长度小于最小长度 (整条丢弃, 不截断).
    ///
    /// 成功时, 管道覆盖的体素被标记为 `id` 所有.
    pub fn extract_tube(&mut self, seed: &Seed, id: u32) -> Option<Tube> {
        let idx = self.input.nearest_index(&seed.position)?;
        if !self.in_bounds(&seed.position) || self.occupancy[idx] != 0 || self.attempted[idx] {
            return None;
        }

        let center = match self.snap(seed) {
            Some(c) => c,
            None => {
                self.attempted[idx] = true;
                return None;
            }
        };
        match self.input.nearest_index(&center.position) {
            Some(c) if self.in_bounds(&center.position) && self.occupancy[c] == 0 => {}
            _ => {
                self.attempted[idx] = true;
                return None;
            }
        }

        let forward = self.walk(&center, center.tangent);
        let backward = self.walk(&center, -center.tangent);
        let points: Vec<TubePoint> = backward
            .into_iter()
            .rev()
            .map(|mut p| {
                p.tangent = -p.tangent;
                p
            })
            .chain(std::iter::once(center))
            .chain(forward)
            .collect();

        let mut tube = Tube::new(id, points);
        tube.remove_duplicate_points();
        let length = tube.length();
        if length < self.thresholds.min_length {
            debug!(
                "tube from seed {:?} rejected: length {:.2} < {:.2}",
                idx, length, self.thresholds.min_length
            );
            self.attempted[idx] = true;
            self.paint_attempted(&tube);
            return None;
        }
        debug!("tube {} extracted: {} points, length {:.2}", id, tube.len(), length);
        self.paint_occupancy(&tube, id);
        Some(tube)
    }

    /// 按种子概率从高到低依次提取管道.
    ///
    /// `seeds` 为种子概率体数据, `radii` 为对应的半径估计. 概率不低于 `min_probability`
    /// 且位于边界内的体素才作为候选; 同概率时索引较小者优先. 最多尝试 `max_seeds` 次提取,
    /// 已被占据或已尝试过的候选不计入次数.
    ///
    /// 返回的根管道组编号为 0, 其中的管道编号从 `first_id` 开始依次递增.
    pub fn process_seeds(
        &mut self,
        seeds: &ScalarVolume,
        radii: &ScalarVolume,
        max_seeds: usize,
        min_probability: f64,
        first_id: u32,
    ) -> VesselResult<TubeGroup> {
        if !seeds.same_shape(self.input) || !radii.same_shape(self.input) {
            return Err(VesselError::input(format!(
                "seed volumes {:?}/{:?} do not match input {:?}",
                seeds.shape(),
                radii.shape(),
                self.input.shape()
            )));
        }

        let mut heap = BinaryHeap::new_by_key(|c: &(f64, Idx3d)| (OrderedFloat(c.0), Reverse(c.1)));
        for (idx, &p) in seeds.raw().indexed_iter() {
            let p = p as f64;
            let (z, h, w) = idx;
            if p > 0.0
                && p >= min_probability
                && self
                    .input
                    .inside_border((z as f64, h as f64, w as f64), self.border)
            {
                heap.push((p, idx));
            }
        }
        info!("tracing from {} candidate seeds (budget {})", heap.len(), max_seeds);

        let mut group = TubeGroup::new(0);
        let mut next_id = first_id;
        let mut attempts = 0usize;
        while attempts < max_seeds {
            let Some((p, idx)) = heap.pop() else {
                break;
            };
            if self.occupancy[idx] != 0 || self.attempted[idx] {
                continue;
            }
            attempts += 1;
            let seed = Seed::new(seeds.to_physical(&idx), p).with_radius(radii[idx] as f64);
            if let Some(tube) = self.extract_tube(&seed, next_id) {
                group.push_tube(tube);
                next_id += 1;
            }
        }
        info!("{} tubes extracted from {} attempts", group.len(), attempts);
        Ok(group)
    }

    /// 物理坐标是否位于边界以内?
    #[inline]
    fn in_bounds(&self, p: &Point3<f64>) -> bool {
        self.input
            .inside_border(self.input.to_continuous_index(p), self.border)
    }

    /// 种子对齐到脊线, 并确定初始半径.
    fn snap(&self, seed: &Seed) -> Option<TubePoint> {
        let r0 = match self.radius_mode {
            RadiusMode::Fixed(r) => r,
            RadiusMode::Optimize => seed
                .radius
                .unwrap_or(self.min_spacing)
                .max(0.5 * self.min_spacing),
        };
        let mut sample = local_ridge(self.input, &seed.position, r0, self.min_spacing)?;
        if !RidgeMeasures::of(&sample).passes(&self.thresholds) {
            return None;
        }

        let (r, response) = match self.radius_mode {
            RadiusMode::Fixed(r) => (r, self.response_at(&sample, r)),
            RadiusMode::Optimize => {
                let lo = 0.5 * self.min_spacing;
                let hi = (2.0 * r0).max(4.0 * self.min_spacing);
                let (r, resp) = self.optimize_at(&sample, lo, hi, 0.1 * self.min_spacing);
                // 用优化后的半径重新对齐. 失败时保留原对齐结果.
                if let Some(s) = local_ridge(self.input, &sample.position, r, self.min_spacing) {
                    if RidgeMeasures::of(&s).passes(&self.thresholds) {
                        sample = s;
                    }
                }
                (r, resp)
            }
        };
        let tangent = sample.frame.tangent;
        Some(self.make_point(&sample, r, response, tangent))
    }

    /// 从 `start` 出发沿 `dir` 方向追踪, 不包含 `start` 本身.
    fn walk(&self, start: &TubePoint, dir: Vector3<f64>) -> Vec<TubePoint> {
        let mut prev = start.position;
        let mut dir = dir;
        let mut r = start.radius;
        let mut out = Vec::new();
        while out.len() < self.max_points {
            let mut step = (STEP_RATIO * r).max(0.5 * self.min_spacing);
            let mut found = None;
            for _ in 0..=MAX_STEP_HALVINGS {
                found = self.advance(&prev, &dir, r, step);
                if found.is_some() {
                    break;
                }
                step *= 0.5;
            }
            let Some(point) = found else {
                break;
            };
            if !self.in_bounds(&point.position) {
                break;
            }
            match self.input.nearest_index(&point.position) {
                Some(v) if self.occupancy[v] == 0 => {}
                _ => break,
            }
            prev = point.position;
            dir = point.tangent;
            r = point.radius;
            out.push(point);
        }
        out
    }

    /// 沿 `dir` 前进 `step` 后重新对齐到脊线.
    ///
    /// 后退, 转角超过 45°, 或形状度量不满足阈值时返回 `None`.
    fn advance(&self, prev: &Point3<f64>, dir: &Vector3<f64>, r: f64, step: f64) -> Option<TubePoint> {
        let guess = *prev + dir * step;
        let sample = local_ridge(self.input, &guess, r, self.min_spacing)?;
        if (sample.position - *prev).dot(dir) < MIN_PROGRESS * step {
            return None;
        }
        let t = sample.frame.tangent;
        let t = if t.dot(dir) < 0.0 { -t } else { t };
        if t.dot(dir) < MAX_TURN_COS {
            return None;
        }
        if !RidgeMeasures::of(&sample).passes(&self.thresholds) {
            return None;
        }
        let (radius, response) = match self.radius_mode {
            RadiusMode::Fixed(r) => (r, self.response_at(&sample, r)),
            RadiusMode::Optimize => {
                let lo = (0.75 * r).max(0.5 * self.min_spacing);
                let hi = (1.33 * r).max(lo);
                let step = (0.05 * r).max(0.01 * self.min_spacing);
                self.optimize_at(&sample, lo, hi, step)
            }
        };
        Some(self.make_point(&sample, radius, response, t))
    }

    #[inline]
    fn response_at(&self, s: &RidgeSample, r: f64) -> f64 {
        let h = 0.5 * self.min_spacing;
        edge_response(self.input, &s.position, &s.frame.n1, &s.frame.n2, r, h)
    }

    #[inline]
    fn optimize_at(&self, s: &RidgeSample, lo: f64, hi: f64, step: f64) -> (f64, f64) {
        optimize_radius(self.input, &s.position, &s.frame.n1, &s.frame.n2, lo, hi, step)
    }

    fn make_point(&self, s: &RidgeSample, radius: f64, response: f64, tangent: Vector3<f64>) -> TubePoint {
        let m = RidgeMeasures::of(s);
        let mut p = TubePoint::new(s.position, radius);
        p.tangent = tangent;
        p.normal1 = s.frame.n1;
        p.normal2 = s.frame.n2;
        p.ridgeness = m.ridgeness;
        p.roundness = m.roundness;
        p.curvature = m.curvature;
        p.levelness = m.levelness;
        p.intensity = s.jet.value;
        p.medialness = medialness(response, s.jet.value);
        p.branchness = branchness(self.input, &s.position, &s.frame.n1, &s.frame.n2, radius, s.jet.value);
        p.alpha = s.frame.values;
        p
    }

    /// 管道每个点半径球内尚未被占据的体素标记为 `id`.
    fn paint_occupancy(&mut self, tube: &Tube, id: u32) {
        for p in tube.points() {
            for v in ball_voxels(self.input, &p.position, p.radius) {
                if self.occupancy[v] == 0 {
                    self.occupancy[v] = id;
                }
            }
        }
    }

    /// 被丢弃的管道中轴附近 (半个半径) 的体素标记为已尝试.
    fn paint_attempted(&mut self, tube: &Tube) {
        for p in tube.points() {
            for v in ball_voxels(self.input, &p.position, 0.5 * p.radius) {
                self.attempted[v] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::phantom::straight_tube;

    const C: f64 = 18.0 * 0.3;

    fn training_tracer(v: &ScalarVolume) -> TubeTracer<'_> {
        TubeTracer::new(v, TraceThresholds::training().with_min_length(10.0), RadiusMode::Fixed(1.5)).border(3)
    }

    #[test]
    fn test_extract_straight_tube() {
        let v = straight_tube();
        let mut tracer = training_tracer(&v);
        let seed = Seed::new(Point3::new(12.0, C + 0.3, C), 100.0);
        let tube = tracer.extract_tube(&seed, 7).unwrap();
        assert_eq!(tube.id(), 7);
        assert!(tube.length() > 15.0, "{}", tube.length());
        for p in tube.points() {
            assert!((p.position.y - C).abs() < 0.3);
            assert!((p.position.z - C).abs() < 0.3);
            assert!(v.contains_physical(&p.position));
            assert!(p.ridgeness >= 0.8);
        }
        // 切向沿中心线方向一致.
        let pts = tube.points();
        for w in pts.windows(2) {
            assert!(w[0].tangent.dot(&w[1].tangent) > 0.0);
        }

        // 已被占据的区域不会重复提取.
        assert!(tracer.extract_tube(&seed, 8).is_none());
        assert_eq!(tracer.occupancy()[(18, 18, 40)], 7);
        assert!(tracer.tube_mask().count_inside() > 0);
    }

    #[test]
    fn test_short_tube_discarded() {
        let v = straight_tube();
        let mut tracer = TubeTracer::new(
            &v,
            TraceThresholds::training().with_min_length(100.0),
            RadiusMode::Fixed(1.5),
        )
        .border(3);
        let seed = Seed::new(Point3::new(12.0, C, C), 100.0);
        assert!(tracer.extract_tube(&seed, 1).is_none());
        assert_eq!(tracer.tube_mask().count_inside(), 0);
        // 已尝试过的种子不再尝试.
        assert!(tracer.extract_tube(&seed, 1).is_none());
    }

    #[test]
    fn test_process_seeds_by_probability() {
        let v = straight_tube();
        let mut prob = v.filled_like(0.0f32).into_raw();
        for w in 20..60 {
            prob[(18, 18, w)] = 0.5 + w as f32 / 100.0;
        }
        let prob = Volume::new(prob, v.geometry().clone());
        let radii = v.filled_like(1.5f32);
        let mut tracer = training_tracer(&v);
        let group = tracer.process_seeds(&prob, &radii, 10, 0.1, 1).unwrap();
        // 所有候选都位于同一根管道上, 只提取出一条.
        assert_eq!(group.len(), 1);
        assert_eq!(group.all_tubes()[0].id(), 1);
        group.validate_unique_ids().unwrap();

        let wrong = Volume::new(Array3::<f32>::zeros((2, 2, 2)), v.geometry().clone());
        assert!(tracer.process_seeds(&wrong, &radii, 10, 0.1, 1).is_err());
    }
}
