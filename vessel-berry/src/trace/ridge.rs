//! 局部脊点搜索与脊形状度量.

use nalgebra::{Point3, Vector3};

use super::TraceThresholds;
use crate::data::ScalarVolume;
use crate::filter::{jet_at, Jet, RidgeFrame};

/// 牛顿迭代的最大次数.
const MAX_NEWTON_ITERATIONS: usize = 10;

/// 收敛判定: 单步位移小于 `CONVERGENCE * min_spacing`.
const CONVERGENCE: f64 = 1e-3;

/// 允许的最终残余位移 (以最小体素分辨率为单位).
const MAX_RESIDUAL: f64 = 0.1;

/// 已对齐到脊上的一个采样点.
#[derive(Debug, Clone)]
pub struct RidgeSample {
    /// 脊点物理坐标.
    pub position: Point3<f64>,
    /// 使用的高斯尺度.
    pub sigma: f64,
    /// 该点处的 jet.
    pub jet: Jet,
    /// 该点处的 Hessian 特征分解.
    pub frame: RidgeFrame,
    /// 最后一次牛顿步长.
    pub offset: f64,
}

/// 计算 Hessian 的尺度. 过小的半径不会让尺度低于半个体素.
#[inline]
pub fn scale_for_radius(radius: f64, min_spacing: f64) -> f64 {
    (0.5 * radius).max(0.5 * min_spacing)
}

/// 从 `start` 出发, 在法平面内做牛顿迭代, 寻找最近的亮脊点.
///
/// 迭代中任何一点不是亮脊 (两个法向特征值不全为负), 或偏离起点超过
/// `1.5 * max(radius, sigma)`, 或未收敛时返回 `None`.
pub fn local_ridge(
    input: &ScalarVolume,
    start: &Point3<f64>,
    radius: f64,
    min_spacing: f64,
) -> Option<RidgeSample> {
    let sigma = scale_for_radius(radius, min_spacing);
    let max_travel = 1.5 * radius.max(sigma);
    let mut p = *start;
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let jet = jet_at(input, &p, sigma)?;
        let frame = RidgeFrame::new(&jet.hessian);
        if !frame.is_bright_ridge() {
            return None;
        }
        let mut delta = newton_step(&jet.gradient, &frame);
        let len = delta.norm();
        if len > sigma {
            delta *= sigma / len;
        }
        p += delta;
        if (p - start).norm() > max_travel {
            return None;
        }
        if len < CONVERGENCE * min_spacing {
            return sample_at(input, p, sigma, min_spacing);
        }
    }
    sample_at(input, p, sigma, min_spacing)
}

/// 在 `p` 处重新计算 jet, 残余位移过大时视为未收敛.
fn sample_at(
    input: &ScalarVolume,
    p: Point3<f64>,
    sigma: f64,
    min_spacing: f64,
) -> Option<RidgeSample> {
    let jet = jet_at(input, &p, sigma)?;
    let frame = RidgeFrame::new(&jet.hessian);
    if !frame.is_bright_ridge() {
        return None;
    }
    let offset = newton_step(&jet.gradient, &frame).norm();
    if offset > MAX_RESIDUAL * min_spacing.max(sigma) {
        return None;
    }
    Some(RidgeSample {
        position: p,
        sigma,
        jet,
        frame,
        offset,
    })
}

/// 法平面内的牛顿步: `-Σ (g·n_i / λ_i) n_i`, `i = 1, 2`.
#[inline]
fn newton_step(g: &Vector3<f64>, f: &RidgeFrame) -> Vector3<f64> {
    let [l1, l2, _] = f.values;
    -(f.n1 * (g.dot(&f.n1) / l1) + f.n2 * (g.dot(&f.n2) / l2))
}

/// 脊点处的形状度量.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RidgeMeasures {
    /// 脊度: 残余牛顿位移相对尺度的补.
    pub ridgeness: f64,
    /// 圆度: `λ2 / λ1`.
    pub roundness: f64,
    /// 曲率: `sigma^2 * (-λ2)`.
    pub curvature: f64,
    /// 平坦度: `1 - |λ3| / |λ2|`.
    pub levelness: f64,
}

impl RidgeMeasures {
    /// 由脊点计算度量. 非亮脊的所有度量均为 0.
    pub fn of(s: &RidgeSample) -> Self {
        let [l1, l2, l3] = s.frame.values;
        if !s.frame.is_bright_ridge() {
            return Self {
                ridgeness: 0.0,
                roundness: 0.0,
                curvature: 0.0,
                levelness: 0.0,
            };
        }
        Self {
            ridgeness: (1.0 - s.offset / s.sigma).clamp(0.0, 1.0),
            roundness: (l2 / l1).clamp(0.0, 1.0),
            curvature: s.sigma * s.sigma * -l2,
            levelness: (1.0 - l3.abs() / l2.abs()).clamp(0.0, 1.0),
        }
    }

    /// 是否满足全部阈值?
    pub fn passes(&self, t: &TraceThresholds) -> bool {
        self.ridgeness >= t.min_ridgeness
            && self.roundness >= t.min_roundness
            && self.curvature >= t.min_curvature
            && self.levelness >= t.min_levelness
    }
}
