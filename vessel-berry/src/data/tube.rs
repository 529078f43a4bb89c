//! 单条血管: 有序中心线点列.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 点位置视为重复的距离阈值.
const DUPLICATE_EPS: f64 = 1e-9;

/// tube 默认颜色 (红).
pub const DEFAULT_COLOR: [f64; 4] = [1.0, 0.0, 0.0, 1.0];

/// 中心线上的一个点, 以及追踪器写入的局部形状描述.
///
/// 除位置和半径外, 其余字段一经追踪器写入便不再修改.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TubePoint {
    /// 物理坐标.
    pub position: Point3<f64>,

    /// 半径 (物理单位).
    pub radius: f64,

    /// 切向.
    pub tangent: Vector3<f64>,

    /// 第一法向.
    pub normal1: Vector3<f64>,

    /// 第二法向.
    pub normal2: Vector3<f64>,

    /// RGBA 颜色.
    pub color: [f64; 4],

    /// 脊度.
    pub ridgeness: f64,

    /// 中轴度.
    pub medialness: f64,

    /// 分支度.
    pub branchness: f64,

    /// 曲率.
    pub curvature: f64,

    /// 平滑后的局部强度.
    pub intensity: f64,

    /// 圆度.
    pub roundness: f64,

    /// 平坦度.
    pub levelness: f64,

    /// 局部模型的三个系数 (Hessian 特征值, 升序).
    pub alpha: [f64; 3],
}

impl TubePoint {
    /// 仅带位置和半径的点, 其余描述均为 0.
    pub fn new(position: Point3<f64>, radius: f64) -> Self {
        Self {
            position,
            radius,
            tangent: Vector3::zeros(),
            normal1: Vector3::zeros(),
            normal2: Vector3::zeros(),
            color: DEFAULT_COLOR,
            ridgeness: 0.0,
            medialness: 0.0,
            branchness: 0.0,
            curvature: 0.0,
            intensity: 0.0,
            roundness: 0.0,
            levelness: 0.0,
            alpha: [0.0; 3],
        }
    }
}

/// 一条被追踪出的血管.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tube {
    id: u32,
    color: [f64; 4],
    points: Vec<TubePoint>,
}

impl Tube {
    /// 创建 tube.
    #[inline]
    pub fn new(id: u32, points: Vec<TubePoint>) -> Self {
        Self {
            id,
            color: DEFAULT_COLOR,
            points,
        }
    }

    /// 标识符.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 修改标识符.
    #[inline]
    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    /// 颜色.
    #[inline]
    pub fn color(&self) -> [f64; 4] {
        self.color
    }

    /// 设置颜色.
    #[inline]
    pub fn set_color(&mut self, color: [f64; 4]) {
        self.color = color;
    }

    /// 点列.
    #[inline]
    pub fn points(&self) -> &[TubePoint] {
        &self.points
    }

    /// 可变点列.
    #[inline]
    pub fn points_mut(&mut self) -> &mut [TubePoint] {
        &mut self.points
    }

    /// 点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 是否没有点?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 中心线的物理弧长.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| (w[1].position - w[0].position).norm())
            .sum()
    }

    /// 删除位置与前一点重合的点. 返回删除的个数.
    pub fn remove_duplicate_points(&mut self) -> usize {
        let before = self.points.len();
        self.points
            .dedup_by(|b, a| (b.position - a.position).norm() < DUPLICATE_EPS);
        before - self.points.len()
    }

    /// 重新计算每个点的切向和两个法向.
    ///
    /// 切向取中心差分 (端点处为单侧差分). 法向沿中心线平行移动,
    /// 因此相邻点的法向不会突然翻转. 少于 2 个点时不做任何事.
    pub fn compute_tangents_and_normals(&mut self) {
        let n = self.points.len();
        if n < 2 {
            return;
        }
        for i in 0..n {
            let prev = self.points[i.saturating_sub(1)].position;
            let next = self.points[(i + 1).min(n - 1)].position;
            let t = next - prev;
            let norm = t.norm();
            self.points[i].tangent = if norm > DUPLICATE_EPS {
                t / norm
            } else if i > 0 {
                self.points[i - 1].tangent
            } else {
                Vector3::x()
            };
        }

        let mut n1 = any_perpendicular(&self.points[0].tangent);
        for p in self.points.iter_mut() {
            let t = p.tangent;
            let projected = n1 - t * n1.dot(&t);
            n1 = match projected.try_normalize(DUPLICATE_EPS) {
                Some(v) => v,
                None => any_perpendicular(&t),
            };
            p.normal1 = n1;
            p.normal2 = t.cross(&n1);
        }
    }

    /// 距离物理坐标 `p` 最近的点, 以及其下标.
    pub fn closest_point(&self, p: &Point3<f64>) -> Option<(usize, &TubePoint)> {
        self.points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.position - *p)
                    .norm_squared()
                    .total_cmp(&(b.position - *p).norm_squared())
            })
    }
}

/// 任取一个与 `t` 垂直的单位向量.
pub(crate) fn any_perpendicular(t: &Vector3<f64>) -> Vector3<f64> {
    // 选取与 t 最不平行的坐标轴.
    let axis = if t.x.abs() <= t.y.abs() && t.x.abs() <= t.z.abs() {
        Vector3::x()
    } else if t.y.abs() <= t.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    t.cross(&axis)
        .try_normalize(DUPLICATE_EPS)
        .unwrap_or_else(Vector3::y)
}
