//! 合成体数据: 均匀噪声背景中的若干亮直管.
//!
//! 用于测试和无真实数据时的消融实验.

use nalgebra::{Matrix3, Point3};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Geometry, GeometryError, ScalarVolume, Volume};
use crate::Idx3d;

/// 一段直管 (两端为半球帽).
#[derive(Debug, Clone, PartialEq)]
pub struct PhantomTube {
    /// 起点 (物理坐标).
    pub start: Point3<f64>,
    /// 终点 (物理坐标).
    pub end: Point3<f64>,
    /// 半径 (物理单位).
    pub radius: f64,
}

impl PhantomTube {
    /// 物理点到中心线段的距离.
    fn distance(&self, p: &Point3<f64>) -> f64 {
        let d = self.end - self.start;
        let len2 = d.norm_squared();
        let t = if len2 > 0.0 {
            ((*p - self.start).dot(&d) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (*p - (self.start + d * t)).norm()
    }
}

/// 合成体数据构造器.
#[derive(Debug, Clone)]
pub struct PhantomBuilder {
    shape: Idx3d,
    spacing: f64,
    background: f32,
    foreground: f32,
    noise: f32,
    seed: u64,
    tubes: Vec<PhantomTube>,
}

impl PhantomBuilder {
    /// 形状为 `shape` (按 `(z, h, w)`), 各向同性分辨率为 `spacing` 的空白体数据.
    pub fn new(shape: Idx3d, spacing: f64) -> Self {
        Self {
            shape,
            spacing,
            background: 40.0,
            foreground: 120.0,
            noise: 4.0,
            seed: 0x5eed,
            tubes: Vec::new(),
        }
    }

    /// 背景强度.
    pub fn background(mut self, v: f32) -> Self {
        self.background = v;
        self
    }

    /// 管内强度.
    pub fn foreground(mut self, v: f32) -> Self {
        self.foreground = v;
        self
    }

    /// 均匀噪声幅度, 噪声取值于 `[-noise, noise]`.
    pub fn noise(mut self, noise: f32) -> Self {
        self.noise = noise.abs();
        self
    }

    /// 随机数种子.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// 添加一段直管.
    pub fn tube(mut self, start: Point3<f64>, end: Point3<f64>, radius: f64) -> Self {
        self.tubes.push(PhantomTube { start, end, radius });
        self
    }

    /// 生成体数据. 原点为 0, 方向为单位阵.
    pub fn build(&self) -> Result<ScalarVolume, GeometryError> {
        let geometry = Geometry::new([self.spacing; 3], [0.0; 3], Matrix3::identity())?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut data = Array3::<f32>::zeros(self.shape);
        for ((z, h, w), v) in data.indexed_iter_mut() {
            let p = geometry.to_physical((z as f64, h as f64, w as f64));
            let inside = self.tubes.iter().any(|t| t.distance(&p) <= t.radius);
            let base = if inside {
                self.foreground
            } else {
                self.background
            };
            let n = if self.noise > 0.0 {
                rng.gen_range(-self.noise..=self.noise)
            } else {
                0.0
            };
            *v = base + n;
        }
        Ok(Volume::new(data, geometry))
    }
}

/// 单根直管的标准合成数据.
///
/// 分辨率 0.3 mm, 形状 `(36, 36, 84)`. 管沿 x 轴, 长 20 mm, 半径 1.5 mm (5 个体素),
/// 中心线位于 `h = z = 18`.
pub fn straight_tube() -> ScalarVolume {
    const SPACING: f64 = 0.3;
    let c = 18.0 * SPACING;
    PhantomBuilder::new((36, 36, 84), SPACING)
        .tube(Point3::new(3.0, c, c), Point3::new(23.0, c, c), 1.5)
        .build()
        // 常量空间信息必然合法, 可直接 unwrap.
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VolumeGeometry;

    #[test]
    fn test_straight_tube() {
        let v = straight_tube();
        assert_eq!(v.shape(), (36, 36, 84));
        // 管中心与背景.
        assert!(v[(18, 18, 40)] >= 116.0);
        assert!(v[(2, 2, 40)] <= 44.0);
        // 距中心 4 个体素在管内, 6 个体素在管外.
        assert!(v[(18, 22, 40)] >= 116.0);
        assert!(v[(18, 24, 40)] <= 44.0);
    }

    #[test]
    fn test_deterministic() {
        let a = straight_tube();
        let b = straight_tube();
        assert_eq!(a.raw(), b.raw());
    }
}
