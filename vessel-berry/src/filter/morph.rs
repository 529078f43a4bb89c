//! 阈值化, 掩膜替换与二值形态学腐蚀.

use crate::consts::mask::{self, INSIDE, OUTSIDE};
use crate::data::{BinaryMask, ScalarVolume, Volume, VolumeGeometry};
use crate::error::VesselResult;

use super::distance::distance_transform;

impl ScalarVolume {
    /// 二值化: 值位于 `[lo, hi]` 内的体素为 1, 否则为 0.
    pub fn threshold(&self, lo: f64, hi: f64) -> BinaryMask {
        self.map(|&v| {
            let v = v as f64;
            if v >= lo && v <= hi {
                INSIDE
            } else {
                OUTSIDE
            }
        })
    }

    /// 掩膜外的体素置为 0, 返回新的体数据.
    pub fn masked(&self, m: &BinaryMask) -> VesselResult<ScalarVolume> {
        self.zip_map(m, |&v, &b| if mask::is_inside(b) { v } else { 0.0 })
    }
}

impl<T: Copy + Default + Send + Sync> Volume<T> {
    /// 掩膜外的体素置为 `T::default()`, 返回新的体数据.
    pub fn masked_with(&self, m: &BinaryMask) -> VesselResult<Volume<T>> {
        self.zip_map(m, |&v, &b| if mask::is_inside(b) { v } else { T::default() })
    }
}

impl BinaryMask {
    /// 以半径为 `radius` 个体素的球形结构元做腐蚀.
    ///
    /// 数据范围外视为前景, 因此贴着边界的掩膜不会因边界被腐蚀.
    pub fn erode(&self, radius: f64) -> BinaryMask {
        let background = self.raw().mapv(|v| !mask::is_inside(v));
        if radius <= 0.0 || !background.iter().any(|&b| b) {
            return self.clone();
        }
        let d = distance_transform(&background, [1.0; 3]);
        let data = ndarray::Zip::from(self.raw())
            .and(&d)
            .map_collect(|&v, &d| {
                if mask::is_inside(v) && d > radius {
                    INSIDE
                } else {
                    OUTSIDE
                }
            });
        Volume::new(data, self.geometry().clone())
    }

    /// 逐体素取交集.
    pub fn and(&self, other: &BinaryMask) -> VesselResult<BinaryMask> {
        self.zip_map(other, |&a, &b| {
            if mask::is_inside(a) && mask::is_inside(b) {
                INSIDE
            } else {
                OUTSIDE
            }
        })
    }

    /// 取反.
    pub fn invert(&self) -> BinaryMask {
        self.map(|&v| if mask::is_inside(v) { OUTSIDE } else { INSIDE })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Geometry;
    use ndarray::Array3;

    fn cube_mask(n: usize, lo: usize, hi: usize) -> BinaryMask {
        let data = Array3::from_shape_fn((n, n, n), |(z, h, w)| {
            let inside = |c: usize| c >= lo && c <= hi;
            if inside(z) && inside(h) && inside(w) {
                INSIDE
            } else {
                OUTSIDE
            }
        });
        Volume::new(data, Geometry::isotropic(1.0).unwrap())
    }

    #[test]
    fn test_threshold_and_mask() {
        let v = Volume::new(
            Array3::from_shape_fn((2, 2, 2), |(z, h, w)| (z * 4 + h * 2 + w) as f32),
            Geometry::isotropic(1.0).unwrap(),
        );
        let m = v.threshold(1.0, 5.0);
        assert_eq!(m.count_inside(), 5);
        let masked = v.masked(&m).unwrap();
        assert_eq!(masked[(0, 0, 0)], 0.0);
        assert_eq!(masked[(1, 0, 1)], 5.0);
        assert_eq!(masked[(1, 1, 1)], 0.0);
        assert_eq!(m.invert().count_inside(), 3);
    }

    #[test]
    fn test_erode() {
        // 11^3 的立方体, 腐蚀 2 个体素后剩 7^3.
        let m = cube_mask(21, 5, 15);
        let e = m.erode(2.0);
        assert_eq!(e.count_inside(), 7 * 7 * 7);
        assert_eq!(e[(7, 7, 7)], INSIDE);
        assert_eq!(e[(6, 10, 10)], OUTSIDE);

        // 铺满整个数据的掩膜不被腐蚀.
        let full = cube_mask(5, 0, 4);
        assert_eq!(full.erode(10.0).count_inside(), 125);
        assert_eq!(m.and(&e).unwrap().count_inside(), 343);
    }
}
