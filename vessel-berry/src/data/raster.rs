//! 管道栅格化.

use nalgebra::Point3;
use ndarray::Array3;

use super::group::TubeGroup;
use super::{Volume, VolumeGeometry};
use crate::Idx3d;

/// 物理坐标 `c` 为中心, 半径 `r` 的球内所有体素.
///
/// 半径小于半个体素时至少包含最近的体素 (若在数据范围内).
pub(crate) fn ball_voxels<V: VolumeGeometry>(vol: &V, c: &Point3<f64>, r: f64) -> Vec<Idx3d> {
    let (cz, ch, cw) = vol.to_continuous_index(c);
    let [sz, sh, sw] = vol.pix_dim();
    let (nz, nh, nw) = vol.shape();
    let range = |c: f64, s: f64, n: usize| {
        let lo = (c - r / s).floor().max(0.0) as usize;
        let hi = ((c + r / s).ceil().max(0.0) as usize).min(n.saturating_sub(1));
        lo..=hi
    };
    let mut out = Vec::new();
    for z in range(cz, sz, nz) {
        for h in range(ch, sh, nh) {
            for w in range(cw, sw, nw) {
                let idx = (z, h, w);
                if (vol.to_physical(&idx) - *c).norm() <= r {
                    out.push(idx);
                }
            }
        }
    }
    if out.is_empty() {
        out.extend(vol.nearest_index(c));
    }
    out
}

impl TubeGroup {
    /// 在 `template` 的空间信息上栅格化全部 tube.
    ///
    /// 每个点半径内的体素取该 tube 的编号; 多个 tube 重叠时保留先写入的编号.
    /// 其余体素为 0.
    pub fn rasterize<V: VolumeGeometry>(&self, template: &V) -> Volume<u32> {
        let mut data = Array3::<u32>::zeros(template.shape());
        for t in self.all_tubes() {
            for p in t.points() {
                for v in ball_voxels(template, &p.position, p.radius) {
                    if data[v] == 0 {
                        data[v] = t.id();
                    }
                }
            }
        }
        Volume::new(data, template.geometry().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tube::{Tube, TubePoint};
    use crate::data::Geometry;

    #[test]
    fn test_rasterize() {
        let template = Volume::new(Array3::<u8>::zeros((10, 10, 10)), Geometry::isotropic(1.0).unwrap());
        let line = |id: u32, h: f64| {
            Tube::new(
                id,
                (2..8)
                    .map(|x| TubePoint::new(Point3::new(x as f64, h, 5.0), 1.0))
                    .collect(),
            )
        };
        let g = TubeGroup::with_tubes(0, [line(3, 4.0), line(9, 5.0)]);
        let r = g.rasterize(&template);
        assert_eq!(r[(5, 4, 4)], 3);
        // 两者重叠处保留先写入者.
        assert_eq!(r[(5, 5, 4)], 3);
        assert_eq!(r[(5, 6, 4)], 9);
        assert_eq!(r[(5, 8, 4)], 0);
        assert_eq!(r[(5, 4, 0)], 0);
        assert_eq!(r[(4, 4, 4)], 3);

        // 极小半径仍然占据最近体素.
        assert_eq!(ball_voxels(&template, &Point3::new(3.2, 3.9, 5.1), 0.1), vec![(5, 4, 3)]);
    }
}
