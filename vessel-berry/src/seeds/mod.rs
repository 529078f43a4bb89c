//! 种子搜索与精化.

use log::{debug, info};
use ndarray::{s, Array3};

use crate::data::seed::Seed;
use crate::data::{ScalarVolume, VolumeGeometry};
use crate::error::{Stage, VesselError, VesselResult};
use crate::Idx3d;

pub mod refine;

pub use refine::{RefinedSeeds, SeedRefiner};

/// 迭代取全局最大值并做局部抑制的种子搜索.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedFinder {
    count: usize,
    coverage: usize,
}

impl SeedFinder {
    /// 搜索 `count` 个种子, 每个种子周围半宽 `coverage` 个体素的立方体被抑制.
    pub fn new(count: usize, coverage: usize) -> Self {
        Self { count, coverage }
    }

    /// 在 `vol` 的工作副本上搜索种子. `vol` 本身不受影响.
    ///
    /// 种子按被选中时的强度从高到低排列. 同强度时选行主序靠前的体素.
    /// 全部体素都被抑制后提前结束, 此时返回的种子少于 `count` 个.
    pub fn find(&self, vol: &ScalarVolume) -> VesselResult<Vec<Seed>> {
        let Some((global_min, _)) = vol.min_max() else {
            return Err(VesselError::input("cannot search seeds in an empty volume"));
        };
        let mut work = vol.raw().clone();
        let mut suppressed = Array3::from_elem(vol.shape(), false);
        let mut seeds = Vec::with_capacity(self.count);

        for _ in 0..self.count {
            let Some((idx, v)) = arg_max(&work, &suppressed) else {
                debug!("seed search exhausted after {} seeds", seeds.len());
                break;
            };
            seeds.push(Seed::new(vol.to_physical(&idx), v as f64));
            let (z, h, w) = idx;
            let r = self.coverage;
            let (nz, nh, nw) = vol.shape();
            let window = s![
                z.saturating_sub(r)..(z + r + 1).min(nz),
                h.saturating_sub(r)..(h + r + 1).min(nh),
                w.saturating_sub(r)..(w + r + 1).min(nw)
            ];
            work.slice_mut(window).fill(global_min);
            suppressed.slice_mut(window).fill(true);
        }

        if seeds.is_empty() && self.count > 0 {
            return Err(VesselError::stage(Stage::SeedSearch, "no seed found"));
        }
        info!(
            "found {} seeds (coverage {}), brightest {:.3}",
            seeds.len(),
            self.coverage,
            seeds.first().map_or(0.0, |s| s.value)
        );
        Ok(seeds)
    }
}

/// 未被抑制的体素中的最大值. 同值时取行主序靠前者.
fn arg_max(work: &Array3<f32>, suppressed: &Array3<bool>) -> Option<(Idx3d, f32)> {
    work.indexed_iter()
        .zip(suppressed.iter())
        .filter(|&(_, &s)| !s)
        .map(|((idx, &v), _)| (idx, v))
        .fold(None, |best: Option<(Idx3d, f32)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Geometry, Volume};

    fn peaks() -> ScalarVolume {
        let mut data = Array3::<f32>::zeros((20, 20, 20));
        data[(5, 5, 5)] = 10.0;
        data[(5, 5, 7)] = 9.0;
        data[(15, 15, 15)] = 8.0;
        data[(2, 18, 10)] = 8.0;
        Volume::new(data, Geometry::isotropic(0.5).unwrap())
    }

    #[test]
    fn test_find_seeds() {
        let v = peaks();
        let seeds = SeedFinder::new(3, 3).find(&v).unwrap();
        assert_eq!(seeds.len(), 3);
        let values: Vec<f64> = seeds.iter().map(|s| s.value).collect();
        // (5, 5, 7) 被 (5, 5, 5) 抑制; 同值时行主序靠前者先.
        assert_eq!(values, vec![10.0, 8.0, 8.0]);
        assert_eq!(v.nearest_index(&seeds[1].position), Some((2, 18, 10)));
        assert_eq!(v.nearest_index(&seeds[2].position), Some((15, 15, 15)));
        // 原数据不受影响.
        assert_eq!(v[(5, 5, 7)], 9.0);
    }

    #[test]
    fn test_seed_spacing_and_order() {
        let v = crate::data::phantom::straight_tube();
        let r = 4;
        let seeds = SeedFinder::new(50, r).find(&v).unwrap();
        assert_eq!(seeds.len(), 50);
        for w in seeds.windows(2) {
            assert!(w[0].value >= w[1].value);
        }
        let idx: Vec<Idx3d> = seeds.iter().map(|s| v.nearest_index(&s.position).unwrap()).collect();
        for (i, a) in idx.iter().enumerate() {
            for b in idx[i + 1..].iter() {
                let d = a.0.abs_diff(b.0).max(a.1.abs_diff(b.1)).max(a.2.abs_diff(b.2));
                assert!(d > r);
            }
        }
    }

    #[test]
    fn test_exhausted() {
        let v = Volume::new(Array3::<f32>::ones((3, 3, 3)), Geometry::isotropic(1.0).unwrap());
        let seeds = SeedFinder::new(5, 10).find(&v).unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(v.nearest_index(&seeds[0].position), Some((0, 0, 0)));
    }
}
