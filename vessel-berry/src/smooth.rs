//! 中心线与半径的平滑.

use log::info;
use nalgebra::Vector3;

use crate::data::group::TubeGroup;
use crate::data::tube::Tube;
use crate::filter::gaussian_kernel;

/// 按点下标做高斯平滑. 只修改位置, 半径, 切向和法向; 其余度量保持不变.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TubeSmoother {
    sigma: f64,
    radius_sigma: f64,
}

impl TubeSmoother {
    /// `sigma` 为中心线平滑的标准差, `radius_sigma` 为半径平滑的标准差, 均以点下标为单位.
    pub fn new(sigma: f64, radius_sigma: f64) -> Self {
        Self {
            sigma,
            radius_sigma,
        }
    }

    /// 平滑组内全部 tube.
    pub fn smooth_group(&self, group: &mut TubeGroup) {
        let mut n = 0usize;
        group.for_each_tube_mut(&mut |t| {
            if self.smooth(t) {
                n += 1;
            }
        });
        info!(
            "smoothed {} tubes (sigma {}, radius sigma {})",
            n, self.sigma, self.radius_sigma
        );
    }

    /// 平滑单条 tube. 点数不多于 2 时保持原样并返回 `false`.
    pub fn smooth(&self, tube: &mut Tube) -> bool {
        if tube.len() <= 2 {
            return false;
        }
        let positions: Vec<Vector3<f64>> = tube.points().iter().map(|p| p.position.coords).collect();
        let radii: Vec<f64> = tube.points().iter().map(|p| p.radius).collect();
        let positions = convolve(&positions, &gaussian_kernel(self.sigma), Vector3::zeros());
        let radii = convolve(&radii, &gaussian_kernel(self.radius_sigma), 0.0);
        for ((p, x), r) in tube.points_mut().iter_mut().zip(positions).zip(radii) {
            p.position.coords = x;
            p.radius = r;
        }
        tube.compute_tangents_and_normals();
        true
    }
}

/// 截断卷积: 越界的权重被舍去, 剩余权重重新归一化.
fn convolve<T>(xs: &[T], kernel: &[f64], zero: T) -> Vec<T>
where
    T: Copy + std::ops::Add<Output = T> + std::ops::Mul<f64, Output = T>,
{
    let n = xs.len() as isize;
    let r = (kernel.len() / 2) as isize;
    (0..n)
        .map(|i| {
            let (acc, wsum) = kernel
                .iter()
                .enumerate()
                .map(|(k, &w)| (i + k as isize - r, w))
                .filter(|&(j, _)| j >= 0 && j < n)
                .fold((zero, 0.0), |(acc, s), (j, w)| (acc + xs[j as usize] * w, s + w));
            acc * (1.0 / wsum)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tube::TubePoint;
    use nalgebra::Point3;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    fn zigzag(n: usize) -> Tube {
        Tube::new(
            1,
            (0..n)
                .map(|i| {
                    let y = if i % 2 == 0 { 0.5 } else { -0.5 };
                    let mut p = TubePoint::new(Point3::new(i as f64, y, 0.0), if i < n / 2 { 1.0 } else { 3.0 });
                    p.ridgeness = i as f64;
                    p
                })
                .collect(),
        )
    }

    #[test]
    fn test_smooth_zigzag() {
        let mut t = zigzag(30);
        let before = t.clone();
        assert!(TubeSmoother::new(4.0, 2.0).smooth(&mut t));
        assert_eq!(t.len(), 30);
        // 中部的锯齿被抹平, 沿 x 方向的位置不变 (线性函数).
        let mid = &t.points()[15];
        assert!(mid.position.y.abs() < 0.05);
        assert!(f64_eq(mid.position.x, 15.0));
        // 半径台阶被平滑, 但仍然单调.
        let r: Vec<f64> = t.points().iter().map(|p| p.radius).collect();
        assert!(r[14] > 1.0 && r[15] < 3.0);
        assert!(r.windows(2).all(|w| w[1] >= w[0] - 1e-12));
        // 其他度量不受影响.
        for (a, b) in t.points().iter().zip(before.points()) {
            assert_eq!(a.ridgeness, b.ridgeness);
        }
        assert!(t.points()[15].tangent.x > 0.99);
    }

    #[test]
    fn test_short_tubes_untouched() {
        let s = TubeSmoother::new(4.0, 2.0);
        for n in [1, 2] {
            let mut t = zigzag(n);
            let before = t.clone();
            assert!(!s.smooth(&mut t));
            assert_eq!(t, before);
        }
    }

    #[test]
    fn test_convolve_renormalizes() {
        let xs = vec![2.0; 5];
        let out = convolve(&xs, &gaussian_kernel(2.0), 0.0);
        assert!(out.iter().all(|&v| f64_eq(v, 2.0)));
    }
}
