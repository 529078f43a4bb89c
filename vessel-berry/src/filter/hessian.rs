//! 高斯导数 (jet) 与 Hessian 特征分析.

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use ndarray::Array3;

use crate::data::{ScalarVolume, VolumeGeometry};

/// 某点处尺度为 `sigma` 的高斯平滑值, 梯度和 Hessian (物理坐标系).
#[derive(Debug, Clone, PartialEq)]
pub struct Jet {
    /// 平滑后的强度.
    pub value: f64,
    /// 梯度.
    pub gradient: Vector3<f64>,
    /// Hessian.
    pub hessian: Matrix3<f64>,
}

/// Hessian 的特征分解, 特征值升序排列 (`λ1 ≤ λ2 ≤ λ3`).
///
/// 对亮管而言 `λ1, λ2` 为较大的负值, 其特征向量张成法平面; `λ3` 接近 0, 对应切向.
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeFrame {
    /// 升序特征值.
    pub values: [f64; 3],
    /// 第一法向 (对应 `λ1`).
    pub n1: Vector3<f64>,
    /// 第二法向 (对应 `λ2`).
    pub n2: Vector3<f64>,
    /// 切向 (对应 `λ3`).
    pub tangent: Vector3<f64>,
}

impl RidgeFrame {
    /// 特征分解.
    pub fn new(hessian: &Matrix3<f64>) -> Self {
        let eig = SymmetricEigen::new(*hessian);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
        let vec = |i: usize| eig.eigenvectors.column(order[i]).into_owned();
        Self {
            values: order.map(|i| eig.eigenvalues[i]),
            n1: vec(0),
            n2: vec(1),
            tangent: vec(2),
        }
    }

    /// 两个法向特征值是否都为负 (亮脊)?
    #[inline]
    pub fn is_bright_ridge(&self) -> bool {
        self.values[0] < 0.0 && self.values[1] < 0.0
    }
}

/// 对称阵的特征值, 升序.
#[inline]
pub fn sorted_eigenvalues(h: &Matrix3<f64>) -> [f64; 3] {
    let e = h.symmetric_eigenvalues();
    let mut v = [e[0], e[1], e[2]];
    v.sort_by(f64::total_cmp);
    v
}

/// 一个轴上的高斯权重及其一阶, 二阶导数.
struct AxisWeights {
    start: usize,
    g0: Vec<f64>,
    g1: Vec<f64>,
    g2: Vec<f64>,
}

impl AxisWeights {
    /// `c` 为该轴上的连续索引, `n` 为轴长, `sp` 为分辨率, `sigma` 为物理标准差.
    fn new(c: f64, n: usize, sp: f64, sigma: f64) -> Self {
        let r = (3.0 * sigma / sp).ceil().max(1.0);
        let start = (c - r).floor().max(0.0) as usize;
        let end = ((c + r).ceil() as usize).min(n - 1);
        let s2 = sigma * sigma;
        let us: Vec<f64> = (start..=end).map(|i| (c - i as f64) * sp).collect();
        let g0: Vec<f64> = us.iter().map(|u| (-u * u / (2.0 * s2)).exp()).collect();
        let mut g1: Vec<f64> = us.iter().zip(&g0).map(|(u, g)| -u / s2 * g).collect();
        let mut g2: Vec<f64> = us
            .iter()
            .zip(&g0)
            .map(|(u, g)| (u * u / (s2 * s2) - 1.0 / s2) * g)
            .collect();

        // 截断后的离散核矩不再精确, 需重新归一化:
        // 常数的导数为 0, 线性函数的一阶导为 1, 二次函数的二阶导为 2.
        let s0: f64 = g0.iter().sum();
        for g in [&mut g1, &mut g2] {
            let mean = g.iter().sum::<f64>() / s0;
            g.iter_mut().zip(&g0).for_each(|(v, w)| *v -= mean * w);
        }
        let m1: f64 = us.iter().zip(&g1).map(|(u, g)| -u * g).sum();
        let m2: f64 = us.iter().zip(&g2).map(|(u, g)| u * u * g).sum::<f64>() / 2.0;
        if m1.abs() > f64::EPSILON {
            g1.iter_mut().for_each(|v| *v *= s0 / m1);
        }
        if m2.abs() > f64::EPSILON {
            g2.iter_mut().for_each(|v| *v *= s0 / m2);
        }
        Self { start, g0, g1, g2 }
    }

    #[inline]
    fn sum(&self) -> f64 {
        self.g0.iter().sum()
    }
}

/// 计算物理坐标 `p` 处尺度为 `sigma` (物理单位) 的 jet.
///
/// 在 `p` 周围 `3 * sigma` 的邻域内直接求和. 邻域被数据边界截断时按实际权重归一化.
/// `p` 在数据范围外时返回 `None`.
pub fn jet_at(vol: &ScalarVolume, p: &Point3<f64>, sigma: f64) -> Option<Jet> {
    let (cz, ch, cw) = vol.to_continuous_index(p);
    if !vol.inside_border((cz, ch, cw), 0.0) || sigma <= 0.0 {
        return None;
    }
    let (nz, nh, nw) = vol.shape();
    let [sz, sh, sw] = vol.pix_dim();
    let wz = AxisWeights::new(cz, nz, sz, sigma);
    let wy = AxisWeights::new(ch, nh, sh, sigma);
    let wx = AxisWeights::new(cw, nw, sw, sigma);
    let norm = wz.sum() * wy.sum() * wx.sum();
    if norm <= 0.0 {
        return None;
    }

    let data: &Array3<f32> = vol.raw();
    // v, dx, dy, dz, dxx, dyy, dzz, dxy, dxz, dyz
    let mut acc = [0.0f64; 10];
    for (kz, ((z0, z1), z2)) in wz.g0.iter().zip(wz.g1.iter()).zip(wz.g2.iter()).enumerate() {
        let z = wz.start + kz;
        for (ky, ((y0, y1), y2)) in wy.g0.iter().zip(wy.g1.iter()).zip(wy.g2.iter()).enumerate() {
            let y = wy.start + ky;
            let (mut s0, mut s1, mut s2) = (0.0, 0.0, 0.0);
            for (kx, ((x0, x1), x2)) in wx.g0.iter().zip(wx.g1.iter()).zip(wx.g2.iter()).enumerate() {
                let i = data[(z, y, wx.start + kx)] as f64;
                s0 += i * x0;
                s1 += i * x1;
                s2 += i * x2;
            }
            acc[0] += s0 * y0 * z0;
            acc[1] += s1 * y0 * z0;
            acc[2] += s0 * y1 * z0;
            acc[3] += s0 * y0 * z1;
            acc[4] += s2 * y0 * z0;
            acc[5] += s0 * y2 * z0;
            acc[6] += s0 * y0 * z2;
            acc[7] += s1 * y1 * z0;
            acc[8] += s1 * y0 * z1;
            acc[9] += s0 * y1 * z1;
        }
    }
    acc.iter_mut().for_each(|v| *v /= norm);
    let [v, dx, dy, dz, dxx, dyy, dzz, dxy, dxz, dyz] = acc;

    let g = vol.geometry();
    let gradient = g.from_axis_aligned(&Vector3::new(dx, dy, dz));
    #[rustfmt::skip]
    let h = Matrix3::new(
        dxx, dxy, dxz,
        dxy, dyy, dyz,
        dxz, dyz, dzz,
    );
    let d = g.direction();
    Some(Jet {
        value: v,
        gradient,
        hessian: d * h * d.transpose(),
    })
}

/// 在已模糊的数组上用中心差分计算体素 `(z, h, w)` 处的 Hessian (轴对齐的物理单位).
///
/// 边界处索引被截断. `spacing` 按 `(z, h, w)` 排列.
pub fn hessian_at_voxel(a: &Array3<f32>, (z, h, w): (usize, usize, usize), spacing: [f64; 3]) -> Matrix3<f64> {
    let (nz, nh, nw) = a.dim();
    let at = |z: isize, h: isize, w: isize| {
        let c = |v: isize, n: usize| v.clamp(0, n as isize - 1) as usize;
        a[(c(z, nz), c(h, nh), c(w, nw))] as f64
    };
    let (z, h, w) = (z as isize, h as isize, w as isize);
    let [sz, sh, sw] = spacing;
    let f = at(z, h, w);
    let dxx = (at(z, h, w + 1) - 2.0 * f + at(z, h, w - 1)) / (sw * sw);
    let dyy = (at(z, h + 1, w) - 2.0 * f + at(z, h - 1, w)) / (sh * sh);
    let dzz = (at(z + 1, h, w) - 2.0 * f + at(z - 1, h, w)) / (sz * sz);
    let dxy = (at(z, h + 1, w + 1) - at(z, h + 1, w - 1) - at(z, h - 1, w + 1)
        + at(z, h - 1, w - 1))
        / (4.0 * sw * sh);
    let dxz = (at(z + 1, h, w + 1) - at(z + 1, h, w - 1) - at(z - 1, h, w + 1)
        + at(z - 1, h, w - 1))
        / (4.0 * sw * sz);
    let dyz = (at(z + 1, h + 1, w) - at(z + 1, h - 1, w) - at(z - 1, h + 1, w)
        + at(z - 1, h - 1, w))
        / (4.0 * sh * sz);
    #[rustfmt::skip]
    let m = Matrix3::new(
        dxx, dxy, dxz,
        dxy, dyy, dyz,
        dxz, dyz, dzz,
    );
    m
}
