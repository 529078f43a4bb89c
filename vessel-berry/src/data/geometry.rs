//! 体素索引与物理坐标之间的映射.

use nalgebra::{Matrix3, Point3, Vector3};
use nifti::NiftiHeader;
use thiserror::Error;

use crate::Idx3dF;

/// 构造 `Geometry` 时可能出现的错误.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// 体素分辨率必须为有限正数.
    #[error("voxel spacing must be finite and positive")]
    NonPositiveSpacing,

    /// 方向矩阵不可逆.
    #[error("direction matrix is singular")]
    SingularDirection,
}

/// 三维体数据的空间信息: 体素分辨率, 原点和方向.
///
/// 物理坐标遵循 ITK 约定 (LPS). 对连续索引 `(z, h, w)`, 有
/// `p = origin + direction * (spacing ⊙ (w, h, z))`.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// `(x, y, z)` 三个方向的体素分辨率, 以毫米为单位.
    spacing: Vector3<f64>,
    origin: Point3<f64>,
    direction: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Geometry {
    /// 构造空间信息. `spacing` 和 `origin` 均按 `(x, y, z)` 排列.
    pub fn new(
        spacing: [f64; 3],
        origin: [f64; 3],
        direction: Matrix3<f64>,
    ) -> Result<Self, GeometryError> {
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(GeometryError::NonPositiveSpacing);
        }
        let inverse = direction
            .try_inverse()
            .ok_or(GeometryError::SingularDirection)?;
        Ok(Self {
            spacing: Vector3::from(spacing),
            origin: Point3::from(origin),
            direction,
            inverse,
        })
    }

    /// 原点为 0, 方向为单位阵的各向同性空间信息.
    pub fn isotropic(spacing: f64) -> Result<Self, GeometryError> {
        Self::new([spacing; 3], [0.0; 3], Matrix3::identity())
    }

    /// 根据 nifti header 构造空间信息, 并转换到 ITK 使用的 LPS 坐标系.
    ///
    /// 优先使用 sform, 其次 qform. 两者都缺失时方向取单位阵, 原点取 0.
    pub fn from_nifti_header(h: &NiftiHeader) -> Result<Self, GeometryError> {
        let spacing = [
            h.pixdim[1].abs() as f64,
            h.pixdim[2].abs() as f64,
            h.pixdim[3].abs() as f64,
        ];
        let (mut direction, mut origin) = if h.sform_code > 0 {
            let rows = [h.srow_x, h.srow_y, h.srow_z];
            let mut m = Matrix3::from_fn(|r, c| rows[r][c] as f64);
            for mut col in m.column_iter_mut() {
                let n = col.norm();
                if n > 0.0 {
                    col /= n;
                }
            }
            let o = [rows[0][3] as f64, rows[1][3] as f64, rows[2][3] as f64];
            (m, o)
        } else if h.qform_code > 0 {
            let (b, c, d) = (h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64);
            let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();
            let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            #[rustfmt::skip]
            let m = Matrix3::new(
                a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d),         qfac * 2.0 * (b * d + a * c),
                2.0 * (b * c + a * d),         a * a + c * c - b * b - d * d, qfac * 2.0 * (c * d - a * b),
                2.0 * (b * d - a * c),         2.0 * (c * d + a * b),         qfac * (a * a + d * d - c * c - b * b),
            );
            let o = [h.quatern_x as f64, h.quatern_y as f64, h.quatern_z as f64];
            (m, o)
        } else {
            (Matrix3::identity(), [0.0; 3])
        };

        // RAS -> LPS.
        for r in 0..2 {
            for c in 0..3 {
                direction[(r, c)] = -direction[(r, c)];
            }
            origin[r] = -origin[r];
        }
        Self::new(spacing, origin, direction)
    }

    /// `(x, y, z)` 体素分辨率.
    #[inline]
    pub fn spacing(&self) -> &Vector3<f64> {
        &self.spacing
    }

    /// 按 `(z, h, w)` 排列的体素分辨率.
    #[inline]
    pub fn spacing_zhw(&self) -> [f64; 3] {
        [self.spacing.z, self.spacing.y, self.spacing.x]
    }

    /// 最小体素分辨率.
    #[inline]
    pub fn min_spacing(&self) -> f64 {
        self.spacing.min()
    }

    /// 原点.
    #[inline]
    pub fn origin(&self) -> &Point3<f64> {
        &self.origin
    }

    /// 方向矩阵. 各列为索引轴 `x, y, z` 在物理空间中的单位方向.
    #[inline]
    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    /// 连续索引 -> 物理坐标.
    #[inline]
    pub fn to_physical(&self, (z, h, w): Idx3dF) -> Point3<f64> {
        self.origin + self.direction * self.spacing.component_mul(&Vector3::new(w, h, z))
    }

    /// 物理坐标 -> 连续索引.
    #[inline]
    pub fn to_continuous_index(&self, p: &Point3<f64>) -> Idx3dF {
        let v = (self.inverse * (p - self.origin)).component_div(&self.spacing);
        (v.z, v.y, v.x)
    }

    /// 将物理空间中的向量转换到 "按轴对齐的物理单位" 坐标系 (即仅去除方向旋转).
    #[inline]
    pub fn to_axis_aligned(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.inverse * v
    }

    /// 将 "按轴对齐的物理单位" 坐标系中的向量转换回物理空间.
    #[inline]
    pub fn from_axis_aligned(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.direction * v
    }
}
