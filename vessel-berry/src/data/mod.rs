//! 体数据与数据模型.

use std::ops::Index;
use std::path::Path;

use nalgebra::Point3;
use ndarray::{Array3, ArrayView3, Ix3, Zip};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::consts::mask;
use crate::error::{VesselError, VesselResult};
use crate::{Idx3d, Idx3dF};

pub mod geometry;
pub mod group;
pub mod phantom;
pub mod raster;
pub mod seed;
pub mod tube;

pub use geometry::{Geometry, GeometryError};

/// 连续索引越界判定的容差.
const INDEX_EPS: f64 = 1e-6;

/// 带空间信息的三维体数据. 数据按 `(z, h, w)` 排列.
///
/// 体数据一经某阶段生成便不再修改; 变换总是返回新的 `Volume`.
#[derive(Debug, Clone)]
pub struct Volume<T> {
    geometry: Geometry,
    data: Array3<T>,
}

/// MRA 强度体数据.
pub type ScalarVolume = Volume<f32>;

/// 二值掩膜, 取值 `{0, 1}`.
pub type BinaryMask = Volume<u8>;

/// 训练标签体数据, 取值见 `consts::label`.
pub type LabelVolume = Volume<u8>;

/// 体数据空间属性的共用操作.
pub trait VolumeGeometry {
    /// 获取空间信息.
    fn geometry(&self) -> &Geometry;

    /// 获取数据形状大小.
    fn shape(&self) -> Idx3d;

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率, 按 `(z, h, w)` 排列, 以毫米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        self.geometry().spacing_zhw()
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        z == h && z == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 整数索引 -> 物理坐标.
    #[inline]
    fn to_physical(&self, &(z, h, w): &Idx3d) -> Point3<f64> {
        self.geometry()
            .to_physical((z as f64, h as f64, w as f64))
    }

    /// 物理坐标 -> 连续索引.
    #[inline]
    fn to_continuous_index(&self, p: &Point3<f64>) -> Idx3dF {
        self.geometry().to_continuous_index(p)
    }

    /// 物理坐标对应的最近体素. 若在数据范围外则返回 `None`.
    fn nearest_index(&self, p: &Point3<f64>) -> Option<Idx3d> {
        let (z, h, w) = self.to_continuous_index(p);
        let (z, h, w) = (z.round(), h.round(), w.round());
        if z < 0.0 || h < 0.0 || w < 0.0 {
            return None;
        }
        let idx = (z as usize, h as usize, w as usize);
        self.check(&idx).then_some(idx)
    }

    /// 连续索引距离数据边界是否至少为 `border` 个体素.
    fn inside_border(&self, (z, h, w): Idx3dF, border: f64) -> bool {
        let (nz, nh, nw) = self.shape();
        [(z, nz), (h, nh), (w, nw)].iter().all(|&(c, n)| {
            c >= border - INDEX_EPS && c <= (n as f64 - 1.0 - border) + INDEX_EPS
        })
    }

    /// 物理坐标是否位于数据的包围盒内 (体素中心构成的范围).
    #[inline]
    fn contains_physical(&self, p: &Point3<f64>) -> bool {
        self.inside_border(self.to_continuous_index(p), 0.0)
    }
}

impl<T> VolumeGeometry for Volume<T> {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> Volume<T> {
    /// 由数据和空间信息构造体数据.
    #[inline]
    pub fn new(data: Array3<T>, geometry: Geometry) -> Self {
        Self { geometry, data }
    }

    /// 以相同空间信息包装新数据. 形状不一致时返回 `Err`.
    pub fn with_data<U>(&self, data: Array3<U>) -> VesselResult<Volume<U>> {
        if data.dim() != self.data.dim() {
            return Err(VesselError::input(format!(
                "shape mismatch: expected {:?}, got {:?}",
                self.data.dim(),
                data.dim()
            )));
        }
        Ok(Volume::new(data, self.geometry.clone()))
    }

    /// 创建相同空间信息, 全部填充为 `v` 的体数据.
    #[inline]
    pub fn filled_like<U: Clone>(&self, v: U) -> Volume<U> {
        Volume::new(Array3::from_elem(self.data.dim(), v), self.geometry.clone())
    }

    /// 直接获得底层数据的只读视图.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 底层数据引用.
    #[inline]
    pub fn raw(&self) -> &Array3<T> {
        &self.data
    }

    /// 消费自我, 获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<T> {
        self.data
    }

    /// 是否与 `other` 形状相同?
    #[inline]
    pub fn same_shape<U>(&self, other: &Volume<U>) -> bool {
        self.data.dim() == other.data.dim()
    }

    /// 对每个体素施加 `f`, 生成新的体数据.
    pub fn map<U, F>(&self, f: F) -> Volume<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        let zip = Zip::from(&self.data);
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let data = zip.par_map_collect(f);
            } else {
                let data = zip.map_collect(f);
            }
        }
        Volume::new(data, self.geometry.clone())
    }

    /// 逐体素组合两个体数据. 形状不一致时返回 `Err`.
    pub fn zip_map<U, V, F>(&self, other: &Volume<U>, f: F) -> VesselResult<Volume<V>>
    where
        T: Sync,
        U: Sync,
        V: Send,
        F: Fn(&T, &U) -> V + Sync + Send,
    {
        if !self.same_shape(other) {
            return Err(VesselError::input(format!(
                "shape mismatch: {:?} vs {:?}",
                self.data.dim(),
                other.data.dim()
            )));
        }
        let zip = Zip::from(&self.data).and(&other.data);
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let data = zip.par_map_collect(f);
            } else {
                let data = zip.map_collect(f);
            }
        }
        Ok(Volume::new(data, self.geometry.clone()))
    }
}

impl<T: Copy + PartialOrd> Volume<T> {
    /// 全局最小值与最大值. 空数据返回 `None`.
    pub fn min_max(&self) -> Option<(T, T)> {
        let mut it = self.data.iter().copied();
        let first = it.next()?;
        Some(it.fold((first, first), |(lo, hi), v| {
            (
                if v < lo { v } else { lo },
                if v > hi { v } else { hi },
            )
        }))
    }
}

impl Volume<f32> {
    /// 打开 nii 格式的 3D MRA 扫描. `path` 为 nii 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> VesselResult<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let geometry = Geometry::from_nifti_header(obj.header())
            .map_err(|e| VesselError::input(e.to_string()))?;

        let data = obj.into_volume().into_ndarray::<f32>()?;
        if data.ndim() != 3 {
            return Err(VesselError::input(format!(
                "expected a 3-D volume, got {} dimensions",
                data.ndim()
            )));
        }

        // [W, H, z] -> [z, H, W].
        let data = data
            .permuted_axes([2, 1, 0].as_slice())
            .into_dimensionality::<Ix3>()
            .map_err(|e| VesselError::input(e.to_string()))?;
        Ok(Self::new(data.as_standard_layout().into_owned(), geometry))
    }

    /// 三线性插值. 连续索引超出数据范围时返回 `None`.
    pub fn sample(&self, (z, h, w): Idx3dF) -> Option<f64> {
        let (nz, nh, nw) = self.shape();
        let az = axis_weights(z, nz)?;
        let ah = axis_weights(h, nh)?;
        let aw = axis_weights(w, nw)?;
        Some(self.blend(az, ah, aw))
    }

    /// 三线性插值. 越界的连续索引会先被截断到数据范围内.
    pub fn sample_clamped(&self, (z, h, w): Idx3dF) -> f64 {
        let (nz, nh, nw) = self.shape();
        let clamp = |c: f64, n: usize| {
            if c.is_nan() {
                0.0
            } else {
                c.clamp(0.0, (n - 1) as f64)
            }
        };
        // 截断后必然合法.
        let az = axis_weights(clamp(z, nz), nz).unwrap_or((0, 0, 0.0));
        let ah = axis_weights(clamp(h, nh), nh).unwrap_or((0, 0, 0.0));
        let aw = axis_weights(clamp(w, nw), nw).unwrap_or((0, 0, 0.0));
        self.blend(az, ah, aw)
    }

    /// 在物理坐标处做三线性插值.
    #[inline]
    pub fn sample_physical(&self, p: &Point3<f64>) -> Option<f64> {
        self.sample(self.to_continuous_index(p))
    }

    fn blend(
        &self,
        (z0, z1, tz): (usize, usize, f64),
        (h0, h1, th): (usize, usize, f64),
        (w0, w1, tw): (usize, usize, f64),
    ) -> f64 {
        let d = &self.data;
        let lerp = |a: f32, b: f32, t: f64| a as f64 * (1.0 - t) + b as f64 * t;
        let c00 = lerp(d[(z0, h0, w0)], d[(z0, h0, w1)], tw);
        let c01 = lerp(d[(z0, h1, w0)], d[(z0, h1, w1)], tw);
        let c10 = lerp(d[(z1, h0, w0)], d[(z1, h0, w1)], tw);
        let c11 = lerp(d[(z1, h1, w0)], d[(z1, h1, w1)], tw);
        let c0 = c00 * (1.0 - th) + c01 * th;
        let c1 = c10 * (1.0 - th) + c11 * th;
        c0 * (1.0 - tz) + c1 * tz
    }
}

impl Volume<u8> {
    /// 掩膜内体素个数.
    #[inline]
    pub fn count_inside(&self) -> usize {
        self.data.iter().filter(|&&v| mask::is_inside(v)).count()
    }

    /// 值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|&&v| v == label).count()
    }
}

/// 一维线性插值的两个端点和权重. `c` 越界时返回 `None`.
#[inline]
fn axis_weights(c: f64, n: usize) -> Option<(usize, usize, f64)> {
    let hi = (n - 1) as f64;
    if !(c >= -INDEX_EPS && c <= hi + INDEX_EPS) {
        return None;
    }
    let c = c.clamp(0.0, hi);
    let i0 = (c.floor() as usize).min(n.saturating_sub(2));
    let i1 = (i0 + 1).min(n - 1);
    Some((i0, i1, c - i0 as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    fn ramp() -> ScalarVolume {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, h, w)| (z * 100 + h * 10 + w) as f32);
        Volume::new(data, Geometry::isotropic(0.5).unwrap())
    }

    #[test]
    fn test_trilinear_sample() {
        let v = ramp();
        assert!(f64_eq(v.sample((1.0, 2.0, 3.0)).unwrap(), 123.0));
        // 线性函数的三线性插值是精确的.
        assert!(f64_eq(v.sample((0.5, 1.25, 3.5)).unwrap(), 50.0 + 12.5 + 3.5));
        assert!(f64_eq(v.sample((2.0, 3.0, 4.0)).unwrap(), 234.0));
        assert!(v.sample((2.1, 0.0, 0.0)).is_none());
        assert!(v.sample((-0.1, 0.0, 0.0)).is_none());
        assert!(f64_eq(v.sample_clamped((5.0, -3.0, 1.0)), 201.0));
    }

    #[test]
    fn test_physical_mapping() {
        let v = ramp();
        let p = v.to_physical(&(2, 3, 4));
        assert!(f64_eq(p.x, 2.0) && f64_eq(p.y, 1.5) && f64_eq(p.z, 1.0));
        assert_eq!(v.nearest_index(&p), Some((2, 3, 4)));
        assert!(v.contains_physical(&p));
        assert!(!v.contains_physical(&Point3::new(2.1, 0.0, 0.0)));
        assert!(v.inside_border((1.0, 1.0, 1.0), 1.0));
        assert!(!v.inside_border((1.0, 1.0, 0.5), 1.0));
    }

    #[test]
    fn test_map_keeps_source() {
        let v = ramp();
        let doubled = v.map(|x| x * 2.0);
        assert_eq!(doubled[(1, 1, 1)], 222.0);
        assert_eq!(v[(1, 1, 1)], 111.0);
        assert_eq!(v.min_max(), Some((0.0, 234.0)));

        let other = v.filled_like(1u8);
        let sum = v.zip_map(&other, |a, b| a + *b as f32).unwrap();
        assert_eq!(sum[(0, 0, 0)], 1.0);

        let wrong = Volume::new(Array3::<u8>::zeros((1, 1, 1)), Geometry::isotropic(1.0).unwrap());
        assert!(v.zip_map(&wrong, |a, _| *a).is_err());
    }
}
