//! 最大强度投影 (MIP) 的 8-bit 灰度图输出.

use std::path::Path;

use ndarray::{Array2, Axis};

use crate::data::Volume;
use crate::error::VesselResult;

/// 投影方向.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MipAxis {
    /// 沿 z 轴投影, 得到 `(h, w)` 图像.
    Axial,

    /// 沿 h 轴投影, 得到 `(z, w)` 图像.
    Coronal,

    /// 沿 w 轴投影, 得到 `(z, h)` 图像.
    Sagittal,
}

impl MipAxis {
    #[inline]
    fn axis(self) -> Axis {
        match self {
            MipAxis::Axial => Axis(0),
            MipAxis::Coronal => Axis(1),
            MipAxis::Sagittal => Axis(2),
        }
    }
}

/// 计算最大强度投影.
pub fn max_projection<T: Copy + Into<f64>>(vol: &Volume<T>, axis: MipAxis) -> Array2<f64> {
    vol.raw()
        .fold_axis(axis.axis(), f64::NEG_INFINITY, |&acc, &v| acc.max(v.into()))
}

/// 将最大强度投影线性拉伸到 `[0, 255]` 后保存为 PNG.
///
/// # 注意
///
/// 投影为常数时整幅图为黑色.
pub fn save_mip<T, P>(vol: &Volume<T>, axis: MipAxis, path: P) -> VesselResult<()>
where
    T: Copy + Into<f64>,
    P: AsRef<Path>,
{
    let mip = max_projection(vol, axis);
    let (lo, hi) = mip
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    let (height, width) = mip.dim();
    let mut buf = image::GrayImage::new(width as u32, height as u32);
    for ((h, w), &v) in mip.indexed_iter() {
        let gray = if range > 0.0 {
            ((v - lo) / range * 255.0).round() as u8
        } else {
            0
        };
        buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
    }
    buf.save(path)?;
    Ok(())
}
