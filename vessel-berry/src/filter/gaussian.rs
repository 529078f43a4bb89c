//! 可分离高斯模糊.

use ndarray::{Array3, ArrayView1, ArrayViewMut1, Axis, Zip};

use crate::data::{ScalarVolume, VolumeGeometry};

/// 小于该值 (以体素为单位) 的 sigma 视为不模糊.
const MIN_SIGMA_INDEX: f64 = 1e-2;

/// 归一化的一维高斯核, 以 `sigma` 个下标为标准差, 截断于 `±ceil(3 * sigma)`.
///
/// 返回的核长度为奇数, 中心位于 `len / 2`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma < MIN_SIGMA_INDEX {
        return vec![1.0];
    }
    let r = (3.0 * sigma).ceil() as isize;
    let mut k: Vec<f64> = (-r..=r)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let s: f64 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= s);
    k
}

/// 沿 `axis` 做一维卷积, 边界处复制最近的值.
fn convolve_axis(src: &Array3<f32>, axis: Axis, kernel: &[f64]) -> Array3<f32> {
    let mut out = Array3::<f32>::zeros(src.raw_dim());
    let r = kernel.len() / 2;
    let op = |mut o: ArrayViewMut1<f32>, i: ArrayView1<f32>| {
        let n = i.len();
        for k in 0..n {
            let acc: f64 = kernel
                .iter()
                .enumerate()
                .map(|(j, w)| w * i[(k + j).saturating_sub(r).min(n - 1)] as f64)
                .sum();
            o[k] = acc as f32;
        }
    };
    let zip = Zip::from(out.lanes_mut(axis)).and(src.lanes(axis));
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            zip.par_for_each(op);
        } else {
            zip.for_each(op);
        }
    }
    out
}

/// 对数组做各向异性高斯模糊. `sigma_zhw` 以体素为单位, 按 `(z, h, w)` 排列.
pub fn blur_array(src: &Array3<f32>, sigma_zhw: [f64; 3]) -> Array3<f32> {
    let mut cur = src.clone();
    for (a, s) in sigma_zhw.into_iter().enumerate() {
        if s >= MIN_SIGMA_INDEX && cur.len_of(Axis(a)) > 1 {
            cur = convolve_axis(&cur, Axis(a), &gaussian_kernel(s));
        }
    }
    cur
}

impl ScalarVolume {
    /// 以物理单位 `sigma` 做各向同性高斯模糊, 返回新的体数据.
    pub fn blur(&self, sigma: f64) -> ScalarVolume {
        let [sz, sh, sw] = self.pix_dim();
        let data = blur_array(self.raw(), [sigma / sz, sigma / sh, sigma / sw]);
        Self::new(data, self.geometry().clone())
    }

    /// 以 `scale` 倍体素分辨率为标准差做高斯模糊, 各轴分别取各自的分辨率.
    pub fn blur_by_spacing(&self, scale: f64) -> ScalarVolume {
        let data = blur_array(self.raw(), [scale; 3]);
        Self::new(data, self.geometry().clone())
    }
}
