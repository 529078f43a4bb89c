//! 6-邻域三维连通分量标记.

use std::collections::VecDeque;

use ndarray::Array3;

use crate::consts::mask::{self, INSIDE, OUTSIDE};
use crate::data::{BinaryMask, Volume, VolumeGeometry};
use crate::Idx3d;

/// 连通分量标记结果.
#[derive(Debug, Clone)]
pub struct Components {
    /// 每个体素所属分量的编号, 0 表示背景. 编号从 1 开始.
    pub labels: Array3<u32>,

    /// 每个分量的体素个数. `sizes[i]` 对应编号 `i + 1`.
    pub sizes: Vec<usize>,
}

/// 获取 `pos` 前后上下左右六个点的坐标.
///
/// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
pub(crate) fn diamond_neighbours((z, h, w): Idx3d, (nz, nh, nw): Idx3d) -> impl Iterator<Item = Idx3d> {
    [
        (z.wrapping_sub(1), h, w),
        (z.saturating_add(1), h, w),
        (z, h.wrapping_sub(1), w),
        (z, h.saturating_add(1), w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w.saturating_add(1)),
    ]
    .into_iter()
    .filter(move |&(z, h, w)| z < nz && h < nh && w < nw)
}

/// 对掩膜内体素做 6-邻域连通分量标记. 分量按首个体素的行主序出现顺序编号.
pub fn label_components(m: &BinaryMask) -> Components {
    let shape = m.shape();
    let data = m.raw();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for (start, &v) in data.indexed_iter() {
        if !mask::is_inside(v) || labels[start] != 0 {
            continue;
        }
        let id = sizes.len() as u32 + 1;
        labels[start] = id;
        queue.push_back(start);
        let mut count = 0usize;
        while let Some(cur) = queue.pop_front() {
            count += 1;
            for nb in diamond_neighbours(cur, shape) {
                if mask::is_inside(data[nb]) && labels[nb] == 0 {
                    labels[nb] = id;
                    queue.push_back(nb);
                }
            }
        }
        sizes.push(count);
    }
    Components { labels, sizes }
}

impl BinaryMask {
    /// 删除体素个数小于 `min_volume` 的连通分量, 返回新的二值掩膜.
    pub fn remove_small_components(&self, min_volume: usize) -> BinaryMask {
        let Components { labels, sizes } = label_components(self);
        let data = labels.mapv(|l| {
            if l != 0 && sizes[(l - 1) as usize] >= min_volume {
                INSIDE
            } else {
                OUTSIDE
            }
        });
        Volume::new(data, self.geometry().clone())
    }
}
