//! 追踪种子.

use nalgebra::Point3;

/// 物理空间中的种子点. 每个种子只会被追踪消费一次.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    /// 物理坐标.
    pub position: Point3<f64>,

    /// 初始半径估计 (物理单位). 训练种子没有该值.
    pub radius: Option<f64>,

    /// 种子被选中时的强度或概率.
    pub value: f64,
}

impl Seed {
    /// 创建不带半径估计的种子.
    #[inline]
    pub fn new(position: Point3<f64>, value: f64) -> Self {
        Self {
            position,
            radius: None,
            value,
        }
    }

    /// 附加半径估计.
    #[inline]
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }
}
