//! 通用常量.

/// 训练标签体素值.
pub mod label {
    /// 脊 (血管) 体素.
    pub const RIDGE: u8 = 255;

    /// 背景带体素.
    pub const BACKGROUND: u8 = 128;

    /// 未知体素, 不参与训练.
    pub const UNKNOWN: u8 = 0;

    /// 体素是否是脊?
    #[inline]
    pub const fn is_ridge(p: u8) -> bool {
        matches!(p, RIDGE)
    }

    /// 体素是否是背景带?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }
}

/// 二值掩膜体素值.
pub mod mask {
    /// 掩膜内.
    pub const INSIDE: u8 = 1;

    /// 掩膜外.
    pub const OUTSIDE: u8 = 0;

    /// 体素是否在掩膜内?
    #[inline]
    pub const fn is_inside(p: u8) -> bool {
        matches!(p, INSIDE)
    }
}

/// 归一化后的强度上界.
pub const NORMALIZED_MAX: f64 = 100.0;

/// 默认血管增强尺度 (需再乘以血管尺度和体素分辨率).
pub const ENHANCEMENT_SCALES: [f64; 5] = [0.5, 0.75, 1.25, 2.0, 3.0];

/// 径向采样角度数. 半径估计和分支度计算共用.
pub const RING_SAMPLES: usize = 16;

/// tube 表面网格的默认边数.
pub const SURFACE_SIDES: usize = 5;
