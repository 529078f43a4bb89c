//! 集成测试共用的合成数据与参数.

#![allow(dead_code)]

use std::path::PathBuf;

use nalgebra::Point3;
use vessel_berry::data::phantom::PhantomBuilder;
use vessel_berry::{PipelineConfig, ScalarVolume};

/// 体素分辨率 (mm).
pub const SPACING: f64 = 0.3;

/// 管道半径 (mm), 即 5 个体素.
pub const RADIUS: f64 = 1.5;

/// 管道中心线的 `y`, `z` 坐标 (mm).
pub const CENTER: f64 = 18.0 * SPACING;

/// 管道两端的 `x` 坐标 (mm), 长 20 mm.
pub const ENDS: (f64, f64) = (3.0, 23.0);

/// 均匀噪声中的一根亮直管.
pub fn tube_phantom(seed: u64) -> ScalarVolume {
    PhantomBuilder::new((36, 36, 84), SPACING)
        .background(40.0)
        .foreground(120.0)
        .noise(4.0)
        .seed(seed)
        .tube(
            Point3::new(ENDS.0, CENTER, CENTER),
            Point3::new(ENDS.1, CENTER, CENTER),
            RADIUS,
        )
        .build()
        .unwrap()
}

/// 默认参数, 但把最小长度缩小到与 20 mm 的合成管道相称.
pub fn phantom_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default().with_min_vessel_length(10.0);
    cfg.training_thresholds = cfg.training_thresholds.with_min_length(8.0);
    cfg
}

/// 每个测试独占的临时目录.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vessel-berry-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init();
}

/// 中位数.
pub fn median(mut xs: Vec<f64>) -> f64 {
    xs.sort_by(|a, b| a.total_cmp(b));
    xs[xs.len() / 2]
}
