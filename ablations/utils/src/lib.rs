//! 消融实验依赖的通用组件.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use vessel_berry::{PipelineConfig, VesselError, VesselResult};

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 简单分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 从 JSON 文件读取管线参数. 文件中缺省的字段取默认值.
pub fn load_config<P: AsRef<Path>>(path: P) -> VesselResult<PipelineConfig> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| VesselError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| VesselError::format(format!("{}: {e}", path.display())))
}

/// 若 `path` 给出则读取 JSON 参数, 否则使用默认参数.
pub fn config_or_default<P: AsRef<Path>>(path: Option<P>) -> VesselResult<PipelineConfig> {
    path.map_or_else(|| Ok(PipelineConfig::default()), load_config)
}
