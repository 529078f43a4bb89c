//! 不同血管尺度下的提取效果与耗时比较.
//!
//! 用法: `scales [config.json]`. 输入由 `$MRA_INPUT` 指定, 缺省时使用合成数据;
//! 输出目录由 `$MRA_OUTPUT_DIR` 指定.

mod profile;
mod result;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("Logger initialization error");

    let config = std::env::args_os().nth(1).map(PathBuf::from);
    let result = match runner::run(config) {
        Ok(r) => r,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = result.analyze() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }
    if result.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
