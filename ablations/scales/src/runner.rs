//! 程序运行函数.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use log::{info, warn};
use vessel_berry::io::{save_mip, MipAxis};
use vessel_berry::{
    PipelineConfig, ScalarVolume, TraceInput, VesselError, VesselPipeline, VesselResult,
};

use crate::profile::Profile;
use crate::result::AblationResult;
use utils::loader::{self, Source};

/// 参与比较的血管尺度.
pub const SCALES: [f64; 4] = [0.5, 1.0, 1.5, 2.0];

/// 合成数据只有 20 余 mm 长, 需要相应缩小最小长度.
fn phantom_config(mut cfg: PipelineConfig) -> PipelineConfig {
    cfg.extraction_thresholds = cfg.extraction_thresholds.with_min_length(10.0);
    cfg.training_thresholds = cfg.training_thresholds.with_min_length(8.0);
    cfg
}

/// 在单个尺度上运行完整管线, 写出 tube 树, 调试文件与 MIP.
fn run_scale(input: &ScalarVolume, cfg: PipelineConfig, out: &Path, stem: &str) -> Profile {
    let scale = cfg.vessel_scale;
    let mut profile = Profile::new(scale);
    let prefix = out.join(format!("{stem}-s{scale:.1}"));
    let mut pipeline = VesselPipeline::new(input.clone(), cfg.with_debug_prefix(&prefix));

    loop {
        profile.stage_start();
        match pipeline.step(TraceInput::Primary) {
            Ok(Some(state)) => profile.stage_elapsed(state),
            Ok(None) => break,
            Err(e) => {
                warn!("scale {scale}: {e}");
                profile.fail(e);
                return profile.finish();
            }
        }
    }

    if let Some(group) = pipeline.tubes() {
        profile.count_tubes(group);
        let tre = PathBuf::from(format!("{}.tre", prefix.display()));
        if let Err(e) = group.save_tre(&tre) {
            warn!("scale {scale}: {e}");
            profile.fail(e);
        }
    }
    if let Some(enhanced) = pipeline.enhanced() {
        let png = PathBuf::from(format!("{}-vesselness-mip.png", prefix.display()));
        if let Err(e) = save_mip(&enhanced.vesselness, MipAxis::Axial, &png) {
            warn!("scale {scale}: {e}");
        }
    }
    profile.finish()
}

/// 实际运行. `config` 为可选的 JSON 参数文件.
pub fn run(config: Option<PathBuf>) -> VesselResult<AblationResult> {
    let source = Source::from_env_or_home();
    let input = source.load()?;
    let stem = source.stem();
    let base = match (&source, config) {
        (Source::Phantom, None) => phantom_config(PipelineConfig::default()),
        (_, config) => utils::config_or_default(config)?,
    };

    let out = loader::output_dir_from_env_or_temp();
    fs::create_dir_all(&out).map_err(|e| VesselError::io(&out, e))?;
    info!("input `{stem}`, output directory {}", out.display());
    save_mip(&input, MipAxis::Axial, out.join(format!("{stem}-input-mip.png")))?;

    println!("Running ablation studies on {} cpus...", utils::cpus());
    let (input, out, stem) = (&input, out.as_path(), stem.as_str());
    Ok(thread::scope(|s| {
        let handles = SCALES.map(|scale| {
            let cfg = base.clone().with_vessel_scale(scale);
            s.spawn(move || run_scale(input, cfg, out, stem))
        });

        AblationResult::from_iter(
            handles
                .into_iter()
                .map(|th| th.join().expect("Thread joining error")),
        )
    }))
}
