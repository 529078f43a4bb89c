mod common;

use common::*;
use vessel_berry::consts::mask::{INSIDE, OUTSIDE};
use vessel_berry::prelude::*;

fn check_tubes(group: &TubeGroup, vol: &ScalarVolume, min_length: f64) {
    assert!(!group.is_empty());
    group.validate_unique_ids().unwrap();
    for t in group.all_tubes() {
        for p in t.points() {
            assert!(vol.contains_physical(&p.position), "{:?}", p.position);
        }
    }

    // 至少有一条 tube 沿着合成管道, 足够长, 且半径误差在 20% 以内.
    let near_axis = |p: &TubePoint| {
        (p.position.y - CENTER).abs() < 0.5 && (p.position.z - CENTER).abs() < 0.5
    };
    let on_axis = group.all_tubes().into_iter().find(|t| {
        let n = t.points().iter().filter(|&p| near_axis(p)).count();
        n * 5 >= t.len() * 4
    });
    let tube = on_axis.expect("no tube follows the phantom centerline");
    assert!(tube.length() >= min_length, "{} mm", tube.length());
    let r = median(tube.points().iter().map(|p| p.radius).collect());
    assert!((r - RADIUS).abs() <= 0.2 * RADIUS, "median radius {r}");
}

#[test]
fn test_extract_phantom_tube() {
    init_logger();
    let vol = tube_phantom(11);
    let cfg = phantom_config();
    let min_length = cfg.extraction_thresholds.min_length;
    let group = extract_vessels(vol.clone(), cfg).unwrap();
    check_tubes(&group, &vol, min_length);

    // 持久化后再读回, 点数, 位置和全部逐点描述不变.
    let path = temp_dir("roundtrip").join("vessels.tre");
    group.save_tre(&path).unwrap();
    let back = TubeGroup::open_tre(&path).unwrap();
    assert_eq!(back.len(), group.len());
    for (a, b) in group.all_tubes().into_iter().zip(back.all_tubes()) {
        assert_eq!(a.id(), b.id());
        assert_eq!(a.len(), b.len());
        for (p, q) in a.points().iter().zip(b.points()) {
            assert!((p.position - q.position).norm() < 1e-12);
            assert_eq!(p, q);
        }
    }
}

#[test]
fn test_stagewise_with_debug_and_alternate_volume() {
    init_logger();
    let vol = tube_phantom(23);
    let dir = temp_dir("stagewise");
    let cfg = phantom_config().with_debug_prefix(dir.join("case"));
    let mut p = VesselPipeline::new(vol.clone(), cfg);

    // 不能跳过阶段.
    assert!(matches!(
        p.trace(TraceInput::Primary),
        Err(VesselError::InvalidTransition { .. })
    ));

    p.normalize().unwrap();
    p.find_seeds().unwrap();
    let seeds = p.training_seeds().unwrap();
    assert!(!seeds.is_empty() && seeds.len() <= 50);
    assert!(seeds.windows(2).all(|w| w[0].value >= w[1].value));

    p.build_training_mask().unwrap();
    p.enhance().unwrap();
    p.refine_seeds().unwrap();
    let refined = p.refined_seeds().unwrap();
    let bound = p.config().pruning_bound(SPACING);
    assert!(refined.count > 0);
    for ((z, h, w), &s) in refined.seeds.raw().indexed_iter() {
        if s > 0.0 {
            assert!(refined.radius[(z, h, w)] as f64 <= bound + 1e-6);
        }
    }
    assert_eq!(p.state(), PipelineState::SeedsRefined);

    // 以另一幅 (略暗的) 配准体数据追踪.
    let darker = vol.map(|&v| v * 0.95 + 1.0);
    p.trace(TraceInput::Alternate(&darker)).unwrap();
    let min_length = p.config().extraction_thresholds.min_length;
    let traced = p.tubes().unwrap();
    for t in traced.all_tubes() {
        assert!(t.length() >= min_length, "tube {} is {} mm", t.id(), t.length());
    }
    let traced: Vec<usize> = traced.all_tubes().iter().map(|t| t.len()).collect();
    p.smooth().unwrap();
    assert_eq!(p.state(), PipelineState::Smoothed);
    let smoothed: Vec<usize> = p.tubes().unwrap().all_tubes().iter().map(|t| t.len()).collect();
    assert_eq!(traced, smoothed);
    check_tubes(p.tubes().unwrap(), &vol, min_length);

    // 终止状态之后无法继续.
    assert!(p.smooth().is_err());

    assert!(dir.join("case-DataMaskErode.mha").exists());
    for name in [
        "Normalized",
        "VesselsTraining",
        "VesselsTrainingMask",
        "VesselsEnhanced",
        "VesselSeedsInitialMask",
        "VesselSeedsRadius",
        "VesselSeeds",
        "VesselInput",
        "Vessels",
    ] {
        assert!(dir.join(format!("case_VS1.0-{name}.mha")).exists(), "{name}");
    }
    assert!(dir.join("case-alter_VS1.0-Normalized.mha").exists());
    assert!(dir.join("case_VS1.0-Vessels.tre").exists());
    let enhanced = Volume::<f32>::open_mha(dir.join("case_VS1.0-VesselsEnhanced.mha")).unwrap();
    assert_eq!(enhanced.raw(), p.enhanced().unwrap().vesselness.raw());
}

#[test]
fn test_empty_tissue_mask() {
    let vol = tube_phantom(5);
    let empty = vol.filled_like(OUTSIDE);
    let mut p = VesselPipeline::with_mask(vol, empty, phantom_config()).unwrap();
    let err = p.run(TraceInput::Primary).unwrap_err();
    assert!(matches!(err, VesselError::Input { .. }), "{err}");
    assert_eq!(p.state(), PipelineState::Initialized);
    assert!(p.training_seeds().is_none());
}

#[test]
fn test_retrace_alternate_after_full_run() {
    init_logger();
    let vol = tube_phantom(31);
    let dir = temp_dir("retrace");
    let cfg = phantom_config().with_debug_prefix(dir.join("case"));
    let mut p = VesselPipeline::new(vol.clone(), cfg);

    // 种子精化之前不能追踪其他体数据.
    assert!(matches!(
        p.trace_alternate(&vol),
        Err(VesselError::InvalidTransition { .. })
    ));

    let primary = p.run(TraceInput::Primary).unwrap().clone();
    let min_length = p.config().extraction_thresholds.min_length;

    let darker = vol.map(|&v| v * 0.95 + 1.0);
    let alt = p.trace_alternate(&darker).unwrap();
    check_tubes(&alt, &vol, min_length);

    // 状态和主结果都保持不变, 且可以重复调用.
    assert_eq!(p.state(), PipelineState::Smoothed);
    assert_eq!(p.tubes().unwrap(), &primary);
    let again = p.trace_alternate(&darker).unwrap();
    assert_eq!(again, alt);

    assert!(dir.join("case-alter_VS1.0-Normalized.mha").exists());
    assert!(dir.join("case-alter_VS1.0-Vessels.tre").exists());

    // 形状不一致的体数据被拒绝.
    let small = PhantomBuilder::new((20, 20, 20), SPACING)
        .background(40.0)
        .noise(4.0)
        .seed(3)
        .build()
        .unwrap();
    assert!(matches!(
        p.trace_alternate(&small),
        Err(VesselError::Input { .. })
    ));
}

#[test]
fn test_vesselness_spans_full_tissue_mask() {
    init_logger();
    let vol = tube_phantom(17);
    // 管道起点一侧留出两层非组织体素, 腐蚀后起点附近的管道落在腐蚀掩膜之外.
    let tissue = Volume::new(
        ndarray::Array3::from_shape_fn(vol.shape(), |(_, _, w)| if w < 2 { OUTSIDE } else { INSIDE }),
        vol.geometry().clone(),
    );
    let mut p = VesselPipeline::with_mask(vol, tissue, phantom_config()).unwrap();
    p.normalize().unwrap();
    p.find_seeds().unwrap();
    p.build_training_mask().unwrap();
    p.enhance().unwrap();

    let vesselness = p.enhanced().unwrap().vesselness.raw();
    let tissue = p.tissue_mask().raw();
    let eroded = p.eroded_mask().raw();
    let mut beyond_erosion = 0usize;
    for ((idx, &v), (&t, &e)) in vesselness.indexed_iter().zip(tissue.iter().zip(eroded.iter())) {
        if t == OUTSIDE {
            assert_eq!(v, 0.0, "{idx:?}");
        } else if e == OUTSIDE && v > 0.0 {
            beyond_erosion += 1;
        }
    }
    assert!(beyond_erosion > 0);
}
