//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Idx3dF};

pub use crate::data::group::{GroupChild, TubeGroup};
pub use crate::data::phantom::PhantomBuilder;
pub use crate::data::seed::Seed;
pub use crate::data::tube::{Tube, TubePoint};
pub use crate::data::{BinaryMask, Geometry, LabelVolume, ScalarVolume, Volume, VolumeGeometry};

pub use crate::config::PipelineConfig;
pub use crate::error::{Stage, VesselError, VesselResult};
pub use crate::pipeline::{extract_vessels, PipelineState, TraceInput, VesselPipeline};

pub use crate::io::{save_mip, MipAxis};
pub use crate::render::{to_polylines, to_surfaces, PolyLines, SurfaceMesh};
pub use crate::trace::TraceThresholds;
