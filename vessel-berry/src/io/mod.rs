//! 持久化: MetaImage 体数据, MetaScene tube 树和 MIP 图像.
//!
//! NIfTI 输入由 `Volume::open` 提供; 这里的读写都基于 `Volume` 和 `TubeGroup` 的方法.

pub mod mha;
pub mod mip;
pub mod tre;

pub use mha::MetaElement;
pub use mip::{max_projection, save_mip, MipAxis};
