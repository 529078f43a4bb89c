#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 从去颅骨的 3D MRA 扫描中提取脑血管中心线 (tube), 并以 MetaScene 格式持久化.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体数据一律按 `(z, h, w)` 排列, 物理坐标按 `(x, y, z)` 排列 (ITK 的 LPS 约定).
//!   两者之间的转换只通过 `VolumeGeometry` 完成.
//! 2. 输入必须已去除颅骨. 有效组织掩膜可以显式给出, 也可以由强度范围推得.
//! 3. 追踪总是按种子概率顺序串行进行, 因此结果是确定的. 体素级运算在开启 `rayon`
//!   feature 时并行.
//!
//! # 开发计划
//!
//! ### 体数据与空间信息 ✅
//!
//! `Volume<T>` 持有数据和分辨率/原点/方向, 提供索引与物理坐标互转和三线性插值.
//!
//! 实现位于 `vessel-berry/src/data`.
//!
//! ### 基础滤波 ✅
//!
//! 可分离高斯模糊, 高斯导数 (Hessian), 精确欧氏距离变换, 球形腐蚀, 6-邻域连通分量.
//!
//! 实现位于 `vessel-berry/src/filter`.
//!
//! ### 管线各阶段 ✅
//!
//! 1. 强度归一化 (`normalize`), 统计量可冻结并用于另一幅配准体数据;
//! 2. 训练种子搜索 (`seeds`);
//! 3. 训练掩膜合成 (`training`);
//! 4. 判别分析血管增强 (`enhance`);
//! 5. 种子精化 (`seeds::refine`);
//! 6. 脊线追踪与半径优化 (`trace`);
//! 7. 中心线平滑 (`smooth`).
//!
//! 状态机驱动位于 `vessel-berry/src/pipeline`.
//!
//! ### 持久化与可视化几何 ✅
//!
//! 1. `.tre` (MetaScene) 无损读写, 支持嵌套组; ✅
//! 2. `.mha` (MetaImage) 读写, 用于调试输出; ✅
//! 3. 最大强度投影 PNG; ✅
//! 4. 折线与封闭管道表面. ✅
//!
//! ### 多线程追踪 ⌛️
//!
//! 需要在保持种子顺序 (先到先得) 的前提下对占据体数据做划分后合并.

/// 三维索引, 按 `(z, h, w)` 排列.
pub type Idx3d = (usize, usize, usize);

/// 三维连续索引, 按 `(z, h, w)` 排列.
pub type Idx3dF = (f64, f64, f64);

pub mod config;
pub mod consts;
pub mod data;
pub mod enhance;
pub mod error;
pub mod filter;
pub mod io;
pub mod normalize;
pub mod pipeline;
pub mod prelude;
pub mod render;
pub mod seeds;
pub mod smooth;
pub mod trace;
pub mod training;

pub use config::PipelineConfig;
pub use data::{BinaryMask, Geometry, LabelVolume, ScalarVolume, Volume, VolumeGeometry};
pub use error::{Stage, VesselError, VesselResult};
pub use pipeline::{extract_vessels, PipelineState, TraceInput, VesselPipeline};
