//! 体数据基础滤波: 高斯模糊, 高斯导数, 距离变换, 形态学和连通分量.

pub mod components;
pub mod distance;
pub mod gaussian;
pub mod hessian;
pub mod morph;

pub use components::{label_components, Components};
pub use distance::distance_transform;
pub use gaussian::{blur_array, gaussian_kernel};
pub use hessian::{hessian_at_voxel, jet_at, sorted_eigenvalues, Jet, RidgeFrame};
