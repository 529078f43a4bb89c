//! 管线错误类型.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// 管线阶段. 用于错误信息和调试文件命名.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    /// 强度归一化.
    Normalize,

    /// 训练种子搜索.
    SeedSearch,

    /// 训练掩膜合成.
    TrainingMask,

    /// 判别分析血管增强.
    Enhance,

    /// 种子精化.
    SeedRefine,

    /// 脊线追踪.
    Trace,

    /// 中心线平滑.
    Smooth,
}

impl Stage {
    /// 阶段名称.
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Stage::Normalize => "Normalize",
            Stage::SeedSearch => "SeedSearch",
            Stage::TrainingMask => "TrainingMask",
            Stage::Enhance => "Enhance",
            Stage::SeedRefine => "SeedRefine",
            Stage::Trace => "Trace",
            Stage::Smooth => "Smooth",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 血管提取过程中可能出现的全部错误.
#[derive(Error, Debug)]
pub enum VesselError {
    /// 输入不合法: 空掩膜, 形状不一致, 零方差等.
    #[error("invalid input: {detail}")]
    Input {
        /// 具体原因.
        detail: String,
    },

    /// 数值退化 (除零等). 绝不会以 NaN/Inf 的形式静默传播.
    #[error("numeric degeneracy in stage {stage}: {detail}")]
    NumericDegeneracy {
        /// 出错阶段.
        stage: Stage,
        /// 具体原因.
        detail: String,
    },

    /// 某阶段无法生成输出.
    #[error("stage {stage} failed: {detail}")]
    StageFailure {
        /// 出错阶段.
        stage: Stage,
        /// 具体原因.
        detail: String,
    },

    /// 文件读写失败.
    #[error("I/O failure on {path:?}: {source}")]
    Io {
        /// 出错文件.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 管线状态跳转非法.
    #[error("invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        /// 当前状态.
        from: &'static str,
        /// 期望进入的状态.
        to: &'static str,
    },

    /// 持久化文件格式错误.
    #[error("malformed file: {detail}")]
    Format {
        /// 具体原因.
        detail: String,
    },

    /// nifti 读取错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 图像编码错误.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl VesselError {
    /// 构造 `Input` 错误.
    #[inline]
    pub fn input<S: Into<String>>(detail: S) -> Self {
        Self::Input {
            detail: detail.into(),
        }
    }

    /// 构造 `NumericDegeneracy` 错误.
    #[inline]
    pub fn degenerate<S: Into<String>>(stage: Stage, detail: S) -> Self {
        Self::NumericDegeneracy {
            stage,
            detail: detail.into(),
        }
    }

    /// 构造 `StageFailure` 错误.
    #[inline]
    pub fn stage<S: Into<String>>(stage: Stage, detail: S) -> Self {
        Self::StageFailure {
            stage,
            detail: detail.into(),
        }
    }

    /// 构造 `Format` 错误.
    #[inline]
    pub fn format<S: Into<String>>(detail: S) -> Self {
        Self::Format {
            detail: detail.into(),
        }
    }

    /// 包装 IO 错误.
    #[inline]
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 出错阶段 (如果有).
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::NumericDegeneracy { stage, .. } | Self::StageFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// crate 内通用 `Result`.
pub type VesselResult<T> = Result<T, VesselError>;
