//! 对 `vessel-berry` 体数据读取的更一层封装. 提供更直接的输入定位与加载.

use std::env;
use std::path::{Path, PathBuf};

use nalgebra::Point3;
use vessel_berry::data::phantom::PhantomBuilder;
use vessel_berry::{ScalarVolume, VesselResult};

/// 指定输入 MRA 扫描的环境变量.
pub const INPUT_ENV: &str = "MRA_INPUT";

/// 指定输出目录的环境变量.
pub const OUTPUT_ENV: &str = "MRA_OUTPUT_DIR";

/// 获取 `$HOME/dataset/<it...>`.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 获取输入 MRA 扫描路径.
///
/// 1. 若环境变量 `$MRA_INPUT` 非空, 则返回其值;
/// 2. 否则, 若 `$HOME/dataset/mra/input.nii.gz` 存在, 则返回之;
/// 3. 否则返回 `None`, 此时调用者应当改用合成数据.
pub fn input_from_env_or_home() -> Option<PathBuf> {
    match env::var(INPUT_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["mra", "input.nii.gz"]).filter(|p| p.is_file()),
    }
}

/// 获取输出目录.
///
/// 1. 若环境变量 `$MRA_OUTPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回系统临时目录下的 `vessel-scales`.
pub fn output_dir_from_env_or_temp() -> PathBuf {
    match env::var(OUTPUT_ENV) {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => env::temp_dir().join("vessel-scales"),
    }
}

/// 消融实验用的合成数据: 噪声背景中两根相交的亮直管, 半径分别为 1.5 mm 与 0.9 mm.
pub fn phantom() -> ScalarVolume {
    const SPACING: f64 = 0.3;
    let c = 24.0 * SPACING;
    PhantomBuilder::new((48, 48, 96), SPACING)
        .background(40.0)
        .foreground(120.0)
        .noise(4.0)
        .seed(7)
        .tube(Point3::new(3.0, c, c), Point3::new(26.0, c, c), 1.5)
        .tube(Point3::new(14.0, 2.0, c), Point3::new(14.0, 12.4, c), 0.9)
        .build()
        // 常量空间信息必然合法, 可直接 unwrap.
        .unwrap()
}

/// 输入数据的来源.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// 本地 nii 文件.
    Nifti(PathBuf),
    /// 合成数据.
    Phantom,
}

impl Source {
    /// 根据环境确定数据来源.
    pub fn from_env_or_home() -> Self {
        input_from_env_or_home().map_or(Self::Phantom, Self::Nifti)
    }

    /// 加载体数据.
    pub fn load(&self) -> VesselResult<ScalarVolume> {
        match self {
            Self::Nifti(p) => ScalarVolume::open(p),
            Self::Phantom => Ok(phantom()),
        }
    }

    /// 输出文件名前缀所用的名字.
    pub fn stem(&self) -> String {
        match self {
            Self::Nifti(p) => p
                .file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.trim_end_matches(".gz").trim_end_matches(".nii"))
                .unwrap_or("input")
                .to_string(),
            Self::Phantom => "phantom".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_berry::VolumeGeometry;

    #[test]
    fn test_phantom_source() {
        let v = Source::Phantom.load().unwrap();
        assert_eq!(v.shape(), (48, 48, 96));
        assert_eq!(Source::Phantom.stem(), "phantom");
    }

    #[test]
    fn test_nifti_stem() {
        let s = Source::Nifti(PathBuf::from("/data/case-07.nii.gz"));
        assert_eq!(s.stem(), "case-07");
        let s = Source::Nifti(PathBuf::from("scan.nii"));
        assert_eq!(s.stem(), "scan");
    }

    #[test]
    fn test_home_dataset_dir() {
        if let Some(p) = home_dataset_dir_with(["mra", "a.nii"]) {
            assert!(p.ends_with("dataset/mra/a.nii"));
        }
    }
}
