//! 中间结果的调试输出.

use std::ffi::OsString;
use std::path::PathBuf;

use log::{debug, warn};

use crate::data::group::TubeGroup;
use crate::data::Volume;
use crate::io::MetaElement;

/// 把各阶段的中间结果写到 `<prefix>_VS<scale>-<name>.<ext>`.
/// 与尺度无关的结果 (如腐蚀后的组织掩膜) 写到 `<prefix>-<name>.<ext>`.
///
/// 写出失败只记录警告, 不影响管线继续执行.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugSink {
    prefix: Option<PathBuf>,
    scale: f64,
}

impl DebugSink {
    /// `prefix` 为 `None` 时不写出任何文件.
    pub fn new(prefix: Option<PathBuf>, scale: f64) -> Self {
        Self { prefix, scale }
    }

    /// 是否会写出文件?
    #[inline]
    pub fn enabled(&self) -> bool {
        self.prefix.is_some()
    }

    /// 名为 `name` 的中间结果的文件路径.
    pub fn path(&self, name: &str, ext: &str) -> Option<PathBuf> {
        self.prefixed("", name, ext)
    }

    /// 第二幅体数据的中间结果路径: `<prefix>-alter_VS<scale>-<name>.<ext>`.
    pub fn alternate_path(&self, name: &str, ext: &str) -> Option<PathBuf> {
        self.prefixed("-alter", name, ext)
    }

    /// 与尺度无关的中间结果路径: `<prefix>-<name>.<ext>`.
    pub fn unscaled_path(&self, name: &str, ext: &str) -> Option<PathBuf> {
        let mut s = OsString::from(self.prefix.as_ref()?.as_os_str());
        s.push(format!("-{name}.{ext}"));
        Some(PathBuf::from(s))
    }

    fn prefixed(&self, tag: &str, name: &str, ext: &str) -> Option<PathBuf> {
        let mut s = OsString::from(self.prefix.as_ref()?.as_os_str());
        // `{:?}` 保证整数尺度也带小数点, 如 `_VS1.0-`.
        s.push(format!("{tag}_VS{:?}-{name}.{ext}", self.scale));
        Some(PathBuf::from(s))
    }

    /// 写出体数据.
    pub fn volume<T: MetaElement>(&self, name: &str, vol: &Volume<T>) {
        if let Some(path) = self.path(name, "mha") {
            save(path, vol);
        }
    }

    /// 写出与尺度无关的体数据.
    pub fn unscaled<T: MetaElement>(&self, name: &str, vol: &Volume<T>) {
        if let Some(path) = self.unscaled_path(name, "mha") {
            save(path, vol);
        }
    }

    /// 写出第二幅体数据的中间结果.
    pub fn alternate<T: MetaElement>(&self, name: &str, vol: &Volume<T>) {
        if let Some(path) = self.alternate_path(name, "mha") {
            save(path, vol);
        }
    }

    /// 写出 tube 树.
    pub fn tubes(&self, name: &str, group: &TubeGroup) {
        if let Some(path) = self.path(name, "tre") {
            save_tubes(path, group);
        }
    }

    /// 写出第二幅体数据上追踪到的 tube 树.
    pub fn alternate_tubes(&self, name: &str, group: &TubeGroup) {
        if let Some(path) = self.alternate_path(name, "tre") {
            save_tubes(path, group);
        }
    }
}

fn save_tubes(path: PathBuf, group: &TubeGroup) {
    match group.save_tre(&path) {
        Ok(()) => debug!("debug tubes written to {}", path.display()),
        Err(e) => warn!("failed to write debug tubes: {e}"),
    }
}

fn save<T: MetaElement>(path: PathBuf, vol: &Volume<T>) {
    match vol.save_mha(&path, true) {
        Ok(()) => debug!("debug volume written to {}", path.display()),
        Err(e) => warn!("failed to write debug volume: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Geometry;
    use ndarray::Array3;

    #[test]
    fn test_naming() {
        let off = DebugSink::new(None, 1.0);
        assert!(!off.enabled());
        assert_eq!(off.path("Normalized", "mha"), None);

        let on = DebugSink::new(Some(PathBuf::from("/tmp/case7")), 0.5);
        assert_eq!(
            on.path("VesselsEnhanced", "mha"),
            Some(PathBuf::from("/tmp/case7_VS0.5-VesselsEnhanced.mha"))
        );
        assert_eq!(
            on.alternate_path("Normalized", "mha"),
            Some(PathBuf::from("/tmp/case7-alter_VS0.5-Normalized.mha"))
        );

        assert_eq!(
            on.unscaled_path("DataMaskErode", "mha"),
            Some(PathBuf::from("/tmp/case7-DataMaskErode.mha"))
        );

        // 整数尺度保留一位小数.
        let whole = DebugSink::new(Some(PathBuf::from("/tmp/case7")), 1.0);
        assert_eq!(
            whole.path("Vessels", "tre"),
            Some(PathBuf::from("/tmp/case7_VS1.0-Vessels.tre"))
        );
        assert_eq!(
            whole.alternate_path("Vessels", "tre"),
            Some(PathBuf::from("/tmp/case7-alter_VS1.0-Vessels.tre"))
        );
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let sink = DebugSink::new(Some(PathBuf::from("/nonexistent-dir/for/sure/x")), 1.0);
        let v = Volume::new(Array3::<u8>::zeros((2, 2, 2)), Geometry::isotropic(1.0).unwrap());
        sink.volume("Mask", &v);
        sink.tubes("Vessels", &TubeGroup::new(0));
        sink.alternate_tubes("Vessels", &TubeGroup::new(0));
    }
}
