//! 实验结果.

use crate::profile::Profile;
use std::io::{self, Write};

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.3}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Profile `vessel scale = {}`:", p.get_scale())?;
    for (state, d) in p.get_stages() {
        writeln!(w, "{S4}-> {:<18} {} us", state.name(), d.as_micros())?;
    }
    writeln!(w, "{S4}Effective total time: {} us", p.get_stage_time_us())?;
    writeln!(w, "{S4}Total machine time: {} us", p.get_real_time_us())?;
    writeln!(w, "{S4}Tubes: {}", p.get_tubes())?;
    writeln!(w, "{S4}Points: {}", p.get_points())?;
    writeln!(w, "{S4}Average tube length: {} mm", f64_to_display(p.get_avg_length()))?;
    if let Some(e) = p.get_failure() {
        writeln!(w, "{S4}Failed: {e}")?;
    }
    match p.get_most_time_consuming() {
        Some((s, d)) => write!(w, "{S4}Most time-consuming stage `{}` costs {} us", s.name(), d.as_micros()),
        None => write!(w, "{S4}Most time-consuming stage costs / us"),
    }
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<Profile>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = Profile>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 全部尺度都成功完成时返回 `true`.
    pub fn all_succeeded(&self) -> bool {
        self.data.iter().all(|p| p.get_failure().is_none())
    }

    /// 分析运行结果.
    pub fn analyze(&self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut w = stdout.lock();
        utils::sep_to(&mut w)?;
        for profile in self.data.iter() {
            describe_into(profile, &mut w)?;
            writeln!(w)?;
            utils::sep_to(&mut w)?;
        }
        Ok(())
    }
}
