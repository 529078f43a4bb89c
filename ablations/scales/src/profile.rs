//! 管线运行统计.

use std::time::{Duration, Instant};

use vessel_berry::data::group::TubeGroup;
use vessel_berry::PipelineState;

/// ablation/benchmark 计时器.
///
/// 该计时器支持 "中途中断" 与 "结束中断, 继续开始计时".
#[derive(Clone, Debug)]
struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时会视为已经开始计时 (`self.start()`).
    #[inline]
    pub fn new() -> Self {
        Self {
            consumed: Duration::ZERO,
            since: Instant::now(),
        }
    }

    /// 开始计时.
    #[inline]
    pub fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时, 并将这一区间的时间累加. 返回本轮计时时长.
    ///
    /// # 注意
    ///
    /// 上一次调用必须是 `self.start()`, 否则计算时间值无意义.
    #[inline]
    pub fn elapsed(&mut self) -> Duration {
        let d = self.since.elapsed();
        self.consumed += d;
        d
    }

    /// 获得总共累计下来的时间综合 (以微秒为单位).
    #[inline]
    pub fn get_total_us(&self) -> u64 {
        self.consumed.as_micros() as u64
    }
}

impl Default for AccTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个血管尺度上的一次完整运行统计.
#[derive(Clone, Debug)]
pub struct Profile {
    /// 血管尺度.
    scale: f64,

    /// 每个阶段 (以到达的状态标识) 花费的时间.
    stages: Vec<(PipelineState, Duration)>,

    /// 单阶段计时.
    stage_time: AccTimer,

    /// 整个任务花费的总时间 (包括写出结果).
    real_time: AccTimer,

    /// 提取出的 tube 个数.
    tubes: u64,

    /// 全部 tube 的点数之和.
    points: u64,

    /// 全部 tube 的长度之和 (mm).
    length: f64,

    /// 失败信息. 管线中途出错时记录.
    failure: Option<String>,
}

impl Profile {
    /// 初始化.
    #[inline]
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            stages: Vec::with_capacity(8),
            stage_time: AccTimer::default(),
            real_time: AccTimer::default(),
            tubes: 0,
            points: 0,
            length: 0.0,
            failure: None,
        }
    }

    /// 开始一个阶段的计时.
    #[inline]
    pub fn stage_start(&mut self) {
        self.stage_time.start();
    }

    /// 结束阶段计时, 记录到达的状态 `state`.
    #[inline]
    pub fn stage_elapsed(&mut self, state: PipelineState) {
        let d = self.stage_time.elapsed();
        self.stages.push((state, d));
    }

    /// 记录提取结果.
    pub fn count_tubes(&mut self, group: &TubeGroup) {
        for t in group.all_tubes() {
            self.tubes += 1;
            self.points += t.len() as u64;
            self.length += t.length();
        }
    }

    /// 记录失败.
    #[inline]
    pub fn fail<E: ToString>(&mut self, e: E) {
        self.failure = Some(e.to_string());
    }

    /// 结束全部计时.
    #[inline]
    pub fn finish(mut self) -> Self {
        self.real_time.elapsed();
        self
    }

    /// 血管尺度.
    #[inline]
    pub fn get_scale(&self) -> f64 {
        self.scale
    }

    /// 各阶段耗时.
    #[inline]
    pub fn get_stages(&self) -> &[(PipelineState, Duration)] {
        &self.stages
    }

    /// 以微秒为单位获得各阶段耗时之和.
    #[inline]
    pub fn get_stage_time_us(&self) -> u64 {
        self.stage_time.get_total_us()
    }

    /// 以微秒为单位获得算法运行到目前的总自然时间.
    #[inline]
    pub fn get_real_time_us(&self) -> u64 {
        self.real_time.get_total_us()
    }

    /// 最耗时的阶段. 未运行任何阶段时返回 `None`.
    pub fn get_most_time_consuming(&self) -> Option<(PipelineState, Duration)> {
        self.stages.iter().copied().max_by_key(|&(_, d)| d)
    }

    /// 提取出的 tube 个数.
    #[inline]
    pub fn get_tubes(&self) -> u64 {
        self.tubes
    }

    /// 全部 tube 的点数之和.
    #[inline]
    pub fn get_points(&self) -> u64 {
        self.points
    }

    /// tube 的平均长度 (mm).
    #[inline]
    pub fn get_avg_length(&self) -> Option<f64> {
        match self.tubes {
            0 => None,
            n => Some(self.length / n as f64),
        }
    }

    /// 失败信息.
    #[inline]
    pub fn get_failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_berry::data::tube::{Tube, TubePoint};
    use nalgebra::Point3;

    #[test]
    fn test_profile_counts() {
        let mut p = Profile::new(1.5);
        assert!(p.get_most_time_consuming().is_none());
        assert!(p.get_avg_length().is_none());

        p.stage_start();
        p.stage_elapsed(PipelineState::Normalized);
        p.stage_start();
        std::thread::sleep(Duration::from_millis(2));
        p.stage_elapsed(PipelineState::SeedsFound);
        assert_eq!(
            p.get_most_time_consuming().map(|(s, _)| s),
            Some(PipelineState::SeedsFound)
        );

        let pts = (0..11).map(|i| TubePoint::new(Point3::new(i as f64, 0.0, 0.0), 1.0));
        let group = TubeGroup::with_tubes(0, [Tube::new(1, pts.collect())]);
        p.count_tubes(&group);
        p.fail("boom");
        let p = p.finish();
        assert_eq!(p.get_tubes(), 1);
        assert_eq!(p.get_points(), 11);
        assert_eq!(p.get_avg_length(), Some(10.0));
        assert_eq!(p.get_failure(), Some("boom"));
        assert_eq!(p.get_stages().len(), 2);
        assert!(p.get_real_time_us() >= p.get_stage_time_us());
    }
}
