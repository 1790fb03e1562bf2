//! 计时器模块
//!
//! 提供带暂停/恢复支持的帧计时器，用于动画插值和性能诊断。
//!
//! # 设计原则
//!
//! - **单调时钟**：基于单调递增的硬件计数器，一次性标定 counts-per-second
//! - **暂停语义**：`total_time` 不包含停止期间流逝的时间
//! - **防御性钳制**：负的帧间隔一律钳制为 0（电源管理导致的计数器
//!   不连续会产生负间隔，这里只做钳制，不追究根因）
//! - **可注入时钟源**：通过 `TimeSource` trait 注入计数器，测试可以
//!   精确驱动时间前进或倒退
//!
//! # 调用约定
//!
//! - `reset()`：进入主循环前调用一次
//! - `start()` / `stop()`：包裹暂停/恢复转换
//! - `tick()`：每次循环迭代调用一次

use std::time::Instant;

/// 计时器的底层计数源
///
/// 返回单调递增的原始计数值和每秒计数数（标定常量）。
pub trait TimeSource {
    /// 当前计数值
    fn counts(&self) -> i64;

    /// 每秒计数数
    fn counts_per_second(&self) -> i64;
}

/// 默认时钟源：以纳秒为计数单位的单调时钟
#[derive(Debug, Clone)]
pub struct MonotonicSource {
    origin: Instant,
}

impl MonotonicSource {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicSource {
    fn counts(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    fn counts_per_second(&self) -> i64 {
        1_000_000_000
    }
}

/// 帧计时器
///
/// 跟踪总时间和帧间隔时间，支持暂停/恢复。
/// 时间轴示意：
///
/// ```text
/// reset          stop        start            stop      start
///   |---- 运行 ----|-- 暂停 --|---- 运行 ----|-- 暂停 --|--- ...
///                  └── 累计入 paused_time ──┘
/// ```
///
/// `total_time` 始终等于「当前计数 − 基准计数 − 累计暂停计数」，
/// 即只统计运行状态下流逝的时间。
#[derive(Debug, Clone)]
pub struct GameTimer<S: TimeSource = MonotonicSource> {
    source: S,
    seconds_per_count: f64,
    delta_time: f64,

    base_time: i64,
    paused_time: i64,
    stop_time: i64,
    prev_time: i64,
    curr_time: i64,

    stopped: bool,
}

impl GameTimer<MonotonicSource> {
    /// 使用默认单调时钟源创建计时器
    pub fn new() -> Self {
        Self::with_source(MonotonicSource::new())
    }
}

impl Default for GameTimer<MonotonicSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TimeSource> GameTimer<S> {
    /// 使用指定时钟源创建计时器
    ///
    /// 创建时完成一次 counts-per-second 标定。
    pub fn with_source(source: S) -> Self {
        let seconds_per_count = 1.0 / source.counts_per_second() as f64;
        Self {
            source,
            seconds_per_count,
            delta_time: 0.0,
            base_time: 0,
            paused_time: 0,
            stop_time: 0,
            prev_time: 0,
            curr_time: 0,
            stopped: false,
        }
    }

    /// 自 `reset()` 以来的总时间（秒），不包含停止期间
    pub fn total_time(&self) -> f32 {
        // 停止状态下以 stop_time 为终点，否则以最近一次 tick 为终点。
        // 两种情况都要扣除累计暂停时间。
        if self.stopped {
            (((self.stop_time - self.paused_time) - self.base_time) as f64
                * self.seconds_per_count) as f32
        } else {
            (((self.curr_time - self.paused_time) - self.base_time) as f64
                * self.seconds_per_count) as f32
        }
    }

    /// 最近一次 `tick()` 计算出的帧间隔（秒）
    pub fn delta_time(&self) -> f32 {
        self.delta_time as f32
    }

    /// 重置计时器基准，进入主循环前调用
    pub fn reset(&mut self) {
        let curr_time = self.source.counts();

        self.base_time = curr_time;
        self.prev_time = curr_time;
        self.curr_time = curr_time;
        self.paused_time = 0;
        self.stop_time = 0;
        self.stopped = false;
        self.delta_time = 0.0;
    }

    /// 恢复计时（从暂停状态）
    pub fn start(&mut self) {
        let start_time = self.source.counts();

        // 累计本次暂停的时长，并重新以当前时刻为上一帧基准，
        // 避免把暂停期间算进下一次 tick 的 delta
        if self.stopped {
            self.paused_time += start_time - self.stop_time;

            self.prev_time = start_time;
            self.stop_time = 0;
            self.stopped = false;
        }
    }

    /// 暂停计时
    ///
    /// 已停止状态下再次调用是无操作。
    pub fn stop(&mut self) {
        if !self.stopped {
            self.stop_time = self.source.counts();
            self.stopped = true;
        }
    }

    /// 推进计时器，每次循环迭代调用一次
    pub fn tick(&mut self) {
        if self.stopped {
            self.delta_time = 0.0;
            return;
        }

        self.curr_time = self.source.counts();
        self.delta_time =
            (self.curr_time - self.prev_time) as f64 * self.seconds_per_count;
        self.prev_time = self.curr_time;

        // 计数器不连续（如处理器节能切换）可能产生负间隔，钳制为 0
        if self.delta_time < 0.0 {
            self.delta_time = 0.0;
        }
    }
}

/// 帧率统计
///
/// 每跨过一个整秒输出一次（帧数，毫秒/帧），供诊断日志使用。
#[derive(Debug, Default)]
pub struct FrameStats {
    frame_count: u32,
    time_elapsed: f32,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每帧调用一次
    ///
    /// 返回 `Some((fps, mspf))` 表示统计窗口结束，应输出一次统计。
    pub fn frame(&mut self, total_time: f32) -> Option<(f32, f32)> {
        self.frame_count += 1;

        if total_time - self.time_elapsed >= 1.0 {
            let fps = self.frame_count as f32;
            let mspf = 1000.0 / fps;

            self.frame_count = 0;
            self.time_elapsed += 1.0;

            return Some((fps, mspf));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// 手动驱动的时钟源，1000 counts = 1 秒
    #[derive(Clone)]
    struct ManualSource {
        counts: Rc<Cell<i64>>,
    }

    impl ManualSource {
        fn new() -> (Self, Rc<Cell<i64>>) {
            let counts = Rc::new(Cell::new(0));
            (Self { counts: counts.clone() }, counts)
        }
    }

    impl TimeSource for ManualSource {
        fn counts(&self) -> i64 {
            self.counts.get()
        }

        fn counts_per_second(&self) -> i64 {
            1000
        }
    }

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_total_time_excludes_paused_interval() {
        let (source, clock) = ManualSource::new();
        let mut timer = GameTimer::with_source(source);
        timer.reset();

        clock.set(1000);
        timer.tick();
        assert!(approx_eq(timer.total_time(), 1.0));

        // 暂停 0.5 秒
        timer.stop();
        clock.set(1500);
        let paused_total = timer.total_time();
        assert!(approx_eq(paused_total, 1.0));

        timer.start();
        clock.set(1750);
        timer.tick();

        // 恢复后的总时间 = 暂停前的总时间 + 恢复后运行的时间
        assert!(approx_eq(timer.total_time(), 1.25));
        assert!(approx_eq(timer.delta_time(), 0.25));
    }

    #[test]
    fn test_delta_never_negative() {
        let (source, clock) = ManualSource::new();
        let mut timer = GameTimer::with_source(source);
        timer.reset();

        clock.set(500);
        timer.tick();
        assert!(approx_eq(timer.delta_time(), 0.5));

        // 计数器倒退
        clock.set(200);
        timer.tick();
        assert_eq!(timer.delta_time(), 0.0);

        // 倒退后继续前进，delta 恢复正常
        clock.set(300);
        timer.tick();
        assert!(approx_eq(timer.delta_time(), 0.1));
    }

    #[test]
    fn test_zero_length_pause_is_invisible() {
        let (source, clock) = ManualSource::new();
        let mut timer = GameTimer::with_source(source);
        timer.reset();

        clock.set(2000);
        timer.tick();

        // 同一时刻 stop + start
        timer.stop();
        timer.start();

        clock.set(3000);
        timer.tick();
        assert!(approx_eq(timer.total_time(), 3.0));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (source, clock) = ManualSource::new();
        let mut timer = GameTimer::with_source(source);
        timer.reset();

        clock.set(1000);
        timer.tick();
        timer.stop();
        let total_after_first_stop = timer.total_time();

        // 第二次 stop 不应改变停止点
        clock.set(5000);
        timer.stop();
        assert_eq!(timer.total_time(), total_after_first_stop);
    }

    #[test]
    fn test_tick_while_stopped_yields_zero_delta() {
        let (source, clock) = ManualSource::new();
        let mut timer = GameTimer::with_source(source);
        timer.reset();

        timer.stop();
        clock.set(800);
        timer.tick();
        assert_eq!(timer.delta_time(), 0.0);
    }

    #[test]
    fn test_reset_clears_paused_accumulator() {
        let (source, clock) = ManualSource::new();
        let mut timer = GameTimer::with_source(source);
        timer.reset();

        timer.stop();
        clock.set(1000);
        timer.start();

        // reset 之后历史暂停时间不再影响总时间
        clock.set(2000);
        timer.reset();
        clock.set(2500);
        timer.tick();
        assert!(approx_eq(timer.total_time(), 0.5));
    }

    #[test]
    fn test_frame_stats_reports_once_per_second() {
        let mut stats = FrameStats::new();

        // 前 59 帧在同一秒内，不输出
        for i in 0..59 {
            let t = i as f32 / 60.0;
            assert!(stats.frame(t).is_none());
        }

        let (fps, mspf) = stats.frame(1.0).expect("stats due at one second");
        assert_eq!(fps, 60.0);
        assert!(approx_eq(mspf, 1000.0 / 60.0));
    }
}
