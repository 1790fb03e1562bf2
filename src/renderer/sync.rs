//! GPU 同步机制模块
//!
//! 提供统一的 GPU 同步原语，用于 CPU 等待 GPU 完成工作。
//!
//! # 设计原则
//!
//! - **Fence 同步**：单调递增的完成计数器，GPU 执行到 Signal 指令时置位，
//!   CPU 可以阻塞等待某个值被置位
//! - **帧同步策略可替换**：帧末的同步点抽象为 `FrameSync` trait，
//!   默认实现 `FullFlush` 每帧做一次完整的管线排空；
//!   多帧并行（frame-in-flight）设计可以替换此策略而不触碰绘制状态机
//!
//! # 使用场景
//!
//! 1. **帧同步**：确保 GPU 完成本帧后才复用命令分配器
//! 2. **资源上传**：确保暂存缓冲区在拷贝完成前保持存活

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::core::error::Result;

/// Fence 值
///
/// 用于 CPU-GPU 同步的单调递增值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 创建新的 Fence 值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个 Fence 值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// 完成栅栏
///
/// CPU 侧维护「下一个要等待的值」计数器，GPU（执行队列）完成一批工作后
/// 置位对应的完成值。两个计数器都只会单调递增。
///
/// # 示例
///
/// ```rust
/// use std::sync::Arc;
/// use lite_render::renderer::sync::Fence;
///
/// let fence = Arc::new(Fence::new());
///
/// // 提交工作并签发 fence 值
/// let value = fence.next_value();
///
/// // 队列执行完毕后（通常在另一个线程）置位
/// fence.signal(value);
///
/// // 等待完成
/// fence.wait_for_value(value);
/// ```
pub struct Fence {
    /// 当前已签发的最大值（CPU 侧）
    current_value: AtomicU64,
    /// 已完成的值（GPU 侧置位）
    completed: Mutex<u64>,
    /// 完成通知
    condvar: Condvar,
}

impl Fence {
    /// 创建新的栅栏，初始完成值为 0
    pub fn new() -> Self {
        Self {
            current_value: AtomicU64::new(0),
            completed: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// 获取当前已签发的最大值
    pub fn current_value(&self) -> FenceValue {
        FenceValue::new(self.current_value.load(Ordering::Acquire))
    }

    /// 获取已完成的值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(*self.completed.lock().unwrap())
    }

    /// 签发下一个 Fence 值并递增计数器
    pub fn next_value(&self) -> FenceValue {
        let value = self.current_value.fetch_add(1, Ordering::AcqRel);
        FenceValue::new(value + 1)
    }

    /// 置位完成值
    ///
    /// 由执行队列在完成一批工作后调用。完成值只会单调递增：
    /// 小于当前完成值的置位会被忽略。
    pub fn signal(&self, value: FenceValue) {
        let mut completed = self.completed.lock().unwrap();
        if value.value() > *completed {
            *completed = value.value();
        }
        self.condvar.notify_all();
    }

    /// 检查特定 Fence 值是否已完成
    pub fn is_completed(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }

    /// 阻塞等待特定 Fence 值完成
    ///
    /// 这是一个无超时的阻塞操作，与绘制循环的帧末排空语义一致。
    pub fn wait_for_value(&self, value: FenceValue) {
        let mut completed = self.completed.lock().unwrap();
        while *completed < value.value() {
            completed = self.condvar.wait(completed).unwrap();
        }
    }

    /// 带超时的等待，返回是否在超时前完成
    ///
    /// 绘制循环不使用超时；此接口供测试与外部加固场景使用。
    pub fn wait_for_value_timeout(&self, value: FenceValue, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut completed = self.completed.lock().unwrap();
        while *completed < value.value() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.condvar.wait_timeout(completed, deadline - now).unwrap();
            completed = guard;
            if result.timed_out() && *completed < value.value() {
                return false;
            }
        }
        true
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}

/// 可向执行队列排入 Signal 指令的对象
///
/// 由各后端的命令队列实现。Signal 指令与已提交的命令批次按序执行，
/// 因此 fence 置位意味着此前提交的全部工作已经完成。
pub trait QueueSignal {
    /// 排入一条「执行到此处时把 `fence` 置位为 `value`」的指令
    fn signal(&self, fence: &Arc<Fence>, value: FenceValue) -> Result<()>;
}

/// 帧同步策略
///
/// 绘制状态机在「提交 + 呈现」之后调用 `signal_frame` 签发本帧的
/// fence 值，再调用 `wait_frame` 决定阻塞到什么程度。
/// 拆成两步是为了让调用方在两者之间登记分配器的在途状态。
pub trait FrameSync {
    /// 签发本帧的 fence 值并排入 Signal 指令
    fn signal_frame(&mut self, queue: &dyn QueueSignal, fence: &Arc<Fence>) -> Result<FenceValue>;

    /// 阻塞到允许下一帧开始录制为止
    fn wait_frame(&mut self, fence: &Fence, value: FenceValue) -> Result<()>;
}

/// 完整排空策略（默认）
///
/// 每帧签发一个新值并阻塞到它完成：CPU 与 GPU 完全串行。
/// 简单且正确，吞吐量换简单性；替换为多帧并行策略时
/// `wait_frame` 只需等待更早一帧的值。
pub struct FullFlush;

impl FrameSync for FullFlush {
    fn signal_frame(&mut self, queue: &dyn QueueSignal, fence: &Arc<Fence>) -> Result<FenceValue> {
        let value = fence.next_value();
        queue.signal(fence, value)?;
        Ok(value)
    }

    fn wait_frame(&mut self, fence: &Fence, value: FenceValue) -> Result<()> {
        fence.wait_for_value(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_fence_value() {
        let value = FenceValue::new(1);
        assert_eq!(value.value(), 1);

        let next = value.next();
        assert_eq!(next.value(), 2);
        assert_eq!(value.value(), 1); // 原值不变
    }

    #[test]
    fn test_fence_signal_and_completion() {
        let fence = Fence::new();

        assert_eq!(fence.current_value().value(), 0);
        assert_eq!(fence.completed_value().value(), 0);

        let v1 = fence.next_value();
        assert_eq!(v1.value(), 1);

        let v2 = fence.next_value();
        assert_eq!(v2.value(), 2);

        // 模拟 GPU 完成
        fence.signal(v1);
        assert!(fence.is_completed(v1));
        assert!(!fence.is_completed(v2));

        fence.signal(v2);
        assert!(fence.is_completed(v2));
    }

    #[test]
    fn test_fence_completed_value_is_monotonic() {
        let fence = Fence::new();

        fence.signal(FenceValue::new(5));
        assert_eq!(fence.completed_value().value(), 5);

        // 倒退的置位被忽略
        fence.signal(FenceValue::new(3));
        assert_eq!(fence.completed_value().value(), 5);
    }

    #[test]
    fn test_wait_blocks_until_signaled_from_another_thread() {
        let fence = Arc::new(Fence::new());
        let value = fence.next_value();

        let signaler = {
            let fence = fence.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                fence.signal(value);
            })
        };

        fence.wait_for_value(value);
        assert!(fence.is_completed(value));

        signaler.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires_when_never_signaled() {
        let fence = Fence::new();
        let value = fence.next_value();

        assert!(!fence.wait_for_value_timeout(value, Duration::from_millis(20)));

        fence.signal(value);
        assert!(fence.wait_for_value_timeout(value, Duration::from_millis(20)));
    }

    /// 立即完成一切 Signal 指令的队列桩
    struct ImmediateQueue {
        signaled: StdMutex<Vec<u64>>,
    }

    impl QueueSignal for ImmediateQueue {
        fn signal(&self, fence: &Arc<Fence>, value: FenceValue) -> Result<()> {
            self.signaled.lock().unwrap().push(value.value());
            fence.signal(value);
            Ok(())
        }
    }

    #[test]
    fn test_full_flush_advances_fence_each_frame() {
        let queue = ImmediateQueue { signaled: StdMutex::new(Vec::new()) };
        let fence = Arc::new(Fence::new());
        let mut sync = FullFlush;

        for expected in 1..=3u64 {
            let value = sync.signal_frame(&queue, &fence).unwrap();
            assert_eq!(value.value(), expected);
            sync.wait_frame(&fence, value).unwrap();
            assert!(fence.is_completed(value));
        }

        assert_eq!(*queue.signaled.lock().unwrap(), vec![1, 2, 3]);
    }
}
