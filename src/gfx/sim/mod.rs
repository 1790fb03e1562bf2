//! 软件模拟图形后端
//!
//! 把 GPU 侧的设备、命令队列、命令列表和资源全部放到 CPU 上模拟：
//! 命令在工作线程上按提交顺序执行，资源状态转换与录制的屏障逐条
//! 校验，栅栏按真实队列的顺序语义置位。
//!
//! 这是默认后端，在任何平台都可用，也是测试套件驱动帧生命周期
//! 不变式（分配器复用、栅栏等待、错误分类）所用的后端。

pub mod command;
pub mod device;
pub mod queue;
pub mod renderer;
pub mod resource;

pub use device::SimDevice;
pub use queue::SimQueue;
pub use renderer::SimRenderer;
