//! 模拟执行队列
//!
//! 在工作线程上按序执行提交的命令批次，模拟一条独立的 GPU 执行队列：
//!
//! - `ExecuteCommandLists` / `Signal` / `Present` 按提交顺序排队执行，
//!   因此「提交之后排入的 Signal」完成即意味着该提交已经执行完毕
//! - 执行时校验资源状态与录制的屏障一致；校验失败会使队列进入
//!   「设备已移除」状态（后续工作被丢弃，错误在下一次健康检查时暴露），
//!   与真实设备移除的延迟报告行为一致
//! - 可注入提交失败和人为执行延迟，供测试驱动
//!
//! 队列句柄可克隆；最后一个句柄释放后工作线程随通道关闭而退出。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::error::{codes, GpuError, GpuErrorKind, Result};
use crate::renderer::sync::{Fence, FenceValue, QueueSignal};

use super::command::{Command, SimCommandList};
use super::resource::{ResourceState, SimTexture};

enum QueueOp {
    Execute(Vec<Command>),
    Signal(Arc<Fence>, FenceValue),
    Present(SimTexture),
}

/// 工作线程与 CPU 侧共享的状态
struct WorkerState {
    /// 首个执行期故障；置位后队列视为设备已移除
    fault: Mutex<Option<GpuError>>,
    /// 已执行完成的命令批次数
    executed: AtomicU64,
    /// 已完成的呈现次数
    presented: AtomicU64,
    /// 每个命令批次的人为执行延迟（毫秒）
    exec_delay_ms: AtomicU64,
}

impl WorkerState {
    fn record_fault(&self, fault: GpuError) {
        let mut slot = self.fault.lock().unwrap();
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    fn is_faulted(&self) -> bool {
        self.fault.lock().unwrap().is_some()
    }
}

struct QueueInner {
    sender: Mutex<Sender<QueueOp>>,
    worker: Arc<WorkerState>,
    fail_next_execute: AtomicBool,
    submitted: AtomicU64,
}

/// 模拟命令队列句柄
#[derive(Clone)]
pub struct SimQueue {
    inner: Arc<QueueInner>,
}

impl SimQueue {
    /// 创建队列并启动工作线程
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        let worker = Arc::new(WorkerState {
            fault: Mutex::new(None),
            executed: AtomicU64::new(0),
            presented: AtomicU64::new(0),
            exec_delay_ms: AtomicU64::new(0),
        });

        {
            let worker = worker.clone();
            std::thread::Builder::new()
                .name("sim-gpu-queue".to_string())
                .spawn(move || worker_loop(receiver, worker))
                .expect("failed to spawn sim queue worker");
        }

        Self {
            inner: Arc::new(QueueInner {
                sender: Mutex::new(sender),
                worker,
                fail_next_execute: AtomicBool::new(false),
                submitted: AtomicU64::new(0),
            }),
        }
    }

    fn send(&self, call: &'static str, op: QueueOp) -> Result<()> {
        let sender = self.inner.sender.lock().unwrap();
        sender
            .send(op)
            .map_err(|_| GpuError::new(call, GpuErrorKind::Submission, codes::E_FAIL).into())
    }

    /// 提交命令列表
    ///
    /// 列表必须处于 Executable 状态（已 Close）。提交成功后列表进入
    /// Pending 状态，录制的指令被移交给工作线程。
    ///
    /// # 错误
    ///
    /// 未 Close 的列表、注入的提交失败、或队列已进入设备移除状态
    /// 都会返回提交错误，不会重试。
    pub fn execute_command_lists(&self, list: &mut SimCommandList) -> Result<()> {
        if list.state() != super::command::CommandBufferState::Executable {
            return Err(GpuError::new(
                "ExecuteCommandLists",
                GpuErrorKind::Submission,
                codes::DXGI_ERROR_INVALID_CALL,
            )
            .into());
        }

        if self.inner.fail_next_execute.swap(false, Ordering::AcqRel) {
            return Err(GpuError::new(
                "ExecuteCommandLists",
                GpuErrorKind::Submission,
                codes::DXGI_ERROR_DEVICE_REMOVED,
            )
            .into());
        }

        if self.inner.worker.is_faulted() {
            return Err(GpuError::new(
                "ExecuteCommandLists",
                GpuErrorKind::Submission,
                codes::DXGI_ERROR_DEVICE_REMOVED,
            )
            .into());
        }

        let commands = list.take_commands();
        self.send("ExecuteCommandLists", QueueOp::Execute(commands))?;
        self.inner.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// 请求呈现一个后备缓冲区
    ///
    /// 呈现作为队列指令排在已提交的命令之后执行；资源状态校验
    /// （必须处于 Present 状态）由工作线程完成，失败会使队列进入
    /// 设备移除状态。
    pub fn present(&self, target: &SimTexture) -> Result<()> {
        self.send("Present", QueueOp::Present(target.clone()))
    }

    /// 检查队列健康状态
    ///
    /// 工作线程检测到的命令流非法（资源状态与屏障不符等）在这里
    /// 以结构化错误暴露。故障是永久性的。
    pub fn check_health(&self) -> Result<()> {
        if let Some(fault) = self.inner.worker.fault.lock().unwrap().as_ref() {
            return Err(fault.clone().into());
        }
        Ok(())
    }

    /// 注入一次提交失败（测试用）
    pub fn inject_execute_failure(&self) {
        self.inner.fail_next_execute.store(true, Ordering::Release);
    }

    /// 设置每个命令批次的人为执行延迟（测试用）
    pub fn set_execution_delay(&self, delay: Duration) {
        self.inner
            .worker
            .exec_delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
    }

    /// 已接受的提交批次数
    pub fn submitted_batches(&self) -> u64 {
        self.inner.submitted.load(Ordering::Acquire)
    }

    /// 工作线程已执行完的批次数
    pub fn executed_batches(&self) -> u64 {
        self.inner.worker.executed.load(Ordering::Acquire)
    }

    /// 已完成的呈现次数
    pub fn presented_frames(&self) -> u64 {
        self.inner.worker.presented.load(Ordering::Acquire)
    }
}

impl Default for SimQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueSignal for SimQueue {
    fn signal(&self, fence: &Arc<Fence>, value: FenceValue) -> Result<()> {
        self.send("Signal", QueueOp::Signal(fence.clone(), value))
    }
}

fn worker_loop(receiver: Receiver<QueueOp>, state: Arc<WorkerState>) {
    while let Ok(op) = receiver.recv() {
        match op {
            QueueOp::Execute(commands) => {
                let delay = state.exec_delay_ms.load(Ordering::Acquire);
                if delay > 0 {
                    std::thread::sleep(Duration::from_millis(delay));
                }

                // 设备移除后丢弃后续工作
                if state.is_faulted() {
                    continue;
                }

                for command in commands {
                    if let Err(fault) = execute_command(command) {
                        state.record_fault(fault);
                        break;
                    }
                }
                state.executed.fetch_add(1, Ordering::AcqRel);
            }
            QueueOp::Present(target) => {
                if state.is_faulted() {
                    continue;
                }

                if target.state() != ResourceState::Present {
                    state.record_fault(GpuError::new(
                        "Present",
                        GpuErrorKind::Present,
                        codes::DXGI_ERROR_INVALID_CALL,
                    ));
                    continue;
                }
                state.presented.fetch_add(1, Ordering::AcqRel);
            }
            // 设备移除后栅栏仍然会完成，避免 CPU 侧永久阻塞
            QueueOp::Signal(fence, value) => {
                fence.signal(value);
            }
        }
    }
}

/// 执行单条指令，校验资源状态与录制的屏障一致
fn execute_command(command: Command) -> std::result::Result<(), GpuError> {
    match command {
        Command::Transition { resource, before, after } => {
            let actual = resource.state();
            if actual != before {
                return Err(GpuError::new(
                    "ResourceBarrier",
                    GpuErrorKind::Submission,
                    codes::E_INVALIDARG,
                ));
            }
            resource.set_state(after);
            Ok(())
        }
        Command::CopyBuffer { src, dst } => {
            if src.state() != ResourceState::GenericRead {
                return Err(GpuError::new(
                    "CopyResource",
                    GpuErrorKind::Submission,
                    codes::E_INVALIDARG,
                ));
            }
            if dst.state() != ResourceState::CopyDest {
                return Err(GpuError::new(
                    "CopyResource",
                    GpuErrorKind::Submission,
                    codes::E_INVALIDARG,
                ));
            }

            let data = src.read_back();
            *dst.inner.bytes.lock().unwrap() = data;
            Ok(())
        }
        Command::ClearRenderTarget { target, color } => {
            if target.state() != ResourceState::RenderTarget {
                return Err(GpuError::new(
                    "ClearRenderTargetView",
                    GpuErrorKind::Submission,
                    codes::E_INVALIDARG,
                ));
            }
            target.record_clear_color(color);
            Ok(())
        }
        Command::ClearDepthStencil { target, depth, stencil } => {
            if target.state() != ResourceState::DepthWrite {
                return Err(GpuError::new(
                    "ClearDepthStencilView",
                    GpuErrorKind::Submission,
                    codes::E_INVALIDARG,
                ));
            }
            target.record_clear_depth_stencil(depth, stencil);
            Ok(())
        }
        // 状态设置指令没有可校验的副作用
        Command::SetViewport(_) | Command::SetScissorRect(_) | Command::SetRenderTargets { .. } => {
            Ok(())
        }
    }
}
