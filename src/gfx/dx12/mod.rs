//! DirectX 12 图形后端实现
//!
//! 仅在 Windows 上编译。模块组织：
//!
//! - `backend`：设备、命令队列、交换链、描述符堆、同步对象等核心资源
//! - `renderer`：帧生命周期（录制 → 提交 → 呈现 → 排空）
//! - `resource`：默认堆缓冲区初始化（上传堆暂存 + 拷贝）

pub mod backend;
pub mod renderer;
pub mod resource;

pub use backend::Dx12Backend;
pub use renderer::Dx12Renderer;

use crate::core::error::{GpuError, GpuErrorKind, Result};

/// 把 HRESULT 失败映射为结构化 GPU 错误
///
/// 记录失败调用的符号名和调用点源码位置，错误码取原始 HRESULT。
#[track_caller]
pub(crate) fn check<T>(
    call: &'static str,
    kind: GpuErrorKind,
    result: windows::core::Result<T>,
) -> Result<T> {
    let location = std::panic::Location::caller();
    result.map_err(|e| {
        GpuError {
            call,
            kind,
            code: e.code().0,
            file: location.file(),
            line: location.line(),
        }
        .into()
    })
}
