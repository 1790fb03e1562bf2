//! 图形后端模块
//!
//! 按后端分类组织具体实现：
//!
//! - `sim`：软件模拟后端（跨平台，默认）
//! - `dx12`：DirectX 12 后端（仅 Windows）

pub mod sim;

#[cfg(target_os = "windows")]
pub mod dx12;
