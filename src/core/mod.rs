//! 核心功能模块
//!
//! 本模块提供了渲染引擎的基础功能：计时、日志、配置管理和错误处理。
//! 这些模块独立于具体的图形后端，可以在任何后端中使用。
//!
//! # 模块组织
//!
//! - `timer`：帧计时器，支持暂停/恢复和帧率统计
//! - `log`：日志系统，提供结构化的日志记录功能
//! - `config`：配置管理，支持从配置文件加载引擎设置
//! - `error`：错误处理，定义统一的错误类型

pub mod timer;
pub mod log;
pub mod config;
pub mod error;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use error::{GpuError, GpuErrorKind, LiteRenderError, Result};
pub use timer::{FrameStats, GameTimer};
