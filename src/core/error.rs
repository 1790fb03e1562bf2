//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型，为每种错误提供清晰的上下文信息。
//!
//! # 设计原则
//!
//! - 手动实现 `Display` 和 `Error` trait，保持错误消息的完全可控
//! - GPU 调用失败统一表示为 `GpuError`，携带调用名、源码位置和状态码
//! - 支持错误链（error source）
//! - 易于模式匹配和错误处理
//!
//! # GPU 错误分类
//!
//! GPU 层的失败不可恢复，统一分为四类：
//!
//! - `Allocation`：资源或暂存缓冲区创建失败
//! - `Recording`：命令缓冲区/分配器处于非法状态（Reset/Close 时发现）
//! - `Submission`：命令队列提交失败
//! - `Present`：交换链呈现失败
//!
//! 四类错误都会携带失败调用的符号名（如 `"ExecuteCommandLists"`）、
//! 源码位置和 HRESULT 风格的数值状态码，便于诊断显示。

use std::fmt;

/// 引擎统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, LiteRenderError>;

/// LiteRender 引擎的错误类型
///
/// 包含了引擎运行过程中可能遇到的各种错误情况。
#[derive(Debug)]
pub enum LiteRenderError {
    /// 配置错误
    Config(ConfigError),

    /// GPU 调用错误（不可恢复）
    Gpu(GpuError),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// GPU 错误分类
///
/// 分配失败、录制状态非法、提交失败、呈现失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuErrorKind {
    /// 资源分配失败
    Allocation,
    /// 命令录制状态非法（Reset/Close 检测到）
    Recording,
    /// 队列提交失败
    Submission,
    /// 呈现失败
    Present,
}

/// 结构化的 GPU 调用错误
///
/// 记录失败调用的符号名、源码位置和数值状态码。
/// 构造时通过 `#[track_caller]` 自动捕获调用点位置。
#[derive(Debug, Clone)]
pub struct GpuError {
    /// 失败调用的符号名，如 `"ExecuteCommandLists"`
    pub call: &'static str,
    /// 错误分类
    pub kind: GpuErrorKind,
    /// HRESULT 风格的状态码
    pub code: i32,
    /// 源文件
    pub file: &'static str,
    /// 行号
    pub line: u32,
}

impl GpuError {
    /// 构造 GPU 错误，自动捕获调用点的源码位置
    #[track_caller]
    pub fn new(call: &'static str, kind: GpuErrorKind, code: i32) -> Self {
        let location = std::panic::Location::caller();
        Self {
            call,
            kind,
            code,
            file: location.file(),
            line: location.line(),
        }
    }
}

/// 引擎内部使用的 HRESULT 风格状态码
///
/// 模拟后端复用真实 D3D12/DXGI 的数值，保证两个后端的错误码语义一致。
pub mod codes {
    /// 一般性失败
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
    /// 内存不足
    pub const E_OUTOFMEMORY: i32 = 0x8007_000E_u32 as i32;
    /// 参数无效
    pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;
    /// 设备已移除（命令流非法或设备丢失）
    pub const DXGI_ERROR_DEVICE_REMOVED: i32 = 0x887A_0005_u32 as i32;
    /// 调用序列非法
    pub const DXGI_ERROR_INVALID_CALL: i32 = 0x887A_0001_u32 as i32;
}

impl fmt::Display for LiteRenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteRenderError::Config(e) => write!(f, "Configuration error: {}", e),
            LiteRenderError::Gpu(e) => write!(f, "GPU error: {}", e),
            LiteRenderError::Io(e) => write!(f, "IO error: {}", e),
            LiteRenderError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GpuErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuErrorKind::Allocation => "allocation",
            GpuErrorKind::Recording => "recording",
            GpuErrorKind::Submission => "submission",
            GpuErrorKind::Present => "present",
        };
        f.write_str(name)
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with 0x{:08X} ({}) at {}:{}",
            self.call, self.code as u32, self.kind, self.file, self.line
        )
    }
}

impl std::error::Error for LiteRenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LiteRenderError::Io(e) => Some(e),
            LiteRenderError::Config(e) => Some(e),
            LiteRenderError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GpuError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for LiteRenderError {
    fn from(err: std::io::Error) -> Self {
        LiteRenderError::Io(err)
    }
}

impl From<ConfigError> for LiteRenderError {
    fn from(err: ConfigError) -> Self {
        LiteRenderError::Config(err)
    }
}

impl From<GpuError> for LiteRenderError {
    fn from(err: GpuError) -> Self {
        LiteRenderError::Gpu(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_error_display() {
        let err = GpuError::new("ExecuteCommandLists", GpuErrorKind::Submission, codes::E_FAIL);
        let text = err.to_string();
        assert!(text.starts_with("ExecuteCommandLists failed with 0x80004005"));
        assert!(text.contains("submission"));
        assert!(text.contains("error.rs"));
    }

    #[test]
    fn test_gpu_error_captures_call_site() {
        let err = GpuError::new("Reset", GpuErrorKind::Recording, codes::E_FAIL);
        assert_eq!(err.call, "Reset");
        assert!(err.line > 0);
    }
}
