//! 渲染器模块
//!
//! 本模块提供了统一的渲染接口，封装了不同图形后端的具体实现。
//! 应用程序通过这个模块与底层后端（模拟、DirectX 12）交互，
//! 而不需要关心具体使用的是哪个后端。
//!
//! # 架构设计
//!
//! - `Renderer`：统一的渲染器接口，对外提供一致的 API
//! - `Backend`：内部枚举，封装不同的后端实现（枚举分发，零成本抽象）
//! - `sync`：与后端无关的同步原语（Fence、帧同步策略）
//! - 底层实现在 `gfx` 模块中，按后端分类组织

use std::sync::Arc;

use tracing::info;
use winit::dpi::LogicalSize;
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use crate::core::config::{Config, GraphicsBackend};
use crate::core::error::{LiteRenderError, Result};
use crate::core::timer::GameTimer;
#[cfg(target_os = "windows")]
use crate::gfx::dx12::Dx12Renderer;
use crate::gfx::sim::SimRenderer;

pub mod sync;

/// 图形后端枚举
///
/// 封装不同的后端实现，支持运行时选择。
enum Backend {
    Sim(SimRenderer),
    #[cfg(target_os = "windows")]
    Dx12(Dx12Renderer),
}

/// 统一渲染器
///
/// 持有窗口和选定的后端，对外提供 resize / update / draw 接口。
pub struct Renderer {
    window: Arc<Window>,
    backend: Backend,
}

impl Renderer {
    /// 根据配置创建窗口和后端
    pub fn new(event_loop: &EventLoop<()>, config: &Config) -> Result<Self> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(format!(
                    "{} [{}]",
                    config.window.title,
                    config.graphics.backend.name()
                ))
                .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
                .with_resizable(config.window.resizable)
                .build(event_loop)
                .map_err(|e| {
                    LiteRenderError::Initialization(format!("Failed to create window: {e}"))
                })?,
        );

        let backend = match config.graphics.backend {
            GraphicsBackend::Sim => {
                info!("Initializing Sim Backend");
                Backend::Sim(SimRenderer::new(config)?)
            }
            #[cfg(target_os = "windows")]
            GraphicsBackend::Dx12 => {
                info!("Initializing DX12 Backend");
                Backend::Dx12(Dx12Renderer::new(window.clone(), config)?)
            }
            #[cfg(not(target_os = "windows"))]
            GraphicsBackend::Dx12 => {
                return Err(LiteRenderError::Initialization(
                    "DX12 backend is only available on Windows".to_string(),
                ));
            }
        };

        Ok(Self { window, backend })
    }

    /// 窗口尺寸变化时调用
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        match &mut self.backend {
            Backend::Sim(r) => r.resize(width, height),
            #[cfg(target_os = "windows")]
            Backend::Dx12(r) => r.resize(width, height),
        }
    }

    /// 每帧渲染前调用，传入只读的时间快照
    pub fn update(&mut self, timer: &GameTimer) {
        match &mut self.backend {
            Backend::Sim(r) => r.update(timer),
            #[cfg(target_os = "windows")]
            Backend::Dx12(r) => r.update(timer),
        }
    }

    /// 绘制一帧
    pub fn draw(&mut self) -> Result<()> {
        match &mut self.backend {
            Backend::Sim(r) => r.draw(),
            #[cfg(target_os = "windows")]
            Backend::Dx12(r) => r.draw(),
        }
    }

    /// 获取窗口的引用
    pub fn window(&self) -> &Window {
        &self.window
    }
}
