//! LiteRender —— 最小多后端渲染引擎
//!
//! 围绕逐帧 GPU 资源生命周期与 CPU/GPU 同步契约构建的最小渲染骨架，
//! 支持软件模拟后端（跨平台）和 DirectX 12 后端（仅 Windows）。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（计时器、日志、配置、错误处理）
//! - `renderer`: 渲染器模块（统一接口与同步原语）
//! - `gfx`: 图形后端模块（模拟与 DirectX 12 实现）
//!
//! # 使用示例
//!
//! ```rust
//! use lite_render::core::Config;
//! use lite_render::gfx::sim::SimRenderer;
//!
//! let config = Config::default();
//! let mut renderer = SimRenderer::new(&config).unwrap();
//!
//! // 绘制一帧：录制 → 提交 → 呈现 → 帧末排空
//! renderer.draw().unwrap();
//! assert_eq!(renderer.back_buffer_index(), 1);
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
