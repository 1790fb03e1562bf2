//! LiteRender - 最小多后端渲染引擎
//!
//! 演示驱动：初始化 → 尺寸变化 → 逐帧（update, draw）循环。
//! 每帧清除后备缓冲与深度缓冲并呈现；帧末做一次完整的队列排空。
//! 可以通过配置文件或命令行参数选择使用的图形后端。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（默认模拟后端）
//! cargo run
//!
//! # 使用 DirectX 12（命令行覆盖，仅 Windows）
//! cargo run -- --dx12
//! ```
//!
//! # 事件处理
//!
//! - `CloseRequested`：用户关闭窗口，退出程序
//! - `Resized`：窗口大小改变，排空队列后重建尺寸相关资源
//! - `Focused`：失焦暂停计时器与绘制，聚焦恢复
//! - `RedrawRequested`：推进计时器并绘制下一帧

use anyhow::Context;
use std::time::Duration;
use tracing::{debug, error, info};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};

use lite_render::core::config::Config;
use lite_render::core::log;
use lite_render::core::timer::{FrameStats, GameTimer};
use lite_render::renderer::Renderer;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载引擎配置文件（config.toml）
/// 2. 应用命令行参数覆盖（--dx12 / --sim / --width / --height）
/// 3. 验证配置
/// 4. 初始化日志系统
/// 5. 创建事件循环和渲染器，进入主循环
fn main() {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());

    // 3. 验证配置
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // 4. 初始化日志系统（使用配置中的设置）
    let log_file = if config.logging.file_output {
        Some(config.logging.log_file.as_str())
    } else {
        None
    };
    log::init_logger(config.logging.level, config.logging.file_output, log_file);

    info!("LiteRender starting...");
    info!(version = env!("CARGO_PKG_VERSION"), "Application initialized");
    info!(
        backend = ?config.graphics.backend,
        width = config.window.width,
        height = config.window.height,
        buffers = config.graphics.buffer_count,
        "Graphics configuration"
    );

    // 5. 进入主循环；任何致命错误在这里统一显示后退出
    if let Err(e) = run(config) {
        error!("Fatal error: {:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

/// 创建事件循环与渲染器，运行主循环
fn run(config: Config) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;

    let mut renderer =
        Renderer::new(&event_loop, &config).context("Failed to initialize renderer")?;
    info!("Renderer initialized successfully");

    let mut timer = GameTimer::new();
    let mut stats = FrameStats::new();
    let mut app_paused = false;

    // 进入主循环前重置计时器基准
    timer.reset();
    info!("Entering main loop...");

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    // 窗口关闭事件
                    WindowEvent::CloseRequested => {
                        info!("Close requested, shutting down...");
                        elwt.exit();
                    }
                    // 失焦暂停 / 聚焦恢复
                    WindowEvent::Focused(focused) => {
                        app_paused = !focused;
                        if focused {
                            timer.start();
                        } else {
                            timer.stop();
                        }
                    }
                    // 窗口大小调整事件
                    WindowEvent::Resized(new_size) => {
                        debug!(
                            width = new_size.width,
                            height = new_size.height,
                            "Window resized"
                        );
                        if let Err(e) = renderer.resize(new_size.width, new_size.height) {
                            error!("Resize failed: {}", e);
                            eprintln!("Resize failed: {}", e);
                            std::process::exit(1);
                        }
                    }
                    // 绘制下一帧
                    WindowEvent::RedrawRequested => {
                        timer.tick();

                        if app_paused {
                            std::thread::sleep(Duration::from_millis(100));
                            return;
                        }

                        if let Some((fps, mspf)) = stats.frame(timer.total_time()) {
                            debug!(fps, mspf, "Frame statistics");
                        }

                        renderer.update(&timer);
                        if let Err(e) = renderer.draw() {
                            // GPU 层失败不可恢复：显示后终止进程
                            error!("Draw failed: {}", e);
                            eprintln!("Draw failed: {}", e);
                            std::process::exit(1);
                        }
                    }
                    _ => (),
                },
                // 一轮事件处理完毕，请求绘制下一帧
                Event::AboutToWait => {
                    renderer.window().request_redraw();
                }
                _ => (),
            }
        })
        .context("Event loop failed")?;

    Ok(())
}
