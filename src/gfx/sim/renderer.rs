//! 模拟后端渲染器
//!
//! 在模拟设备上实现完整的帧生命周期：
//!
//! ```text
//! Idle → Recording → Submitted → Presented → Idle
//! ```
//!
//! 每帧：Reset 分配器与命令列表 → 录制（屏障、视口、清屏、绑定目标、
//! 回转屏障）→ Close 并提交 → 呈现并推进后备缓冲索引 → 帧末同步。
//! 帧末同步默认是完整排空（`FullFlush`）：签发 fence 值并阻塞到 GPU
//! 追上为止。这是刻意的取舍——吞吐量换正确性的简单性；
//! 换成多帧并行策略时本状态机不需要任何改动。

use tracing::{debug, info};

use std::sync::Arc;

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::timer::GameTimer;
use crate::renderer::sync::{Fence, FrameSync, FullFlush};

use super::command::{ScissorRect, SimCommandAllocator, SimCommandList, Viewport};
use super::device::SimDevice;
use super::queue::SimQueue;
use super::resource::{create_default_buffer, PendingUpload, ResourceState, SimBuffer, SimTexture};

/// 模拟后端渲染器
///
/// 持有帧提交单元（一个命令分配器 + 一个命令列表，逐帧复用）、
/// 交换链环（固定数量的可呈现目标）、深度目标和完成栅栏。
pub struct SimRenderer {
    device: SimDevice,
    queue: SimQueue,
    fence: Arc<Fence>,
    sync: Box<dyn FrameSync>,

    allocator: SimCommandAllocator,
    command_list: SimCommandList,

    render_targets: Vec<SimTexture>,
    depth_target: SimTexture,
    back_buffer: usize,

    viewport: Viewport,
    scissor_rect: ScissorRect,
    clear_color: [f32; 4],

    width: u32,
    height: u32,

    /// 在途的暂存缓冲区，fence 到达后随 retire 释放
    pending_uploads: Vec<PendingUpload>,
}

impl SimRenderer {
    /// 创建模拟渲染器
    pub fn new(config: &Config) -> Result<Self> {
        let width = config.window.width;
        let height = config.window.height;
        let buffer_count = config.graphics.buffer_count;

        let device = SimDevice::new();
        let queue = SimQueue::new();
        let fence = device.create_fence();

        let render_targets = (0..buffer_count)
            .map(|_| device.create_render_target(width, height))
            .collect::<Result<Vec<_>>>()?;
        let depth_target = device.create_depth_stencil(width, height)?;

        let allocator = device.create_command_allocator();
        let mut command_list = device.create_command_list(&allocator);
        // 新命令列表处于录制状态；先 Close 使其与帧循环开头的 Reset 对齐
        command_list.close()?;

        info!(width, height, buffers = buffer_count, "Sim swap chain created");

        Ok(Self {
            device,
            queue,
            fence,
            sync: Box::new(FullFlush),
            allocator,
            command_list,
            render_targets,
            depth_target,
            back_buffer: 0,
            viewport: Viewport::full(width, height),
            scissor_rect: ScissorRect::full(width, height),
            clear_color: config.graphics.clear_color,
            width,
            height,
            pending_uploads: Vec::new(),
        })
    }

    /// 窗口尺寸变化时重建尺寸相关资源
    ///
    /// 先排空队列确保旧目标不再被引用，然后重建交换链目标和深度目标，
    /// 后备缓冲索引回到 0。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        // 最小化会报告零尺寸，忽略
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.flush()?;

        let buffer_count = self.render_targets.len();
        self.render_targets = (0..buffer_count)
            .map(|_| self.device.create_render_target(width, height))
            .collect::<Result<Vec<_>>>()?;
        self.depth_target = self.device.create_depth_stencil(width, height)?;

        self.back_buffer = 0;
        self.viewport = Viewport::full(width, height);
        self.scissor_rect = ScissorRect::full(width, height);
        self.width = width;
        self.height = height;

        debug!(width, height, "Sim render targets recreated");
        Ok(())
    }

    /// 逐帧状态更新
    pub fn update(&mut self, _timer: &GameTimer) {
        // 清屏演示没有需要逐帧更新的场景状态
    }

    /// 绘制一帧
    pub fn draw(&mut self) -> Result<()> {
        // 1. 复用命令录制内存。分配器只有在 GPU 执行完与其关联的命令后
        //    才能 Reset —— 上一帧的完整排空保证了这个前置条件
        self.allocator.reset()?;
        self.command_list.reset(&self.allocator)?;

        let target = self.render_targets[self.back_buffer].clone();

        // 2. 录制：可呈现 → 渲染目标
        self.command_list.resource_barrier(
            &target,
            ResourceState::Present,
            ResourceState::RenderTarget,
        );

        // 视口和裁剪矩形不跨 Reset 保留，每次录制都要重新设置
        self.command_list.set_viewport(self.viewport);
        self.command_list.set_scissor_rect(self.scissor_rect);

        // 清除后备缓冲和深度缓冲
        self.command_list.clear_render_target(&target, self.clear_color);
        self.command_list.clear_depth_stencil(&self.depth_target, 1.0, 0);

        self.command_list.set_render_targets(&target, Some(&self.depth_target));

        // 渲染目标 → 可呈现
        self.command_list.resource_barrier(
            &target,
            ResourceState::RenderTarget,
            ResourceState::Present,
        );

        // 3. 结束录制并提交
        self.command_list.close()?;
        self.queue.execute_command_lists(&mut self.command_list)?;

        // 4. 呈现，推进后备缓冲索引
        self.queue.present(&target)?;
        self.back_buffer = (self.back_buffer + 1) % self.render_targets.len();

        // 5. 帧末同步
        self.flush()
    }

    /// 创建 GPU 本地缓冲区并完成初始数据上传
    ///
    /// 录制「暂存 → 默认堆」的拷贝，提交并排空，暂存缓冲区通过
    /// [`PendingUpload`] 与本次提交的 fence 值绑定，完成后自动释放。
    pub fn upload_buffer(&mut self, data: &[u8]) -> Result<SimBuffer> {
        self.allocator.reset()?;
        self.command_list.reset(&self.allocator)?;

        let (buffer, staging) = create_default_buffer(&self.device, &mut self.command_list, data)?;

        self.command_list.close()?;
        self.queue.execute_command_lists(&mut self.command_list)?;

        let value = self.sync.signal_frame(&self.queue, &self.fence)?;
        self.allocator.mark_in_flight(self.fence.clone(), value);
        self.pending_uploads.push(PendingUpload::new(staging, value));

        self.sync.wait_frame(&self.fence, value)?;
        self.queue.check_health()?;
        self.retire_uploads();

        Ok(buffer)
    }

    /// 排空执行队列：签发新的 fence 值并阻塞到完成
    fn flush(&mut self) -> Result<()> {
        let value = self.sync.signal_frame(&self.queue, &self.fence)?;
        self.allocator.mark_in_flight(self.fence.clone(), value);
        self.sync.wait_frame(&self.fence, value)?;

        // 工作线程检测到的命令流故障在排空后统一暴露
        self.queue.check_health()?;
        self.retire_uploads();
        Ok(())
    }

    /// 释放已完成提交的暂存缓冲区
    fn retire_uploads(&mut self) {
        let fence = &self.fence;
        self.pending_uploads.retain(|upload| !upload.is_complete(fence));
    }

    /// 替换帧同步策略
    pub fn set_frame_sync(&mut self, sync: Box<dyn FrameSync>) {
        self.sync = sync;
    }

    /// 当前后备缓冲索引
    pub fn back_buffer_index(&self) -> usize {
        self.back_buffer
    }

    /// 交换链中的某个后备缓冲
    pub fn render_target(&self, index: usize) -> &SimTexture {
        &self.render_targets[index]
    }

    /// 深度/模板目标
    pub fn depth_target(&self) -> &SimTexture {
        &self.depth_target
    }

    /// 完成栅栏
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// 执行队列句柄
    pub fn queue(&self) -> &SimQueue {
        &self.queue
    }

    /// 尚未释放的暂存缓冲区数量
    pub fn pending_upload_count(&self) -> usize {
        self.pending_uploads.len()
    }

    /// 当前渲染尺寸
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{GpuErrorKind, LiteRenderError};
    use crate::renderer::sync::{FenceValue, QueueSignal};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.window.width = 64;
        config.window.height = 64;
        config.graphics.buffer_count = 2;
        config
    }

    #[test]
    fn test_back_buffer_cycles_and_flush_never_returns_early() {
        let mut renderer = SimRenderer::new(&test_config()).unwrap();
        renderer.queue().set_execution_delay(Duration::from_millis(10));

        let expected_indices = [0, 1, 0, 1, 0];
        for (frame, expected) in expected_indices.into_iter().enumerate() {
            assert_eq!(renderer.back_buffer_index(), expected);

            renderer.draw().unwrap();

            // 完整排空返回时，本帧的 fence 值必须已被置位，
            // 且工作线程已执行完本帧的命令批次
            let frame_value = FenceValue::new(frame as u64 + 1);
            assert!(renderer.fence().is_completed(frame_value));
            assert_eq!(renderer.queue().executed_batches(), frame as u64 + 1);
        }

        assert_eq!(renderer.queue().presented_frames(), 5);
    }

    #[test]
    fn test_draw_clears_render_and_depth_targets() {
        let config = test_config();
        let clear_color = config.graphics.clear_color;
        let mut renderer = SimRenderer::new(&config).unwrap();

        renderer.draw().unwrap();

        let target = renderer.render_target(0);
        assert_eq!(target.last_clear_color(), clear_color);
        assert_eq!(target.state(), ResourceState::Present);
        assert_eq!(renderer.depth_target().last_depth_stencil(), (1.0, 0));
    }

    #[test]
    fn test_submission_failure_is_fatal_and_not_retried() {
        let mut renderer = SimRenderer::new(&test_config()).unwrap();

        renderer.queue().inject_execute_failure();
        let err = renderer.draw().unwrap_err();

        match err {
            LiteRenderError::Gpu(e) => {
                assert_eq!(e.call, "ExecuteCommandLists");
                assert_eq!(e.kind, GpuErrorKind::Submission);
            }
            other => panic!("unexpected error: {other}"),
        }

        // 没有重试：队列未接受任何提交，也没有呈现
        assert_eq!(renderer.queue().submitted_batches(), 0);
        assert_eq!(renderer.queue().presented_frames(), 0);

        // 注入只生效一次，下一帧恢复正常
        renderer.draw().unwrap();
        assert_eq!(renderer.queue().submitted_batches(), 1);
    }

    #[test]
    fn test_upload_round_trip_is_byte_identical() {
        let mut renderer = SimRenderer::new(&test_config()).unwrap();

        for size in [1usize, 256, 4096, 1_048_576] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

            let buffer = renderer.upload_buffer(&data).unwrap();

            assert_eq!(buffer.read_back(), data, "size {size}");
            assert_eq!(buffer.state(), ResourceState::GenericRead);
            // 排空完成后暂存缓冲区立即退役
            assert_eq!(renderer.pending_upload_count(), 0);
        }
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Vertex {
        position: [f32; 2],
        color: [f32; 3],
    }

    #[test]
    fn test_upload_vertex_data_round_trip() {
        let mut renderer = SimRenderer::new(&test_config()).unwrap();

        let vertices = [
            Vertex { position: [0.0, 0.5], color: [1.0, 0.0, 0.0] },
            Vertex { position: [0.5, -0.5], color: [0.0, 1.0, 0.0] },
            Vertex { position: [-0.5, -0.5], color: [0.0, 0.0, 1.0] },
        ];

        let data: &[u8] = bytemuck::cast_slice(&vertices);
        let buffer = renderer.upload_buffer(data).unwrap();

        assert_eq!(buffer.read_back(), data);
    }

    #[test]
    fn test_resize_resets_back_buffer_index() {
        let mut renderer = SimRenderer::new(&test_config()).unwrap();

        renderer.draw().unwrap();
        assert_eq!(renderer.back_buffer_index(), 1);

        renderer.resize(128, 96).unwrap();
        assert_eq!(renderer.back_buffer_index(), 0);
        assert_eq!(renderer.dimensions(), (128, 96));
        assert_eq!(renderer.render_target(0).width(), 128);
        assert_eq!(renderer.render_target(0).height(), 96);

        // 零尺寸（最小化）被忽略
        renderer.resize(0, 0).unwrap();
        assert_eq!(renderer.dimensions(), (128, 96));

        renderer.draw().unwrap();
    }

    /// 委托给 FullFlush 的计数策略，验证同步点可替换
    struct CountingFlush {
        inner: FullFlush,
        signals: Arc<AtomicU32>,
        waits: Arc<AtomicU32>,
    }

    impl FrameSync for CountingFlush {
        fn signal_frame(
            &mut self,
            queue: &dyn QueueSignal,
            fence: &Arc<Fence>,
        ) -> crate::core::error::Result<FenceValue> {
            self.signals.fetch_add(1, Ordering::AcqRel);
            self.inner.signal_frame(queue, fence)
        }

        fn wait_frame(&mut self, fence: &Fence, value: FenceValue) -> crate::core::error::Result<()> {
            self.waits.fetch_add(1, Ordering::AcqRel);
            self.inner.wait_frame(fence, value)
        }
    }

    #[test]
    fn test_frame_sync_strategy_is_replaceable() {
        let mut renderer = SimRenderer::new(&test_config()).unwrap();

        let signals = Arc::new(AtomicU32::new(0));
        let waits = Arc::new(AtomicU32::new(0));
        renderer.set_frame_sync(Box::new(CountingFlush {
            inner: FullFlush,
            signals: signals.clone(),
            waits: waits.clone(),
        }));

        renderer.draw().unwrap();
        renderer.draw().unwrap();

        assert_eq!(signals.load(Ordering::Acquire), 2);
        assert_eq!(waits.load(Ordering::Acquire), 2);
    }
}
