//! 模拟后端的命令录制
//!
//! 提供命令分配器和命令列表的 CPU 侧模拟，复刻 D3D12 的录制状态机：
//!
//! - 分配器只有在 GPU 执行完与其关联的全部命令后才能 Reset
//! - 命令列表必须 Close 之后才能 Reset
//! - Close 时校验录制的合法性（如资源屏障链是否断裂）
//!
//! 录制期间的非法调用不会立即报错，而是把列表标记为无效并在 Close
//! 时统一暴露，与真实命令列表的延迟校验行为一致。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::{codes, GpuError, GpuErrorKind, Result};
use crate::renderer::sync::{Fence, FenceValue};

use super::resource::{ResourceState, SimBuffer, SimTexture};

/// 视口
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个目标的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    /// 覆盖整个目标的裁剪矩形
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// 屏障/拷贝指令引用的资源
#[derive(Clone)]
pub enum ResourceRef {
    Buffer(SimBuffer),
    Texture(SimTexture),
}

impl ResourceRef {
    pub fn id(&self) -> u64 {
        match self {
            ResourceRef::Buffer(b) => b.id(),
            ResourceRef::Texture(t) => t.id(),
        }
    }

    pub fn state(&self) -> ResourceState {
        match self {
            ResourceRef::Buffer(b) => b.state(),
            ResourceRef::Texture(t) => t.state(),
        }
    }

    pub(super) fn set_state(&self, state: ResourceState) {
        match self {
            ResourceRef::Buffer(b) => b.set_state(state),
            ResourceRef::Texture(t) => t.set_state(state),
        }
    }
}

impl From<&SimBuffer> for ResourceRef {
    fn from(buffer: &SimBuffer) -> Self {
        ResourceRef::Buffer(buffer.clone())
    }
}

impl From<&SimTexture> for ResourceRef {
    fn from(texture: &SimTexture) -> Self {
        ResourceRef::Texture(texture.clone())
    }
}

/// 录制进命令列表的指令
pub enum Command {
    /// 资源状态转换屏障
    Transition {
        resource: ResourceRef,
        before: ResourceState,
        after: ResourceState,
    },
    /// 整段缓冲区拷贝
    CopyBuffer { src: SimBuffer, dst: SimBuffer },
    /// 清除渲染目标
    ClearRenderTarget { target: SimTexture, color: [f32; 4] },
    /// 清除深度/模板
    ClearDepthStencil {
        target: SimTexture,
        depth: f32,
        stencil: u8,
    },
    /// 设置视口（Reset 后必须重新设置）
    SetViewport(Viewport),
    /// 设置裁剪矩形（Reset 后必须重新设置）
    SetScissorRect(ScissorRect),
    /// 绑定渲染目标
    SetRenderTargets {
        color: SimTexture,
        depth: Option<SimTexture>,
    },
}

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// 初始状态
    Initial,
    /// 正在录制
    Recording,
    /// 已完成录制，可提交
    Executable,
    /// 已提交，等待执行
    Pending,
    /// 录制非法，Close 时报告错误
    Invalid,
}

/// 命令分配器
///
/// 命令列表录制所用的后备内存池。提交后分配器处于「在途」状态，
/// 只有关联提交的 fence 值完成后才允许 Reset。
pub struct SimCommandAllocator {
    in_flight: Option<(Arc<Fence>, FenceValue)>,
}

impl SimCommandAllocator {
    pub(super) fn new() -> Self {
        Self { in_flight: None }
    }

    /// 回收分配器内存
    ///
    /// # 错误
    ///
    /// 若 GPU 尚未执行完与此分配器关联的命令，返回录制状态错误。
    pub fn reset(&mut self) -> Result<()> {
        if let Some((fence, value)) = &self.in_flight {
            if !fence.is_completed(*value) {
                return Err(GpuError::new("Reset", GpuErrorKind::Recording, codes::E_FAIL).into());
            }
        }
        self.in_flight = None;
        Ok(())
    }

    /// 登记在途提交：fence 到达 `value` 前分配器不可 Reset
    pub fn mark_in_flight(&mut self, fence: Arc<Fence>, value: FenceValue) {
        self.in_flight = Some((fence, value));
    }
}

/// 命令列表
///
/// 按序记录 GPU 指令，作为一个整体提交。创建后即处于录制状态
/// （与 `CreateCommandList` 一致）。
pub struct SimCommandList {
    state: CommandBufferState,
    commands: Vec<Command>,
    record_error: Option<GpuError>,
}

impl SimCommandList {
    pub(super) fn new() -> Self {
        Self {
            state: CommandBufferState::Recording,
            commands: Vec::new(),
            record_error: None,
        }
    }

    /// 当前状态
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// 重新开始录制
    ///
    /// 命令列表必须已经 Close（或已提交）才能 Reset；录制中的列表
    /// 不能 Reset。Reset 不保留任何先前设置（视口、裁剪矩形等都需要
    /// 重新下发）。
    pub fn reset(&mut self, _allocator: &SimCommandAllocator) -> Result<()> {
        if self.state == CommandBufferState::Recording {
            return Err(GpuError::new("Reset", GpuErrorKind::Recording, codes::E_FAIL).into());
        }

        self.state = CommandBufferState::Recording;
        self.commands.clear();
        self.record_error = None;
        Ok(())
    }

    fn record(&mut self, call: &'static str, command: Command) {
        if self.state != CommandBufferState::Recording {
            self.mark_invalid(GpuError::new(
                call,
                GpuErrorKind::Recording,
                codes::DXGI_ERROR_INVALID_CALL,
            ));
            return;
        }
        self.commands.push(command);
    }

    /// 进入错误状态，保留最早的错误
    fn mark_invalid(&mut self, error: GpuError) {
        if self.record_error.is_none() {
            self.record_error = Some(error);
        }
        self.state = CommandBufferState::Invalid;
    }

    /// 录制资源状态转换屏障
    pub fn resource_barrier<R: Into<ResourceRef>>(
        &mut self,
        resource: R,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.record(
            "ResourceBarrier",
            Command::Transition {
                resource: resource.into(),
                before,
                after,
            },
        );
    }

    /// 录制整段缓冲区拷贝
    pub fn copy_buffer(&mut self, src: &SimBuffer, dst: &SimBuffer) {
        if self.state == CommandBufferState::Recording && src.size() != dst.size() {
            self.mark_invalid(GpuError::new(
                "CopyResource",
                GpuErrorKind::Recording,
                codes::E_INVALIDARG,
            ));
            return;
        }
        self.record(
            "CopyResource",
            Command::CopyBuffer {
                src: src.clone(),
                dst: dst.clone(),
            },
        );
    }

    /// 录制渲染目标清除
    pub fn clear_render_target(&mut self, target: &SimTexture, color: [f32; 4]) {
        self.record(
            "ClearRenderTargetView",
            Command::ClearRenderTarget {
                target: target.clone(),
                color,
            },
        );
    }

    /// 录制深度/模板清除
    pub fn clear_depth_stencil(&mut self, target: &SimTexture, depth: f32, stencil: u8) {
        self.record(
            "ClearDepthStencilView",
            Command::ClearDepthStencil {
                target: target.clone(),
                depth,
                stencil,
            },
        );
    }

    /// 设置视口
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record("RSSetViewports", Command::SetViewport(viewport));
    }

    /// 设置裁剪矩形
    pub fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.record("RSSetScissorRects", Command::SetScissorRect(rect));
    }

    /// 绑定渲染目标
    pub fn set_render_targets(&mut self, color: &SimTexture, depth: Option<&SimTexture>) {
        self.record(
            "OMSetRenderTargets",
            Command::SetRenderTargets {
                color: color.clone(),
                depth: depth.cloned(),
            },
        );
    }

    /// 结束录制
    ///
    /// 校验录制内容的合法性：录制期间的非法调用、同一资源的屏障链
    /// 断裂（前一次转换的目标状态与后一次的起始状态不一致）都会在
    /// 这里暴露为录制错误。
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            CommandBufferState::Recording => {}
            // 录制期间的非法调用延迟到这里报告，列表需要 Reset 才能复用
            CommandBufferState::Invalid => {
                let err = self.record_error.take().unwrap_or_else(|| {
                    GpuError::new("Close", GpuErrorKind::Recording, codes::E_FAIL)
                });
                self.commands.clear();
                self.state = CommandBufferState::Initial;
                return Err(err.into());
            }
            _ => {
                return Err(GpuError::new("Close", GpuErrorKind::Recording, codes::E_FAIL).into());
            }
        }

        if let Some(err) = self.validate_barrier_chains() {
            self.state = CommandBufferState::Initial;
            self.commands.clear();
            return Err(err.into());
        }

        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// 校验每个资源的屏障链是否连续
    fn validate_barrier_chains(&self) -> Option<GpuError> {
        let mut last_state: HashMap<u64, ResourceState> = HashMap::new();

        for command in &self.commands {
            if let Command::Transition { resource, before, after } = command {
                if let Some(prev_after) = last_state.get(&resource.id()) {
                    if prev_after != before {
                        return Some(GpuError::new(
                            "Close",
                            GpuErrorKind::Recording,
                            codes::DXGI_ERROR_INVALID_CALL,
                        ));
                    }
                }
                last_state.insert(resource.id(), *after);
            }
        }

        None
    }

    /// 取走录制的指令用于提交，列表进入 Pending 状态
    pub(super) fn take_commands(&mut self) -> Vec<Command> {
        self.state = CommandBufferState::Pending;
        std::mem::take(&mut self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LiteRenderError;
    use crate::gfx::sim::device::SimDevice;

    fn gpu_err(err: LiteRenderError) -> GpuError {
        match err {
            LiteRenderError::Gpu(e) => e,
            other => panic!("expected GPU error, got: {other}"),
        }
    }

    #[test]
    fn test_command_list_starts_recording() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let list = device.create_command_list(&allocator);
        assert_eq!(list.state(), CommandBufferState::Recording);
    }

    #[test]
    fn test_reset_while_recording_fails() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);

        let err = gpu_err(list.reset(&allocator).unwrap_err());
        assert_eq!(err.call, "Reset");
        assert_eq!(err.kind, GpuErrorKind::Recording);
    }

    #[test]
    fn test_close_then_reset_round_trip() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);

        list.close().unwrap();
        assert_eq!(list.state(), CommandBufferState::Executable);

        list.reset(&allocator).unwrap();
        assert_eq!(list.state(), CommandBufferState::Recording);
    }

    #[test]
    fn test_double_close_fails() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);

        list.close().unwrap();
        let err = gpu_err(list.close().unwrap_err());
        assert_eq!(err.call, "Close");
    }

    #[test]
    fn test_recording_after_close_surfaces_at_next_close() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let target = device.create_render_target(4, 4).unwrap();

        list.close().unwrap();

        // Close 之后的录制调用使列表进入错误状态，在下一次 Close 时报告
        list.clear_render_target(&target, [0.0; 4]);
        assert_eq!(list.state(), CommandBufferState::Invalid);

        let err = gpu_err(list.close().unwrap_err());
        assert_eq!(err.call, "ClearRenderTargetView");
        assert_eq!(err.kind, GpuErrorKind::Recording);

        // Reset 从错误状态恢复
        list.reset(&allocator).unwrap();
        assert_eq!(list.state(), CommandBufferState::Recording);
    }

    #[test]
    fn test_broken_barrier_chain_fails_at_close() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let target = device.create_render_target(4, 4).unwrap();

        list.resource_barrier(&target, ResourceState::Present, ResourceState::RenderTarget);
        // 链断裂：上一次转换到 RenderTarget，这里却声称从 Present 出发
        list.resource_barrier(&target, ResourceState::Present, ResourceState::RenderTarget);

        let err = gpu_err(list.close().unwrap_err());
        assert_eq!(err.call, "Close");
        assert_eq!(err.kind, GpuErrorKind::Recording);
        assert_eq!(err.code, codes::DXGI_ERROR_INVALID_CALL);
    }

    #[test]
    fn test_matched_barrier_pair_closes_cleanly() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);
        let target = device.create_render_target(4, 4).unwrap();

        list.resource_barrier(&target, ResourceState::Present, ResourceState::RenderTarget);
        list.clear_render_target(&target, [0.0; 4]);
        list.resource_barrier(&target, ResourceState::RenderTarget, ResourceState::Present);

        list.close().unwrap();
    }

    #[test]
    fn test_copy_size_mismatch_surfaces_at_close() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);

        let small = device
            .create_buffer(
                crate::gfx::sim::resource::HeapKind::Upload,
                &crate::gfx::sim::resource::BufferDescriptor::new(
                    4,
                    crate::gfx::sim::resource::BufferUsage::Vertex,
                ),
            )
            .unwrap();
        let large = device
            .create_buffer(
                crate::gfx::sim::resource::HeapKind::Default,
                &crate::gfx::sim::resource::BufferDescriptor::new(
                    8,
                    crate::gfx::sim::resource::BufferUsage::Vertex,
                ),
            )
            .unwrap();

        list.copy_buffer(&small, &large);
        let err = gpu_err(list.close().unwrap_err());
        assert_eq!(err.call, "CopyResource");
    }

    #[test]
    fn test_allocator_reset_refused_while_in_flight() {
        let device = SimDevice::new();
        let mut allocator = device.create_command_allocator();
        let fence = device.create_fence();

        let value = fence.next_value();
        allocator.mark_in_flight(fence.clone(), value);

        let err = gpu_err(allocator.reset().unwrap_err());
        assert_eq!(err.call, "Reset");
        assert_eq!(err.kind, GpuErrorKind::Recording);

        // GPU 完成后即可 Reset
        fence.signal(value);
        allocator.reset().unwrap();
    }
}
