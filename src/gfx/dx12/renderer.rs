//! DirectX 12 渲染器
//!
//! 在真实设备上实现与模拟后端相同的帧生命周期：
//! Reset 分配器与命令列表 → 录制（屏障、视口、清屏、绑定目标、回转
//! 屏障）→ Close 并提交 → 呈现并推进后备缓冲索引 → 帧末完整排空。

use std::sync::Arc;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::DXGI_PRESENT;
use winit::window::Window;

use crate::core::config::Config;
use crate::core::error::{GpuErrorKind, Result};
use crate::core::timer::GameTimer;

use super::backend::Dx12Backend;
use super::check;
use super::resource::{create_default_buffer, release_barrier, transition_barrier, PendingUpload};

/// DirectX 12 渲染器
pub struct Dx12Renderer {
    backend: Dx12Backend,
    viewport: D3D12_VIEWPORT,
    scissor_rect: RECT,
    clear_color: [f32; 4],
    vsync: bool,
    /// 在途的暂存缓冲区，栅栏到达后随 retire 释放
    pending_uploads: Vec<PendingUpload>,
}

impl Dx12Renderer {
    /// 创建 DirectX 12 渲染器
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let backend = Dx12Backend::new(window, config)?;

        let viewport = full_viewport(backend.width, backend.height);
        let scissor_rect = full_scissor(backend.width, backend.height);

        Ok(Self {
            backend,
            viewport,
            scissor_rect,
            clear_color: config.graphics.clear_color,
            vsync: config.graphics.vsync,
            pending_uploads: Vec::new(),
        })
    }

    /// 窗口尺寸变化时重建尺寸相关资源
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        // 最小化会报告零尺寸，忽略
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.backend.resize_buffers(width, height)?;
        self.viewport = full_viewport(width, height);
        self.scissor_rect = full_scissor(width, height);
        Ok(())
    }

    /// 逐帧状态更新
    pub fn update(&mut self, _timer: &GameTimer) {
        // 清屏演示没有需要逐帧更新的场景状态
    }

    /// 绘制一帧
    pub fn draw(&mut self) -> Result<()> {
        unsafe {
            // 1. 复用命令录制内存。分配器只有在 GPU 执行完关联命令后才能
            //    Reset —— 上一帧末尾的完整排空保证了这个前置条件
            check(
                "Reset",
                GpuErrorKind::Recording,
                self.backend.command_allocator.Reset(),
            )?;
            check(
                "Reset",
                GpuErrorKind::Recording,
                self.backend
                    .command_list
                    .Reset(&self.backend.command_allocator, None),
            )?;

            let back_buffer = self.backend.back_buffers[self.backend.back_buffer].clone();

            // 2. 录制：可呈现 → 渲染目标
            let barrier = transition_barrier(
                &back_buffer,
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            );
            self.backend.command_list.ResourceBarrier(std::slice::from_ref(&barrier));
            release_barrier(barrier);

            // 视口和裁剪矩形不跨 Reset 保留，每次录制都要重新设置
            self.backend.command_list.RSSetViewports(std::slice::from_ref(&self.viewport));
            self.backend.command_list.RSSetScissorRects(std::slice::from_ref(&self.scissor_rect));

            // 清除后备缓冲和深度缓冲
            let rtv = self.backend.rtv_handle(self.backend.back_buffer);
            let dsv = self.backend.dsv_handle();
            self.backend.command_list.ClearRenderTargetView(rtv, &self.clear_color, None);
            self.backend.command_list.ClearDepthStencilView(
                dsv,
                D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL,
                1.0,
                0,
                None,
            );

            self.backend
                .command_list
                .OMSetRenderTargets(1, Some(&rtv), false, Some(&dsv));

            // 渲染目标 → 可呈现
            let barrier = transition_barrier(
                &back_buffer,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PRESENT,
            );
            self.backend.command_list.ResourceBarrier(std::slice::from_ref(&barrier));
            release_barrier(barrier);

            // 3. 结束录制并提交
            check(
                "Close",
                GpuErrorKind::Recording,
                self.backend.command_list.Close(),
            )?;

            let command_lists = [Some(ID3D12CommandList::from(&self.backend.command_list))];
            self.backend.command_queue.ExecuteCommandLists(&command_lists);

            // 4. 呈现，推进后备缓冲索引
            let interval = if self.vsync { 1 } else { 0 };
            check(
                "Present",
                GpuErrorKind::Present,
                self.backend.swap_chain.Present(interval, DXGI_PRESENT(0)).ok(),
            )?;
            self.backend.back_buffer =
                (self.backend.back_buffer + 1) % self.backend.back_buffers.len();
        }

        // 5. 帧末完整排空。低效但简单：吞吐量换正确性的简单性
        self.backend.flush_command_queue()?;
        self.retire_uploads();
        Ok(())
    }

    /// 创建 GPU 本地缓冲区并完成初始数据上传
    ///
    /// 录制「暂存 → 默认堆」的拷贝，提交并排空；暂存缓冲区与本次
    /// 提交的栅栏值绑定，完成后自动释放。
    pub fn upload_buffer(&mut self, data: &[u8]) -> Result<ID3D12Resource> {
        unsafe {
            check(
                "Reset",
                GpuErrorKind::Recording,
                self.backend.command_allocator.Reset(),
            )?;
            check(
                "Reset",
                GpuErrorKind::Recording,
                self.backend
                    .command_list
                    .Reset(&self.backend.command_allocator, None),
            )?;

            let (buffer, staging) =
                create_default_buffer(&self.backend.device, &self.backend.command_list, data)?;

            check(
                "Close",
                GpuErrorKind::Recording,
                self.backend.command_list.Close(),
            )?;
            let command_lists = [Some(ID3D12CommandList::from(&self.backend.command_list))];
            self.backend.command_queue.ExecuteCommandLists(&command_lists);

            // 排空会把栅栏推进到 fence_value + 1，暂存缓冲区绑定到该值
            self.pending_uploads
                .push(PendingUpload::new(staging, self.backend.fence_value + 1));

            self.backend.flush_command_queue()?;
            self.retire_uploads();

            Ok(buffer)
        }
    }

    /// 释放已完成提交的暂存缓冲区
    fn retire_uploads(&mut self) {
        let fence = &self.backend.fence;
        self.pending_uploads.retain(|upload| !upload.is_complete(fence));
    }

    /// 尚未释放的暂存缓冲区数量
    pub fn pending_upload_count(&self) -> usize {
        self.pending_uploads.len()
    }
}

fn full_viewport(width: u32, height: u32) -> D3D12_VIEWPORT {
    D3D12_VIEWPORT {
        TopLeftX: 0.0,
        TopLeftY: 0.0,
        Width: width as f32,
        Height: height as f32,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    }
}

fn full_scissor(width: u32, height: u32) -> RECT {
    RECT {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    }
}
