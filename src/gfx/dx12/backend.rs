//! DirectX 12 后端核心资源
//!
//! 封装设备、命令队列、交换链、描述符堆和同步对象。
//!
//! # 初始化流程
//!
//! 1. 启用调试层（Debug 模式）
//! 2. 创建 DXGI 工厂
//! 3. 创建 D3D12 设备
//! 4. 创建命令队列、命令分配器和命令列表
//! 5. 创建交换链
//! 6. 创建描述符堆、渲染目标视图和深度/模板缓冲
//! 7. 创建同步对象（Fence）

use std::sync::Arc;
use tracing::{debug, info, warn};
use windows::{
    core::Interface, Win32::Foundation::CloseHandle, Win32::Foundation::HANDLE,
    Win32::Graphics::Direct3D::*, Win32::Graphics::Direct3D12::*,
    Win32::Graphics::Dxgi::Common::*, Win32::Graphics::Dxgi::*,
    Win32::System::Threading::{WaitForSingleObject, INFINITE},
};
use winit::raw_window_handle::{HasWindowHandle, RawWindowHandle};
use winit::window::Window;

use crate::core::config::Config;
use crate::core::error::{GpuErrorKind, LiteRenderError, Result};

use super::check;

/// 深度/模板缓冲的固定格式
const DEPTH_STENCIL_FORMAT: DXGI_FORMAT = DXGI_FORMAT_D24_UNORM_S8_UINT;
/// 后备缓冲的固定格式
const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

/// DirectX 12 图形后端
///
/// 持有一条直接命令队列、一个逐帧复用的命令分配器/命令列表对，
/// 以及交换链的后备缓冲与深度/模板缓冲。
pub struct Dx12Backend {
    /// D3D12 设备
    pub device: ID3D12Device,
    /// 命令队列
    pub command_queue: ID3D12CommandQueue,
    /// 命令分配器（逐帧复用，GPU 排空后才能 Reset）
    pub command_allocator: ID3D12CommandAllocator,
    /// 命令列表（逐帧复用）
    pub command_list: ID3D12GraphicsCommandList,
    /// 交换链
    pub swap_chain: IDXGISwapChain3,
    /// 交换链缓冲区数量
    pub buffer_count: u32,
    /// 后备缓冲资源（随交换链重建）
    pub back_buffers: Vec<ID3D12Resource>,
    /// 当前后备缓冲索引
    pub back_buffer: usize,
    /// 渲染目标视图描述符堆
    pub rtv_heap: ID3D12DescriptorHeap,
    /// RTV 描述符大小
    pub rtv_descriptor_size: usize,
    /// 深度/模板视图描述符堆
    pub dsv_heap: ID3D12DescriptorHeap,
    /// 深度/模板缓冲
    pub depth_stencil: ID3D12Resource,
    /// 同步栅栏
    pub fence: ID3D12Fence,
    /// 当前栅栏值
    pub fence_value: u64,
    /// 栅栏事件句柄
    pub fence_event: HANDLE,
    /// 窗口引用
    pub window: Arc<Window>,
    /// 渲染尺寸
    pub width: u32,
    pub height: u32,
}

// D3D12 的对象是线程安全的
unsafe impl Send for Dx12Backend {}
unsafe impl Sync for Dx12Backend {}

impl Dx12Backend {
    /// 创建 DirectX 12 后端
    ///
    /// 初始化设备、命令对象、交换链和同步对象。任一步骤失败都会
    /// 以结构化 GPU 错误返回，调用方不重试。
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let width = config.window.width;
        let height = config.window.height;
        let buffer_count = config.graphics.buffer_count as u32;

        unsafe {
            // 1. 启用调试层（仅 Debug 模式）
            #[cfg(debug_assertions)]
            {
                let mut debug_interface: Option<ID3D12Debug> = None;
                if D3D12GetDebugInterface(&mut debug_interface).is_ok() {
                    debug_interface.unwrap().EnableDebugLayer();
                    debug!("DX12 Debug Layer enabled");
                } else {
                    warn!("Failed to enable DX12 Debug Layer");
                }
            }

            // 2. 创建 DXGI 工厂
            let factory_flags = if cfg!(debug_assertions) {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 = check(
                "CreateDXGIFactory2",
                GpuErrorKind::Allocation,
                CreateDXGIFactory2(factory_flags),
            )?;

            // 3. 创建 D3D12 设备
            let mut device: Option<ID3D12Device> = None;
            check(
                "D3D12CreateDevice",
                GpuErrorKind::Allocation,
                D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device),
            )?;
            let device = device.unwrap();

            // 4. 创建命令队列、分配器和命令列表
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let command_queue: ID3D12CommandQueue = check(
                "CreateCommandQueue",
                GpuErrorKind::Allocation,
                device.CreateCommandQueue(&queue_desc),
            )?;

            let command_allocator: ID3D12CommandAllocator = check(
                "CreateCommandAllocator",
                GpuErrorKind::Allocation,
                device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT),
            )?;

            let command_list: ID3D12GraphicsCommandList = check(
                "CreateCommandList",
                GpuErrorKind::Allocation,
                device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &command_allocator, None),
            )?;
            // 新命令列表处于录制状态，先 Close 与帧循环开头的 Reset 对齐
            check("Close", GpuErrorKind::Recording, command_list.Close())?;

            // 5. 创建交换链
            let window_handle = window.window_handle().map_err(|e| {
                LiteRenderError::Initialization(format!("Failed to get window handle: {e}"))
            })?;
            let hwnd = match window_handle.as_raw() {
                RawWindowHandle::Win32(win32_handle) => windows::Win32::Foundation::HWND(
                    win32_handle.hwnd.get() as *mut core::ffi::c_void,
                ),
                _ => {
                    return Err(LiteRenderError::Initialization(
                        "Expected Win32 window handle on Windows platform".to_string(),
                    ))
                }
            };

            let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: BACK_BUFFER_FORMAT,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: buffer_count,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                ..Default::default()
            };

            let swap_chain: IDXGISwapChain1 = check(
                "CreateSwapChainForHwnd",
                GpuErrorKind::Allocation,
                factory.CreateSwapChainForHwnd(&command_queue, hwnd, &swap_chain_desc, None, None),
            )?;
            let swap_chain: IDXGISwapChain3 = check(
                "QueryInterface",
                GpuErrorKind::Allocation,
                swap_chain.cast(),
            )?;

            info!(width, height, buffers = buffer_count, "Swap chain created");

            // 6. 创建描述符堆
            let rtv_heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: buffer_count,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            };
            let rtv_heap: ID3D12DescriptorHeap = check(
                "CreateDescriptorHeap",
                GpuErrorKind::Allocation,
                device.CreateDescriptorHeap(&rtv_heap_desc),
            )?;
            let rtv_descriptor_size =
                device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;

            let dsv_heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
                NumDescriptors: 1,
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            };
            let dsv_heap: ID3D12DescriptorHeap = check(
                "CreateDescriptorHeap",
                GpuErrorKind::Allocation,
                device.CreateDescriptorHeap(&dsv_heap_desc),
            )?;

            // 7. 渲染目标视图和深度/模板缓冲
            let back_buffers =
                create_render_target_views(&device, &swap_chain, &rtv_heap, rtv_descriptor_size, buffer_count)?;
            let depth_stencil = create_depth_stencil(&device, &dsv_heap, width, height)?;

            // 8. 创建同步对象
            let back_buffer = swap_chain.GetCurrentBackBufferIndex() as usize;
            let fence: ID3D12Fence = check(
                "CreateFence",
                GpuErrorKind::Allocation,
                device.CreateFence(0, D3D12_FENCE_FLAG_NONE),
            )?;
            let fence_event = check(
                "CreateEventA",
                GpuErrorKind::Allocation,
                windows::Win32::System::Threading::CreateEventA(None, false, false, None),
            )?;

            debug!("Synchronization objects created");
            info!("DX12 Backend initialization complete");

            Ok(Self {
                device,
                command_queue,
                command_allocator,
                command_list,
                swap_chain,
                buffer_count,
                back_buffers,
                back_buffer,
                rtv_heap,
                rtv_descriptor_size,
                dsv_heap,
                depth_stencil,
                fence,
                fence_value: 0,
                fence_event,
                window,
                width,
                height,
            })
        }
    }

    /// 当前后备缓冲的 RTV 句柄
    pub fn rtv_handle(&self, index: usize) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + index * self.rtv_descriptor_size,
        }
    }

    /// 深度/模板视图句柄
    pub fn dsv_handle(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        unsafe { self.dsv_heap.GetCPUDescriptorHandleForHeapStart() }
    }

    /// 排空命令队列
    ///
    /// 签发新的栅栏值并阻塞到 GPU 追上为止。每帧末尾与重建尺寸相关
    /// 资源之前都要调用。
    pub fn flush_command_queue(&mut self) -> Result<()> {
        // 推进栅栏值，标记到此为止的命令
        self.fence_value += 1;

        unsafe {
            check(
                "Signal",
                GpuErrorKind::Submission,
                self.command_queue.Signal(&self.fence, self.fence_value),
            )?;

            // GPU 尚未追上时挂起等待（无超时）
            if self.fence.GetCompletedValue() < self.fence_value {
                check(
                    "SetEventOnCompletion",
                    GpuErrorKind::Submission,
                    self.fence.SetEventOnCompletion(self.fence_value, self.fence_event),
                )?;
                WaitForSingleObject(self.fence_event, INFINITE);
            }
        }

        Ok(())
    }

    /// 窗口尺寸变化时重建交换链缓冲与深度缓冲
    pub fn resize_buffers(&mut self, width: u32, height: u32) -> Result<()> {
        // 旧的后备缓冲引用必须先释放，否则 ResizeBuffers 会失败
        self.flush_command_queue()?;
        self.back_buffers.clear();

        unsafe {
            check(
                "ResizeBuffers",
                GpuErrorKind::Allocation,
                self.swap_chain.ResizeBuffers(
                    self.buffer_count,
                    width,
                    height,
                    BACK_BUFFER_FORMAT,
                    DXGI_SWAP_CHAIN_FLAG(0),
                ),
            )?;
        }

        self.back_buffers = create_render_target_views(
            &self.device,
            &self.swap_chain,
            &self.rtv_heap,
            self.rtv_descriptor_size,
            self.buffer_count,
        )?;
        self.depth_stencil = create_depth_stencil(&self.device, &self.dsv_heap, width, height)?;

        self.back_buffer = unsafe { self.swap_chain.GetCurrentBackBufferIndex() } as usize;
        self.width = width;
        self.height = height;

        debug!(width, height, "Swap chain buffers resized");
        Ok(())
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        // 退出前排空队列，避免销毁仍被 GPU 引用的资源
        let _ = self.flush_command_queue();
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

/// 为交换链的每个缓冲创建渲染目标视图
fn create_render_target_views(
    device: &ID3D12Device,
    swap_chain: &IDXGISwapChain3,
    rtv_heap: &ID3D12DescriptorHeap,
    rtv_descriptor_size: usize,
    buffer_count: u32,
) -> Result<Vec<ID3D12Resource>> {
    let mut back_buffers = Vec::with_capacity(buffer_count as usize);

    unsafe {
        let rtv_start = rtv_heap.GetCPUDescriptorHandleForHeapStart();
        for i in 0..buffer_count {
            let buffer: ID3D12Resource =
                check("GetBuffer", GpuErrorKind::Allocation, swap_chain.GetBuffer(i))?;
            let handle = D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: rtv_start.ptr + i as usize * rtv_descriptor_size,
            };
            device.CreateRenderTargetView(&buffer, None, handle);
            back_buffers.push(buffer);
        }
    }

    Ok(back_buffers)
}

/// 创建深度/模板缓冲并建立视图
fn create_depth_stencil(
    device: &ID3D12Device,
    dsv_heap: &ID3D12DescriptorHeap,
    width: u32,
    height: u32,
) -> Result<ID3D12Resource> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_DEFAULT,
        ..Default::default()
    };

    let resource_desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Alignment: 0,
        Width: width as u64,
        Height: height,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DEPTH_STENCIL_FORMAT,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
    };

    let clear_value = D3D12_CLEAR_VALUE {
        Format: DEPTH_STENCIL_FORMAT,
        Anonymous: D3D12_CLEAR_VALUE_0 {
            DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
        },
    };

    let mut depth_stencil: Option<ID3D12Resource> = None;
    unsafe {
        check(
            "CreateCommittedResource",
            GpuErrorKind::Allocation,
            device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_DEPTH_WRITE,
                Some(&clear_value),
                &mut depth_stencil,
            ),
        )?;
    }
    let depth_stencil = depth_stencil.unwrap();

    unsafe {
        device.CreateDepthStencilView(&depth_stencil, None, dsv_heap.GetCPUDescriptorHandleForHeapStart());
    }

    Ok(depth_stencil)
}
