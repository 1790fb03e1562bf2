//! 模拟设备
//!
//! 资源与命令对象的创建入口，模拟 `ID3D12Device` 的创建职责子集。
//! 可选的内存预算用于确定性地测试分配失败路径。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::error::{codes, GpuError, GpuErrorKind, Result};
use crate::renderer::sync::Fence;

use super::command::{SimCommandAllocator, SimCommandList};
use super::resource::{
    BufferDescriptor, BufferInner, HeapKind, ResourceState, SimBuffer, SimTexture, TextureContents,
    TextureInner,
};

pub(super) struct DeviceInner {
    next_id: AtomicU64,
    pub(super) allocated: AtomicU64,
    budget: Option<u64>,
}

/// 模拟设备句柄
///
/// 创建缓冲区、渲染目标、命令对象和栅栏。句柄可克隆，资源在句柄
/// 之间共享设备的内存记账。
#[derive(Clone)]
pub struct SimDevice {
    inner: Arc<DeviceInner>,
}

impl SimDevice {
    /// 创建不限预算的模拟设备
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                next_id: AtomicU64::new(1),
                allocated: AtomicU64::new(0),
                budget: None,
            }),
        }
    }

    /// 创建带内存预算的模拟设备
    ///
    /// 超出预算的分配会以 `E_OUTOFMEMORY` 失败，用于测试分配失败路径。
    pub fn with_memory_budget(limit: u64) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                next_id: AtomicU64::new(1),
                allocated: AtomicU64::new(0),
                budget: Some(limit),
            }),
        }
    }

    /// 当前已分配的字节数
    pub fn allocated_bytes(&self) -> u64 {
        self.inner.allocated.load(Ordering::Acquire)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 记账一笔分配，超出预算时整体回滚
    fn charge(&self, call: &'static str, bytes: u64) -> Result<()> {
        let previous = self.inner.allocated.fetch_add(bytes, Ordering::AcqRel);
        if let Some(budget) = self.inner.budget {
            if previous + bytes > budget {
                self.inner.allocated.fetch_sub(bytes, Ordering::AcqRel);
                return Err(
                    GpuError::new(call, GpuErrorKind::Allocation, codes::E_OUTOFMEMORY).into(),
                );
            }
        }
        Ok(())
    }

    /// 创建缓冲区
    ///
    /// 上传堆缓冲区创建后固定处于 GenericRead 状态且 CPU 可写；
    /// 默认堆缓冲区创建于 Common 状态，只能通过拷贝指令写入。
    pub fn create_buffer(&self, kind: HeapKind, desc: &BufferDescriptor) -> Result<SimBuffer> {
        let size = desc.aligned_size();
        self.charge("CreateCommittedResource", size)?;

        let state = match kind {
            HeapKind::Default => ResourceState::Common,
            HeapKind::Upload => ResourceState::GenericRead,
        };

        Ok(SimBuffer {
            inner: Arc::new(BufferInner {
                id: self.next_id(),
                kind,
                size,
                state: Mutex::new(state),
                bytes: Mutex::new(vec![0; size as usize]),
                device: self.inner.clone(),
            }),
        })
    }

    /// 创建可呈现的渲染目标（后备缓冲区）
    ///
    /// 初始状态为 Present，与交换链缓冲区一致。
    pub fn create_render_target(&self, width: u32, height: u32) -> Result<SimTexture> {
        self.create_texture(width, height, ResourceState::Present)
    }

    /// 创建深度/模板目标，初始状态为 DepthWrite
    pub fn create_depth_stencil(&self, width: u32, height: u32) -> Result<SimTexture> {
        self.create_texture(width, height, ResourceState::DepthWrite)
    }

    fn create_texture(&self, width: u32, height: u32, state: ResourceState) -> Result<SimTexture> {
        let charge = width as u64 * height as u64 * 4;
        self.charge("CreateCommittedResource", charge)?;

        Ok(SimTexture {
            inner: Arc::new(TextureInner {
                id: self.next_id(),
                width,
                height,
                charge,
                state: Mutex::new(state),
                contents: Mutex::new(TextureContents {
                    clear_color: [0.0; 4],
                    depth: 0.0,
                    stencil: 0,
                }),
                device: self.inner.clone(),
            }),
        })
    }

    /// 创建命令分配器
    pub fn create_command_allocator(&self) -> SimCommandAllocator {
        SimCommandAllocator::new()
    }

    /// 创建命令列表
    ///
    /// 与 `CreateCommandList` 一致，新列表处于录制状态。
    pub fn create_command_list(&self, _allocator: &SimCommandAllocator) -> SimCommandList {
        SimCommandList::new()
    }

    /// 创建栅栏
    pub fn create_fence(&self) -> Arc<Fence> {
        Arc::new(Fence::new())
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}
