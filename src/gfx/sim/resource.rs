//! 模拟后端的资源类型
//!
//! 提供缓冲区、纹理和资源状态的 CPU 侧模拟，以及默认堆 + 上传堆
//! 的缓冲区初始化辅助函数。
//!
//! # 设计原则
//!
//! - **状态机模拟**：每个资源携带显式的资源状态，转换必须与录制的
//!   屏障一致，执行队列在执行时校验
//! - **句柄语义**：`SimBuffer` / `SimTexture` 是引用计数句柄，克隆句柄
//!   不复制存储；与 ComPtr 的共享所有权模型一致
//! - **自动对齐**：常量缓冲区自动对齐到 256 字节边界
//! - **生命周期管理**：暂存缓冲区通过 `PendingUpload` 与引用它的提交的
//!   fence 值绑定，只有 fence 到达后才能释放

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::core::error::{codes, GpuError, GpuErrorKind, Result};
use crate::renderer::sync::{Fence, FenceValue};

use super::command::SimCommandList;
use super::device::SimDevice;

/// 资源状态
///
/// 模拟 D3D12 的资源状态子集，覆盖清屏 + 上传路径需要的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// 初始通用状态
    Common,
    /// 通用只读（上传堆缓冲区固定处于此状态）
    GenericRead,
    /// 拷贝目标
    CopyDest,
    /// 渲染目标
    RenderTarget,
    /// 深度写入
    DepthWrite,
    /// 可呈现
    Present,
}

/// 缓冲区所在的堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    /// GPU 本地堆，CPU 不可直接写入
    Default,
    /// 上传堆，CPU 可写，GPU 只读
    Upload,
}

/// 缓冲区使用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// 顶点缓冲区
    Vertex,
    /// 索引缓冲区
    Index,
    /// 常量缓冲区（需要 256 字节对齐）
    Constant,
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    /// 请求大小（字节）
    pub size: u64,
    /// 使用类型
    pub usage: BufferUsage,
    /// 调试名称（可选）
    pub name: Option<String>,
}

impl BufferDescriptor {
    /// 创建新的缓冲区描述符
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self { size, usage, name: None }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 计算对齐后的大小
    ///
    /// 常量缓冲区必须是硬件最小分配粒度（256 字节）的整数倍，
    /// 通过加 255 再掩掉低 8 位向上取整。
    pub fn aligned_size(&self) -> u64 {
        if self.usage == BufferUsage::Constant {
            (self.size + 255) & !255
        } else {
            self.size
        }
    }
}

pub(super) struct BufferInner {
    pub(super) id: u64,
    pub(super) kind: HeapKind,
    pub(super) size: u64,
    pub(super) state: Mutex<ResourceState>,
    pub(super) bytes: Mutex<Vec<u8>>,
    pub(super) device: Arc<super::device::DeviceInner>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.device.allocated.fetch_sub(self.size, Ordering::AcqRel);
    }
}

/// 模拟缓冲区句柄
#[derive(Clone)]
pub struct SimBuffer {
    pub(super) inner: Arc<BufferInner>,
}

impl std::fmt::Debug for SimBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBuffer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("size", &self.inner.size)
            .finish()
    }
}

impl SimBuffer {
    /// 资源唯一标识
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 缓冲区大小（字节）
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// 所在堆类型
    pub fn heap_kind(&self) -> HeapKind {
        self.inner.kind
    }

    /// 当前资源状态
    pub fn state(&self) -> ResourceState {
        *self.inner.state.lock().unwrap()
    }

    pub(super) fn set_state(&self, state: ResourceState) {
        *self.inner.state.lock().unwrap() = state;
    }

    /// 将数据写入缓冲区（仅上传堆可写）
    ///
    /// 等价于 Map + memcpy + Unmap。
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.inner.kind != HeapKind::Upload {
            return Err(GpuError::new("Map", GpuErrorKind::Allocation, codes::E_INVALIDARG).into());
        }
        if data.len() as u64 > self.inner.size {
            return Err(GpuError::new("Map", GpuErrorKind::Allocation, codes::E_INVALIDARG).into());
        }

        let mut bytes = self.inner.bytes.lock().unwrap();
        bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// 回读缓冲区内容
    ///
    /// 模拟后端允许直接回读任意缓冲区，供测试和诊断使用；
    /// 真实后端需要经过回读堆。
    pub fn read_back(&self) -> Vec<u8> {
        self.inner.bytes.lock().unwrap().clone()
    }
}

pub(super) struct TextureInner {
    pub(super) id: u64,
    pub(super) width: u32,
    pub(super) height: u32,
    pub(super) charge: u64,
    pub(super) state: Mutex<ResourceState>,
    pub(super) contents: Mutex<TextureContents>,
    pub(super) device: Arc<super::device::DeviceInner>,
}

/// 纹理的模拟内容：记录最近一次清除写入的值
#[derive(Debug, Clone, Copy)]
pub(super) struct TextureContents {
    pub(super) clear_color: [f32; 4],
    pub(super) depth: f32,
    pub(super) stencil: u8,
}

impl Drop for TextureInner {
    fn drop(&mut self) {
        self.device.allocated.fetch_sub(self.charge, Ordering::AcqRel);
    }
}

/// 模拟纹理句柄（渲染目标 / 深度模板）
#[derive(Clone)]
pub struct SimTexture {
    pub(super) inner: Arc<TextureInner>,
}

impl SimTexture {
    /// 资源唯一标识
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// 当前资源状态
    pub fn state(&self) -> ResourceState {
        *self.inner.state.lock().unwrap()
    }

    pub(super) fn set_state(&self, state: ResourceState) {
        *self.inner.state.lock().unwrap() = state;
    }

    /// 最近一次清除写入的颜色
    pub fn last_clear_color(&self) -> [f32; 4] {
        self.inner.contents.lock().unwrap().clear_color
    }

    /// 最近一次清除写入的深度/模板值
    pub fn last_depth_stencil(&self) -> (f32, u8) {
        let contents = self.inner.contents.lock().unwrap();
        (contents.depth, contents.stencil)
    }

    pub(super) fn record_clear_color(&self, color: [f32; 4]) {
        self.inner.contents.lock().unwrap().clear_color = color;
    }

    pub(super) fn record_clear_depth_stencil(&self, depth: f32, stencil: u8) {
        let mut contents = self.inner.contents.lock().unwrap();
        contents.depth = depth;
        contents.stencil = stencil;
    }
}

/// 创建默认堆缓冲区并录制初始化拷贝
///
/// 分配一个 GPU 本地的目标缓冲区和一个同样大小的上传堆暂存缓冲区，
/// 把 `init_data` 写入暂存缓冲区，然后在 `command_list` 中录制：
///
/// 1. 目标缓冲区 Common → CopyDest 转换
/// 2. 暂存 → 目标的整段拷贝
/// 3. 目标缓冲区 CopyDest → GenericRead 转换
///
/// 调用方提交并等待该命令列表之后，目标缓冲区与 `init_data` 字节一致。
/// 返回的暂存缓冲区必须保持存活到引用它的提交完成为止，用
/// [`PendingUpload`] 登记。
///
/// # 错误
///
/// `init_data` 为空或任一分配失败时返回分配错误，整个操作中止。
pub fn create_default_buffer(
    device: &SimDevice,
    command_list: &mut SimCommandList,
    init_data: &[u8],
) -> Result<(SimBuffer, SimBuffer)> {
    if init_data.is_empty() {
        return Err(GpuError::new(
            "CreateCommittedResource",
            GpuErrorKind::Allocation,
            codes::E_INVALIDARG,
        )
        .into());
    }

    let desc = BufferDescriptor::new(init_data.len() as u64, BufferUsage::Vertex);

    let buffer = device.create_buffer(HeapKind::Default, &desc)?;
    let staging = device.create_buffer(HeapKind::Upload, &desc)?;

    staging.write(init_data)?;

    command_list.resource_barrier(&buffer, ResourceState::Common, ResourceState::CopyDest);
    command_list.copy_buffer(&staging, &buffer);
    command_list.resource_barrier(&buffer, ResourceState::CopyDest, ResourceState::GenericRead);

    Ok((buffer, staging))
}

/// 在途的暂存缓冲区
///
/// 把暂存缓冲区与引用它的提交的 fence 值绑定在一起：
/// 只有 fence 到达该值后暂存缓冲区才允许释放（随 `PendingUpload` 一起 drop）。
/// 这把「调用方自觉保活」的约定变成了显式的作用域资源。
pub struct PendingUpload {
    staging: SimBuffer,
    fence_value: FenceValue,
}

impl PendingUpload {
    pub fn new(staging: SimBuffer, fence_value: FenceValue) -> Self {
        Self { staging, fence_value }
    }

    /// 引用该暂存缓冲区的提交是否已经完成
    pub fn is_complete(&self, fence: &Fence) -> bool {
        fence.is_completed(self.fence_value)
    }

    /// 绑定的 fence 值
    pub fn fence_value(&self) -> FenceValue {
        self.fence_value
    }

    /// 暂存缓冲区句柄
    pub fn staging(&self) -> &SimBuffer {
        &self.staging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_buffer_alignment() {
        let desc = BufferDescriptor::new(100, BufferUsage::Constant);
        assert_eq!(desc.aligned_size(), 256);

        let desc2 = BufferDescriptor::new(300, BufferUsage::Constant);
        assert_eq!(desc2.aligned_size(), 512);

        let desc3 = BufferDescriptor::new(256, BufferUsage::Constant);
        assert_eq!(desc3.aligned_size(), 256);

        // 顶点缓冲区不需要对齐
        let desc4 = BufferDescriptor::new(100, BufferUsage::Vertex).with_name("vb");
        assert_eq!(desc4.aligned_size(), 100);
    }

    #[test]
    fn test_default_heap_rejects_cpu_write() {
        let device = SimDevice::new();
        let desc = BufferDescriptor::new(16, BufferUsage::Vertex);
        let buffer = device.create_buffer(HeapKind::Default, &desc).unwrap();

        let err = buffer.write(&[0u8; 16]).unwrap_err();
        match err {
            crate::core::error::LiteRenderError::Gpu(e) => {
                assert_eq!(e.call, "Map");
                assert_eq!(e.kind, GpuErrorKind::Allocation);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_upload_heap_write_and_read_back() {
        let device = SimDevice::new();
        let desc = BufferDescriptor::new(4, BufferUsage::Vertex);
        let staging = device.create_buffer(HeapKind::Upload, &desc).unwrap();

        assert_eq!(staging.state(), ResourceState::GenericRead);
        staging.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(staging.read_back(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_memory_budget_exhaustion_is_allocation_error() {
        let device = SimDevice::with_memory_budget(64);
        let desc = BufferDescriptor::new(48, BufferUsage::Vertex);
        device.create_buffer(HeapKind::Default, &desc).unwrap();

        let err = device.create_buffer(HeapKind::Default, &desc).unwrap_err();
        match err {
            crate::core::error::LiteRenderError::Gpu(e) => {
                assert_eq!(e.call, "CreateCommittedResource");
                assert_eq!(e.kind, GpuErrorKind::Allocation);
                assert_eq!(e.code, codes::E_OUTOFMEMORY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dropping_buffer_returns_budget() {
        let device = SimDevice::with_memory_budget(64);
        let desc = BufferDescriptor::new(48, BufferUsage::Vertex);

        let buffer = device.create_buffer(HeapKind::Default, &desc).unwrap();
        drop(buffer);

        // 释放后预算归还，再次分配成功
        device.create_buffer(HeapKind::Default, &desc).unwrap();
    }

    #[test]
    fn test_create_default_buffer_rejects_empty_data() {
        let device = SimDevice::new();
        let allocator = device.create_command_allocator();
        let mut list = device.create_command_list(&allocator);

        let err = create_default_buffer(&device, &mut list, &[]).unwrap_err();
        match err {
            crate::core::error::LiteRenderError::Gpu(e) => {
                assert_eq!(e.kind, GpuErrorKind::Allocation);
                assert_eq!(e.code, codes::E_INVALIDARG);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pending_upload_tracks_fence() {
        let device = SimDevice::new();
        let desc = BufferDescriptor::new(4, BufferUsage::Vertex);
        let staging = device.create_buffer(HeapKind::Upload, &desc).unwrap();

        let fence = Fence::new();
        let value = fence.next_value();
        let pending = PendingUpload::new(staging, value);

        assert!(!pending.is_complete(&fence));
        fence.signal(value);
        assert!(pending.is_complete(&fence));
        assert_eq!(pending.fence_value(), value);
        assert_eq!(pending.staging().size(), 4);
    }
}
