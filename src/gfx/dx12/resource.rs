//! DirectX 12 缓冲区初始化
//!
//! 默认堆缓冲区无法由 CPU 直接写入，初始数据要经过上传堆暂存缓冲区
//! 中转：暂存缓冲区 Map 写入后，在命令列表中录制「转换 → 拷贝 → 转换」，
//! 提交并等待完成后默认堆缓冲区才持有数据。
//!
//! 暂存缓冲区必须保持存活到引用它的提交完成为止，用 [`PendingUpload`]
//! 与栅栏值绑定登记。

use std::mem::ManuallyDrop;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GpuErrorKind, Result};

use super::check;

/// 构造缓冲区资源描述
fn buffer_desc(byte_size: u64) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: 0,
        Width: byte_size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: D3D12_RESOURCE_FLAG_NONE,
    }
}

/// 在指定堆上创建缓冲区
fn create_buffer(
    device: &ID3D12Device,
    heap_type: D3D12_HEAP_TYPE,
    byte_size: u64,
    initial_state: D3D12_RESOURCE_STATES,
) -> Result<ID3D12Resource> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: heap_type,
        ..Default::default()
    };
    let desc = buffer_desc(byte_size);

    let mut buffer: Option<ID3D12Resource> = None;
    unsafe {
        check(
            "CreateCommittedResource",
            GpuErrorKind::Allocation,
            device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &desc,
                initial_state,
                None,
                &mut buffer,
            ),
        )?;
    }
    Ok(buffer.unwrap())
}

/// 资源状态转换屏障
pub(super) fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: ManuallyDrop::new(Some(resource.clone())),
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

/// 释放屏障对资源的引用
///
/// `ManuallyDrop` 包裹的资源引用不会自动释放，录制完成后必须归还，
/// 否则交换链缓冲会因引用残留导致 ResizeBuffers 失败。
pub(super) fn release_barrier(barrier: D3D12_RESOURCE_BARRIER) {
    unsafe {
        let transition = ManuallyDrop::into_inner(barrier.Anonymous.Transition);
        let _ = ManuallyDrop::into_inner(transition.pResource);
    }
}

/// 创建默认堆缓冲区并录制初始化拷贝
///
/// 返回 `(目标缓冲区, 暂存缓冲区)`。调用方提交并等待 `command_list`
/// 所在批次完成后，目标缓冲区与 `init_data` 字节一致；在此之前
/// 暂存缓冲区必须保持存活。
pub fn create_default_buffer(
    device: &ID3D12Device,
    command_list: &ID3D12GraphicsCommandList,
    init_data: &[u8],
) -> Result<(ID3D12Resource, ID3D12Resource)> {
    if init_data.is_empty() {
        return Err(crate::core::error::GpuError::new(
            "CreateCommittedResource",
            GpuErrorKind::Allocation,
            crate::core::error::codes::E_INVALIDARG,
        )
        .into());
    }

    let byte_size = init_data.len() as u64;

    let default_buffer = create_buffer(
        device,
        D3D12_HEAP_TYPE_DEFAULT,
        byte_size,
        D3D12_RESOURCE_STATE_COMMON,
    )?;
    let upload_buffer = create_buffer(
        device,
        D3D12_HEAP_TYPE_UPLOAD,
        byte_size,
        D3D12_RESOURCE_STATE_GENERIC_READ,
    )?;

    // Map + memcpy + Unmap 写入暂存缓冲区
    unsafe {
        let mut data_ptr = std::ptr::null_mut();
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        check(
            "Map",
            GpuErrorKind::Allocation,
            upload_buffer.Map(0, Some(&read_range), Some(&mut data_ptr)),
        )?;
        std::ptr::copy_nonoverlapping(init_data.as_ptr(), data_ptr as *mut u8, init_data.len());
        upload_buffer.Unmap(0, None);
    }

    // 转换 → 拷贝 → 转换
    unsafe {
        let barrier = transition_barrier(
            &default_buffer,
            D3D12_RESOURCE_STATE_COMMON,
            D3D12_RESOURCE_STATE_COPY_DEST,
        );
        command_list.ResourceBarrier(std::slice::from_ref(&barrier));
        release_barrier(barrier);

        command_list.CopyBufferRegion(&default_buffer, 0, &upload_buffer, 0, byte_size);

        let barrier = transition_barrier(
            &default_buffer,
            D3D12_RESOURCE_STATE_COPY_DEST,
            D3D12_RESOURCE_STATE_GENERIC_READ,
        );
        command_list.ResourceBarrier(std::slice::from_ref(&barrier));
        release_barrier(barrier);
    }

    Ok((default_buffer, upload_buffer))
}

/// 在途的暂存缓冲区
///
/// 与引用它的提交的栅栏值绑定，只有栅栏到达后才随登记项一起释放。
pub struct PendingUpload {
    staging: ID3D12Resource,
    fence_value: u64,
}

impl PendingUpload {
    pub fn new(staging: ID3D12Resource, fence_value: u64) -> Self {
        Self { staging, fence_value }
    }

    /// 引用该暂存缓冲区的提交是否已经完成
    pub fn is_complete(&self, fence: &ID3D12Fence) -> bool {
        unsafe { fence.GetCompletedValue() >= self.fence_value }
    }

    /// 暂存缓冲区句柄
    pub fn staging(&self) -> &ID3D12Resource {
        &self.staging
    }
}
