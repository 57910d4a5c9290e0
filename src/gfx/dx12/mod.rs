//! DirectX 12 设备
//!
//! [`GpuDevice`] 的 DirectX 12 实现，每个方法对应一个或几个 D3D12 / DXGI 调用。
//!
//! # 初始化流程
//!
//! 1. 启用调试层（可选）
//! 2. 创建 DXGI 工厂并枚举适配器
//! 3. 按适配器策略选择适配器，从高到低尝试特性级别创建设备
//! 4. 缓存各类描述符堆的增量

mod convert;
mod encode;
mod pipeline;

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

use raw_window_handle::RawWindowHandle;
use tracing::{debug, info, warn};
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

pub use pipeline::Dx12Pipeline;

use crate::core::error::{GpuError, GpuResult};
use crate::gfx::adapter::{select_adapter, AdapterInfo, AdapterPreference, FeatureLevel};
use crate::gfx::backend::{GpuDevice, RawDescriptorHeap};
use crate::renderer::command::Command;
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapType, GpuDescriptorHandle, ViewDesc,
};
use crate::renderer::pipeline::PipelineDesc;
use crate::renderer::resource::{ResourceDesc, ResourceDimension};
use crate::renderer::swapchain::SwapChainDesc;

/// D3D12 资源及其映射地址
pub struct Dx12Resource {
    pub raw: ID3D12Resource,
    mapped: AtomicPtr<u8>,
}

impl Dx12Resource {
    fn new(raw: ID3D12Resource) -> Self {
        Self {
            raw,
            mapped: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

pub struct Dx12DescriptorHeap {
    pub raw: ID3D12DescriptorHeap,
}

/// 命令列表与它独占的分配器
pub struct Dx12CommandList {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
}

pub struct Dx12Queue {
    pub raw: ID3D12CommandQueue,
}

pub struct Dx12Fence {
    pub raw: ID3D12Fence,
}

/// 自动复位的 Win32 事件
pub struct Dx12Event(HANDLE);

impl Drop for Dx12Event {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

pub struct Dx12SwapChain {
    raw: IDXGISwapChain3,
    buffer_count: u32,
    format: DXGI_FORMAT,
}

// D3D12 对象是自由线程的
unsafe impl Send for Dx12Resource {}
unsafe impl Sync for Dx12Resource {}
unsafe impl Send for Dx12DescriptorHeap {}
unsafe impl Sync for Dx12DescriptorHeap {}
unsafe impl Send for Dx12CommandList {}
unsafe impl Send for Dx12Queue {}
unsafe impl Sync for Dx12Queue {}
unsafe impl Send for Dx12Fence {}
unsafe impl Sync for Dx12Fence {}
unsafe impl Send for Dx12Event {}
unsafe impl Sync for Dx12Event {}
unsafe impl Send for Dx12SwapChain {}

#[derive(Debug, Clone, Copy)]
struct Increments {
    rtv: u32,
    dsv: u32,
    cbv_srv_uav: u32,
    sampler: u32,
}

/// DirectX 12 设备
pub struct Dx12Device {
    device: ID3D12Device,
    factory: IDXGIFactory4,
    adapter: AdapterInfo,
    feature_level: FeatureLevel,
    increments: Increments,
}

unsafe impl Send for Dx12Device {}
unsafe impl Sync for Dx12Device {}

fn adapter_name(desc: &DXGI_ADAPTER_DESC1) -> String {
    let len = desc.Description.iter().position(|c| *c == 0).unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

/// 适配器支持的最高特性级别
fn probe_feature_level(adapter: &IDXGIAdapter1) -> Option<FeatureLevel> {
    FeatureLevel::FALLBACK_ORDER.into_iter().find(|level| unsafe {
        D3D12CreateDevice(
            adapter,
            convert::feature_level(*level),
            std::ptr::null_mut::<Option<ID3D12Device>>(),
        )
        .is_ok()
    })
}

fn enumerate_adapters(factory: &IDXGIFactory4) -> Vec<(AdapterInfo, IDXGIAdapter1)> {
    let mut adapters = Vec::new();
    for index in 0.. {
        let Ok(adapter) = (unsafe { factory.EnumAdapters1(index) }) else {
            break;
        };
        let Ok(desc) = (unsafe { adapter.GetDesc1() }) else {
            continue;
        };
        let info = AdapterInfo {
            index,
            name: adapter_name(&desc),
            vendor_id: desc.VendorId,
            device_id: desc.DeviceId,
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
            is_software: desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
            max_feature_level: probe_feature_level(&adapter),
        };
        debug!(
            index,
            adapter = %info.name,
            vendor = info.vendor_name(),
            memory_mb = info.dedicated_video_memory / (1024 * 1024),
            software = info.is_software,
            "Adapter enumerated"
        );
        adapters.push((info, adapter));
    }
    adapters
}

impl Dx12Device {
    /// 按适配器策略与最低特性级别创建设备
    pub fn create(preference: &AdapterPreference, minimum: FeatureLevel, debug_layer: bool) -> GpuResult<Self> {
        unsafe {
            if debug_layer {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(e) => warn!("Failed to enable DX12 Debug Layer: {:?}", e),
                }
            }

            let flags = if debug_layer {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 = CreateDXGIFactory2(flags)
                .map_err(|e| GpuError::DeviceCreationFailed(format!("Failed to create DXGI factory: {:?}", e)))?;

            let enumerated = enumerate_adapters(&factory);
            let infos: Vec<AdapterInfo> = enumerated.iter().map(|(info, _)| info.clone()).collect();
            let chosen = select_adapter(&infos, preference, minimum)?;
            let (info, adapter) = enumerated
                .into_iter()
                .find(|(info, _)| info.index == chosen.index)
                .ok_or_else(|| GpuError::DeviceCreationFailed("selected adapter disappeared".into()))?;

            let mut created = None;
            for level in FeatureLevel::candidates(minimum) {
                let mut device: Option<ID3D12Device> = None;
                if D3D12CreateDevice(&adapter, convert::feature_level(level), &mut device).is_ok() {
                    if let Some(device) = device {
                        created = Some((device, level));
                        break;
                    }
                }
            }
            let (device, feature_level) = created.ok_or_else(|| {
                GpuError::DeviceCreationFailed(format!(
                    "'{}' cannot create a device at feature level {} or higher",
                    info.name, minimum
                ))
            })?;

            let increments = Increments {
                rtv: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV),
                dsv: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_DSV),
                cbv_srv_uav: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV),
                sampler: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER),
            };

            info!(
                adapter = %info.name,
                vendor = info.vendor_name(),
                feature_level = %feature_level,
                debug_layer,
                "D3D12 Device created successfully"
            );

            Ok(Self {
                device,
                factory,
                adapter: info,
                feature_level,
                increments,
            })
        }
    }

    /// 设备被移除时返回原因
    fn removed_reason(&self) -> Option<String> {
        unsafe { self.device.GetDeviceRemovedReason() }
            .err()
            .map(|e| format!("{:?}", e))
    }

    fn check_removed(&self) -> GpuResult<()> {
        match self.removed_reason() {
            Some(reason) => Err(GpuError::DeviceRemoved(reason)),
            None => Ok(()),
        }
    }
}

fn hwnd_from(window: Option<RawWindowHandle>) -> GpuResult<HWND> {
    match window {
        Some(RawWindowHandle::Win32(handle)) => Ok(HWND(handle.hwnd.get() as *mut core::ffi::c_void)),
        Some(_) => Err(GpuError::DeviceCreationFailed("Expected Win32 window handle".into())),
        None => Err(GpuError::DeviceCreationFailed("DirectX 12 swap chain needs a window".into())),
    }
}

impl GpuDevice for Dx12Device {
    type Resource = Dx12Resource;
    type DescriptorHeap = Dx12DescriptorHeap;
    type Pipeline = Dx12Pipeline;
    type CommandList = Dx12CommandList;
    type Queue = Dx12Queue;
    type Fence = Dx12Fence;
    type Event = Dx12Event;
    type SwapChain = Dx12SwapChain;

    fn backend_name(&self) -> &str {
        "DirectX 12"
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn create_resource(&self, desc: &ResourceDesc) -> GpuResult<Self::Resource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: convert::heap_type(desc.heap),
            ..Default::default()
        };
        let resource_desc = match desc.dimension {
            ResourceDimension::Buffer { size } => D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
                Width: size,
                Height: 1,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: DXGI_FORMAT_UNKNOWN,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                ..Default::default()
            },
            ResourceDimension::Texture2D { width, height, format } => D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                Width: width as u64,
                Height: height,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: convert::format(format),
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                Flags: if desc.allow_render_target {
                    D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET
                } else {
                    D3D12_RESOURCE_FLAG_NONE
                },
                ..Default::default()
            },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    convert::resource_state(desc.initial_state),
                    None,
                    &mut resource,
                )
                .map_err(|e| GpuError::AllocationFailed(format!("'{}': {:?}", desc.name, e)))?;
        }
        let resource = resource.ok_or_else(|| GpuError::AllocationFailed(format!("'{}': no resource returned", desc.name)))?;

        let wide_name: Vec<u16> = desc.name.encode_utf16().chain(Some(0)).collect();
        unsafe {
            let _ = resource.SetName(windows::core::PCWSTR(wide_name.as_ptr()));
        }
        Ok(Dx12Resource::new(resource))
    }

    fn gpu_address(&self, resource: &Self::Resource) -> u64 {
        unsafe { resource.raw.GetGPUVirtualAddress() }
    }

    fn map(&self, resource: &Self::Resource) -> GpuResult<()> {
        let mut data = std::ptr::null_mut();
        unsafe {
            resource
                .raw
                .Map(0, None, Some(&mut data))
                .map_err(|e| GpuError::AllocationFailed(format!("Map failed: {:?}", e)))?;
        }
        resource.mapped.store(data as *mut u8, Ordering::Release);
        Ok(())
    }

    fn unmap(&self, resource: &Self::Resource) {
        resource.mapped.store(std::ptr::null_mut(), Ordering::Release);
        unsafe { resource.raw.Unmap(0, None) };
    }

    fn write_mapped(&self, resource: &Self::Resource, offset: u64, data: &[u8]) {
        let base = resource.mapped.load(Ordering::Acquire);
        if base.is_null() {
            warn!("Write to a resource that is not mapped");
            return;
        }
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset as usize), data.len()) };
    }

    fn read_mapped(&self, resource: &Self::Resource, offset: u64, out: &mut [u8]) {
        let base = resource.mapped.load(Ordering::Acquire);
        if base.is_null() {
            warn!("Read from a resource that is not mapped");
            return;
        }
        unsafe { std::ptr::copy_nonoverlapping(base.add(offset as usize), out.as_mut_ptr(), out.len()) };
    }

    fn descriptor_increment(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::Rtv => self.increments.rtv,
            DescriptorHeapType::Dsv => self.increments.dsv,
            DescriptorHeapType::CbvSrvUav => self.increments.cbv_srv_uav,
            DescriptorHeapType::Sampler => self.increments.sampler,
        }
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> GpuResult<RawDescriptorHeap<Self::DescriptorHeap>> {
        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: convert::descriptor_heap_type(desc.heap_type()),
            NumDescriptors: desc.num_descriptors,
            Flags: if desc.shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = self.device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
                GpuError::AllocationFailed(format!(
                    "Failed to create {} descriptor heap: {:?}",
                    desc.descriptor_type.name(),
                    e
                ))
            })?;

            if let Some(name) = &desc.name {
                let wide_name: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
                let _ = heap.SetName(windows::core::PCWSTR(wide_name.as_ptr()));
            }

            let cpu_start = CpuDescriptorHandle::new(heap.GetCPUDescriptorHandleForHeapStart().ptr);
            let gpu_start = desc
                .shader_visible
                .then(|| GpuDescriptorHandle::new(heap.GetGPUDescriptorHandleForHeapStart().ptr));

            Ok(RawDescriptorHeap {
                heap: Dx12DescriptorHeap { raw: heap },
                cpu_start,
                gpu_start,
            })
        }
    }

    fn write_descriptor(&self, handle: CpuDescriptorHandle, resource: &Self::Resource, view: &ViewDesc) {
        let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr };
        unsafe {
            match *view {
                ViewDesc::RenderTarget { format } => {
                    let desc = D3D12_RENDER_TARGET_VIEW_DESC {
                        Format: convert::format(format),
                        ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                        Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_RTV { MipSlice: 0, PlaneSlice: 0 },
                        },
                    };
                    self.device.CreateRenderTargetView(&resource.raw, Some(&desc), handle);
                }
                ViewDesc::DepthStencil { format } => {
                    let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                        Format: convert::format(format),
                        ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                        Flags: D3D12_DSV_FLAG_NONE,
                        Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                        },
                    };
                    self.device.CreateDepthStencilView(&resource.raw, Some(&desc), handle);
                }
                ViewDesc::ShaderResource { format } => {
                    let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: convert::format(format),
                        ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_SRV {
                                MipLevels: 1,
                                ..Default::default()
                            },
                        },
                    };
                    self.device.CreateShaderResourceView(&resource.raw, Some(&desc), handle);
                }
                ViewDesc::ConstantBuffer { offset, size } => {
                    let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                        BufferLocation: resource.raw.GetGPUVirtualAddress() + offset,
                        SizeInBytes: size,
                    };
                    self.device.CreateConstantBufferView(Some(&desc), handle);
                }
            }
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> GpuResult<Self::Pipeline> {
        pipeline::create_pipeline(&self.device, desc)
    }

    fn create_command_list(&self) -> GpuResult<Self::CommandList> {
        unsafe {
            let allocator: ID3D12CommandAllocator = self
                .device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| GpuError::AllocationFailed(format!("Failed to create CommandAllocator: {:?}", e)))?;
            let list: ID3D12GraphicsCommandList = self
                .device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| GpuError::AllocationFailed(format!("Failed to create CommandList: {:?}", e)))?;

            // 新建的命令列表处于打开状态，先关闭，由 reset 统一打开
            list.Close()
                .map_err(|e| GpuError::AllocationFailed(format!("Failed to close initial CommandList: {:?}", e)))?;

            Ok(Dx12CommandList { allocator, list })
        }
    }

    fn reset_command_list(&self, list: &mut Self::CommandList) -> GpuResult<()> {
        unsafe {
            list.allocator
                .Reset()
                .map_err(|e| GpuError::SubmissionFailed(format!("Failed to reset CommandAllocator: {:?}", e)))?;
            list.list
                .Reset(&list.allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| GpuError::SubmissionFailed(format!("Failed to reset CommandList: {:?}", e)))
        }
    }

    fn encode(&self, list: &mut Self::CommandList, commands: &Arc<[Command<Self>]>) -> GpuResult<()> {
        encode::encode(&list.list, commands)
    }

    fn create_queue(&self) -> GpuResult<Self::Queue> {
        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        let raw: ID3D12CommandQueue = unsafe { self.device.CreateCommandQueue(&queue_desc) }
            .map_err(|e| GpuError::DeviceCreationFailed(format!("Failed to create command queue: {:?}", e)))?;
        Ok(Dx12Queue { raw })
    }

    fn execute(&self, queue: &Self::Queue, lists: &[&Self::CommandList]) -> GpuResult<()> {
        self.check_removed()?;
        let raw: Vec<Option<ID3D12CommandList>> = lists.iter().map(|l| Some(l.list.clone().into())).collect();
        unsafe { queue.raw.ExecuteCommandLists(&raw) };
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> GpuResult<Self::Fence> {
        let raw: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| GpuError::DeviceCreationFailed(format!("Failed to create fence: {:?}", e)))?;
        Ok(Dx12Fence { raw })
    }

    fn signal(&self, queue: &Self::Queue, fence: &Self::Fence, value: u64) -> GpuResult<()> {
        unsafe { queue.raw.Signal(&fence.raw, value) }.map_err(|e| match self.removed_reason() {
            Some(reason) => GpuError::DeviceRemoved(reason),
            None => GpuError::SubmissionFailed(format!("Failed to signal fence: {:?}", e)),
        })
    }

    fn completed_value(&self, fence: &Self::Fence) -> u64 {
        unsafe { fence.raw.GetCompletedValue() }
    }

    fn create_event(&self) -> GpuResult<Self::Event> {
        unsafe { CreateEventA(None, false, false, None) }
            .map(Dx12Event)
            .map_err(|e| GpuError::DeviceCreationFailed(format!("Failed to create fence event: {:?}", e)))
    }

    fn set_event_on_completion(&self, fence: &Self::Fence, value: u64, event: &Self::Event) -> GpuResult<()> {
        unsafe { fence.raw.SetEventOnCompletion(value, event.0) }
            .map_err(|e| GpuError::SubmissionFailed(format!("Failed to set fence event: {:?}", e)))
    }

    fn wait_event(&self, event: &Self::Event, timeout: Option<Duration>) -> GpuResult<bool> {
        let millis = timeout.map_or(INFINITE, |t| t.as_millis().min((INFINITE - 1) as u128) as u32);
        let result = unsafe { WaitForSingleObject(event.0, millis) };
        if result == WAIT_OBJECT_0 {
            Ok(true)
        } else if result == WAIT_TIMEOUT {
            Ok(false)
        } else {
            Err(GpuError::SubmissionFailed(format!("WaitForSingleObject returned {:?}", result)))
        }
    }

    fn create_swap_chain(
        &self,
        queue: &Self::Queue,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
    ) -> GpuResult<Self::SwapChain> {
        let hwnd = hwnd_from(window)?;
        let format = convert::format(desc.format);
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, ..Default::default() },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        unsafe {
            let swap_chain: IDXGISwapChain1 = self
                .factory
                .CreateSwapChainForHwnd(&queue.raw, hwnd, &swap_chain_desc, None, None)
                .map_err(|e| GpuError::DeviceCreationFailed(format!("Failed to create swap chain: {:?}", e)))?;
            let raw: IDXGISwapChain3 = swap_chain.cast().map_err(|e| {
                GpuError::DeviceCreationFailed(format!("Failed to cast swap chain to IDXGISwapChain3: {:?}", e))
            })?;

            Ok(Dx12SwapChain {
                raw,
                buffer_count: desc.buffer_count,
                format,
            })
        }
    }

    fn back_buffer(&self, swap_chain: &Self::SwapChain, index: u32) -> GpuResult<Self::Resource> {
        unsafe { swap_chain.raw.GetBuffer::<ID3D12Resource>(index) }
            .map(Dx12Resource::new)
            .map_err(|e| GpuError::AllocationFailed(format!("Failed to get swap chain buffer {}: {:?}", index, e)))
    }

    fn current_back_buffer_index(&self, swap_chain: &Self::SwapChain) -> u32 {
        unsafe { swap_chain.raw.GetCurrentBackBufferIndex() }
    }

    fn present(&self, _queue: &Self::Queue, swap_chain: &mut Self::SwapChain, sync_interval: u32) -> GpuResult<()> {
        let hr = unsafe { swap_chain.raw.Present(sync_interval, DXGI_PRESENT(0)) };
        if hr == DXGI_ERROR_DEVICE_REMOVED || hr == DXGI_ERROR_DEVICE_RESET {
            let reason = self.removed_reason().unwrap_or_else(|| format!("{:?}", hr));
            return Err(GpuError::DeviceRemoved(reason));
        }
        hr.ok().map_err(|e| GpuError::PresentFailed(format!("{:?}", e)))
    }

    fn resize_swap_chain(&self, swap_chain: &mut Self::SwapChain, width: u32, height: u32) -> GpuResult<()> {
        unsafe {
            swap_chain
                .raw
                .ResizeBuffers(swap_chain.buffer_count, width, height, swap_chain.format, DXGI_SWAP_CHAIN_FLAG(0))
                .map_err(|e| GpuError::PresentFailed(format!("Failed to resize swap chain buffers: {:?}", e)))
        }
    }
}
