//! 把记录好的命令编码进 ID3D12GraphicsCommandList

use std::mem::ManuallyDrop;

use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;

use super::{convert, Dx12Device};
use crate::core::error::{GpuError, GpuResult};
use crate::renderer::command::Command;

fn transition(resource: &ID3D12Resource, before: D3D12_RESOURCE_STATES, after: D3D12_RESOURCE_STATES) -> D3D12_RESOURCE_BARRIER {
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

/// 释放屏障中持有的资源引用
fn release_barrier(barrier: D3D12_RESOURCE_BARRIER) {
    unsafe {
        let mut transition = ManuallyDrop::into_inner(barrier.Anonymous.Transition);
        ManuallyDrop::drop(&mut transition.pResource);
    }
}

fn copy_location(resource: &ID3D12Resource, footprint: Option<D3D12_PLACED_SUBRESOURCE_FOOTPRINT>) -> D3D12_TEXTURE_COPY_LOCATION {
    match footprint {
        Some(footprint) => D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(resource.clone())),
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { PlacedFootprint: footprint },
        },
        None => D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(resource.clone())),
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
        },
    }
}

/// 按顺序编码命令并关闭命令列表
pub fn encode(list: &ID3D12GraphicsCommandList, commands: &[Command<Dx12Device>]) -> GpuResult<()> {
    unsafe {
        for command in commands {
            match command {
                Command::Barrier(b) => {
                    let barrier = transition(
                        &b.resource.raw().raw,
                        convert::resource_state(b.before),
                        convert::resource_state(b.after),
                    );
                    list.ResourceBarrier(std::slice::from_ref(&barrier));
                    release_barrier(barrier);
                }
                Command::SetPipeline(pipeline) => {
                    list.SetGraphicsRootSignature(&pipeline.raw().root_signature);
                    list.SetPipelineState(&pipeline.raw().state);
                }
                Command::SetRenderTargets { rtv } => {
                    let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.ptr };
                    list.OMSetRenderTargets(1, Some(&handle), false, None);
                }
                Command::ClearRenderTarget { rtv, color } => {
                    list.ClearRenderTargetView(D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.ptr }, color, None);
                }
                Command::SetViewport(v) => {
                    list.RSSetViewports(&[D3D12_VIEWPORT {
                        TopLeftX: v.x,
                        TopLeftY: v.y,
                        Width: v.width,
                        Height: v.height,
                        MinDepth: v.min_depth,
                        MaxDepth: v.max_depth,
                    }]);
                }
                Command::SetScissor(r) => {
                    list.RSSetScissorRects(&[RECT {
                        left: r.left,
                        top: r.top,
                        right: r.right,
                        bottom: r.bottom,
                    }]);
                }
                Command::SetPrimitiveTopology(topology) => {
                    list.IASetPrimitiveTopology(convert::topology(*topology));
                }
                Command::SetVertexBuffer { slot, view } => {
                    let view = D3D12_VERTEX_BUFFER_VIEW {
                        BufferLocation: view.location(),
                        SizeInBytes: view.size_in_bytes,
                        StrideInBytes: view.stride_in_bytes,
                    };
                    list.IASetVertexBuffers(*slot, Some(&[view]));
                }
                Command::SetIndexBuffer(view) => {
                    let view = D3D12_INDEX_BUFFER_VIEW {
                        BufferLocation: view.location(),
                        SizeInBytes: view.size_in_bytes,
                        Format: convert::format(view.format.format()),
                    };
                    list.IASetIndexBuffer(Some(&view));
                }
                Command::SetDescriptorHeaps(heaps) => {
                    let raw: Vec<Option<ID3D12DescriptorHeap>> =
                        heaps.iter().map(|h| Some(h.raw().raw.clone())).collect();
                    list.SetDescriptorHeaps(&raw);
                }
                Command::SetDescriptorTable { root_index, base } => {
                    list.SetGraphicsRootDescriptorTable(*root_index, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.ptr });
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    start_vertex,
                    start_instance,
                } => list.DrawInstanced(*vertex_count, *instance_count, *start_vertex, *start_instance),
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    start_index,
                    base_vertex,
                    start_instance,
                } => list.DrawIndexedInstanced(*index_count, *instance_count, *start_index, *base_vertex, *start_instance),
                Command::CopyBuffer {
                    dst,
                    dst_offset,
                    src,
                    src_offset,
                    size,
                } => list.CopyBufferRegion(&dst.raw().raw, *dst_offset, &src.raw().raw, *src_offset, *size),
                Command::CopyBufferToTexture { dst, src, footprint } => {
                    let placed = D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                        Offset: footprint.offset,
                        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                            Format: convert::format(footprint.format),
                            Width: footprint.width,
                            Height: footprint.height,
                            Depth: 1,
                            RowPitch: footprint.row_pitch,
                        },
                    };
                    let mut dst_location = copy_location(&dst.raw().raw, None);
                    let mut src_location = copy_location(&src.raw().raw, Some(placed));
                    list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
                    ManuallyDrop::drop(&mut dst_location.pResource);
                    ManuallyDrop::drop(&mut src_location.pResource);
                }
            }
        }

        list.Close()
            .map_err(|e| GpuError::SubmissionFailed(format!("Failed to close command list: {:?}", e)))
    }
}
