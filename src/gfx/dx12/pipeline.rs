//! 根签名、着色器编译与管线状态对象

use std::ffi::CString;
use std::mem::ManuallyDrop;

use tracing::debug;
use windows::core::{s, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::convert;
use crate::core::error::{GpuError, GpuResult};
use crate::renderer::pipeline::{PipelineDesc, RootParameter, ShaderBytecode};

/// DirectX 12 管线：根签名 + PSO
pub struct Dx12Pipeline {
    pub root_signature: ID3D12RootSignature,
    pub state: ID3D12PipelineState,
}

unsafe impl Send for Dx12Pipeline {}
unsafe impl Sync for Dx12Pipeline {}

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()).to_vec() }
}

fn blob_message(blob: Option<ID3DBlob>) -> String {
    blob.map(|b| String::from_utf8_lossy(&blob_bytes(&b)).trim_end_matches('\0').to_string())
        .unwrap_or_default()
}

/// 序列化并创建根签名
///
/// 没有根参数时得到一个只允许输入装配布局的空根签名。
pub fn create_root_signature(device: &ID3D12Device, desc: &PipelineDesc) -> GpuResult<ID3D12RootSignature> {
    let ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = desc
        .root_parameters
        .iter()
        .map(|parameter| {
            let RootParameter::DescriptorTable { ranges, .. } = parameter;
            ranges
                .iter()
                .map(|range| D3D12_DESCRIPTOR_RANGE {
                    RangeType: convert::range_type(range.range_type),
                    NumDescriptors: range.count,
                    BaseShaderRegister: range.base_register,
                    RegisterSpace: 0,
                    OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
                })
                .collect()
        })
        .collect();

    let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
        .root_parameters
        .iter()
        .zip(&ranges)
        .map(|(parameter, ranges)| {
            let RootParameter::DescriptorTable { visibility, .. } = parameter;
            D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: ranges.len() as u32,
                        pDescriptorRanges: ranges.as_ptr(),
                    },
                },
                ShaderVisibility: convert::visibility(*visibility),
            }
        })
        .collect();

    let samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = desc
        .static_samplers
        .iter()
        .map(|sampler| {
            let address = convert::address_mode(sampler.address_mode);
            D3D12_STATIC_SAMPLER_DESC {
                Filter: convert::filter(sampler.filter),
                AddressU: address,
                AddressV: address,
                AddressW: address,
                ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
                BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
                MaxLOD: D3D12_FLOAT32_MAX,
                ShaderRegister: sampler.register,
                ShaderVisibility: convert::visibility(sampler.visibility),
                ..Default::default()
            }
        })
        .collect();

    let root_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: if parameters.is_empty() { std::ptr::null() } else { parameters.as_ptr() },
        NumStaticSamplers: samplers.len() as u32,
        pStaticSamplers: if samplers.is_empty() { std::ptr::null() } else { samplers.as_ptr() },
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    unsafe {
        let mut signature = None;
        let mut error = None;
        D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut error))
            .map_err(|e| {
                GpuError::PipelineCreationFailed(format!(
                    "Failed to serialize root signature: {:?} {}",
                    e,
                    blob_message(error.take())
                ))
            })?;
        let signature = signature
            .ok_or_else(|| GpuError::PipelineCreationFailed("Root signature blob is empty".into()))?;

        device
            .CreateRootSignature(0, &blob_bytes(&signature))
            .map_err(|e| GpuError::PipelineCreationFailed(format!("Failed to create root signature: {:?}", e)))
    }
}

/// 取得 DXBC 字节码：已编译的直接使用，否则把内容当作 HLSL 源码编译
pub fn compile_shader(shader: &ShaderBytecode, target: PCSTR, stage: &str) -> GpuResult<Vec<u8>> {
    if shader.is_compiled() {
        return Ok(shader.bytes().to_vec());
    }

    let entry = CString::new(shader.entry_point.as_str())
        .map_err(|_| GpuError::PipelineCreationFailed(format!("Invalid {} entry point", stage)))?;
    let source = shader.bytes();

    unsafe {
        let mut blob = None;
        let mut error = None;
        let result = D3DCompile(
            source.as_ptr() as _,
            source.len(),
            None,
            None,
            None,
            PCSTR(entry.as_ptr() as *const u8),
            target,
            0,
            0,
            &mut blob,
            Some(&mut error),
        );
        if let Err(e) = result {
            return Err(GpuError::PipelineCreationFailed(format!(
                "{} compile error ({:?}): {}",
                stage,
                e,
                blob_message(error)
            )));
        }
        let blob = blob.ok_or_else(|| GpuError::PipelineCreationFailed(format!("{} produced no bytecode", stage)))?;
        debug!(stage, entry = %shader.entry_point, bytes = blob.GetBufferSize(), "Shader compiled");
        Ok(blob_bytes(&blob))
    }
}

/// 创建管线状态对象
pub fn create_pipeline(device: &ID3D12Device, desc: &PipelineDesc) -> GpuResult<Dx12Pipeline> {
    let root_signature = create_root_signature(device, desc)?;
    let vs = compile_shader(&desc.vertex_shader, s!("vs_5_0"), "VS")?;
    let ps = compile_shader(&desc.pixel_shader, s!("ps_5_0"), "PS")?;

    let semantics = desc
        .input_layout
        .iter()
        .map(|e| CString::new(e.semantic.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| GpuError::PipelineCreationFailed("Invalid input semantic".into()))?;
    let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
        .input_layout
        .iter()
        .zip(&semantics)
        .map(|(element, semantic)| D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(semantic.as_ptr() as *const u8),
            SemanticIndex: element.semantic_index,
            Format: convert::format(element.format),
            InputSlot: element.input_slot,
            AlignedByteOffset: element.aligned_offset.unwrap_or(D3D12_APPEND_ALIGNED_ELEMENT),
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        })
        .collect();

    let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC::default();
    pso_desc.pRootSignature = ManuallyDrop::new(Some(root_signature.clone()));
    pso_desc.VS = D3D12_SHADER_BYTECODE {
        pShaderBytecode: vs.as_ptr() as _,
        BytecodeLength: vs.len(),
    };
    pso_desc.PS = D3D12_SHADER_BYTECODE {
        pShaderBytecode: ps.as_ptr() as _,
        BytecodeLength: ps.len(),
    };
    pso_desc.BlendState.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: false.into(),
        LogicOpEnable: false.into(),
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        ..Default::default()
    };
    pso_desc.RasterizerState = D3D12_RASTERIZER_DESC {
        FillMode: D3D12_FILL_MODE_SOLID,
        CullMode: D3D12_CULL_MODE_NONE,
        DepthClipEnable: true.into(),
        ..Default::default()
    };
    pso_desc.DepthStencilState.DepthEnable = false.into();
    pso_desc.SampleMask = u32::MAX;
    pso_desc.InputLayout = D3D12_INPUT_LAYOUT_DESC {
        pInputElementDescs: if input_elements.is_empty() { std::ptr::null() } else { input_elements.as_ptr() },
        NumElements: input_elements.len() as u32,
    };
    pso_desc.PrimitiveTopologyType = convert::topology_type(desc.topology_type);
    pso_desc.NumRenderTargets = 1;
    pso_desc.RTVFormats[0] = convert::format(desc.render_target_format);
    pso_desc.DSVFormat = DXGI_FORMAT_UNKNOWN;
    pso_desc.SampleDesc.Count = 1;

    let state = unsafe { device.CreateGraphicsPipelineState::<ID3D12PipelineState>(&pso_desc) };
    // 释放描述中持有的根签名引用
    drop(ManuallyDrop::into_inner(pso_desc.pRootSignature));
    let state = state.map_err(|e| GpuError::PipelineCreationFailed(format!("'{}': {:?}", desc.name, e)))?;

    Ok(Dx12Pipeline { root_signature, state })
}
