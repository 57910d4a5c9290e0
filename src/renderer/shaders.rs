//! 内置着色器
//!
//! 帧管线只把着色器当作不透明字节。这里提供演示场景用的 HLSL 源码，
//! DirectX 12 后端在创建管线时用 D3DCompile 编译（vs_5_0 / ps_5_0），
//! 配置里给出预编译字节码路径时则直接使用字节码。
//!
//! # 渲染管线
//!
//! ```text
//! 顶点缓冲 -> BasicVS -> 图元装配 -> 光栅化 -> BasicPS -> 后缓冲
//! ```

use std::path::Path;

use crate::core::error::{ConfigError, Result};
use crate::renderer::pipeline::ShaderBytecode;

/// 顶点着色器入口
pub const BASIC_VS_ENTRY: &str = "BasicVS";
/// 像素着色器入口
pub const BASIC_PS_ENTRY: &str = "BasicPS";

/// 只输出位置的矩形着色器
pub const BASIC_HLSL: &str = r#"
float4 BasicVS(float4 pos : POSITION) : SV_POSITION
{
    return pos;
}

float4 BasicPS(float4 pos : SV_POSITION) : SV_TARGET
{
    return float4(1.0f, 1.0f, 1.0f, 1.0f);
}
"#;

/// 纹理矩形着色器：t0 纹理、s0 静态采样器、b0 变换
pub const TEXTURED_HLSL: &str = r#"
Texture2D<float4> tex : register(t0);
SamplerState smp : register(s0);

cbuffer Transform : register(b0)
{
    matrix world;
};

struct Output
{
    float4 svpos : SV_POSITION;
    float2 uv : TEXCOORD;
};

Output BasicVS(float4 pos : POSITION, float2 uv : TEXCOORD)
{
    Output output;
    output.svpos = mul(world, pos);
    output.uv = uv;
    return output;
}

float4 BasicPS(Output input) : SV_TARGET
{
    return float4(tex.Sample(smp, input.uv));
}
"#;

/// 内置矩形着色器（顶点、像素）
pub fn basic_shaders() -> (ShaderBytecode, ShaderBytecode) {
    (
        ShaderBytecode::new(BASIC_HLSL.as_bytes().to_vec(), BASIC_VS_ENTRY),
        ShaderBytecode::new(BASIC_HLSL.as_bytes().to_vec(), BASIC_PS_ENTRY),
    )
}

/// 内置纹理矩形着色器
pub fn textured_shaders() -> (ShaderBytecode, ShaderBytecode) {
    (
        ShaderBytecode::new(TEXTURED_HLSL.as_bytes().to_vec(), BASIC_VS_ENTRY),
        ShaderBytecode::new(TEXTURED_HLSL.as_bytes().to_vec(), BASIC_PS_ENTRY),
    )
}

/// 读取预编译的着色器字节码
pub fn load_bytecode(path: impl AsRef<Path>, entry_point: &str) -> Result<ShaderBytecode> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|_| ConfigError::FileNotFound(path.to_path_buf()))?;
    if bytes.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "graphics.vertex_shader/pixel_shader".to_string(),
            reason: format!("{} is empty", path.display()),
        }
        .into());
    }
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Shader bytecode loaded");
    Ok(ShaderBytecode::new(bytes, entry_point))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_shaders_are_source() {
        let (vs, ps) = basic_shaders();
        assert_eq!(vs.entry_point, "BasicVS");
        assert_eq!(ps.entry_point, "BasicPS");
        assert!(!vs.is_compiled());
        assert!(!vs.is_empty());
    }

    #[test]
    fn test_missing_bytecode_file() {
        assert!(load_bytecode("does/not/exist.cso", "main").is_err());
    }
}
