//! 配置管理模块
//!
//! 提供帧管线配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 800
//! height = 600
//! title = "FramePipeline"
//! resizable = true
//!
//! [graphics]
//! backend = "software"   # 或 "dx12"
//! vsync = true
//! buffer_count = 2
//! adapter = "auto"       # auto, nvidia, amd, intel, software, highest-memory
//! min_feature_level = "11_0"
//! clear_color = [1.0, 1.0, 0.0, 1.0]
//!
//! [frame]
//! sync_mode = "full_drain"   # 或 "pipelined"
//! fence_timeout_ms = 5000    # 省略则无限等待
//! command_memory_limit = 4096
//!
//! [validation]
//! track_resource_states = true
//! debug_layer = true
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};
use crate::gfx::adapter::{AdapterPreference, FeatureLevel};

/// 帧管线配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 帧同步配置
    #[serde(default)]
    pub frame: FrameConfig,

    /// 校验配置
    #[serde(default)]
    pub validation: ValidationConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步（present 间隔 1 或 0）
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 交换链后缓冲数量
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,

    /// 适配器选择策略
    #[serde(default)]
    pub adapter: AdapterPreference,

    /// 最低特性级别
    #[serde(default = "default_min_feature_level")]
    pub min_feature_level: FeatureLevel,

    /// 清屏颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// 预编译的顶点着色器字节码路径（可选）
    #[serde(default)]
    pub vertex_shader: Option<String>,

    /// 预编译的像素着色器字节码路径（可选）
    #[serde(default)]
    pub pixel_shader: Option<String>,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// 软件参考设备（任何平台可用）
    Software,
    /// DirectX 12 后端（仅 Windows）
    Dx12,
}

/// CPU/GPU 同步模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// 每帧完全排空 GPU
    FullDrain,
    /// 每个后缓冲一个 fence 值，CPU 记录与 GPU 执行重叠
    Pipelined,
}

/// 帧同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    #[serde(default = "default_sync_mode")]
    pub sync_mode: SyncMode,

    /// fence 等待超时（毫秒），`None` 表示无限等待
    #[serde(default)]
    pub fence_timeout_ms: Option<u64>,

    /// 单个命令分配器可容纳的命令数
    #[serde(default = "default_command_memory_limit")]
    pub command_memory_limit: usize,
}

/// 校验配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// 记录时跟踪资源状态并检查屏障
    #[serde(default = "default_debug_build")]
    pub track_resource_states: bool,

    /// 启用调试层
    #[serde(default = "default_debug_build")]
    pub debug_layer: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }
fn default_title() -> String { "FramePipeline".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") {
        GraphicsBackend::Dx12
    } else {
        GraphicsBackend::Software
    }
}
fn default_vsync() -> bool { true }
fn default_buffer_count() -> u32 { 2 }
fn default_min_feature_level() -> FeatureLevel { FeatureLevel::Level11_0 }
fn default_clear_color() -> [f32; 4] { [1.0, 1.0, 0.0, 1.0] }
fn default_sync_mode() -> SyncMode { SyncMode::FullDrain }
fn default_command_memory_limit() -> usize { 4096 }
fn default_debug_build() -> bool { cfg!(debug_assertions) }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "frame_pipeline.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            buffer_count: default_buffer_count(),
            adapter: AdapterPreference::default(),
            min_feature_level: default_min_feature_level(),
            clear_color: default_clear_color(),
            vertex_shader: None,
            pixel_shader: None,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            sync_mode: default_sync_mode(),
            fence_timeout_ms: None,
            command_memory_limit: default_command_memory_limit(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            track_resource_states: default_debug_build(),
            debug_layer: default_debug_build(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl FrameConfig {
    /// fence 等待超时
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

impl GraphicsConfig {
    /// present 的垂直同步间隔
    pub fn sync_interval(&self) -> u32 {
        if self.vsync { 1 } else { 0 }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_path_buf()))?;

        Self::from_toml(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--software`: 选择后端
    /// - `--width <value>` / `--height <value>`: 窗口尺寸
    /// - `--pipelined`: 使用按缓冲的 fence 同步
    /// - `--adapter <name>`: 适配器选择策略
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--software") {
            self.graphics.backend = GraphicsBackend::Software;
        }

        if args.iter().any(|a| a == "--pipelined") {
            self.frame.sync_mode = SyncMode::Pipelined;
        }

        if let Some(width) = arg_value(&args, "--width").and_then(|v| v.parse().ok()) {
            self.window.width = width;
        }

        if let Some(height) = arg_value(&args, "--height").and_then(|v| v.parse().ok()) {
            self.window.height = height;
        }

        if let Some(adapter) = arg_value(&args, "--adapter") {
            self.graphics.adapter = AdapterPreference::parse(adapter);
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }
            .into());
        }

        if !(2..=3).contains(&self.graphics.buffer_count) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.buffer_count".to_string(),
                reason: "Swap chain needs 2 or 3 back buffers".to_string(),
            }
            .into());
        }

        if self.frame.command_memory_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "frame.command_memory_limit".to_string(),
                reason: "Allocator must hold at least one command".to_string(),
            }
            .into());
        }

        if self.graphics.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.clear_color".to_string(),
                reason: "Clear color components must be finite".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// 取出 `--flag value` 形式的参数值
pub fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|idx| args.get(idx + 1))
        .map(String::as_str)
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Software => "Software",
            GraphicsBackend::Dx12 => "DirectX 12",
        }
    }
}
