//! 错误处理模块
//!
//! 定义了帧管线中使用的统一错误类型，使用 `thiserror` 提供友好的错误消息。
//!
//! # 错误分级
//!
//! - 初始化阶段的错误（设备、适配器、管线创建）一律视为致命错误，终止启动
//! - 每帧错误中，`PresentFailed` 与设备移除是致命的（需要重建设备）
//! - 其余每帧错误记录日志并放弃当前帧

use std::path::PathBuf;
use thiserror::Error;

use crate::renderer::command::RecorderState;
use crate::renderer::resource::{HeapKind, ResourceState};

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, FramePipelineError>;

/// 图形后端使用的 Result 类型
pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// 帧管线的错误类型
#[derive(Debug, Error)]
pub enum FramePipelineError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 图形 API 错误
    #[error("Graphics error: {0}")]
    Graphics(#[from] GpuError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 日志系统错误
    #[error("Log error: {0}")]
    Log(String),

    /// 初始化错误
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// 运行时错误
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// 配置文件解析失败
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// 配置值无效
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// GPU 相关的错误
///
/// 对应帧管线的错误分类。每个变体都能通过 [`GpuError::severity`] 判断是否致命。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    /// 设备内存不足或资源/堆描述无效
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// 没有满足最低特性级别的适配器
    #[error("Device creation failed: {0}")]
    DeviceCreationFailed(String),

    /// 命令记录协议被违反（关闭后继续记录、未等待就重置等）
    #[error("Invalid recorder state for {operation}: recorder is {state:?}")]
    InvalidRecorderState {
        operation: &'static str,
        state: RecorderState,
    },

    /// 在等待 fence 之前重置分配器
    #[error("Allocator reset while GPU work is in flight (needs fence {required}, completed {completed})")]
    ResetBeforeRetire { required: u64, completed: u64 },

    /// 映射非 CPU 可见的资源
    #[error("Resource '{name}' on {heap:?} heap cannot be mapped")]
    InvalidMapTarget { name: String, heap: HeapKind },

    /// 映射区域读写越界
    #[error("Mapped access at offset {offset} with length {len} exceeds resource size {size}")]
    MapOutOfBounds { offset: u64, len: u64, size: u64 },

    /// 视图类型与描述符堆类型不匹配
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// 命令分配器内存耗尽
    #[error("Command allocator exhausted: limit of {limit} commands")]
    OutOfCommandMemory { limit: usize },

    /// 队列拒绝了命令缓冲
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// 有限超时等待 fence 失败
    #[error("Timed out after {timeout_ms} ms waiting for fence {value} (completed {completed})")]
    FenceWaitTimeout {
        value: u64,
        completed: u64,
        timeout_ms: u64,
    },

    /// 呈现失败（设备移除/重置）
    #[error("Present failed: {0}")]
    PresentFailed(String),

    /// 屏障声明的前置状态与跟踪到的状态不一致
    #[error("Barrier on '{resource}' declares {declared:?} but resource is {tracked:?}")]
    ResourceStateMismatch {
        resource: String,
        declared: ResourceState,
        tracked: ResourceState,
    },

    /// 描述符槽位越界或类型不匹配
    #[error("Descriptor slot {slot} out of range for heap of {capacity}")]
    DescriptorOutOfRange { slot: u32, capacity: u32 },

    /// 管线状态对象创建失败
    #[error("Pipeline creation failed: {0}")]
    PipelineCreationFailed(String),

    /// 设备已移除
    #[error("Device removed: {0}")]
    DeviceRemoved(String),
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// 需要重建设备或终止程序
    Fatal,
    /// 记录日志并放弃当前帧
    AbortFrame,
}

impl GpuError {
    /// 错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GpuError::PresentFailed(_)
            | GpuError::DeviceRemoved(_)
            | GpuError::DeviceCreationFailed(_)
            | GpuError::PipelineCreationFailed(_) => ErrorSeverity::Fatal,
            _ => ErrorSeverity::AbortFrame,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }
}

impl FramePipelineError {
    /// 是否为致命错误（非 GPU 错误一律视为致命）
    pub fn is_fatal(&self) -> bool {
        match self {
            FramePipelineError::Graphics(e) => e.is_fatal(),
            _ => true,
        }
    }
}
