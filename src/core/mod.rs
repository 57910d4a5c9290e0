//! 核心功能模块
//!
//! 本模块提供与具体图形 API 无关的基础功能：日志、配置与错误处理。
//!
//! - `log`：日志系统，提供结构化的日志记录功能
//! - `config`：配置管理，支持从配置文件加载设置
//! - `error`：错误处理，定义统一的错误类型

pub mod log;
pub mod config;
pub mod error;

pub use error::{Result, GpuResult, FramePipelineError, GpuError, ErrorSeverity};
pub use config::{Config, SyncMode};
