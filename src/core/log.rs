//! 日志系统模块
//!
//! 基于 `tracing` 的结构化日志。GPU 对象的创建与错误走 `frame_pipeline::gpu`
//! 目标（见 [`engine_info!`](crate::engine_info) 等宏），每帧的记录、提交、
//! 等待与呈现在 [`frame_span`] 之下输出，可用 `RUST_LOG` 单独打开。
//!
//! # 使用示例
//!
//! ```no_run
//! use frame_pipeline::core::config::LogLevel;
//! use frame_pipeline::core::log;
//!
//! log::init_logger(LogLevel::Info, false, None);
//! tracing::info!(width = 800, height = 600, "Window created");
//! ```

use std::path::Path;

use tracing::{Level, Span};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use super::config::LogLevel;

const DEFAULT_LOG_FILE: &str = "frame_pipeline.log";

/// 拆分日志路径为目录与文件名
fn split_log_path(log_path: &str) -> (&Path, &str) {
    let path = Path::new(log_path);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let filename = path.file_name().and_then(|s| s.to_str()).unwrap_or(DEFAULT_LOG_FILE);
    (directory, filename)
}

/// 初始化日志系统
///
/// 重复调用不会报错，第二次起直接忽略，测试中可以多次初始化。
///
/// # 参数
///
/// * `level` - 日志级别（`RUST_LOG` 存在时以环境变量为准）
/// * `file_output` - 是否同时输出到按天滚动的文件
/// * `log_file_path` - 日志文件路径（默认为 "frame_pipeline.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // 只有控制台输出时才打印 span 关闭事件，文件里不需要每帧一行
    let console_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_span_events(if file_output { FmtSpan::NONE } else { FmtSpan::CLOSE });

    let file_layer = file_output.then(|| {
        let (directory, filename) = split_log_path(log_file_path.unwrap_or(DEFAULT_LOG_FILE));
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(RollingFileAppender::new(Rotation::DAILY, directory, filename))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// 单帧的 span，帧内各步骤的日志都挂在它下面
pub fn frame_span(frame: u64, target: u32) -> Span {
    tracing::debug_span!("frame", frame, target)
}

impl LogLevel {
    /// `EnvFilter` 指令字符串
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// GPU 管线日志 - Info 级别
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "frame_pipeline::gpu", $($arg)*)
    };
}

/// GPU 管线日志 - Warn 级别
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "frame_pipeline::gpu", $($arg)*)
    };
}

/// GPU 管线日志 - Error 级别
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "frame_pipeline::gpu", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
    }

    #[test]
    fn test_split_log_path() {
        assert_eq!(split_log_path("logs/gpu.log"), (Path::new("logs"), "gpu.log"));
        assert_eq!(split_log_path("gpu.log"), (Path::new("."), "gpu.log"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logger(LogLevel::Warn, false, None);
        init_logger(LogLevel::Debug, false, None);
        let _guard = frame_span(1, 0).entered();
    }
}
