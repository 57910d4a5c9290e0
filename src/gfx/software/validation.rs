//! 软件设备的验证层
//!
//! GPU 时间线执行命令时发现的问题记录为 [`ValidationMessage`]，
//! 相当于 D3D12 调试层的输出。

use std::fmt;

/// 消息级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    Warning,
    Error,
}

/// 一条验证消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationMessage {
    pub severity: ValidationSeverity,
    /// 触发消息的命令名
    pub command: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.command, self.message)
    }
}

/// 设备统计与验证结果
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub executed_lists: u64,
    pub barriers: u64,
    pub clears: u64,
    pub draws: u64,
    pub copies: u64,
    pub presents: u64,
    pub messages: Vec<ValidationMessage>,
}

impl DeviceSnapshot {
    pub fn validation_errors(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.severity == ValidationSeverity::Error)
            .count()
    }

    pub fn validation_warnings(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.severity == ValidationSeverity::Warning)
            .count()
    }

    /// 是否有来自某个命令的消息
    pub fn has_message_for(&self, command: &str) -> bool {
        self.messages.iter().any(|m| m.command == command)
    }
}

/// 验证日志
#[derive(Debug, Default)]
pub(crate) struct ValidationLog {
    enabled: bool,
    snapshot: DeviceSnapshot,
}

impl ValidationLog {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            snapshot: DeviceSnapshot::default(),
        }
    }

    pub(crate) fn report(&mut self, severity: ValidationSeverity, command: &'static str, message: String) {
        if !self.enabled {
            return;
        }
        match severity {
            ValidationSeverity::Error => {
                tracing::error!(target: "frame_pipeline::validation", command, "{}", message)
            }
            ValidationSeverity::Warning => {
                tracing::warn!(target: "frame_pipeline::validation", command, "{}", message)
            }
        }
        self.snapshot.messages.push(ValidationMessage {
            severity,
            command,
            message,
        });
    }

    pub(crate) fn stats(&mut self) -> &mut DeviceSnapshot {
        &mut self.snapshot
    }

    pub(crate) fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.clone()
    }

    pub(crate) fn take_messages(&mut self) -> Vec<ValidationMessage> {
        std::mem::take(&mut self.snapshot.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_log_drops_messages() {
        let mut log = ValidationLog::new(false);
        log.report(ValidationSeverity::Error, "DrawInstanced", "no pipeline".into());
        assert_eq!(log.snapshot().validation_errors(), 0);
    }

    #[test]
    fn test_counts() {
        let mut log = ValidationLog::new(true);
        log.report(ValidationSeverity::Error, "DrawInstanced", "no pipeline".into());
        log.report(ValidationSeverity::Warning, "ResourceBarrier", "redundant".into());
        let snapshot = log.snapshot();
        assert_eq!(snapshot.validation_errors(), 1);
        assert_eq!(snapshot.validation_warnings(), 1);
        assert!(snapshot.has_message_for("ResourceBarrier"));
        assert_eq!(
            snapshot.messages[0].to_string(),
            "[Error] DrawInstanced: no pipeline"
        );

        assert_eq!(log.take_messages().len(), 2);
        assert!(log.snapshot().messages.is_empty());
    }
}
