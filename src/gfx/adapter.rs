//! 适配器选择
//!
//! 枚举到的适配器先转换为 [`AdapterInfo`]，再按 [`AdapterPreference`] 打分，
//! 取满足最低特性级别的最高分者。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{GpuError, GpuResult};

/// PCI 厂商 ID
pub const VENDOR_NVIDIA: u32 = 0x10DE;
pub const VENDOR_AMD: u32 = 0x1002;
pub const VENDOR_INTEL: u32 = 0x8086;
/// WARP / Microsoft Basic Render Driver
pub const VENDOR_MICROSOFT: u32 = 0x1414;

/// D3D 特性级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureLevel {
    #[serde(rename = "11_0")]
    Level11_0,
    #[serde(rename = "11_1")]
    Level11_1,
    #[serde(rename = "12_0")]
    Level12_0,
    #[serde(rename = "12_1")]
    Level12_1,
}

impl FeatureLevel {
    /// 创建设备时依次尝试的级别，从高到低
    pub const FALLBACK_ORDER: [FeatureLevel; 4] = [
        FeatureLevel::Level12_1,
        FeatureLevel::Level12_0,
        FeatureLevel::Level11_1,
        FeatureLevel::Level11_0,
    ];

    /// 不低于 `minimum` 的候选级别
    pub fn candidates(minimum: FeatureLevel) -> impl Iterator<Item = FeatureLevel> {
        Self::FALLBACK_ORDER.into_iter().filter(move |l| *l >= minimum)
    }
}

impl Default for FeatureLevel {
    fn default() -> Self {
        FeatureLevel::Level11_0
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
        };
        write!(f, "{}", s)
    }
}

/// 适配器信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub index: u32,
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    /// 独占显存（字节）
    pub dedicated_video_memory: u64,
    /// 软件光栅化适配器
    pub is_software: bool,
    /// 设备支持的最高特性级别，未探测时为 None
    pub max_feature_level: Option<FeatureLevel>,
}

impl AdapterInfo {
    pub fn vendor_name(&self) -> &'static str {
        match self.vendor_id {
            VENDOR_NVIDIA => "NVIDIA",
            VENDOR_AMD => "AMD",
            VENDOR_INTEL => "Intel",
            VENDOR_MICROSOFT => "Microsoft",
            _ => "Unknown",
        }
    }

    /// 是否满足最低特性级别
    pub fn supports(&self, minimum: FeatureLevel) -> bool {
        self.max_feature_level.map_or(false, |l| l >= minimum)
    }
}

/// 适配器选择策略
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterPreference {
    /// 硬件优先，显存大者优先
    #[default]
    Auto,
    Nvidia,
    Amd,
    Intel,
    /// 只接受软件适配器
    Software,
    /// 显存最大者，不区分软硬件
    HighestMemory,
    /// 名称包含给定子串（不区分大小写）
    Name(String),
}

impl AdapterPreference {
    /// 从命令行参数解析
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "auto" => AdapterPreference::Auto,
            "nvidia" => AdapterPreference::Nvidia,
            "amd" => AdapterPreference::Amd,
            "intel" => AdapterPreference::Intel,
            "software" | "warp" => AdapterPreference::Software,
            "highest-memory" => AdapterPreference::HighestMemory,
            _ => AdapterPreference::Name(value.to_string()),
        }
    }

    /// 适配器得分，None 表示不接受
    pub fn score(&self, adapter: &AdapterInfo) -> Option<u64> {
        let memory_mb = adapter.dedicated_video_memory / (1024 * 1024);
        let hardware_bonus = if adapter.is_software { 0 } else { 1 << 40 };

        let vendor_match = |vendor: u32| {
            if adapter.vendor_id == vendor {
                Some(hardware_bonus + memory_mb)
            } else {
                None
            }
        };

        match self {
            AdapterPreference::Auto => Some(hardware_bonus + memory_mb),
            AdapterPreference::Nvidia => vendor_match(VENDOR_NVIDIA),
            AdapterPreference::Amd => vendor_match(VENDOR_AMD),
            AdapterPreference::Intel => vendor_match(VENDOR_INTEL),
            AdapterPreference::Software => adapter.is_software.then_some(memory_mb),
            AdapterPreference::HighestMemory => Some(memory_mb),
            AdapterPreference::Name(pattern) => adapter
                .name
                .to_ascii_lowercase()
                .contains(&pattern.to_ascii_lowercase())
                .then_some(hardware_bonus + memory_mb),
        }
    }
}

/// 从候选中选出最合适的适配器
///
/// 得分相同时取枚举顺序靠前者。
pub fn select_adapter<'a>(
    adapters: &'a [AdapterInfo],
    preference: &AdapterPreference,
    minimum: FeatureLevel,
) -> GpuResult<&'a AdapterInfo> {
    let mut best: Option<(&AdapterInfo, u64)> = None;

    for adapter in adapters {
        if !adapter.supports(minimum) {
            tracing::debug!(
                adapter = %adapter.name,
                "Adapter skipped: below feature level {}",
                minimum
            );
            continue;
        }
        let Some(score) = preference.score(adapter) else {
            continue;
        };
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((adapter, score));
        }
    }

    best.map(|(adapter, _)| adapter).ok_or_else(|| {
        GpuError::DeviceCreationFailed(format!(
            "no adapter matches {:?} with feature level {} or higher ({} enumerated)",
            preference,
            minimum,
            adapters.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(index: u32, name: &str, vendor_id: u32, memory_mb: u64, software: bool, level: FeatureLevel) -> AdapterInfo {
        AdapterInfo {
            index,
            name: name.to_string(),
            vendor_id,
            device_id: 0,
            dedicated_video_memory: memory_mb * 1024 * 1024,
            is_software: software,
            max_feature_level: Some(level),
        }
    }

    fn adapters() -> Vec<AdapterInfo> {
        vec![
            adapter(0, "Intel(R) UHD Graphics", VENDOR_INTEL, 128, false, FeatureLevel::Level12_1),
            adapter(1, "AMD Radeon RX 6600", VENDOR_AMD, 8192, false, FeatureLevel::Level12_1),
            adapter(2, "Microsoft Basic Render Driver", VENDOR_MICROSOFT, 0, true, FeatureLevel::Level12_1),
        ]
    }

    #[test]
    fn test_auto_prefers_hardware_with_memory() {
        let list = adapters();
        let chosen = select_adapter(&list, &AdapterPreference::Auto, FeatureLevel::Level11_0).unwrap();
        assert_eq!(chosen.index, 1);
        assert_eq!(chosen.vendor_name(), "AMD");
    }

    #[test]
    fn test_vendor_and_name_preferences() {
        let list = adapters();
        let intel = select_adapter(&list, &AdapterPreference::Intel, FeatureLevel::Level11_0).unwrap();
        assert_eq!(intel.index, 0);

        let warp = select_adapter(&list, &AdapterPreference::Software, FeatureLevel::Level11_0).unwrap();
        assert!(warp.is_software);

        let by_name = select_adapter(&list, &AdapterPreference::parse("radeon"), FeatureLevel::Level11_0).unwrap();
        assert_eq!(by_name.index, 1);

        assert!(select_adapter(&list, &AdapterPreference::Nvidia, FeatureLevel::Level11_0).is_err());
    }

    #[test]
    fn test_feature_level_filter() {
        let list = vec![adapter(0, "Old GPU", VENDOR_NVIDIA, 1024, false, FeatureLevel::Level11_0)];
        let err = select_adapter(&list, &AdapterPreference::Auto, FeatureLevel::Level12_0).unwrap_err();
        assert!(matches!(err, GpuError::DeviceCreationFailed(_)));
    }

    #[test]
    fn test_feature_level_candidates() {
        let levels: Vec<_> = FeatureLevel::candidates(FeatureLevel::Level11_1).collect();
        assert_eq!(
            levels,
            vec![FeatureLevel::Level12_1, FeatureLevel::Level12_0, FeatureLevel::Level11_1]
        );
        assert_eq!(FeatureLevel::Level12_0.to_string(), "12_0");
    }

    #[test]
    fn test_preference_parse() {
        assert_eq!(AdapterPreference::parse("AMD"), AdapterPreference::Amd);
        assert_eq!(AdapterPreference::parse("warp"), AdapterPreference::Software);
        assert_eq!(AdapterPreference::default(), AdapterPreference::Auto);
    }
}
