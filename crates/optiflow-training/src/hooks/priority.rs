//! Hook priorities.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Priority for hook execution order.
///
/// Lower values execute first; valid values are `0..=100`. Hooks that share a
/// priority run in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "u32")]
pub struct HookPriority(u32);

const LEVELS: [(&str, HookPriority); 9] = [
    ("HIGHEST", HookPriority::HIGHEST),
    ("VERY_HIGH", HookPriority::VERY_HIGH),
    ("HIGH", HookPriority::HIGH),
    ("ABOVE_NORMAL", HookPriority::ABOVE_NORMAL),
    ("NORMAL", HookPriority::NORMAL),
    ("BELOW_NORMAL", HookPriority::BELOW_NORMAL),
    ("LOW", HookPriority::LOW),
    ("VERY_LOW", HookPriority::VERY_LOW),
    ("LOWEST", HookPriority::LOWEST),
];

impl HookPriority {
    pub const HIGHEST: Self = Self(0);
    pub const VERY_HIGH: Self = Self(10);
    pub const HIGH: Self = Self(30);
    pub const ABOVE_NORMAL: Self = Self(40);
    pub const NORMAL: Self = Self(50);
    pub const BELOW_NORMAL: Self = Self(60);
    pub const LOW: Self = Self(70);
    pub const VERY_LOW: Self = Self(90);
    pub const LOWEST: Self = Self(100);

    /// Create a priority from a raw value in `0..=100`.
    pub fn new(value: u32) -> TrainingResult<Self> {
        if value > Self::LOWEST.0 {
            return Err(TrainingError::InvalidPriority(format!(
                "priority must be between 0 and 100, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Get the priority value.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Level name, when the value matches a named level.
    pub fn level_name(&self) -> Option<&'static str> {
        LEVELS.iter().find(|(_, p)| p == self).map(|(name, _)| *name)
    }
}

impl Default for HookPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for HookPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for HookPriority {
    type Err = TrainingError;

    fn from_str(s: &str) -> TrainingResult<Self> {
        let upper = s.trim().to_ascii_uppercase();
        LEVELS
            .iter()
            .find(|(name, _)| *name == upper)
            .map(|(_, p)| *p)
            .ok_or_else(|| TrainingError::InvalidPriority(format!("unknown priority level: {s}")))
    }
}

impl TryFrom<Value> for HookPriority {
    type Error = TrainingError;

    fn try_from(value: Value) -> TrainingResult<Self> {
        match &value {
            Value::String(s) => s.parse(),
            Value::Number(n) => {
                let raw = n.as_u64().ok_or_else(|| {
                    TrainingError::InvalidPriority(format!("priority must be a non-negative integer, got {n}"))
                })?;
                let raw = u32::try_from(raw)
                    .map_err(|_| TrainingError::InvalidPriority(format!("priority out of range: {raw}")))?;
                Self::new(raw)
            }
            other => Err(TrainingError::InvalidPriority(format!(
                "priority must be a level name or an integer, got {other}"
            ))),
        }
    }
}

impl From<HookPriority> for u32 {
    fn from(priority: HookPriority) -> Self {
        priority.0
    }
}
