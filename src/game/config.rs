use serde::{Deserialize, Serialize};

use super::state::MAX_BOARD_UNITS;

/// 引擎的可调参数。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleConfig {
    pub max_units: usize,
    /// 嵌套触发的最大深度，超出后不再派发。
    pub max_trigger_depth: u32,
    pub playtest_hand_size: usize,
    pub log_tail: usize,
    /// 会话保留的可撤销快照数量。
    pub undo_depth: usize,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            max_units: MAX_BOARD_UNITS,
            max_trigger_depth: 16,
            playtest_hand_size: 7,
            log_tail: 30,
            undo_depth: 64,
        }
    }
}

impl RuleConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuleConfig::from_json(r#"{ "maxTriggerDepth": 4 }"#).expect("config parses");
        assert_eq!(config.max_trigger_depth, 4);
        assert_eq!(config.max_units, 6);
        assert_eq!(config.log_tail, 30);
    }
}
