//! 对战核心：状态模型、规则引擎、触发器与效果脚本。

pub mod cards;
pub mod conditions;
pub mod config;
pub mod effects;
pub mod legal;
pub mod rules;
pub mod state;
pub mod targeting;
pub mod triggers;

pub use cards::{
    Ability, AbilityCost, AbilityKind, AbilityUses, CardDatabase, CardDefinition, CardFilter,
    CardId, CardType, DatabaseError, RuleBlock, Stats, TargetScope,
};
pub use conditions::{Condition, Side, UnitFilter};
pub use config::RuleConfig;
pub use effects::{
    BranchCondition, DeferredOperation, EffectEngine, EffectStep, ScriptReport, UnitRef,
};
pub use rules::{compute_damage, AbilityPayload, Action, RuleEngine, RuleError, RuleResolution};
pub use state::{
    opponent_of, AttackModifier, AttackScope, Board, BuffDuration, GameState, IntegrityError,
    Lane, PlayerId, PlayerState, Stat, Status, TemporaryBuff, Unit, UnitUid, BOARD_COLUMNS,
    MAX_BOARD_UNITS,
};
pub use targeting::{legal_ability_targets, legal_attack_targets};
pub use triggers::{Trigger, TriggerContext};
