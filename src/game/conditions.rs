use serde::{Deserialize, Serialize};

use super::cards::{CardDatabase, CardDefinition};
use super::state::{GameState, Lane, Unit};
use super::triggers::TriggerContext;

/// 计数/筛选时相对于自身的阵营。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    #[default]
    Ally,
    Enemy,
    Any,
}

fn include_self_default() -> bool {
    true
}

/// 按阵营、派系、职业筛选棋盘单位。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnitFilter {
    #[serde(default)]
    pub side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default = "include_self_default")]
    pub include_self: bool,
}

impl Default for UnitFilter {
    fn default() -> Self {
        Self {
            side: Side::Ally,
            faction: None,
            class: None,
            include_self: true,
        }
    }
}

impl UnitFilter {
    pub fn side(side: Side) -> Self {
        Self {
            side,
            ..Self::default()
        }
    }

    pub fn with_faction(mut self, faction: impl Into<String>) -> Self {
        self.faction = Some(faction.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn excluding_self(mut self) -> Self {
        self.include_self = false;
        self
    }

    pub fn matches(&self, db: &CardDatabase, anchor: &Unit, candidate: &Unit) -> bool {
        if candidate.uid == anchor.uid && !self.include_self {
            return false;
        }
        let side_ok = match self.side {
            Side::Ally => candidate.owner == anchor.owner,
            Side::Enemy => candidate.owner != anchor.owner,
            Side::Any => true,
        };
        if !side_ok {
            return false;
        }
        if self.faction.is_none() && self.class.is_none() {
            return true;
        }
        let Some(card) = db.get(&candidate.card_id) else {
            return false;
        };
        let faction_ok = self
            .faction
            .as_deref()
            .map_or(true, |faction| card.faction.eq_ignore_ascii_case(faction));
        let class_ok = self
            .class
            .as_deref()
            .map_or(true, |class| card.has_class(class));
        faction_ok && class_ok
    }

    pub fn count(&self, db: &CardDatabase, state: &GameState, anchor: &Unit) -> usize {
        state
            .units()
            .filter(|unit| self.matches(db, anchor, unit))
            .count()
    }
}

/// 规则块条件。未知类型视为不满足。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    SelfZone {
        zone: Lane,
    },
    AllyNamePrefixInPlay {
        prefix: String,
    },
    AdjacentAlly {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        faction: Option<String>,
    },
    MoverIsEnemy,
    TargetNamePrefix {
        prefix: String,
    },
    TargetIsEnemy,
    TargetFaction {
        faction: String,
    },
    TargetHasClass {
        class: String,
    },
    TargetSlowerThanSelf,
    SelfFirstAttacker,
    /// 本单位就是触发来源（部署者、攻击者）。
    SelfIsSource,
    SelfFlag {
        flag: String,
    },
    CountAtLeast {
        #[serde(default)]
        filter: UnitFilter,
        min: usize,
    },
    And {
        conditions: Vec<Condition>,
    },
    #[serde(other)]
    Unknown,
}

fn name_has_prefix(card: Option<&CardDefinition>, prefix: &str) -> bool {
    card.map_or(false, |card| {
        card.name
            .to_lowercase()
            .starts_with(&prefix.to_lowercase())
    })
}

impl Condition {
    pub fn is_satisfied(
        &self,
        db: &CardDatabase,
        state: &GameState,
        self_unit: &Unit,
        ctx: &TriggerContext,
    ) -> bool {
        match self {
            Condition::SelfZone { zone } => self_unit.lane == *zone,
            Condition::AllyNamePrefixInPlay { prefix } => state
                .units()
                .filter(|unit| unit.owner == self_unit.owner && unit.uid != self_unit.uid)
                .any(|unit| name_has_prefix(db.get(&unit.card_id), prefix)),
            Condition::AdjacentAlly { faction } => state
                .units()
                .filter(|unit| self_unit.is_adjacent_to(unit))
                .any(|unit| match faction {
                    Some(faction) => db
                        .get(&unit.card_id)
                        .map_or(false, |card| card.faction.eq_ignore_ascii_case(faction)),
                    None => true,
                }),
            Condition::MoverIsEnemy => ctx
                .mover
                .and_then(|uid| ctx.resolve(state, uid))
                .map_or(false, |mover| mover.owner != self_unit.owner),
            Condition::TargetNamePrefix { prefix } => ctx
                .target_unit(state)
                .map_or(false, |target| name_has_prefix(db.get(&target.card_id), prefix)),
            Condition::TargetIsEnemy => ctx
                .target_unit(state)
                .map_or(false, |target| target.owner != self_unit.owner),
            Condition::TargetFaction { faction } => ctx
                .target_unit(state)
                .and_then(|target| db.get(&target.card_id))
                .map_or(false, |card| card.faction.eq_ignore_ascii_case(faction)),
            Condition::TargetHasClass { class } => ctx
                .target_unit(state)
                .and_then(|target| db.get(&target.card_id))
                .map_or(false, |card| card.has_class(class)),
            Condition::TargetSlowerThanSelf => ctx
                .target_unit(state)
                .map_or(false, |target| target.vel < self_unit.vel),
            Condition::SelfFirstAttacker => state.first_attacker == Some(self_unit.uid),
            Condition::SelfIsSource => ctx.source == Some(self_unit.uid),
            Condition::SelfFlag { flag } => self_unit.flag(flag),
            Condition::CountAtLeast { filter, min } => {
                filter.count(db, state, self_unit) >= *min
            }
            Condition::And { conditions } => conditions
                .iter()
                .all(|condition| condition.is_satisfied(db, state, self_unit, ctx)),
            Condition::Unknown => false,
        }
    }
}

/// 缺省条件恒为真。
pub fn evaluate(
    condition: Option<&Condition>,
    db: &CardDatabase,
    state: &GameState,
    self_unit: &Unit,
    ctx: &TriggerContext,
) -> bool {
    condition.map_or(true, |condition| {
        condition.is_satisfied(db, state, self_unit, ctx)
    })
}
