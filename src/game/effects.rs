use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::cards::CardDatabase;
use super::conditions::UnitFilter;
use super::config::RuleConfig;
use super::state::{
    opponent_of, AttackModifier, AttackScope, BuffDuration, GameState, PlayerId, Stat, Status,
    Unit, UnitUid,
};
use super::triggers::TriggerContext;

/// 脚本中的单位引用。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitRef {
    #[default]
    #[serde(rename = "SELF")]
    SelfUnit,
    Target,
    Mover,
    Source,
    Uid(u32),
}

fn branch_unit_default() -> UnitRef {
    UnitRef::Target
}

/// `IF` 分支使用的次级条件。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchCondition {
    AdjacentToSelf {
        #[serde(default = "branch_unit_default")]
        unit: UnitRef,
    },
    TargetHasNegativeStatus,
    CountAtLeast {
        #[serde(default)]
        filter: UnitFilter,
        min: usize,
    },
    And {
        conditions: Vec<BranchCondition>,
    },
    #[serde(other)]
    Unknown,
}

impl BranchCondition {
    pub fn references(&self, unit_ref: UnitRef) -> bool {
        match self {
            BranchCondition::AdjacentToSelf { unit } => *unit == unit_ref,
            BranchCondition::TargetHasNegativeStatus => unit_ref == UnitRef::Target,
            BranchCondition::And { conditions } => conditions
                .iter()
                .any(|condition| condition.references(unit_ref)),
            BranchCondition::CountAtLeast { .. } | BranchCondition::Unknown => false,
        }
    }
}

fn flag_default() -> bool {
    true
}

fn multiplier_default() -> f64 {
    1.0
}

/// 效果脚本中的单个步骤。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectStep {
    Damage {
        target: UnitRef,
        amount: i32,
    },
    Heal {
        #[serde(default)]
        target: UnitRef,
        amount: i32,
    },
    HealAllies {
        amount: i32,
        #[serde(default)]
        filter: UnitFilter,
    },
    ModifyStat {
        #[serde(default)]
        target: UnitRef,
        stat: Stat,
        delta: i32,
        #[serde(default)]
        duration: BuffDuration,
    },
    ApplyStatus {
        #[serde(default)]
        target: UnitRef,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<String>,
    },
    RemoveStatus {
        #[serde(default)]
        target: UnitRef,
        status: String,
    },
    RemoveNegativeStatus {
        #[serde(default)]
        target: UnitRef,
    },
    /// 阻止主动技能：当前回合以及之后 `cycles` 个回合。
    PreventActive {
        #[serde(default)]
        target: UnitRef,
        cycles: u32,
    },
    GrantStatusImmunity {
        #[serde(default)]
        filter: UnitFilter,
        statuses: Vec<String>,
    },
    SetFlag {
        #[serde(default)]
        target: UnitRef,
        flag: String,
        #[serde(default = "flag_default")]
        value: bool,
    },
    #[serde(rename_all = "camelCase")]
    AttackModifier {
        #[serde(default)]
        target: UnitRef,
        #[serde(default = "multiplier_default")]
        imp_multiplier: f64,
        #[serde(default)]
        imp_bonus: i32,
        #[serde(default)]
        ignore_def: bool,
        #[serde(default)]
        ignore_def_amount: i32,
        #[serde(default)]
        this_attack_only: bool,
    },
    Draw {
        count: u32,
    },
    Discard {
        count: u32,
    },
    PeekHand {
        count: u32,
    },
    SwapPositions {
        first: UnitRef,
        second: UnitRef,
    },
    GrantBacklineAttack {
        #[serde(default)]
        target: UnitRef,
        #[serde(default)]
        scope: AttackScope,
    },
    GrantUntargetable {
        #[serde(default)]
        target: UnitRef,
    },
    If {
        condition: BranchCondition,
        #[serde(default)]
        then: Vec<EffectStep>,
        #[serde(default, rename = "else")]
        otherwise: Vec<EffectStep>,
    },
    /// 需要界面交互，目前只记录日志。
    RevealHandCard {
        count: u32,
    },
    /// 需要界面交互，目前只记录日志。
    ReturnHandCardToDeck {
        count: u32,
    },
    #[serde(other)]
    Unknown,
}

impl EffectStep {
    /// 步骤（含 `IF` 的两个分支）是否引用了给定的单位。
    pub fn references(&self, unit_ref: UnitRef) -> bool {
        match self {
            EffectStep::Damage { target, .. }
            | EffectStep::Heal { target, .. }
            | EffectStep::ModifyStat { target, .. }
            | EffectStep::ApplyStatus { target, .. }
            | EffectStep::RemoveStatus { target, .. }
            | EffectStep::RemoveNegativeStatus { target }
            | EffectStep::PreventActive { target, .. }
            | EffectStep::SetFlag { target, .. }
            | EffectStep::AttackModifier { target, .. }
            | EffectStep::GrantBacklineAttack { target, .. }
            | EffectStep::GrantUntargetable { target } => *target == unit_ref,
            EffectStep::SwapPositions { first, second } => {
                *first == unit_ref || *second == unit_ref
            }
            EffectStep::If {
                condition,
                then,
                otherwise,
            } => {
                condition.references(unit_ref)
                    || then
                        .iter()
                        .chain(otherwise.iter())
                        .any(|step| step.references(unit_ref))
            }
            _ => false,
        }
    }
}

/// 等待界面完成的操作。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeferredOperation {
    RevealHandCard { player: PlayerId, count: u32 },
    ReturnHandCardToDeck { player: PlayerId, count: u32 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptReport {
    pub steps_run: usize,
    /// 引用无法解析而跳过的步骤。
    pub steps_skipped: usize,
    /// 未知操作。
    pub steps_ignored: usize,
    pub deferred: Vec<DeferredOperation>,
}

impl ScriptReport {
    pub fn absorb(&mut self, other: ScriptReport) {
        self.steps_run += other.steps_run;
        self.steps_skipped += other.steps_skipped;
        self.steps_ignored += other.steps_ignored;
        self.deferred.extend(other.deferred);
    }
}

/// 解释效果脚本并派发触发器。数据库在整个会话中只读借用。
#[derive(Debug, Clone, Copy)]
pub struct EffectEngine<'db> {
    db: &'db CardDatabase,
    config: RuleConfig,
}

impl<'db> EffectEngine<'db> {
    pub fn new(db: &'db CardDatabase, config: RuleConfig) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &'db CardDatabase {
        self.db
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub(crate) fn label(&self, unit: &Unit) -> String {
        match self.db.get(&unit.card_id) {
            Some(card) => format!("{} ({})", card.name, unit.uid),
            None => unit.uid.to_string(),
        }
    }

    /// 只返回仍在场上的单位。
    pub fn resolve(
        &self,
        state: &GameState,
        actor: &Unit,
        ctx: &TriggerContext,
        unit_ref: UnitRef,
    ) -> Option<UnitUid> {
        let uid = match unit_ref {
            UnitRef::SelfUnit => Some(actor.uid),
            UnitRef::Target => ctx.target,
            UnitRef::Mover => ctx.mover,
            UnitRef::Source => ctx.source,
            UnitRef::Uid(raw) => Some(UnitUid(raw)),
        }?;
        state.find_unit(uid).map(|unit| unit.uid)
    }

    fn resolve_mut<'s>(
        &self,
        state: &'s mut GameState,
        actor: &Unit,
        ctx: &TriggerContext,
        unit_ref: UnitRef,
    ) -> Option<&'s mut Unit> {
        let uid = self.resolve(state, actor, ctx, unit_ref)?;
        state.find_unit_mut(uid)
    }

    pub fn run_script(
        &self,
        state: &mut GameState,
        actor: &Unit,
        ctx: &TriggerContext,
        steps: &[EffectStep],
    ) -> ScriptReport {
        let mut report = ScriptReport::default();
        for step in steps {
            if let EffectStep::Unknown = step {
                report.steps_ignored += 1;
                continue;
            }
            match self.run_step(state, actor, ctx, step, &mut report) {
                Some(()) => report.steps_run += 1,
                None => {
                    debug!("{}: step skipped, unresolved reference: {:?}", actor.uid, step);
                    report.steps_skipped += 1;
                }
            }
        }
        report
    }

    fn run_step(
        &self,
        state: &mut GameState,
        actor: &Unit,
        ctx: &TriggerContext,
        step: &EffectStep,
        report: &mut ScriptReport,
    ) -> Option<()> {
        trace!("{} runs {:?}", actor.uid, step);
        match step {
            EffectStep::Damage { target, amount } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                unit.take_damage(*amount);
                let line = format!("{} subisce {} danni", self.label(unit), amount);
                state.record(line);
                report.absorb(self.sweep_eliminations(state, Some(actor.uid), ctx.depth + 1));
            }
            EffectStep::Heal { target, amount } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                let healed = unit.heal(*amount);
                let line = format!("{} recupera {} VIT", self.label(unit), healed);
                state.record(line);
            }
            EffectStep::HealAllies { amount, filter } => {
                let uids: Vec<UnitUid> = state
                    .units()
                    .filter(|unit| filter.matches(self.db, actor, unit))
                    .map(|unit| unit.uid)
                    .collect();
                for uid in uids {
                    if let Some(unit) = state.find_unit_mut(uid) {
                        unit.heal(*amount);
                    }
                }
                state.record(format!("{} cura gli alleati di {}", self.label(actor), amount));
            }
            EffectStep::ModifyStat {
                target,
                stat,
                delta,
                duration,
            } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                unit.add_buff(*stat, *delta, *duration);
                if *duration != BuffDuration::Aura {
                    let line = format!("{} {} {:+}", self.label(unit), stat, delta);
                    state.record(line);
                }
                if *stat == Stat::Vit && *delta < 0 {
                    report.absorb(self.sweep_eliminations(state, Some(actor.uid), ctx.depth + 1));
                }
            }
            EffectStep::ApplyStatus {
                target,
                status,
                meta,
            } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                let line = if unit.is_immune_to(status) {
                    format!("{} è immune a {}", self.label(unit), status)
                } else if unit.has_status(status) {
                    return Some(());
                } else {
                    unit.statuses.push(Status {
                        name: status.clone(),
                        meta: meta.clone(),
                    });
                    format!("{} ottiene {}", self.label(unit), status)
                };
                state.record(line);
            }
            EffectStep::RemoveStatus { target, status } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                let before = unit.statuses.len();
                unit.statuses.retain(|existing| !existing.is(status));
                if unit.statuses.len() != before {
                    let line = format!("{} perde {}", self.label(unit), status);
                    state.record(line);
                }
            }
            EffectStep::RemoveNegativeStatus { target } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                if let Some(pos) = unit.statuses.iter().position(Status::is_negative) {
                    let removed = unit.statuses.remove(pos);
                    let line = format!("{} perde {}", self.label(unit), removed.name);
                    state.record(line);
                }
            }
            EffectStep::PreventActive { target, cycles } => {
                let until = state.turn.saturating_add(*cycles).saturating_add(1);
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                unit.prevent_active_until = Some(until);
                let line = format!(
                    "{} non può usare abilità attive fino al turno {}",
                    self.label(unit),
                    until
                );
                state.record(line);
            }
            EffectStep::GrantStatusImmunity { filter, statuses } => {
                let uids: Vec<UnitUid> = state
                    .units()
                    .filter(|unit| filter.matches(self.db, actor, unit))
                    .map(|unit| unit.uid)
                    .collect();
                for uid in uids {
                    if let Some(unit) = state.find_unit_mut(uid) {
                        for status in statuses {
                            let known = unit
                                .status_immunities
                                .iter()
                                .any(|s| s.eq_ignore_ascii_case(status));
                            if !known {
                                unit.status_immunities.push(status.clone());
                            }
                        }
                    }
                }
            }
            EffectStep::SetFlag {
                target,
                flag,
                value,
            } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                unit.flags.insert(flag.clone(), *value);
            }
            EffectStep::AttackModifier {
                target,
                imp_multiplier,
                imp_bonus,
                ignore_def,
                ignore_def_amount,
                this_attack_only,
            } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                unit.attack_modifiers.push(AttackModifier {
                    imp_multiplier: *imp_multiplier,
                    imp_bonus: *imp_bonus,
                    ignore_def: *ignore_def,
                    ignore_def_amount: *ignore_def_amount,
                    this_attack_only: *this_attack_only,
                    consumed: false,
                });
                let line = format!("{} prepara un attacco potenziato", self.label(unit));
                state.record(line);
            }
            EffectStep::Draw { count } => {
                let player = state.player_mut(actor.owner)?;
                let drawn = (0..*count).filter_map(|_| player.draw()).count();
                state.record(format!("P{} pesca {} carte", actor.owner, drawn));
            }
            EffectStep::Discard { count } => {
                let player = state.player_mut(actor.owner)?;
                let discarded: Vec<_> = (0..*count).filter_map(|_| player.discard_last()).collect();
                for card in discarded {
                    state.record(format!("P{} scarta {}", actor.owner, card));
                }
            }
            EffectStep::PeekHand { count } => {
                let opponent = opponent_of(actor.owner);
                let seed = state.seed ^ (u64::from(state.turn) << 32) ^ state.log.len() as u64;
                let mut rng = SmallRng::seed_from_u64(seed);
                let hand = &state.player(opponent)?.hand;
                let seen: Vec<String> = hand
                    .choose_multiple(&mut rng, *count as usize)
                    .map(|id| {
                        self.db
                            .get(id)
                            .map_or_else(|| id.clone(), |card| card.name.clone())
                    })
                    .collect();
                state.record(format!(
                    "P{} sbircia la mano di P{}: {}",
                    actor.owner,
                    opponent,
                    seen.join(", ")
                ));
            }
            EffectStep::SwapPositions { first, second } => {
                let a = self.resolve(state, actor, ctx, *first)?;
                let b = self.resolve(state, actor, ctx, *second)?;
                let owner = state.find_unit(a)?.owner;
                if a == b || state.find_unit(b)?.owner != owner {
                    return None;
                }
                let board = &mut state.player_mut(owner)?.board;
                let mut left = board.take(a)?;
                let Some(mut right) = board.take(b) else {
                    let (lane, column) = (left.lane, left.column);
                    board.lane_mut(lane)[column] = Some(left);
                    return None;
                };
                std::mem::swap(&mut left.lane, &mut right.lane);
                std::mem::swap(&mut left.column, &mut right.column);
                let line = format!(
                    "{} e {} si scambiano di posto",
                    self.label(&left),
                    self.label(&right)
                );
                for unit in [left, right] {
                    let (lane, column) = (unit.lane, unit.column);
                    board.lane_mut(lane)[column] = Some(unit);
                }
                state.record(line);
            }
            EffectStep::GrantBacklineAttack { target, scope } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                unit.backline_attack = Some(*scope);
            }
            EffectStep::GrantUntargetable { target } => {
                let unit = self.resolve_mut(state, actor, ctx, *target)?;
                unit.untargetable_by_enemy_abilities = true;
            }
            EffectStep::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if self.branch_holds(state, actor, ctx, condition) {
                    then
                } else {
                    otherwise
                };
                report.absorb(self.run_script(state, actor, ctx, branch));
            }
            EffectStep::RevealHandCard { count } => {
                state.record(format!("P{} rivela {} carte (in attesa)", actor.owner, count));
                report.deferred.push(DeferredOperation::RevealHandCard {
                    player: actor.owner,
                    count: *count,
                });
            }
            EffectStep::ReturnHandCardToDeck { count } => {
                state.record(format!(
                    "P{} rimette {} carte nel mazzo (in attesa)",
                    actor.owner, count
                ));
                report.deferred.push(DeferredOperation::ReturnHandCardToDeck {
                    player: actor.owner,
                    count: *count,
                });
            }
            EffectStep::Unknown => {}
        }
        Some(())
    }

    fn branch_holds(
        &self,
        state: &GameState,
        actor: &Unit,
        ctx: &TriggerContext,
        condition: &BranchCondition,
    ) -> bool {
        match condition {
            BranchCondition::AdjacentToSelf { unit } => {
                let me = state.find_unit(actor.uid).unwrap_or(actor);
                self.resolve(state, actor, ctx, *unit)
                    .and_then(|uid| state.find_unit(uid))
                    .map_or(false, |other| me.is_adjacent_to(other))
            }
            BranchCondition::TargetHasNegativeStatus => ctx
                .target_unit(state)
                .map_or(false, Unit::has_negative_status),
            BranchCondition::CountAtLeast { filter, min } => {
                filter.count(self.db, state, actor) >= *min
            }
            BranchCondition::And { conditions } => conditions
                .iter()
                .all(|condition| self.branch_holds(state, actor, ctx, condition)),
            BranchCondition::Unknown => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::{CardDefinition, Stats};
    use crate::game::state::Lane;
    use crate::game::triggers::Trigger;
    use serde_json::json;

    fn database() -> CardDatabase {
        CardDatabase::new(vec![
            CardDefinition::unit("leg", "Legionario", Stats::new(6, 3, 1, 2)),
            CardDefinition::unit("arc", "Arciere", Stats::new(3, 2, 0, 4)),
        ])
        .expect("unique ids")
    }

    fn spawn(
        state: &mut GameState,
        db: &CardDatabase,
        card: &str,
        owner: u8,
        lane: Lane,
        column: usize,
    ) -> Unit {
        let uid = state.uids.issue();
        let card = db.get(card).expect("card exists");
        let unit = Unit::from_card(uid, owner, lane, column, card);
        state.players[owner as usize]
            .board
            .place(unit.clone())
            .expect("cell free");
        unit
    }

    fn steps(value: serde_json::Value) -> Vec<EffectStep> {
        serde_json::from_value(value).expect("script parses")
    }

    #[test]
    fn unresolved_references_skip_and_unknown_ops_are_ignored() {
        let db = database();
        let engine = EffectEngine::new(&db, RuleConfig::default());
        let mut state = GameState::new(3);
        let me = spawn(&mut state, &db, "leg", 0, Lane::Front, 0);
        let ctx = TriggerContext::new(Trigger::OnDeploy, 0).with_source(me.uid);

        let script = steps(json!([
            { "op": "DAMAGE", "target": "TARGET", "amount": 2 },
            { "op": "SUMMON_DRAGON", "size": 9 },
            { "op": "MODIFY_STAT", "stat": "imp", "delta": 2 }
        ]));
        let report = engine.run_script(&mut state, &me, &ctx, &script);

        assert_eq!(report.steps_run, 1);
        assert_eq!(report.steps_skipped, 1);
        assert_eq!(report.steps_ignored, 1);
        assert_eq!(state.find_unit(me.uid).map(|u| u.imp), Some(5));
    }

    #[test]
    fn statuses_respect_immunity_and_do_not_stack() {
        let db = database();
        let engine = EffectEngine::new(&db, RuleConfig::default());
        let mut state = GameState::new(3);
        let me = spawn(&mut state, &db, "leg", 0, Lane::Front, 0);
        let ctx = TriggerContext::new(Trigger::Activate, 0);

        let script = steps(json!([
            { "op": "APPLY_STATUS", "status": "POISON" },
            { "op": "APPLY_STATUS", "status": "poison" },
            { "op": "GRANT_STATUS_IMMUNITY", "statuses": ["STUN"] },
            { "op": "APPLY_STATUS", "status": "STUN" }
        ]));
        engine.run_script(&mut state, &me, &ctx, &script);
        let unit = state.find_unit(me.uid).expect("still on board");
        assert_eq!(unit.statuses, vec![Status::new("POISON")]);

        let cleanse = steps(json!([{ "op": "REMOVE_NEGATIVE_STATUS" }]));
        engine.run_script(&mut state, &me, &ctx, &cleanse);
        assert!(state.find_unit(me.uid).expect("on board").statuses.is_empty());
    }

    #[test]
    fn branch_picks_else_when_target_is_clean() {
        let db = database();
        let engine = EffectEngine::new(&db, RuleConfig::default());
        let mut state = GameState::new(3);
        let me = spawn(&mut state, &db, "leg", 0, Lane::Front, 0);
        let foe = spawn(&mut state, &db, "leg", 1, Lane::Front, 0);
        let ctx = TriggerContext::new(Trigger::Activate, 0).with_target(foe.uid);

        let script = steps(json!([{
            "op": "IF",
            "condition": { "type": "TARGET_HAS_NEGATIVE_STATUS" },
            "then": [{ "op": "DAMAGE", "target": "TARGET", "amount": 4 }],
            "else": [{ "op": "DAMAGE", "target": "TARGET", "amount": 1 }]
        }]));
        assert!(script[0].references(UnitRef::Target));
        engine.run_script(&mut state, &me, &ctx, &script);
        assert_eq!(state.find_unit(foe.uid).map(|u| u.vit), Some(5));
    }

    #[test]
    fn swap_exchanges_coordinates_of_same_owner_units() {
        let db = database();
        let engine = EffectEngine::new(&db, RuleConfig::default());
        let mut state = GameState::new(3);
        let me = spawn(&mut state, &db, "leg", 0, Lane::Front, 0);
        let ally = spawn(&mut state, &db, "arc", 0, Lane::Back, 2);
        let foe = spawn(&mut state, &db, "arc", 1, Lane::Front, 1);
        let ctx = TriggerContext::new(Trigger::Activate, 0).with_target(ally.uid);

        let swap = steps(json!([
            { "op": "SWAP_POSITIONS", "first": "SELF", "second": "TARGET" }
        ]));
        engine.run_script(&mut state, &me, &ctx, &swap);
        let board = &state.players[0].board;
        assert_eq!(board.cell(Lane::Back, 2).map(|u| u.uid), Some(me.uid));
        assert_eq!(board.cell(Lane::Front, 0).map(|u| u.uid), Some(ally.uid));
        assert!(state.integrity_check().is_ok());

        let cross = steps(json!([
            { "op": "SWAP_POSITIONS", "first": "SELF", "second": { "UID": foe.uid.0 } }
        ]));
        let report = engine.run_script(&mut state, &me, &ctx, &cross);
        assert_eq!(report.steps_skipped, 1);
    }

    #[test]
    fn hand_operations_work_from_the_end() {
        let db = database();
        let engine = EffectEngine::new(&db, RuleConfig::default());
        let mut state = GameState::new(3);
        let me = spawn(&mut state, &db, "leg", 0, Lane::Front, 0);
        state.players[0].deck = vec!["d1".into(), "d2".into()];
        state.players[0].hand = vec!["h1".into()];
        state.players[1].hand = vec!["leg".into(), "arc".into()];
        let ctx = TriggerContext::new(Trigger::OnDeploy, 0);

        let script = steps(json!([
            { "op": "DRAW", "count": 1 },
            { "op": "DISCARD", "count": 1 },
            { "op": "PEEK_HAND", "count": 1 },
            { "op": "REVEAL_HAND_CARD", "count": 1 }
        ]));
        let before = state.players[1].clone();
        let report = engine.run_script(&mut state, &me, &ctx, &script);

        assert_eq!(state.players[0].deck, vec!["d1".to_string()]);
        assert_eq!(state.players[0].hand, vec!["h1".to_string()]);
        assert_eq!(state.players[0].discard, vec!["d2".to_string()]);
        assert_eq!(state.players[1], before, "peek must not touch the opponent");
        assert_eq!(
            report.deferred,
            vec![DeferredOperation::RevealHandCard { player: 0, count: 1 }]
        );
    }

    #[test]
    fn prevent_active_window_saturates_on_huge_cycle_counts() {
        let db = database();
        let engine = EffectEngine::new(&db, RuleConfig::default());
        let mut state = GameState::new(3);
        state.turn = 5;
        let me = spawn(&mut state, &db, "leg", 0, Lane::Front, 0);
        let ctx = TriggerContext::new(Trigger::Activate, 0);

        let script = steps(json!([{ "op": "PREVENT_ACTIVE", "cycles": u32::MAX }]));
        let report = engine.run_script(&mut state, &me, &ctx, &script);
        assert_eq!(report.steps_run, 1);
        let unit = state.find_unit(me.uid).expect("on board");
        assert_eq!(unit.prevent_active_until, Some(u32::MAX));

        let short = steps(json!([{ "op": "PREVENT_ACTIVE", "cycles": 1 }]));
        engine.run_script(&mut state, &me, &ctx, &short);
        let unit = state.find_unit(me.uid).expect("on board");
        assert_eq!(unit.prevent_active_until, Some(7));
    }
}
