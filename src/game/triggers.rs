use std::collections::BTreeMap;

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use super::cards::{Ability, CardDefinition};
use super::conditions;
use super::effects::{EffectEngine, ScriptReport};
use super::state::{BuffDuration, GameState, Lane, PlayerId, Unit, UnitUid};

/// 规则块被扫描的时机。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    OnDeploy,
    OnUnitMove,
    OnAttackDeclare,
    OnAttackHit,
    OnUnitEliminated,
    OnAllyEliminated,
    OnEnemyEliminated,
    TurnStartSelf,
    RuleMod,
    Aura,
    /// 手动激活，只由 ACTIVATE_ABILITY 执行，从不广播。
    #[serde(alias = "ON_ACTIVATE")]
    Activate,
    #[serde(other)]
    Unknown,
}

impl Trigger {
    pub const ELIMINATION: [Trigger; 3] = [
        Trigger::OnUnitEliminated,
        Trigger::OnAllyEliminated,
        Trigger::OnEnemyEliminated,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    pub trigger: Trigger,
    /// 发起动作的玩家（淘汰时为被淘汰单位的所有者）。
    pub player: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<UnitUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<UnitUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mover: Option<UnitUid>,
    /// 被淘汰单位离场前的快照。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eliminated: Option<Unit>,
    #[serde(default)]
    pub depth: u32,
}

impl TriggerContext {
    pub fn new(trigger: Trigger, player: PlayerId) -> Self {
        Self {
            trigger,
            player,
            source: None,
            target: None,
            mover: None,
            eliminated: None,
            depth: 0,
        }
    }

    pub fn with_source(mut self, uid: UnitUid) -> Self {
        self.source = Some(uid);
        self
    }

    pub fn with_target(mut self, uid: UnitUid) -> Self {
        self.target = Some(uid);
        self
    }

    pub fn with_mover(mut self, uid: UnitUid) -> Self {
        self.mover = Some(uid);
        self
    }

    pub fn with_eliminated(mut self, unit: Unit) -> Self {
        self.target = Some(unit.uid);
        self.eliminated = Some(unit);
        self
    }

    pub fn at_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// 同一上下文换一个触发器。
    pub fn retarget(&self, trigger: Trigger) -> Self {
        Self {
            trigger,
            ..self.clone()
        }
    }

    /// 场上单位优先，其次是淘汰快照。
    pub fn resolve<'a>(&'a self, state: &'a GameState, uid: UnitUid) -> Option<&'a Unit> {
        state.find_unit(uid).or_else(|| {
            self.eliminated
                .as_ref()
                .filter(|unit| unit.uid == uid)
        })
    }

    pub fn target_unit<'a>(&'a self, state: &'a GameState) -> Option<&'a Unit> {
        self.target.and_then(|uid| self.resolve(state, uid))
    }

    /// 该单位是否是本次触发的听众。
    fn is_audience(&self, unit: &Unit) -> bool {
        match self.trigger {
            Trigger::TurnStartSelf => unit.owner == self.player,
            Trigger::OnAllyEliminated => self
                .eliminated
                .as_ref()
                .map_or(false, |gone| gone.owner == unit.owner),
            Trigger::OnEnemyEliminated => self
                .eliminated
                .as_ref()
                .map_or(false, |gone| gone.owner != unit.owner),
            Trigger::OnDeploy
            | Trigger::OnAttackDeclare
            | Trigger::OnAttackHit
            | Trigger::OnUnitEliminated
            | Trigger::OnUnitMove
            | Trigger::RuleMod
            | Trigger::Aura => true,
            Trigger::Activate | Trigger::Unknown => false,
        }
    }
}

/// 棋盘扫描键：玩家、战线、列。
fn scan_key(unit: &Unit) -> (PlayerId, Lane, usize) {
    (unit.owner, unit.lane, unit.column)
}

impl<'db> EffectEngine<'db> {
    /// 按扫描顺序派发触发器。扫描前固定顺序，途中离场的单位不再执行。
    pub fn emit(&self, state: &mut GameState, ctx: &TriggerContext) -> ScriptReport {
        let mut report = ScriptReport::default();
        if ctx.depth > self.config().max_trigger_depth {
            warn!(
                "trigger {:?} dropped at depth {} (limit {})",
                ctx.trigger,
                ctx.depth,
                self.config().max_trigger_depth
            );
            return report;
        }

        // 离场单位的 ON_UNIT_ELIMINATED 规则块在它原来的扫描位置执行。
        let departed = ctx
            .eliminated
            .as_ref()
            .filter(|_| ctx.trigger == Trigger::OnUnitEliminated);
        let mut order = state.unit_uids();
        if let Some(gone) = departed {
            let slot = order
                .iter()
                .position(|uid| {
                    state
                        .find_unit(*uid)
                        .map_or(false, |unit| scan_key(unit) > scan_key(gone))
                })
                .unwrap_or(order.len());
            order.insert(slot, gone.uid);
        }
        trace!("emit {:?} over {} units", ctx.trigger, order.len());

        for uid in order {
            if let Some(gone) = departed.filter(|gone| gone.uid == uid) {
                if state.find_unit(uid).is_none() {
                    if let Some(card) = self.db().get(&gone.card_id) {
                        report.absorb(self.run_blocks(state, uid, Some(gone), card, ctx));
                    }
                    continue;
                }
            }
            let Some(unit) = state.find_unit(uid) else {
                continue;
            };
            if !ctx.is_audience(unit) {
                continue;
            }
            let Some(card) = self.db().get(&unit.card_id) else {
                continue;
            };
            report.absorb(self.run_blocks(state, uid, None, card, ctx));
        }

        report
    }

    fn run_blocks(
        &self,
        state: &mut GameState,
        uid: UnitUid,
        departed: Option<&Unit>,
        card: &CardDefinition,
        ctx: &TriggerContext,
    ) -> ScriptReport {
        let mut report = ScriptReport::default();
        for ability in &card.abilities {
            for block in ability.blocks_for(ctx.trigger) {
                let Some(actor) = state.find_unit(uid).or(departed).cloned() else {
                    return report;
                };
                if conditions::evaluate(block.condition.as_ref(), self.db(), state, &actor, ctx) {
                    trace!("{} runs {} on {:?}", actor.uid, ability.name, ctx.trigger);
                    report.absorb(self.run_script(state, &actor, ctx, &block.script));
                }
            }
        }
        report
    }

    /// 执行单个主动技能的 ACTIVATE 规则块。
    pub fn run_activation(
        &self,
        state: &mut GameState,
        uid: UnitUid,
        ability: &Ability,
        ctx: &TriggerContext,
    ) -> ScriptReport {
        let mut report = ScriptReport::default();
        for block in ability.blocks_for(Trigger::Activate) {
            let Some(actor) = state.find_unit(uid).cloned() else {
                break;
            };
            if conditions::evaluate(block.condition.as_ref(), self.db(), state, &actor, ctx) {
                report.absorb(self.run_script(state, &actor, ctx, &block.script));
            }
        }
        report
    }

    /// 撤销全部光环增益后，按给定顺序重新派发持续效果触发器。
    ///
    /// 重新计算不会治疗单位：刷新前已受的伤害在刷新后保留，
    /// 失去光环生命加成而归零的单位随后被淘汰。
    pub fn refresh_continuous(
        &self,
        state: &mut GameState,
        player: PlayerId,
        order: [Trigger; 2],
    ) -> ScriptReport {
        let damage: BTreeMap<UnitUid, i32> = state
            .units()
            .map(|unit| (unit.uid, unit.vit_max - unit.vit))
            .collect();
        for side in state.players.iter_mut() {
            for unit in side.board.units_mut() {
                unit.expire_buffs(BuffDuration::Aura);
            }
        }

        let mut report = ScriptReport::default();
        for trigger in order {
            report.absorb(self.emit(state, &TriggerContext::new(trigger, player)));
        }

        for side in state.players.iter_mut() {
            for unit in side.board.units_mut() {
                if let Some(&taken) = damage.get(&unit.uid) {
                    unit.vit = unit.vit.min(unit.vit_max.saturating_sub(taken)).max(0);
                }
            }
        }
        report.absorb(self.sweep_eliminations(state, None, 1));
        report
    }

    /// 移除所有生命值归零的单位，并为每个单位各派发一次三个淘汰触发器。
    pub fn sweep_eliminations(
        &self,
        state: &mut GameState,
        source: Option<UnitUid>,
        depth: u32,
    ) -> ScriptReport {
        let mut report = ScriptReport::default();
        loop {
            let found = state
                .units()
                .find(|unit| !unit.is_alive())
                .map(|unit| (unit.owner, unit.uid));
            let Some((owner, uid)) = found else {
                break;
            };
            let Some(player) = state.player_mut(owner) else {
                break;
            };
            let Some(unit) = player.board.take(uid) else {
                break;
            };
            player.discard.push(unit.card_id.clone());
            state.record(format!("✖ {} eliminata → discard", uid));

            let mut ctx = TriggerContext::new(Trigger::OnUnitEliminated, owner)
                .with_eliminated(unit)
                .at_depth(depth);
            ctx.source = source;
            for trigger in Trigger::ELIMINATION {
                report.absorb(self.emit(state, &ctx.retarget(trigger)));
            }
        }
        report
    }
}
