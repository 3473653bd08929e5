use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    cards::{Ability, CardDatabase, CardDefinition, CardId},
    config::RuleConfig,
    effects::{DeferredOperation, EffectEngine, ScriptReport},
    state::{
        opponent_of, AttackModifier, GameState, IntegrityError, Lane, PlayerId, PlayerState, Unit,
        UnitUid,
    },
    targeting::{legal_ability_targets, legal_attack_targets},
    triggers::{Trigger, TriggerContext},
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AbilityPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_uid: Option<UnitUid>,
}

/// 玩家动作。JSON 形如 `{ "type": "PLAY_UNIT", "player": 0, ... }`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    PlayUnit {
        player: PlayerId,
        hand_index: usize,
        lane: Lane,
        #[serde(alias = "slot")]
        column: usize,
    },
    #[serde(rename_all = "camelCase")]
    Move {
        player: PlayerId,
        unit_uid: UnitUid,
        lane: Lane,
        #[serde(alias = "slot")]
        column: usize,
    },
    #[serde(rename_all = "camelCase")]
    Attack {
        player: PlayerId,
        attacker_uid: UnitUid,
        target_uid: UnitUid,
    },
    #[serde(rename_all = "camelCase")]
    ActivateAbility {
        player: PlayerId,
        unit_uid: UnitUid,
        slot: u8,
        #[serde(default)]
        payload: AbilityPayload,
    },
    EndTurn {
        player: PlayerId,
    },
}

impl Action {
    pub fn player(&self) -> PlayerId {
        match self {
            Action::PlayUnit { player, .. }
            | Action::Move { player, .. }
            | Action::Attack { player, .. }
            | Action::ActivateAbility { player, .. }
            | Action::EndTurn { player } => *player,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum RuleError {
    #[error("player {player} does not exist")]
    UnknownPlayer { player: PlayerId },
    #[error("hand index {index} is out of range")]
    HandIndexOutOfRange { index: usize },
    #[error("card `{card_id}` is not in the database")]
    UnknownCard { card_id: CardId },
    #[error("card `{card_id}` is not a unit")]
    NotAUnitCard { card_id: CardId },
    #[error("board is full")]
    BoardFull,
    #[error("cell {lane}[{column}] is not available")]
    CellUnavailable { lane: Lane, column: usize },
    #[error("unit {uid} is not on the board")]
    UnitNotFound { uid: UnitUid },
    #[error("unit {uid} is not controlled by player {player}")]
    NotOwner { uid: UnitUid, player: PlayerId },
    #[error("unit {uid} already attacked this turn")]
    AlreadyAttacked { uid: UnitUid },
    #[error("unit {uid} cannot attack from the back lane")]
    CannotAttackFromLane { uid: UnitUid },
    #[error("{target} is not a legal attack target for {attacker}")]
    IllegalAttackTarget { attacker: UnitUid, target: UnitUid },
    #[error("unit {uid} has no active ability in slot {slot}")]
    AbilityNotFound { uid: UnitUid, slot: u8 },
    #[error("unit {uid} cannot use active abilities until turn {until}")]
    AbilityPrevented { uid: UnitUid, until: u32 },
    #[error("ability {slot} of {uid} is on cooldown for {remaining} more turns")]
    OnCooldown { uid: UnitUid, slot: u8, remaining: u32 },
    #[error("ability {slot} of {uid} has no uses left")]
    NoUsesRemaining { uid: UnitUid, slot: u8 },
    #[error("ability {slot} of {uid} was already used this turn")]
    AlreadyUsedThisTurn { uid: UnitUid, slot: u8 },
    #[error("cost requires discarding {required} cards, hand has {available}")]
    CannotPayCost { required: u32, available: usize },
    #[error("ability {slot} of {uid} needs a target")]
    MissingAbilityTarget { uid: UnitUid, slot: u8 },
    #[error("{target} is not a legal ability target")]
    IllegalAbilityTarget { target: UnitUid },
    #[error("corrupt state: {error}")]
    IntegrityViolation { error: IntegrityError },
}

/// 成功动作的结果：新快照、本次新增的日志、待界面处理的操作。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResolution {
    pub state: GameState,
    pub log: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<DeferredOperation>,
}

impl RuleResolution {
    fn new(state: GameState, log_start: usize, report: ScriptReport) -> Self {
        let log = state.log.get(log_start..).unwrap_or_default().to_vec();
        Self {
            state,
            log,
            deferred: report.deferred,
        }
    }
}

/// 伤害 = max(1, 有效冲击 − 有效防御)。
pub fn compute_damage(imp: i32, def: i32, modifier: Option<&AttackModifier>) -> i32 {
    let (imp, def) = match modifier {
        Some(modifier) => (
            modifier.effective_impact(imp),
            modifier.effective_defense(def),
        ),
        None => (imp, def),
    };
    imp.saturating_sub(def).max(1)
}

pub struct RuleEngine<'db> {
    effects: EffectEngine<'db>,
}

impl<'db> RuleEngine<'db> {
    pub fn new(db: &'db CardDatabase) -> Self {
        Self::with_config(db, RuleConfig::default())
    }

    pub fn with_config(db: &'db CardDatabase, config: RuleConfig) -> Self {
        Self {
            effects: EffectEngine::new(db, config),
        }
    }

    pub fn db(&self) -> &'db CardDatabase {
        self.effects.db()
    }

    pub fn config(&self) -> &RuleConfig {
        self.effects.config()
    }

    pub fn effects(&self) -> &EffectEngine<'db> {
        &self.effects
    }

    /// 总是返回新快照；被拒绝的动作返回原状态的副本。
    pub fn apply(&self, state: &GameState, action: &Action) -> GameState {
        match self.try_apply(state, action) {
            Ok(resolution) => resolution.state,
            Err(error) => {
                debug!("action rejected: {error} ({action:?})");
                state.clone()
            }
        }
    }

    pub fn try_apply(
        &self,
        state: &GameState,
        action: &Action,
    ) -> Result<RuleResolution, RuleError> {
        self.validate(state, action)?;

        let mut next = state.clone();
        let log_start = next.log.len();
        let report = match *action {
            Action::PlayUnit {
                player,
                hand_index,
                lane,
                column,
            } => {
                let card = self.validate_play(state, player, hand_index, lane, column)?;
                self.play_unit(&mut next, player, hand_index, lane, column, card)?
            }
            Action::Move {
                player,
                unit_uid,
                lane,
                column,
            } => self.move_unit(&mut next, player, unit_uid, lane, column)?,
            Action::Attack {
                player,
                attacker_uid,
                target_uid,
            } => self.attack(&mut next, player, attacker_uid, target_uid),
            Action::ActivateAbility {
                player,
                unit_uid,
                slot,
                payload,
            } => {
                let ability = self.validate_activation(state, player, unit_uid, slot, payload)?;
                self.activate(&mut next, player, unit_uid, slot, payload, ability)?
            }
            Action::EndTurn { .. } => self.end_turn(&mut next),
        };

        Ok(RuleResolution::new(next, log_start, report))
    }

    /// 不修改状态的完整合法性检查，合法动作枚举也走这里。
    pub fn validate(&self, state: &GameState, action: &Action) -> Result<(), RuleError> {
        Self::ensure_integrity(state)?;

        match *action {
            Action::PlayUnit {
                player,
                hand_index,
                lane,
                column,
            } => self
                .validate_play(state, player, hand_index, lane, column)
                .map(|_| ()),
            Action::Move {
                player,
                unit_uid,
                lane,
                column,
            } => Self::validate_move(state, player, unit_uid, lane, column),
            Action::Attack {
                player,
                attacker_uid,
                target_uid,
            } => Self::validate_attack(state, player, attacker_uid, target_uid),
            Action::ActivateAbility {
                player,
                unit_uid,
                slot,
                payload,
            } => self
                .validate_activation(state, player, unit_uid, slot, payload)
                .map(|_| ()),
            Action::EndTurn { .. } => Ok(()),
        }
    }

    fn ensure_integrity(state: &GameState) -> Result<(), RuleError> {
        state
            .integrity_check()
            .map_err(|error| RuleError::IntegrityViolation { error })
    }

    fn side(state: &GameState, player: PlayerId) -> Result<&PlayerState, RuleError> {
        state
            .player(player)
            .ok_or(RuleError::UnknownPlayer { player })
    }

    fn side_mut(state: &mut GameState, player: PlayerId) -> Result<&mut PlayerState, RuleError> {
        state
            .player_mut(player)
            .ok_or(RuleError::UnknownPlayer { player })
    }

    fn owned_unit(state: &GameState, player: PlayerId, uid: UnitUid) -> Result<&Unit, RuleError> {
        let unit = state
            .find_unit(uid)
            .ok_or(RuleError::UnitNotFound { uid })?;
        if unit.owner != player {
            return Err(RuleError::NotOwner { uid, player });
        }
        Ok(unit)
    }

    fn validate_play(
        &self,
        state: &GameState,
        player: PlayerId,
        hand_index: usize,
        lane: Lane,
        column: usize,
    ) -> Result<&'db CardDefinition, RuleError> {
        let side = Self::side(state, player)?;
        let card_id = side
            .hand
            .get(hand_index)
            .ok_or(RuleError::HandIndexOutOfRange { index: hand_index })?;
        let card = self
            .db()
            .get(card_id)
            .ok_or_else(|| RuleError::UnknownCard {
                card_id: card_id.clone(),
            })?;
        if !card.is_unit() {
            return Err(RuleError::NotAUnitCard {
                card_id: card.id.clone(),
            });
        }
        if side.unit_count() >= self.config().max_units {
            return Err(RuleError::BoardFull);
        }
        if !side.board.is_empty_cell(lane, column) {
            return Err(RuleError::CellUnavailable { lane, column });
        }
        Ok(card)
    }

    fn validate_move(
        state: &GameState,
        player: PlayerId,
        uid: UnitUid,
        lane: Lane,
        column: usize,
    ) -> Result<(), RuleError> {
        Self::owned_unit(state, player, uid)?;
        if !Self::side(state, player)?.board.is_empty_cell(lane, column) {
            return Err(RuleError::CellUnavailable { lane, column });
        }
        Ok(())
    }

    fn validate_attack(
        state: &GameState,
        player: PlayerId,
        attacker: UnitUid,
        target: UnitUid,
    ) -> Result<(), RuleError> {
        let unit = Self::owned_unit(state, player, attacker)?;
        if unit.attacked_this_turn {
            return Err(RuleError::AlreadyAttacked { uid: attacker });
        }
        if !unit.can_attack_from_lane() {
            return Err(RuleError::CannotAttackFromLane { uid: attacker });
        }
        if !legal_attack_targets(state, attacker).contains(&target) {
            return Err(RuleError::IllegalAttackTarget { attacker, target });
        }
        Ok(())
    }

    fn validate_activation(
        &self,
        state: &GameState,
        player: PlayerId,
        uid: UnitUid,
        slot: u8,
        payload: AbilityPayload,
    ) -> Result<&'db Ability, RuleError> {
        let unit = Self::owned_unit(state, player, uid)?;
        let ability = self
            .db()
            .get(&unit.card_id)
            .and_then(|card| card.active_ability(slot))
            .ok_or(RuleError::AbilityNotFound { uid, slot })?;

        if unit.is_active_prevented(state.turn) {
            return Err(RuleError::AbilityPrevented {
                uid,
                until: unit.prevent_active_until.unwrap_or(state.turn),
            });
        }
        let remaining = unit.cooldowns.get(&slot).copied().unwrap_or(0);
        if remaining > 0 {
            return Err(RuleError::OnCooldown {
                uid,
                slot,
                remaining,
            });
        }
        if unit.uses_remaining.get(&slot) == Some(&0) {
            return Err(RuleError::NoUsesRemaining { uid, slot });
        }
        let side = Self::side(state, player)?;
        if side.has_used(uid, slot) {
            return Err(RuleError::AlreadyUsedThisTurn { uid, slot });
        }
        let required = ability.cost.map_or(0, |cost| cost.discard);
        if side.hand.len() < required as usize {
            return Err(RuleError::CannotPayCost {
                required,
                available: side.hand.len(),
            });
        }

        match payload.target_uid {
            Some(target) => {
                if !legal_ability_targets(self.db(), state, uid, slot).contains(&target) {
                    return Err(RuleError::IllegalAbilityTarget { target });
                }
            }
            None if ability.needs_target() => {
                return Err(RuleError::MissingAbilityTarget { uid, slot });
            }
            None => {}
        }
        Ok(ability)
    }

    fn play_unit(
        &self,
        next: &mut GameState,
        player: PlayerId,
        hand_index: usize,
        lane: Lane,
        column: usize,
        card: &CardDefinition,
    ) -> Result<ScriptReport, RuleError> {
        let uid = next.uids.issue();
        let side = Self::side_mut(next, player)?;
        side.hand.remove(hand_index);
        side.board
            .place(Unit::from_card(uid, player, lane, column, card))
            .map_err(|_| RuleError::CellUnavailable { lane, column })?;
        next.record(format!("P{} gioca {} in {}[{}]", player, card.name, lane, column));

        let deploy = TriggerContext::new(Trigger::OnDeploy, player).with_source(uid);
        let mut report = self.effects.emit(next, &deploy);
        report.absorb(
            self.effects
                .refresh_continuous(next, player, [Trigger::RuleMod, Trigger::Aura]),
        );
        Ok(report)
    }

    fn move_unit(
        &self,
        next: &mut GameState,
        player: PlayerId,
        uid: UnitUid,
        lane: Lane,
        column: usize,
    ) -> Result<ScriptReport, RuleError> {
        let side = Self::side_mut(next, player)?;
        let mut unit = side.board.take(uid).ok_or(RuleError::UnitNotFound { uid })?;
        let (from_lane, from_column) = (unit.lane, unit.column);
        unit.lane = lane;
        unit.column = column;
        side.board
            .place(unit)
            .map_err(|_| RuleError::CellUnavailable { lane, column })?;
        next.record(format!(
            "P{} sposta {} da {}[{}] a {}[{}]",
            player, uid, from_lane, from_column, lane, column
        ));

        let moved = TriggerContext::new(Trigger::OnUnitMove, player)
            .with_mover(uid)
            .with_source(uid);
        let mut report = self.effects.emit(next, &moved);
        report.absorb(
            self.effects
                .refresh_continuous(next, player, [Trigger::Aura, Trigger::RuleMod]),
        );
        Ok(report)
    }

    fn attack(
        &self,
        next: &mut GameState,
        player: PlayerId,
        attacker: UnitUid,
        target: UnitUid,
    ) -> ScriptReport {
        if next.first_attacker.is_none() {
            next.first_attacker = Some(attacker);
        }

        let declare = TriggerContext::new(Trigger::OnAttackDeclare, player)
            .with_source(attacker)
            .with_target(target);
        let mut report = self.effects.emit(next, &declare);

        let (Some(att), Some(def)) = (next.find_unit(attacker), next.find_unit(target)) else {
            next.record(format!("P{} attacco annullato: {} → {}", player, attacker, target));
            return report;
        };
        let modifier_index = att.pending_modifier();
        let modifier = modifier_index.and_then(|index| att.attack_modifiers.get(index));
        let damage = compute_damage(att.imp, def.def, modifier);

        if let Some(def) = next.find_unit_mut(target) {
            def.take_damage(damage);
        }
        if let Some(att) = next.find_unit_mut(attacker) {
            att.attacked_this_turn = true;
            if let Some(modifier) = modifier_index.and_then(|i| att.attack_modifiers.get_mut(i)) {
                modifier.consumed = true;
            }
        }
        let (vit, vit_max) = next
            .find_unit(target)
            .map(|unit| (unit.vit, unit.vit_max))
            .unwrap_or_default();
        next.record(format!(
            "P{} attacca: {} → {} per {} danni (vit={}/{})",
            player, attacker, target, damage, vit, vit_max
        ));

        report.absorb(self.effects.emit(next, &declare.retarget(Trigger::OnAttackHit)));
        report.absorb(self.effects.sweep_eliminations(next, Some(attacker), 1));
        report
    }

    fn activate(
        &self,
        next: &mut GameState,
        player: PlayerId,
        uid: UnitUid,
        slot: u8,
        payload: AbilityPayload,
        ability: &Ability,
    ) -> Result<ScriptReport, RuleError> {
        let required = ability.cost.map_or(0, |cost| cost.discard);
        let side = Self::side_mut(next, player)?;
        let paid: Vec<CardId> = (0..required).filter_map(|_| side.discard_last()).collect();

        let label = next
            .find_unit(uid)
            .map(|unit| self.effects.label(unit))
            .unwrap_or_else(|| uid.to_string());
        next.record(format!("P{} attiva {}: {}", player, label, ability.name));
        for card in paid {
            next.record(format!("P{} scarta {} come costo", player, card));
        }

        let mut ctx = TriggerContext::new(Trigger::Activate, player).with_source(uid);
        if let Some(target) = payload.target_uid {
            ctx = ctx.with_target(target);
        }
        let report = self.effects.run_activation(next, uid, ability, &ctx);

        Self::side_mut(next, player)?.mark_used(uid, slot);
        if let Some(unit) = next.find_unit_mut(uid) {
            unit.cooldowns.insert(slot, ability.cooldown.unwrap_or(0));
            if let Some(uses) = unit.uses_remaining.get_mut(&slot) {
                *uses = uses.saturating_sub(1);
            }
        }
        Ok(report)
    }

    fn end_turn(&self, next: &mut GameState) -> ScriptReport {
        for side in next.players.iter_mut() {
            side.per_turn_usage.clear();
            for unit in side.board.units_mut() {
                unit.reset_for_new_cycle();
            }
        }
        let mut report = self.effects.sweep_eliminations(next, None, 1);

        next.active_player = opponent_of(next.active_player);
        next.turn += 1;
        next.first_attacker = None;
        next.record(format!("--- Turno {} (P{}) ---", next.turn, next.active_player));

        let active = next.active_player;
        report.absorb(
            self.effects
                .emit(next, &TriggerContext::new(Trigger::TurnStartSelf, active)),
        );
        report.absorb(
            self.effects
                .refresh_continuous(next, active, [Trigger::RuleMod, Trigger::Aura]),
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::{AbilityCost, RuleBlock, Stats};
    use crate::game::effects::{EffectStep, UnitRef};
    use serde_json::json;

    fn database() -> CardDatabase {
        let bolt = Ability::active(
            1,
            "Dardo",
            vec![RuleBlock::new(
                Trigger::Activate,
                vec![EffectStep::Damage {
                    target: UnitRef::Target,
                    amount: 2,
                }],
            )],
        )
        .with_text("Infliggi 2 danni a un nemico")
        .with_cooldown(2)
        .with_uses(2);
        let rally = Ability::active(
            2,
            "Adunata",
            vec![RuleBlock::new(Trigger::Activate, vec![EffectStep::Draw { count: 1 }])],
        )
        .with_cost(AbilityCost { discard: 1 });

        CardDatabase::new(vec![
            CardDefinition::unit("leg", "Legionario", Stats::new(5, 3, 1, 2))
                .with_ability(bolt)
                .with_ability(rally),
            CardDefinition::unit("scudo", "Scudiero", Stats::new(6, 1, 4, 1)),
        ])
        .expect("unique ids")
    }

    fn play(
        engine: &RuleEngine,
        state: &GameState,
        player: PlayerId,
        lane: Lane,
        column: usize,
    ) -> GameState {
        engine
            .try_apply(
                state,
                &Action::PlayUnit {
                    player,
                    hand_index: 0,
                    lane,
                    column,
                },
            )
            .expect("play should succeed")
            .state
    }

    fn end_turn(engine: &RuleEngine, state: &GameState) -> GameState {
        let player = state.active_player;
        engine
            .try_apply(state, &Action::EndTurn { player })
            .expect("end turn should succeed")
            .state
    }

    fn duel() -> GameState {
        let mut state = GameState::new(9);
        state.players[0].hand = vec!["leg".into(), "leg".into(), "scudo".into()];
        state.players[1].hand = vec!["scudo".into(), "leg".into()];
        state
    }

    #[test]
    fn play_unit_moves_card_to_board() {
        let db = database();
        let engine = RuleEngine::new(&db);
        let state = duel();

        let next = play(&engine, &state, 0, Lane::Front, 1);
        let unit = next.players[0]
            .board
            .cell(Lane::Front, 1)
            .expect("unit placed");
        assert_eq!(next.players[0].hand.len(), 2);
        assert_eq!((unit.vit, unit.vit_max), (5, 5));
        assert!(unit.summoned_this_turn);
        assert_eq!(unit.uses_remaining.get(&1), Some(&2));
        assert_eq!(next.log.last().map(String::as_str), Some("P0 gioca Legionario in front[1]"));
        assert!(state.players[0].board.units().next().is_none(), "input state untouched");
    }

    #[test]
    fn rejected_actions_return_an_identical_copy() {
        let db = database();
        let engine = RuleEngine::new(&db);
        let state = play(&engine, &duel(), 0, Lane::Front, 0);

        let occupied = Action::PlayUnit {
            player: 0,
            hand_index: 0,
            lane: Lane::Front,
            column: 0,
        };
        assert_eq!(
            engine.try_apply(&state, &occupied).map(|_| ()),
            Err(RuleError::CellUnavailable {
                lane: Lane::Front,
                column: 0
            })
        );
        assert_eq!(engine.apply(&state, &occupied), state);

        let stranger = Action::PlayUnit {
            player: 4,
            hand_index: 0,
            lane: Lane::Front,
            column: 1,
        };
        assert_eq!(
            engine.validate(&state, &stranger),
            Err(RuleError::UnknownPlayer { player: 4 })
        );
        assert_eq!(engine.apply(&state, &stranger), state);
    }

    #[test]
    fn end_turn_is_accepted_from_either_player() {
        let db = database();
        let engine = RuleEngine::new(&db);
        let state = duel();

        let from_idle = Action::EndTurn { player: 1 };
        let next = engine.try_apply(&state, &from_idle).expect("accepted").state;
        assert_eq!((next.active_player, next.turn), (1, state.turn + 1));

        let repeated = Action::EndTurn { player: 0 };
        let once = engine.apply(&state, &repeated);
        let twice = engine.apply(&once, &repeated);
        assert_eq!((twice.active_player, twice.turn), (0, state.turn + 2));
    }

    #[test]
    fn damage_has_a_floor_of_one() {
        assert_eq!(compute_damage(3, 1, None), 2);
        assert_eq!(compute_damage(1, 4, None), 1);

        let modifier = AttackModifier {
            imp_multiplier: 1.5,
            imp_bonus: 1,
            ignore_def_amount: 2,
            ..AttackModifier::default()
        };
        assert_eq!(compute_damage(3, 4, Some(&modifier)), 3);
    }

    #[test]
    fn attack_consumes_modifier_and_marks_attacker() {
        let db = database();
        let engine = RuleEngine::new(&db);
        let mut state = play(&engine, &duel(), 0, Lane::Front, 0);
        state = end_turn(&engine, &state);
        state = play(&engine, &state, 1, Lane::Front, 0);
        state = end_turn(&engine, &state);

        let attacker = state.players[0].board.front[0].as_ref().expect("attacker").uid;
        let defender = state.players[1].board.front[0].as_ref().expect("defender").uid;
        if let Some(unit) = state.find_unit_mut(attacker) {
            unit.attack_modifiers.push(AttackModifier {
                ignore_def: true,
                ..AttackModifier::default()
            });
        }

        let attack = Action::Attack {
            player: 0,
            attacker_uid: attacker,
            target_uid: defender,
        };
        let next = engine.try_apply(&state, &attack).expect("attack is legal").state;
        assert_eq!(next.find_unit(defender).map(|u| u.vit), Some(3));
        let att = next.find_unit(attacker).expect("attacker alive");
        assert!(att.attacked_this_turn);
        assert!(att.attack_modifiers[0].consumed);
        assert_eq!(next.first_attacker, Some(attacker));
        assert_eq!(
            engine.validate(&next, &attack),
            Err(RuleError::AlreadyAttacked { uid: attacker })
        );
    }

    #[test]
    fn activation_tracks_usage_cooldown_and_uses() {
        let db = database();
        let engine = RuleEngine::new(&db);
        let mut state = play(&engine, &duel(), 0, Lane::Front, 0);
        state = end_turn(&engine, &state);
        state = play(&engine, &state, 1, Lane::Back, 2);
        state = end_turn(&engine, &state);

        let me = state.players[0].board.front[0].as_ref().expect("caster").uid;
        let foe = state.players[1].board.back[2].as_ref().expect("target").uid;

        let untargeted = Action::ActivateAbility {
            player: 0,
            unit_uid: me,
            slot: 1,
            payload: AbilityPayload::default(),
        };
        assert_eq!(
            engine.validate(&state, &untargeted),
            Err(RuleError::MissingAbilityTarget { uid: me, slot: 1 })
        );

        let bolt = Action::ActivateAbility {
            player: 0,
            unit_uid: me,
            slot: 1,
            payload: AbilityPayload {
                target_uid: Some(foe),
            },
        };
        let next = engine.try_apply(&state, &bolt).expect("bolt is legal").state;
        assert_eq!(next.find_unit(foe).map(|u| u.vit), Some(4));
        let caster = next.find_unit(me).expect("caster");
        assert_eq!(caster.cooldowns.get(&1), Some(&2));
        assert_eq!(caster.uses_remaining.get(&1), Some(&1));
        assert!(next.players[0].has_used(me, 1));
        assert!(matches!(
            engine.validate(&next, &bolt),
            Err(RuleError::OnCooldown { remaining: 2, .. })
        ));
    }

    #[test]
    fn activation_cost_is_paid_from_the_end_of_the_hand() {
        let db = database();
        let engine = RuleEngine::new(&db);
        let mut state = play(&engine, &duel(), 0, Lane::Front, 0);
        state.players[0].deck = vec!["scudo".into()];
        let me = state.players[0].board.front[0].as_ref().expect("caster").uid;

        let rally = Action::ActivateAbility {
            player: 0,
            unit_uid: me,
            slot: 2,
            payload: AbilityPayload::default(),
        };
        let next = engine.try_apply(&state, &rally).expect("rally is legal").state;
        assert_eq!(next.players[0].discard, vec!["scudo".to_string()]);
        assert_eq!(next.players[0].hand, vec!["leg".to_string(), "scudo".to_string()]);
        assert!(next.players[0].deck.is_empty());

        state.players[0].hand.clear();
        assert_eq!(
            engine.validate(&state, &rally),
            Err(RuleError::CannotPayCost {
                required: 1,
                available: 0
            })
        );
    }

    #[test]
    fn end_turn_flips_player_and_resets_markers() {
        let db = database();
        let engine = RuleEngine::new(&db);
        let state = play(&engine, &duel(), 0, Lane::Front, 0);

        let once = end_turn(&engine, &state);
        assert_eq!((once.active_player, once.turn), (1, 2));
        assert_eq!(once.log.last().map(String::as_str), Some("--- Turno 2 (P1) ---"));
        let twice = end_turn(&engine, &once);
        assert_eq!((twice.active_player, twice.turn), (0, 3));
        assert!(twice
            .units()
            .all(|unit| !unit.attacked_this_turn && !unit.summoned_this_turn));
    }

    #[test]
    fn actions_deserialize_from_camel_case_json() {
        let action: Action = serde_json::from_value(json!({
            "type": "ACTIVATE_ABILITY",
            "player": 1,
            "unitUid": "u_3",
            "slot": 2,
            "payload": { "targetUid": 5 }
        }))
        .expect("action parses");
        assert_eq!(
            action,
            Action::ActivateAbility {
                player: 1,
                unit_uid: UnitUid(3),
                slot: 2,
                payload: AbilityPayload {
                    target_uid: Some(UnitUid(5))
                },
            }
        );

        let legacy: Action = serde_json::from_value(json!({
            "type": "PLAY_UNIT",
            "player": 0,
            "handIndex": 1,
            "lane": "back",
            "slot": 2
        }))
        .expect("legacy slot field parses");
        assert_eq!(legacy.player(), 0);
    }
}
