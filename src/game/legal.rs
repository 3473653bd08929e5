use std::collections::HashSet;

use super::rules::{AbilityPayload, Action, RuleEngine};
use super::state::GameState;
use super::targeting::{legal_ability_targets, legal_attack_targets};

impl<'db> RuleEngine<'db> {
    /// 当前行动玩家的全部合法动作，END_TURN 总在末尾。
    ///
    /// 候选动作统一经过 [`RuleEngine::validate`] 过滤。
    pub fn legal_actions(&self, state: &GameState) -> Vec<Action> {
        let player = state.active_player;
        let mut candidates = Vec::new();

        if let Some(side) = state.player(player) {
            let empty_cells = side.board.empty_cells();

            // 同名手牌只生成一次。
            let mut seen = HashSet::new();
            for (hand_index, card_id) in side.hand.iter().enumerate() {
                if !seen.insert(card_id) {
                    continue;
                }
                for &(lane, column) in &empty_cells {
                    candidates.push(Action::PlayUnit {
                        player,
                        hand_index,
                        lane,
                        column,
                    });
                }
            }

            for unit in side.board.units() {
                for &(lane, column) in &empty_cells {
                    candidates.push(Action::Move {
                        player,
                        unit_uid: unit.uid,
                        lane,
                        column,
                    });
                }

                for target in legal_attack_targets(state, unit.uid) {
                    candidates.push(Action::Attack {
                        player,
                        attacker_uid: unit.uid,
                        target_uid: target,
                    });
                }

                let Some(card) = self.db().get(&unit.card_id) else {
                    continue;
                };
                for (slot, ability) in card.active_abilities() {
                    if ability.needs_target() {
                        for target in legal_ability_targets(self.db(), state, unit.uid, slot) {
                            candidates.push(Action::ActivateAbility {
                                player,
                                unit_uid: unit.uid,
                                slot,
                                payload: AbilityPayload {
                                    target_uid: Some(target),
                                },
                            });
                        }
                    } else {
                        candidates.push(Action::ActivateAbility {
                            player,
                            unit_uid: unit.uid,
                            slot,
                            payload: AbilityPayload::default(),
                        });
                    }
                }
            }
        }

        let mut actions: Vec<Action> = candidates
            .into_iter()
            .filter(|action| self.validate(state, action).is_ok())
            .collect();
        actions.push(Action::EndTurn { player });
        actions
    }
}
