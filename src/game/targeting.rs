use super::cards::{CardDatabase, TargetScope};
use super::state::{opponent_of, AttackScope, GameState, Lane, UnitUid};

/// 攻击者当前可以攻击的单位，按扫描顺序返回。
pub fn legal_attack_targets(state: &GameState, attacker: UnitUid) -> Vec<UnitUid> {
    let Some(unit) = state.find_unit(attacker) else {
        return Vec::new();
    };
    let Some(opponent) = state.player(opponent_of(unit.owner)) else {
        return Vec::new();
    };
    let board = &opponent.board;

    match unit.backline_attack {
        Some(AttackScope::FrontLane) => board.lane_occupants(Lane::Front),
        Some(AttackScope::AllLanes) => board.units().map(|target| target.uid).collect(),
        Some(AttackScope::Standard) | None => {
            if board.lane_has_units(Lane::Front) {
                board.lane_occupants(Lane::Front)
            } else {
                board.lane_occupants(Lane::Back)
            }
        }
    }
}

/// 主动技能的候选目标。敌方单位带有“不可被敌方技能选中”时被排除。
pub fn legal_ability_targets(
    db: &CardDatabase,
    state: &GameState,
    unit_uid: UnitUid,
    slot: u8,
) -> Vec<UnitUid> {
    let Some(unit) = state.find_unit(unit_uid) else {
        return Vec::new();
    };
    let Some(ability) = db
        .get(&unit.card_id)
        .and_then(|card| card.active_ability(slot))
    else {
        return Vec::new();
    };

    let scope = ability.target_scope();
    if scope == TargetScope::SelfUnit {
        return vec![unit.uid];
    }

    state
        .units()
        .filter(|candidate| match scope {
            TargetScope::Ally => candidate.owner == unit.owner,
            TargetScope::Enemy => candidate.owner != unit.owner,
            TargetScope::Any | TargetScope::SelfUnit => true,
        })
        .filter(|candidate| {
            candidate.owner == unit.owner || !candidate.untargetable_by_enemy_abilities
        })
        .map(|candidate| candidate.uid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::cards::{Ability, CardDefinition, Stats};
    use crate::game::state::Unit;

    fn database() -> CardDatabase {
        CardDatabase::new(vec![
            CardDefinition::unit("fante", "Fante", Stats::new(4, 2, 1, 1))
                .with_ability(
                    Ability::active(1, "Dardo", Vec::new()).with_text("Colpisci un nemico"),
                )
                .with_ability(Ability::active(2, "Cura", Vec::new()).with_text("Cura un alleato"))
                .with_ability(
                    Ability::active(3, "Ordine", Vec::new()).with_text("Scegli un'unità"),
                ),
        ])
        .expect("unique ids")
    }

    fn spawn(
        state: &mut GameState,
        db: &CardDatabase,
        owner: u8,
        lane: Lane,
        column: usize,
    ) -> UnitUid {
        let uid = state.uids.issue();
        let card = db.get("fante").expect("card exists");
        let unit = Unit::from_card(uid, owner, lane, column, card);
        state.players[owner as usize].board.place(unit).expect("cell free");
        uid
    }

    #[test]
    fn front_lane_shields_the_back_lane() {
        let db = database();
        let mut state = GameState::new(1);
        let attacker = spawn(&mut state, &db, 0, Lane::Front, 0);
        let guard = spawn(&mut state, &db, 1, Lane::Front, 2);
        let archer = spawn(&mut state, &db, 1, Lane::Back, 0);

        assert_eq!(legal_attack_targets(&state, attacker), vec![guard]);

        state.players[1].board.take(guard);
        assert_eq!(legal_attack_targets(&state, attacker), vec![archer]);
        assert!(legal_attack_targets(&state, UnitUid(404)).is_empty());
    }

    #[test]
    fn backline_scope_controls_reach() {
        let db = database();
        let mut state = GameState::new(1);
        let attacker = spawn(&mut state, &db, 0, Lane::Back, 1);
        let archer = spawn(&mut state, &db, 1, Lane::Back, 0);

        let grant = |state: &mut GameState, scope| {
            if let Some(unit) = state.find_unit_mut(attacker) {
                unit.backline_attack = Some(scope);
            }
        };

        grant(&mut state, AttackScope::FrontLane);
        assert!(legal_attack_targets(&state, attacker).is_empty());
        grant(&mut state, AttackScope::Standard);
        assert_eq!(legal_attack_targets(&state, attacker), vec![archer]);

        let guard = spawn(&mut state, &db, 1, Lane::Front, 1);
        grant(&mut state, AttackScope::AllLanes);
        assert_eq!(legal_attack_targets(&state, attacker), vec![guard, archer]);
    }

    #[test]
    fn ability_scope_and_untargetable_enemies() {
        let db = database();
        let mut state = GameState::new(1);
        let me = spawn(&mut state, &db, 0, Lane::Front, 0);
        let ally = spawn(&mut state, &db, 0, Lane::Back, 0);
        let foe = spawn(&mut state, &db, 1, Lane::Front, 0);
        let hidden = spawn(&mut state, &db, 1, Lane::Front, 1);
        if let Some(unit) = state.find_unit_mut(hidden) {
            unit.untargetable_by_enemy_abilities = true;
        }

        assert_eq!(legal_ability_targets(&db, &state, me, 1), vec![foe]);
        assert_eq!(legal_ability_targets(&db, &state, me, 2), vec![me, ally]);
        assert_eq!(legal_ability_targets(&db, &state, me, 3), vec![me, ally, foe]);
        assert!(legal_ability_targets(&db, &state, me, 9).is_empty());
        assert_eq!(legal_ability_targets(&db, &state, hidden, 2), vec![foe, hidden]);
    }
}
