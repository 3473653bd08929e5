use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use thiserror::Error;

use super::cards::{AbilityKind, CardDatabase, CardDefinition, CardId};

/// 每条战线的格子数。
pub const BOARD_COLUMNS: usize = 3;
/// 单个玩家棋盘上的单位上限。
pub const MAX_BOARD_UNITS: usize = 6;

const STATE_VERSION: &str = "0.1";

/// 负面状态集合（大小写不敏感）。
pub const NEGATIVE_STATUSES: [&str; 8] = [
    "STUN", "POISON", "BLEED", "BURN", "WEAKEN", "SILENCE", "ROOT", "FEAR",
];

/// 玩家标识：0 或 1。
pub type PlayerId = u8;

pub fn opponent_of(player: PlayerId) -> PlayerId {
    if player == 0 {
        1
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Front,
    Back,
}

impl Lane {
    /// 扫描顺序：前排在前。
    pub const ALL: [Lane; 2] = [Lane::Front, Lane::Back];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Front => "front",
            Lane::Back => "back",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单位实例的运行时标识，与卡牌定义 id 无关。
/// 序列化为数字；反序列化同时接受旧界面使用的 `"u_N"` 字符串。
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UnitUid(pub u32);

impl<'de> Deserialize<'de> for UnitUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(raw) => Ok(UnitUid(raw)),
            Raw::Text(text) => text
                .trim()
                .trim_start_matches("u_")
                .parse()
                .map(UnitUid)
                .map_err(|_| D::Error::custom(format!("invalid unit uid `{text}`"))),
        }
    }
}

impl fmt::Display for UnitUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u_{}", self.0)
    }
}

/// 会话内单调递增的 uid 生成器，随状态快照一起传递。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UidGenerator {
    next: u32,
}

impl UidGenerator {
    pub fn issue(&mut self) -> UnitUid {
        let uid = UnitUid(self.next);
        self.next += 1;
        uid
    }

    pub fn has_issued(&self, uid: UnitUid) -> bool {
        uid.0 < self.next
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stat {
    #[serde(alias = "VIT")]
    Vit,
    #[serde(alias = "IMP")]
    Imp,
    #[serde(alias = "DEF")]
    Def,
    #[serde(alias = "VEL")]
    Vel,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stat::Vit => "VIT",
            Stat::Imp => "IMP",
            Stat::Def => "DEF",
            Stat::Vel => "VEL",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

impl Status {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: None,
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn is_negative(&self) -> bool {
        NEGATIVE_STATUSES.iter().any(|negative| self.is(negative))
    }
}

/// 属性修改的持续时间。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuffDuration {
    #[default]
    Permanent,
    EndOfCycle,
    /// 每次重新计算光环前撤销。
    Aura,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryBuff {
    pub stat: Stat,
    pub delta: i32,
    pub expiry: BuffDuration,
}

fn default_multiplier() -> f64 {
    1.0
}

/// 一次性攻击修正，被下一次攻击消耗。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttackModifier {
    #[serde(default = "default_multiplier")]
    pub imp_multiplier: f64,
    #[serde(default)]
    pub imp_bonus: i32,
    #[serde(default)]
    pub ignore_def: bool,
    #[serde(default)]
    pub ignore_def_amount: i32,
    #[serde(default)]
    pub this_attack_only: bool,
    #[serde(default)]
    pub consumed: bool,
}

impl Default for AttackModifier {
    fn default() -> Self {
        Self {
            imp_multiplier: 1.0,
            imp_bonus: 0,
            ignore_def: false,
            ignore_def_amount: 0,
            this_attack_only: false,
            consumed: false,
        }
    }
}

impl AttackModifier {
    pub fn effective_impact(&self, imp: i32) -> i32 {
        ((f64::from(imp) * self.imp_multiplier).floor() as i32).saturating_add(self.imp_bonus)
    }

    pub fn effective_defense(&self, def: i32) -> i32 {
        let def = if self.ignore_def { 0 } else { def };
        def.saturating_sub(self.ignore_def_amount).max(0)
    }
}

/// 后排攻击能力允许的目标范围。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackScope {
    /// 无论对手前排是否为空，都只能攻击前排。
    #[default]
    FrontLane,
    /// 沿用普通规则：前排有单位时打前排，否则打后排。
    Standard,
    AllLanes,
}

/// 棋盘上的单位实例。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub uid: UnitUid,
    pub card_id: CardId,
    pub owner: PlayerId,
    pub lane: Lane,
    pub column: usize,
    pub vit: i32,
    pub vit_max: i32,
    pub imp: i32,
    pub def: i32,
    pub vel: i32,
    #[serde(default)]
    pub statuses: Vec<Status>,
    #[serde(default)]
    pub status_immunities: Vec<String>,
    #[serde(default)]
    pub cooldowns: BTreeMap<u8, u32>,
    #[serde(default)]
    pub uses_remaining: BTreeMap<u8, u32>,
    #[serde(default)]
    pub attack_modifiers: Vec<AttackModifier>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub temporary_buffs: Vec<TemporaryBuff>,
    #[serde(default)]
    pub attacked_this_turn: bool,
    #[serde(default)]
    pub summoned_this_turn: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backline_attack: Option<AttackScope>,
    #[serde(default)]
    pub untargetable_by_enemy_abilities: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevent_active_until: Option<u32>,
}

impl Unit {
    pub fn from_card(
        uid: UnitUid,
        owner: PlayerId,
        lane: Lane,
        column: usize,
        card: &CardDefinition,
    ) -> Self {
        let mut cooldowns = BTreeMap::new();
        let mut uses_remaining = BTreeMap::new();
        for ability in &card.abilities {
            if let (AbilityKind::Active, Some(slot)) = (ability.kind, ability.slot) {
                cooldowns.insert(slot, 0);
                if let Some(uses) = ability.uses {
                    uses_remaining.insert(slot, uses.per_game);
                }
            }
        }

        Self {
            uid,
            card_id: card.id.clone(),
            owner,
            lane,
            column,
            vit: card.stats.vit,
            vit_max: card.stats.vit,
            imp: card.stats.imp,
            def: card.stats.def,
            vel: card.stats.vel,
            statuses: Vec::new(),
            status_immunities: Vec::new(),
            cooldowns,
            uses_remaining,
            attack_modifiers: Vec::new(),
            flags: BTreeMap::new(),
            temporary_buffs: Vec::new(),
            attacked_this_turn: false,
            summoned_this_turn: true,
            backline_attack: None,
            untargetable_by_enemy_abilities: false,
            prevent_active_until: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.vit > 0
    }

    pub fn stat(&self, stat: Stat) -> i32 {
        match stat {
            Stat::Vit => self.vit,
            Stat::Imp => self.imp,
            Stat::Def => self.def,
            Stat::Vel => self.vel,
        }
    }

    /// 永久修改：生命值的变化同时抬高（或降低）上限。
    pub fn modify_stat(&mut self, stat: Stat, delta: i32) {
        match stat {
            Stat::Vit => {
                self.vit_max = (self.vit_max + delta).max(0);
                self.vit = (self.vit + delta).clamp(0, self.vit_max);
            }
            Stat::Imp => self.imp += delta,
            Stat::Def => self.def += delta,
            Stat::Vel => self.vel += delta,
        }
    }

    pub fn add_buff(&mut self, stat: Stat, delta: i32, expiry: BuffDuration) {
        self.modify_stat(stat, delta);
        if expiry != BuffDuration::Permanent {
            self.temporary_buffs.push(TemporaryBuff {
                stat,
                delta,
                expiry,
            });
        }
    }

    /// 撤销指定时效的全部增益，返回撤销数量。
    pub fn expire_buffs(&mut self, expiry: BuffDuration) -> usize {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .temporary_buffs
            .drain(..)
            .partition(|buff| buff.expiry == expiry);
        self.temporary_buffs = kept;
        for buff in &expired {
            match buff.stat {
                Stat::Vit => {
                    self.vit_max = (self.vit_max - buff.delta).max(0);
                    if buff.delta < 0 {
                        self.vit -= buff.delta;
                    }
                    self.vit = self.vit.clamp(0, self.vit_max);
                }
                stat => self.modify_stat(stat, -buff.delta),
            }
        }
        expired.len()
    }

    pub fn take_damage(&mut self, amount: i32) {
        self.vit = (self.vit - amount.max(0)).clamp(0, self.vit_max.max(0));
    }

    /// 返回实际恢复量。
    pub fn heal(&mut self, amount: i32) -> i32 {
        let before = self.vit;
        self.vit = (self.vit + amount.max(0)).min(self.vit_max);
        self.vit - before
    }

    pub fn has_status(&self, name: &str) -> bool {
        self.statuses.iter().any(|status| status.is(name))
    }

    pub fn has_negative_status(&self) -> bool {
        self.statuses.iter().any(Status::is_negative)
    }

    pub fn is_immune_to(&self, name: &str) -> bool {
        self.status_immunities
            .iter()
            .any(|immunity| immunity.eq_ignore_ascii_case(name) || immunity == "*")
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// 同一棋盘上：同排相邻列，或同列不同排。
    pub fn is_adjacent_to(&self, other: &Unit) -> bool {
        if self.owner != other.owner || self.uid == other.uid {
            return false;
        }
        if self.lane == other.lane {
            self.column.abs_diff(other.column) == 1
        } else {
            self.column == other.column
        }
    }

    pub fn can_attack_from_lane(&self) -> bool {
        self.lane == Lane::Front || self.backline_attack.is_some()
    }

    pub fn is_active_prevented(&self, turn: u32) -> bool {
        self.prevent_active_until
            .map(|until| turn < until)
            .unwrap_or(false)
    }

    pub fn pending_modifier(&self) -> Option<usize> {
        self.attack_modifiers
            .iter()
            .position(|modifier| !modifier.consumed)
    }

    /// 回合结束时的单位级清理。
    pub fn reset_for_new_cycle(&mut self) {
        self.attacked_this_turn = false;
        self.summoned_this_turn = false;
        for cooldown in self.cooldowns.values_mut() {
            *cooldown = cooldown.saturating_sub(1);
        }
        self.expire_buffs(BuffDuration::EndOfCycle);
        self.attack_modifiers
            .retain(|modifier| !modifier.consumed && !modifier.this_attack_only);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub front: [Option<Unit>; BOARD_COLUMNS],
    pub back: [Option<Unit>; BOARD_COLUMNS],
}

impl Board {
    pub fn lane(&self, lane: Lane) -> &[Option<Unit>; BOARD_COLUMNS] {
        match lane {
            Lane::Front => &self.front,
            Lane::Back => &self.back,
        }
    }

    pub fn lane_mut(&mut self, lane: Lane) -> &mut [Option<Unit>; BOARD_COLUMNS] {
        match lane {
            Lane::Front => &mut self.front,
            Lane::Back => &mut self.back,
        }
    }

    pub fn cell(&self, lane: Lane, column: usize) -> Option<&Unit> {
        self.lane(lane).get(column).and_then(Option::as_ref)
    }

    /// 越界坐标视为不可用。
    pub fn is_empty_cell(&self, lane: Lane, column: usize) -> bool {
        matches!(self.lane(lane).get(column), Some(None))
    }

    /// 扫描顺序：前排在前，列从左到右。
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.front.iter().chain(self.back.iter()).flatten()
    }

    pub fn units_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.front.iter_mut().chain(self.back.iter_mut()).flatten()
    }

    pub fn unit_count(&self) -> usize {
        self.units().count()
    }

    pub fn lane_has_units(&self, lane: Lane) -> bool {
        self.lane(lane).iter().any(Option::is_some)
    }

    pub fn lane_occupants(&self, lane: Lane) -> Vec<UnitUid> {
        self.lane(lane).iter().flatten().map(|unit| unit.uid).collect()
    }

    pub fn empty_cells(&self) -> Vec<(Lane, usize)> {
        Lane::ALL
            .iter()
            .flat_map(|&lane| (0..BOARD_COLUMNS).map(move |column| (lane, column)))
            .filter(|&(lane, column)| self.is_empty_cell(lane, column))
            .collect()
    }

    pub fn find(&self, uid: UnitUid) -> Option<&Unit> {
        self.units().find(|unit| unit.uid == uid)
    }

    pub fn find_mut(&mut self, uid: UnitUid) -> Option<&mut Unit> {
        self.units_mut().find(|unit| unit.uid == uid)
    }

    /// 按单位自身记录的坐标放置；格子被占用时返回原单位。
    pub fn place(&mut self, unit: Unit) -> Result<(), Unit> {
        let (lane, column) = (unit.lane, unit.column);
        match self.lane_mut(lane).get_mut(column) {
            Some(cell @ None) => {
                *cell = Some(unit);
                Ok(())
            }
            _ => Err(unit),
        }
    }

    pub fn take(&mut self, uid: UnitUid) -> Option<Unit> {
        self.front
            .iter_mut()
            .chain(self.back.iter_mut())
            .find(|cell| matches!(cell, Some(unit) if unit.uid == uid))
            .and_then(Option::take)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    #[serde(default)]
    pub deck: Vec<CardId>,
    #[serde(default)]
    pub hand: Vec<CardId>,
    #[serde(default)]
    pub discard: Vec<CardId>,
    #[serde(default)]
    pub board: Board,
    #[serde(default)]
    pub per_turn_usage: BTreeSet<(UnitUid, u8)>,
}

impl PlayerState {
    pub fn unit_count(&self) -> usize {
        self.board.unit_count()
    }

    pub fn has_used(&self, uid: UnitUid, slot: u8) -> bool {
        self.per_turn_usage.contains(&(uid, slot))
    }

    pub fn mark_used(&mut self, uid: UnitUid, slot: u8) {
        self.per_turn_usage.insert((uid, slot));
    }

    /// 牌库顶为末尾元素。
    pub fn draw(&mut self) -> Option<CardId> {
        let card = self.deck.pop()?;
        self.hand.push(card.clone());
        Some(card)
    }

    /// 没有交互选择时，最后入手的牌最先弃掉。
    pub fn discard_last(&mut self) -> Option<CardId> {
        let card = self.hand.pop()?;
        self.discard.push(card.clone());
        Some(card)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(tag = "type")]
pub enum IntegrityError {
    #[error("active player {player} is out of range")]
    InvalidActivePlayer { player: PlayerId },
    #[error("unit {uid} sits in a cell that does not match its coordinates")]
    CellMismatch { uid: UnitUid },
    #[error("unit {uid} is on the board of a player other than its owner")]
    WrongBoard { uid: UnitUid },
    #[error("uid {uid} appears more than once")]
    DuplicateUid { uid: UnitUid },
    #[error("uid {uid} was never issued by this session")]
    UnknownUid { uid: UnitUid },
    #[error("unit {uid} has vitality {vit}/{vit_max}")]
    VitalityOutOfRange { uid: UnitUid, vit: i32, vit_max: i32 },
    #[error("player {player} has {count} units on board")]
    TooManyUnits { player: PlayerId, count: usize },
}

/// 权威游戏快照。每个动作都会产生一个新的快照。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub version: String,
    #[serde(default)]
    pub seed: u64,
    pub turn: u32,
    pub active_player: PlayerId,
    pub players: [PlayerState; 2],
    #[serde(default)]
    pub log: Vec<String>,
    /// 本回合第一个发起攻击的单位。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_attacker: Option<UnitUid>,
    #[serde(default)]
    pub uids: UidGenerator,
}

impl GameState {
    pub fn new(seed: u64) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            seed,
            turn: 1,
            active_player: 0,
            players: [PlayerState::default(), PlayerState::default()],
            log: Vec::new(),
            first_attacker: None,
            uids: UidGenerator::default(),
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(usize::from(id))
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(usize::from(id))
    }

    pub fn record(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn log_tail(&self, count: usize) -> &[String] {
        let start = self.log.len().saturating_sub(count);
        &self.log[start..]
    }

    /// 双方棋盘的扫描顺序：玩家 0 在前。
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.players.iter().flat_map(|player| player.board.units())
    }

    pub fn unit_uids(&self) -> Vec<UnitUid> {
        self.units().map(|unit| unit.uid).collect()
    }

    pub fn find_unit(&self, uid: UnitUid) -> Option<&Unit> {
        self.units().find(|unit| unit.uid == uid)
    }

    pub fn find_unit_mut(&mut self, uid: UnitUid) -> Option<&mut Unit> {
        self.players
            .iter_mut()
            .find_map(|player| player.board.find_mut(uid))
    }

    /// 旧版试玩模式：玩家 0 拿前 n 张单位卡，玩家 1 拿接下来的 n 张。
    pub fn deal_playtest_hands(&mut self, db: &CardDatabase, hand_size: usize) {
        let units: Vec<CardId> = db.unit_ids().cloned().collect();
        for (index, player) in self.players.iter_mut().enumerate() {
            if player.hand.is_empty() {
                player.hand = units
                    .iter()
                    .skip(index * hand_size)
                    .take(hand_size)
                    .cloned()
                    .collect();
            }
        }
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        if self.active_player > 1 {
            return Err(IntegrityError::InvalidActivePlayer {
                player: self.active_player,
            });
        }

        let mut seen = HashSet::new();
        for (index, player) in self.players.iter().enumerate() {
            let count = player.unit_count();
            if count > MAX_BOARD_UNITS {
                return Err(IntegrityError::TooManyUnits {
                    player: index as PlayerId,
                    count,
                });
            }
            for lane in Lane::ALL {
                for (column, cell) in player.board.lane(lane).iter().enumerate() {
                    let Some(unit) = cell else { continue };
                    if unit.lane != lane || unit.column != column {
                        return Err(IntegrityError::CellMismatch { uid: unit.uid });
                    }
                    if usize::from(unit.owner) != index {
                        return Err(IntegrityError::WrongBoard { uid: unit.uid });
                    }
                    if !seen.insert(unit.uid) {
                        return Err(IntegrityError::DuplicateUid { uid: unit.uid });
                    }
                    if !self.uids.has_issued(unit.uid) {
                        return Err(IntegrityError::UnknownUid { uid: unit.uid });
                    }
                    if unit.vit <= 0 || unit.vit > unit.vit_max {
                        return Err(IntegrityError::VitalityOutOfRange {
                            uid: unit.uid,
                            vit: unit.vit,
                            vit_max: unit.vit_max,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(1)
    }
}
