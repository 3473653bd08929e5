use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::conditions::Condition;
use super::effects::{EffectStep, UnitRef};
use super::triggers::Trigger;

const ALLY_KEYWORDS: [&str; 4] = ["alleat", "ally", "allies", "allied"];

/// 卡牌定义标识（数据库中的字符串 id）。
pub type CardId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Unit,
    Event,
}

impl Default for CardType {
    fn default() -> Self {
        CardType::Unit
    }
}

/// 基础属性。键名大小写不敏感，缺失或格式错误的字段按 0 处理。
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub vit: i32,
    pub imp: i32,
    pub def: i32,
    pub vel: i32,
}

impl Stats {
    pub fn new(vit: i32, imp: i32, def: i32, vel: i32) -> Self {
        Self { vit, imp, def, vel }
    }

    fn lookup(raw: &HashMap<String, Value>, key: &str) -> i32 {
        let value = raw
            .get(key)
            .or_else(|| raw.get(&key.to_ascii_uppercase()))
            .or_else(|| {
                raw.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            });
        match value {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0) as i32,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

impl<'de> Deserialize<'de> for Stats {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<HashMap<String, Value>> = Option::deserialize(deserializer)?;
        let raw = raw.unwrap_or_default();
        Ok(Stats {
            vit: Stats::lookup(&raw, "vit"),
            imp: Stats::lookup(&raw, "imp"),
            def: Stats::lookup(&raw, "def"),
            vel: Stats::lookup(&raw, "vel"),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AbilityKind {
    Enter,
    Active,
    Passive,
}

/// 主动技能可选的目标范围。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    #[serde(rename = "self")]
    SelfUnit,
    Ally,
    Enemy,
    Any,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityUses {
    #[serde(rename = "perGame")]
    pub per_game: u32,
}

/// 激活技能前需要支付的脚本化代价。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbilityCost {
    #[serde(default)]
    pub discard: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleBlock {
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, alias = "effects")]
    pub script: Vec<EffectStep>,
}

impl RuleBlock {
    pub fn new(trigger: Trigger, script: Vec<EffectStep>) -> Self {
        Self {
            trigger,
            condition: None,
            script,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
        None => Vec::new(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ability {
    #[serde(rename = "type")]
    pub kind: AbilityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u8>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "cd", skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<AbilityUses>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<AbilityCost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetScope>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub rules: Vec<RuleBlock>,
}

impl Ability {
    pub fn new(kind: AbilityKind, name: impl Into<String>, rules: Vec<RuleBlock>) -> Self {
        Self {
            kind,
            slot: None,
            name: name.into(),
            text: String::new(),
            cooldown: None,
            uses: None,
            cost: None,
            target: None,
            rules,
        }
    }

    pub fn active(slot: u8, name: impl Into<String>, rules: Vec<RuleBlock>) -> Self {
        let mut ability = Self::new(AbilityKind::Active, name, rules);
        ability.slot = Some(slot);
        ability
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_cooldown(mut self, cooldown: u32) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_uses(mut self, per_game: u32) -> Self {
        self.uses = Some(AbilityUses { per_game });
        self
    }

    pub fn with_cost(mut self, cost: AbilityCost) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_target(mut self, scope: TargetScope) -> Self {
        self.target = Some(scope);
        self
    }

    /// 显式目标范围优先；否则沿用按技能文本关键词推断的旧规则。
    pub fn target_scope(&self) -> TargetScope {
        if let Some(scope) = self.target {
            return scope;
        }
        let text = self.text.to_lowercase();
        if text.contains("nemic") || text.contains("enem") {
            TargetScope::Enemy
        } else if ALLY_KEYWORDS.iter().any(|keyword| text.contains(keyword)) {
            TargetScope::Ally
        } else {
            TargetScope::Any
        }
    }

    /// 任一激活脚本引用了 TARGET 时，激活必须携带目标。
    pub fn needs_target(&self) -> bool {
        self.rules
            .iter()
            .filter(|block| block.trigger == Trigger::Activate)
            .any(|block| block.script.iter().any(|step| step.references(UnitRef::Target)))
    }

    pub fn blocks_for(&self, trigger: Trigger) -> impl Iterator<Item = &RuleBlock> {
        self.rules.iter().filter(move |block| block.trigger == trigger)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardDefinition {
    pub id: CardId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub card_type: CardType,
    #[serde(default)]
    pub faction: String,
    #[serde(default)]
    pub rarity: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default, alias = "baseStats")]
    pub stats: Stats,
    #[serde(default)]
    pub abilities: Vec<Ability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CardDefinition {
    pub fn unit(id: impl Into<CardId>, name: impl Into<String>, stats: Stats) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            card_type: CardType::Unit,
            faction: String::new(),
            rarity: String::new(),
            classes: Vec::new(),
            stats,
            abilities: Vec::new(),
            image: None,
        }
    }

    pub fn with_faction(mut self, faction: impl Into<String>) -> Self {
        self.faction = faction.into();
        self
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.classes = classes.iter().map(|class| class.to_string()).collect();
        self
    }

    pub fn with_ability(mut self, ability: Ability) -> Self {
        self.abilities.push(ability);
        self
    }

    pub fn is_unit(&self) -> bool {
        self.card_type == CardType::Unit
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c.eq_ignore_ascii_case(class))
    }

    pub fn active_ability(&self, slot: u8) -> Option<&Ability> {
        self.abilities
            .iter()
            .find(|ability| ability.kind == AbilityKind::Active && ability.slot == Some(slot))
    }

    pub fn active_abilities(&self) -> impl Iterator<Item = (u8, &Ability)> {
        self.abilities.iter().filter_map(|ability| match (ability.kind, ability.slot) {
            (AbilityKind::Active, Some(slot)) => Some((slot, ability)),
            _ => None,
        })
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("malformed card database: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate card id `{0}`")]
    DuplicateCardId(CardId),
}

#[derive(Deserialize)]
struct CardDocument {
    #[serde(default)]
    cards: Vec<CardDefinition>,
}

/// 目录筛选条件，对应旧版卡牌目录页面的阵营/稀有度/搜索框。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardFilter {
    #[serde(default)]
    pub faction: Option<String>,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default, rename = "type")]
    pub card_type: Option<CardType>,
    #[serde(default)]
    pub search: Option<String>,
}

impl CardFilter {
    pub fn matches(&self, card: &CardDefinition) -> bool {
        if let Some(faction) = &self.faction {
            if &card.faction != faction {
                return false;
            }
        }
        if let Some(rarity) = &self.rarity {
            if &card.rarity != rarity {
                return false;
            }
        }
        if let Some(card_type) = self.card_type {
            if card.card_type != card_type {
                return false;
            }
        }
        match self.search.as_deref().map(|q| q.trim().to_lowercase()) {
            Some(query) if !query.is_empty() => {
                card.name.to_lowercase().contains(&query) || card.id.to_lowercase().contains(&query)
            }
            _ => true,
        }
    }
}

/// 只读卡牌数据库，会话开始时注入一次。
#[derive(Debug, Clone, Default)]
pub struct CardDatabase {
    cards: Vec<CardDefinition>,
    index: HashMap<CardId, usize>,
}

impl CardDatabase {
    pub fn new(cards: Vec<CardDefinition>) -> Result<Self, DatabaseError> {
        let mut index = HashMap::with_capacity(cards.len());
        for (pos, card) in cards.iter().enumerate() {
            if index.insert(card.id.clone(), pos).is_some() {
                return Err(DatabaseError::DuplicateCardId(card.id.clone()));
            }
        }
        Ok(Self { cards, index })
    }

    pub fn from_json(json: &str) -> Result<Self, DatabaseError> {
        let document: CardDocument = serde_json::from_str(json)?;
        Self::new(document.cards)
    }

    pub fn from_value(value: Value) -> Result<Self, DatabaseError> {
        let document: CardDocument = serde_json::from_value(value)?;
        Self::new(document.cards)
    }

    pub fn get(&self, id: &str) -> Option<&CardDefinition> {
        self.index.get(id).map(|&pos| &self.cards[pos])
    }

    pub fn cards(&self) -> &[CardDefinition] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &CardId> {
        self.cards.iter().filter(|card| card.is_unit()).map(|card| &card.id)
    }

    pub fn filter<'a>(
        &'a self,
        filter: &'a CardFilter,
    ) -> impl Iterator<Item = &'a CardDefinition> {
        self.cards.iter().filter(move |card| filter.matches(card))
    }

    pub fn factions(&self) -> Vec<String> {
        self.cards
            .iter()
            .map(|card| card.faction.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl fmt::Display for CardDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stats_keys_are_case_insensitive_and_default_to_zero() {
        let card: CardDefinition = serde_json::from_value(json!({
            "id": "c1",
            "name": "Legionario",
            "type": "unit",
            "stats": { "VIT": 5, "Imp": "3", "def": null }
        }))
        .expect("card should parse");

        assert_eq!(card.stats, Stats::new(5, 3, 0, 0));
    }

    #[test]
    fn rules_accept_a_single_block_or_a_list() {
        let ability: Ability = serde_json::from_value(json!({
            "type": "enter",
            "name": "Grido",
            "rules": { "trigger": "ON_DEPLOY", "script": [{ "op": "DRAW", "count": 1 }] }
        }))
        .expect("single block should parse");
        assert_eq!(ability.rules.len(), 1);

        let ability: Ability = serde_json::from_value(json!({
            "type": "active",
            "slot": 1,
            "name": "Colpo",
            "cd": 2,
            "rules": [
                { "trigger": "ACTIVATE", "script": [] },
                { "trigger": "AURA", "script": [] }
            ]
        }))
        .expect("block list should parse");
        assert_eq!(ability.rules.len(), 2);
        assert_eq!(ability.cooldown, Some(2));
    }

    #[test]
    fn target_scope_falls_back_to_text_keywords() {
        let enemy =
            Ability::active(1, "Dardo", Vec::new()).with_text("Infliggi 2 danni a un'unità nemica");
        let ally = Ability::active(1, "Cura", Vec::new()).with_text("Cura un alleato");
        let any = Ability::active(1, "Scambio", Vec::new()).with_text("Scegli un'unità");
        let explicit = Ability::active(1, "Cura", Vec::new())
            .with_text("Cura un alleato")
            .with_target(TargetScope::Enemy);

        assert_eq!(enemy.target_scope(), TargetScope::Enemy);
        assert_eq!(ally.target_scope(), TargetScope::Ally);
        assert_eq!(any.target_scope(), TargetScope::Any);
        assert_eq!(explicit.target_scope(), TargetScope::Enemy);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let cards = vec![
            CardDefinition::unit("dup", "A", Stats::default()),
            CardDefinition::unit("dup", "B", Stats::default()),
        ];
        assert!(matches!(
            CardDatabase::new(cards),
            Err(DatabaseError::DuplicateCardId(id)) if id == "dup"
        ));
    }

    #[test]
    fn catalog_filter_matches_faction_and_search() {
        let db = CardDatabase::from_value(json!({
            "cards": [
                {
                    "id": "rom_01", "name": "Centurione", "type": "unit",
                    "faction": "Roma", "rarity": "rara"
                },
                {
                    "id": "gal_01", "name": "Druido", "type": "unit",
                    "faction": "Galli", "rarity": "comune"
                },
                {
                    "id": "rom_02", "name": "Editto", "type": "event",
                    "faction": "Roma", "rarity": "comune"
                }
            ]
        }))
        .expect("database should parse");

        let filter = CardFilter {
            faction: Some("Roma".into()),
            search: Some("CENT".into()),
            ..CardFilter::default()
        };
        let names: Vec<_> = db.filter(&filter).map(|card| card.name.as_str()).collect();
        assert_eq!(names, vec!["Centurione"]);
        assert_eq!(db.factions(), vec!["Galli".to_string(), "Roma".to_string()]);
        assert_eq!(db.unit_ids().count(), 2);
    }
}
