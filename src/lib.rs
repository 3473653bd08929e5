pub mod game;
pub mod session;

use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

pub use game::{
    Action, CardDatabase, CardDefinition, CardFilter, Condition, EffectEngine, EffectStep,
    GameState, IntegrityError, RuleConfig, RuleEngine, RuleError, RuleResolution, Trigger,
    TriggerContext, Unit, UnitUid,
};
pub use session::{Session, SessionError};

#[cfg(all(feature = "wee_alloc", target_arch = "wasm32"))]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
    // 重复初始化时 logger 已存在，忽略即可。
    let _ = console_log::init_with_level(log::Level::Debug);
}

fn to_js_error(error: RuleError) -> JsValue {
    to_value(&error).unwrap_or_else(|serialize_err| JsValue::from_str(&serialize_err.to_string()))
}

fn session_to_js_error(error: SessionError) -> JsValue {
    match error {
        SessionError::Rule(error) => to_js_error(error),
        other => JsValue::from_str(&other.to_string()),
    }
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(serde_to_js_error)
}

fn load_config(config_json: Option<String>) -> Result<RuleConfig, JsValue> {
    match config_json {
        Some(json) => RuleConfig::from_json(&json).map_err(serde_to_js_error),
        None => Ok(RuleConfig::default()),
    }
}

#[wasm_bindgen]
pub struct GameEngine {
    session: Session,
}

#[wasm_bindgen]
impl GameEngine {
    /// 传入卡牌数据库 JSON；可选的配置 JSON 与种子。
    #[wasm_bindgen(constructor)]
    pub fn new(
        cards_json: &str,
        config_json: Option<String>,
        seed: Option<u32>,
    ) -> Result<GameEngine, JsValue> {
        let db = CardDatabase::from_json(cards_json).map_err(serde_to_js_error)?;
        let config = load_config(config_json)?;
        let session = Session::playtest(db, config, u64::from(seed.unwrap_or(1)));
        Ok(GameEngine { session })
    }

    pub fn state_json(&self) -> Result<String, JsValue> {
        to_json(self.session.state())
    }

    pub fn set_state_json(&mut self, json: &str) -> Result<(), JsValue> {
        let state: GameState = serde_json::from_str(json).map_err(serde_to_js_error)?;
        self.session.replace_state(state).map_err(session_to_js_error)
    }

    /// 成功时返回 `RuleResolution` JSON，失败时抛出带类型标签的 `RuleError`。
    pub fn apply_json(&mut self, action_json: &str) -> Result<String, JsValue> {
        let resolution = self
            .session
            .apply_json(action_json)
            .map_err(session_to_js_error)?;
        to_json(&resolution)
    }

    pub fn legal_actions_json(&self) -> Result<String, JsValue> {
        to_json(&self.session.legal_actions())
    }

    pub fn attack_targets_json(&self, attacker_uid: u32) -> Result<String, JsValue> {
        to_json(&game::legal_attack_targets(
            self.session.state(),
            UnitUid(attacker_uid),
        ))
    }

    pub fn ability_targets_json(&self, unit_uid: u32, slot: u8) -> Result<String, JsValue> {
        to_json(&game::legal_ability_targets(
            self.session.db(),
            self.session.state(),
            UnitUid(unit_uid),
            slot,
        ))
    }

    pub fn undo(&mut self) -> Result<String, JsValue> {
        let state = self.session.undo().map_err(session_to_js_error)?;
        to_json(state)
    }

    pub fn log_tail_json(&self) -> Result<String, JsValue> {
        to_json(&self.session.log_tail())
    }

    pub fn catalog_json(&self, filter_json: Option<String>) -> Result<String, JsValue> {
        let filter: CardFilter = match filter_json {
            Some(json) => serde_json::from_str(&json).map_err(serde_to_js_error)?,
            None => CardFilter::default(),
        };
        let cards: Vec<&CardDefinition> = self.session.db().filter(&filter).collect();
        to_json(&cards)
    }

    pub fn factions_json(&self) -> Result<String, JsValue> {
        to_json(&self.session.db().factions())
    }
}

/// 创建一个新的试玩状态：双方各拿一手单位卡。
#[wasm_bindgen(js_name = "createGameState")]
pub fn create_game_state(cards: JsValue, seed: Option<u32>) -> Result<JsValue, JsValue> {
    let value: serde_json::Value = from_value(cards).map_err(JsValue::from)?;
    let db = CardDatabase::from_value(value).map_err(serde_to_js_error)?;
    let config = RuleConfig::default();
    let mut state = GameState::new(u64::from(seed.unwrap_or(1)));
    state.deal_playtest_hands(&db, config.playtest_hand_size);
    to_value(&state).map_err(JsValue::from)
}

/// 无状态入口：对传入快照应用动作，返回 `RuleResolution`。
#[wasm_bindgen(js_name = "applyAction")]
pub fn apply_action(cards: JsValue, state: JsValue, action: JsValue) -> Result<JsValue, JsValue> {
    let value: serde_json::Value = from_value(cards).map_err(JsValue::from)?;
    let db = CardDatabase::from_value(value).map_err(serde_to_js_error)?;
    let state: GameState = from_value(state).map_err(JsValue::from)?;
    let action: Action = from_value(action).map_err(JsValue::from)?;
    let engine = RuleEngine::new(&db);
    match engine.try_apply(&state, &action) {
        Ok(resolution) => to_value(&resolution).map_err(JsValue::from),
        Err(error) => Err(to_js_error(error)),
    }
}

#[wasm_bindgen(js_name = "legalActions")]
pub fn legal_actions(cards: JsValue, state: JsValue) -> Result<JsValue, JsValue> {
    let value: serde_json::Value = from_value(cards).map_err(JsValue::from)?;
    let db = CardDatabase::from_value(value).map_err(serde_to_js_error)?;
    let state: GameState = from_value(state).map_err(JsValue::from)?;
    to_value(&RuleEngine::new(&db).legal_actions(&state)).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state: JsValue) -> Result<(), JsValue> {
    let state: GameState = from_value(state).map_err(JsValue::from)?;
    state
        .integrity_check()
        .map_err(|error| to_js_error(RuleError::IntegrityViolation { error }))?;
    Ok(())
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
