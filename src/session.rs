use log::info;
use thiserror::Error;

use crate::game::{
    Action, CardDatabase, DatabaseError, GameState, RuleConfig, RuleEngine, RuleError,
    RuleResolution,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("nothing to undo")]
    NothingToUndo,
}

/// 一局对战：持有卡牌数据库、当前快照和撤销历史。
pub struct Session {
    db: CardDatabase,
    config: RuleConfig,
    state: GameState,
    history: Vec<GameState>,
}

impl Session {
    pub fn new(db: CardDatabase, config: RuleConfig, seed: u64) -> Self {
        Self {
            db,
            config,
            state: GameState::new(seed),
            history: Vec::new(),
        }
    }

    /// 试玩开局：双方按数据库顺序各拿一手单位卡。
    pub fn playtest(db: CardDatabase, config: RuleConfig, seed: u64) -> Self {
        let mut session = Self::new(db, config, seed);
        session
            .state
            .deal_playtest_hands(&session.db, config.playtest_hand_size);
        info!(
            "playtest session ready: {} cards, hands of {}",
            session.db.len(),
            config.playtest_hand_size
        );
        session
    }

    pub fn from_state(
        db: CardDatabase,
        config: RuleConfig,
        state: GameState,
    ) -> Result<Self, SessionError> {
        state
            .integrity_check()
            .map_err(|error| RuleError::IntegrityViolation { error })?;
        Ok(Self {
            db,
            config,
            state,
            history: Vec::new(),
        })
    }

    pub fn engine(&self) -> RuleEngine<'_> {
        RuleEngine::with_config(&self.db, self.config)
    }

    pub fn db(&self) -> &CardDatabase {
        &self.db
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn apply(&mut self, action: &Action) -> Result<RuleResolution, RuleError> {
        let resolution = self.engine().try_apply(&self.state, action)?;
        let previous = std::mem::replace(&mut self.state, resolution.state.clone());
        self.history.push(previous);
        if self.history.len() > self.config.undo_depth {
            self.history.remove(0);
        }
        Ok(resolution)
    }

    pub fn apply_json(&mut self, json: &str) -> Result<RuleResolution, SessionError> {
        let action: Action = serde_json::from_str(json)?;
        Ok(self.apply(&action)?)
    }

    pub fn legal_actions(&self) -> Vec<Action> {
        self.engine().legal_actions(&self.state)
    }

    pub fn undo(&mut self) -> Result<&GameState, SessionError> {
        let previous = self.history.pop().ok_or(SessionError::NothingToUndo)?;
        self.state = previous;
        Ok(&self.state)
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    /// 替换当前快照并清空历史。
    pub fn replace_state(&mut self, state: GameState) -> Result<(), SessionError> {
        state
            .integrity_check()
            .map_err(|error| RuleError::IntegrityViolation { error })?;
        self.state = state;
        self.history.clear();
        Ok(())
    }

    pub fn log_tail(&self) -> &[String] {
        self.state.log_tail(self.config.log_tail)
    }
}
