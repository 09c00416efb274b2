//! Testing utilities for sheets.
//!
//! This module provides tools for integration testing:
//! - `MockHost` for deterministic testing without a live VTT platform
//! - Assertion helpers for verifying what reached the host

use crate::dice::{self, Term};
use crate::host::{
    CharacterData, DiceResult, HostBridge, HostError, PostOptions, RollRequest, RollResponse,
    SubRoll, Token, TrackerEntry,
};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Seed used by [`MockHost::new`].
pub const DEFAULT_SEED: u64 = 0x5eed;

/// A chat message the mock received.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub id: String,
    pub content: String,
    pub options: PostOptions,
}

#[derive(Debug)]
struct MockState {
    /// Scripted results per formula, consumed in order.
    scripted: HashMap<String, VecDeque<DiceResult>>,
    rng: StdRng,
    offline: bool,
    drop_results: bool,
    tokens: Vec<Token>,
    compendium: Value,
    roll_requests: Vec<RollRequest>,
    posts: Vec<PostedMessage>,
    updates: Vec<CharacterData>,
    tracker: Vec<TrackerEntry>,
    compendium_queries: Vec<Value>,
}

/// An in-memory host that records every call.
///
/// Formulas with a scripted result return it; anything else is rolled with a
/// seeded RNG, so unscripted tests are still reproducible.
#[derive(Debug)]
pub struct MockHost {
    state: Mutex<MockState>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(MockState {
                scripted: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
                offline: false,
                drop_results: false,
                tokens: Vec::new(),
                compendium: Value::Null,
                roll_requests: Vec::new(),
                posts: Vec::new(),
                updates: Vec::new(),
                tracker: Vec::new(),
                compendium_queries: Vec::new(),
            }),
        }
    }

    pub fn with_tokens(self, tokens: Vec<Token>) -> Self {
        self.set_tokens(tokens);
        self
    }

    // A panicking test must not poison the mock for the assertions after it.
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a result for the next roll of `formula`.
    pub fn expect_roll(&self, formula: impl Into<String>, result: DiceResult) {
        self.state()
            .scripted
            .entry(formula.into())
            .or_default()
            .push_back(result);
    }

    pub fn set_tokens(&self, tokens: Vec<Token>) {
        self.state().tokens = tokens;
    }

    /// Make every call fail with [`HostError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Answer roll requests with an empty result set.
    pub fn set_drop_results(&self, drop: bool) {
        self.state().drop_results = drop;
    }

    /// Response returned by every compendium request.
    pub fn set_compendium(&self, response: Value) {
        self.state().compendium = response;
    }

    pub fn roll_requests(&self) -> Vec<RollRequest> {
        self.state().roll_requests.clone()
    }

    pub fn posts(&self) -> Vec<PostedMessage> {
        self.state().posts.clone()
    }

    pub fn updates(&self) -> Vec<CharacterData> {
        self.state().updates.clone()
    }

    pub fn last_update(&self) -> Option<CharacterData> {
        self.state().updates.last().cloned()
    }

    pub fn tracker_entries(&self) -> Vec<TrackerEntry> {
        self.state().tracker.clone()
    }

    pub fn compendium_queries(&self) -> Vec<Value> {
        self.state().compendium_queries.clone()
    }

    /// Assert some posted message contains `needle`.
    #[track_caller]
    pub fn assert_posted_containing(&self, needle: &str) {
        let posts = self.posts();
        assert!(
            posts.iter().any(|p| p.content.contains(needle)),
            "Expected a post containing '{needle}', got {:#?}",
            posts.iter().map(|p| &p.content).collect::<Vec<_>>()
        );
    }

    /// Assert the number of roll requests sent to the host.
    #[track_caller]
    pub fn assert_roll_calls(&self, expected: usize) {
        let actual = self.state().roll_requests.len();
        assert_eq!(actual, expected, "Expected {expected} roll requests, got {actual}");
    }

    /// Assert the number of character updates persisted.
    #[track_caller]
    pub fn assert_updates(&self, expected: usize) {
        let actual = self.state().updates.len();
        assert_eq!(actual, expected, "Expected {expected} character updates, got {actual}");
    }
}

impl MockState {
    fn check_online(&self) -> Result<(), HostError> {
        if self.offline {
            Err(HostError::Unavailable("mock host is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn roll_formula(&mut self, formula: &str) -> Result<DiceResult, HostError> {
        if let Some(result) = self.scripted.get_mut(formula).and_then(VecDeque::pop_front) {
            return Ok(result);
        }

        let terms = dice::parse(formula).map_err(|e| HostError::Rejected(e.to_string()))?;
        let mut result = DiceResult::new(formula, 0);
        for term in terms {
            match term {
                Term::Rollable { size, count, sign } => {
                    let count = sign.factor() * count;
                    let faces = (0..count.unsigned_abs())
                        .map(|_| self.rng.gen_range(1..=i64::from(size)))
                        .collect();
                    let group = SubRoll::new(count, size, faces);
                    result.total += group.sum();
                    result.rolls.push(group);
                }
                Term::Constant { value, sign } => result.total += sign.factor() * value,
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl HostBridge for MockHost {
    async fn roll(&self, request: RollRequest) -> Result<RollResponse, HostError> {
        let mut state = self.state();
        state.check_online()?;
        state.roll_requests.push(request.clone());

        let mut response = RollResponse::default();
        if state.drop_results {
            return Ok(response);
        }
        for dice in &request.dice {
            let result = state.roll_formula(&dice.formula)?;
            response.results.insert(dice.key.clone(), result);
        }
        Ok(response)
    }

    async fn post(&self, content: String, options: PostOptions) -> Result<String, HostError> {
        let mut state = self.state();
        state.check_online()?;
        let id = format!("msg-{}", state.posts.len() + 1);
        state.posts.push(PostedMessage {
            id: id.clone(),
            content,
            options,
        });
        Ok(id)
    }

    async fn update_character(&self, character: CharacterData) -> Result<(), HostError> {
        let mut state = self.state();
        state.check_online()?;
        state.updates.push(character);
        Ok(())
    }

    async fn get_tokens(&self, _character_id: &str) -> Result<Vec<Token>, HostError> {
        let state = self.state();
        state.check_online()?;
        Ok(state.tokens.clone())
    }

    async fn add_to_tracker(&self, entry: TrackerEntry) -> Result<(), HostError> {
        let mut state = self.state();
        state.check_online()?;
        state.tracker.push(entry);
        Ok(())
    }

    async fn compendium_request(&self, query: Value) -> Result<Value, HostError> {
        let mut state = self.state();
        state.check_online()?;
        state.compendium_queries.push(query);
        Ok(state.compendium.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(formulas: &[&str]) -> RollRequest {
        let mut request = RollRequest::new();
        for (i, formula) in formulas.iter().enumerate() {
            request.push(format!("dice-{i}"), *formula);
        }
        request
    }

    #[tokio::test]
    async fn test_scripted_results_are_consumed_in_order() {
        let host = MockHost::new();
        host.expect_roll("1d20", DiceResult::dice(1, 20, vec![20]));
        host.expect_roll("1d20", DiceResult::dice(1, 20, vec![3]));

        let first = host.roll(request(&["1d20"])).await.unwrap();
        let second = host.roll(request(&["1d20"])).await.unwrap();
        assert_eq!(first.get("dice-0").unwrap().total, 20);
        assert_eq!(second.get("dice-0").unwrap().total, 3);
        host.assert_roll_calls(2);
    }

    #[tokio::test]
    async fn test_unscripted_rolls_are_seeded_and_in_range() {
        let a = MockHost::with_seed(7).roll(request(&["4d6-2", "1d8"])).await.unwrap();
        let b = MockHost::with_seed(7).roll(request(&["4d6-2", "1d8"])).await.unwrap();
        assert_eq!(a, b);

        let result = a.get("dice-0").unwrap();
        assert_eq!(result.rolls[0].results.len(), 4);
        assert!(result.naturals().iter().all(|f| (1..=6).contains(f)));
        assert_eq!(result.total, result.rolls[0].sum() - 2);
    }

    #[tokio::test]
    async fn test_bad_formula_is_rejected() {
        let host = MockHost::new();
        let result = host.roll(request(&["2d"])).await;
        assert!(matches!(result, Err(HostError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let host = MockHost::new();
        host.set_offline(true);
        assert!(host.post("hi".into(), PostOptions::default()).await.is_err());
        assert!(host.get_tokens("c").await.is_err());
        assert!(host.compendium_request(json!({})).await.is_err());
        host.assert_updates(0);
        assert!(host.posts().is_empty());
    }

    #[tokio::test]
    async fn test_records_posts_and_compendium() {
        let host = MockHost::new();
        host.set_compendium(json!({"name": "Longsword"}));

        let id = host.post("<b>Hit</b>".into(), PostOptions::default()).await.unwrap();
        assert_eq!(id, "msg-1");
        host.assert_posted_containing("Hit");

        let answer = host.compendium_request(json!({"q": "sword"})).await.unwrap();
        assert_eq!(answer["name"], "Longsword");
        assert_eq!(host.compendium_queries(), vec![json!({"q": "sword"})]);
    }
}
