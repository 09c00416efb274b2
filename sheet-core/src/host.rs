//! The host bridge.
//!
//! The VTT platform exposes randomness, persistence, chat posting and token
//! tracking through an asynchronous messaging bridge. Sheets receive it as an
//! injected [`HostBridge`] rather than reaching for a global relay object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by the host bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Host bridge unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed host response: {0}")]
    MalformedResponse(String),

    #[error("Host rejected request: {0}")]
    Rejected(String),
}

/// Capabilities the host platform provides to a sheet.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Roll every formula in the request in one round trip.
    async fn roll(&self, request: RollRequest) -> Result<RollResponse, HostError>;

    /// Post markup to the shared chat log, returning the message id.
    async fn post(&self, content: String, options: PostOptions) -> Result<String, HostError>;

    /// Persist the character record.
    async fn update_character(&self, character: CharacterData) -> Result<(), HostError>;

    /// Tokens on the active scene that belong to a character.
    async fn get_tokens(&self, character_id: &str) -> Result<Vec<Token>, HostError>;

    /// Add or update a token's entry in the turn tracker.
    async fn add_to_tracker(&self, entry: TrackerEntry) -> Result<(), HostError>;

    /// Free-form compendium lookup.
    async fn compendium_request(&self, query: Value) -> Result<Value, HostError>;
}

/// One formula to roll, addressed by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRequest {
    pub key: String,
    pub formula: String,
}

/// A batched randomness request. Keys keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRequest {
    pub dice: Vec<DiceRequest>,
}

impl RollRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a formula under `key`.
    pub fn push(&mut self, key: impl Into<String>, formula: impl Into<String>) {
        self.dice.push(DiceRequest {
            key: key.into(),
            formula: formula.into(),
        });
    }

    /// Number of formulas in the request.
    pub fn len(&self) -> usize {
        self.dice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dice.is_empty()
    }

    /// Formula requested under `key`.
    pub fn formula(&self, key: &str) -> Option<&str> {
        self.dice
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.formula.as_str())
    }
}

/// One die group in the host's breakdown of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRoll {
    /// Signed dice count; negative groups were subtracted.
    pub count: i64,
    pub sides: u32,
    pub results: Vec<i64>,
}

impl SubRoll {
    pub fn new(count: i64, sides: u32, results: Vec<i64>) -> Self {
        Self {
            count,
            sides,
            results,
        }
    }

    /// Signed contribution of this group to the total, or `None` on overflow.
    pub fn checked_sum(&self) -> Option<i64> {
        let sum = self
            .results
            .iter()
            .try_fold(0i64, |acc, face| acc.checked_add(*face))?;
        if self.count < 0 {
            sum.checked_neg()
        } else {
            Some(sum)
        }
    }

    /// Signed contribution of this group, saturating on overflow.
    pub fn sum(&self) -> i64 {
        self.checked_sum()
            .unwrap_or(if self.count < 0 { i64::MIN } else { i64::MAX })
    }

    /// Check every face lies on the die and the group sums without overflow.
    pub fn validate(&self) -> Result<i64, HostError> {
        if let Some(face) = self
            .results
            .iter()
            .find(|face| !(1..=i64::from(self.sides)).contains(*face))
        {
            return Err(HostError::MalformedResponse(format!(
                "face {face} is not on a d{}",
                self.sides
            )));
        }
        self.checked_sum().ok_or_else(|| {
            HostError::MalformedResponse(format!("{} sum overflows", self.notation()))
        })
    }

    /// `NdM` notation for labels.
    pub fn notation(&self) -> String {
        format!("{}d{}", self.count.unsigned_abs(), self.sides)
    }
}

/// The host's result for one requested formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceResult {
    pub total: i64,
    /// Formula text as the host reports it.
    pub formula: String,
    #[serde(default)]
    pub rolls: Vec<SubRoll>,
}

impl DiceResult {
    pub fn new(formula: impl Into<String>, total: i64) -> Self {
        Self {
            total,
            formula: formula.into(),
            rolls: Vec::new(),
        }
    }

    /// A single die group with no flat modifier.
    pub fn dice(count: i64, sides: u32, faces: Vec<i64>) -> Self {
        let group = SubRoll::new(count, sides, faces);
        Self {
            total: group.sum(),
            formula: group.notation(),
            rolls: vec![group],
        }
    }

    pub fn with_sub_roll(mut self, roll: SubRoll) -> Self {
        self.rolls.push(roll);
        self
    }

    /// Reject breakdowns no real die could produce.
    pub fn validate(&self) -> Result<(), HostError> {
        for group in &self.rolls {
            group.validate()?;
        }
        Ok(())
    }

    /// Every natural face across all groups, in order.
    pub fn naturals(&self) -> Vec<i64> {
        self.rolls
            .iter()
            .flat_map(|r| r.results.iter().copied())
            .collect()
    }
}

/// Results of a batched roll, keyed like the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResponse {
    pub results: HashMap<String, DiceResult>,
}

impl RollResponse {
    /// Result for the formula requested under `key`.
    pub fn get(&self, key: &str) -> Option<&DiceResult> {
        self.results.get(key)
    }
}

/// Options for a chat post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOptions {
    /// Only the game master sees the post.
    #[serde(default)]
    pub whisper: bool,
    /// Speaker for the post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
}

/// A token placed on the active scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub name: String,
}

/// A turn tracker update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerEntry {
    pub token_id: String,
    pub label: String,
    pub value: i64,
}

/// The persisted character record.
///
/// Every store lives under `attributes`, keyed by store name, in its
/// dehydrated keyed-map form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Lifecycle callbacks pushed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    Init {
        character: CharacterData,
        #[serde(default)]
        settings: Value,
    },
    Change {
        character: CharacterData,
    },
    SettingsChange {
        settings: Value,
    },
}
