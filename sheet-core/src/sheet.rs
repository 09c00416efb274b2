//! The sheet context.
//!
//! A [`Sheet`] is the single owner of everything one mounted character sheet
//! needs: the host bridge, the character, the player's settings, the chat
//! dispatcher and the persistence writer. Handlers receive it explicitly.

use crate::character::{CharacterError, CharacterSheet};
use crate::chat::{ChatDispatcher, ChatError, ChatParams, RollOutcome, RollParams};
use crate::codec::CodecError;
use crate::component::RollComponent;
use crate::dice::components_or_placeholder;
use crate::host::{CharacterData, HostBridge, HostError, HostEvent, PostOptions};
use crate::roll::CriticalRule;
use crate::sync::{SyncError, SyncHandle, DEFAULT_DEBOUNCE};
use crate::template::TemplateKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors surfaced to sheet event handlers.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Character error: {0}")]
    Character(#[from] CharacterError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("No {kind} with id '{id}'")]
    NotFound { kind: &'static str, id: String },
}

/// Where static assets are served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetMode {
    Development,
    Production,
}

impl AssetMode {
    /// Debug builds serve assets from the dev server root.
    pub fn from_build() -> Self {
        if cfg!(debug_assertions) {
            AssetMode::Development
        } else {
            AssetMode::Production
        }
    }

    pub fn asset_base(&self) -> &'static str {
        match self {
            AssetMode::Development => "/",
            AssetMode::Production => "/sheets/",
        }
    }
}

/// Avatar shown when the character has none.
pub const DEFAULT_AVATAR: &str = "images/default-avatar.png";

/// Configuration for a sheet.
#[derive(Debug, Clone)]
pub struct SheetConfig {
    /// Quiet period before edits are persisted.
    pub debounce: Duration,

    /// Capacity of the persistence channel.
    pub channel_capacity: usize,

    /// Critical confirmation rule for this ruleset, if it has one.
    pub critical: Option<CriticalRule>,

    pub asset_mode: AssetMode,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            channel_capacity: 64,
            critical: Some(CriticalRule::d20()),
            asset_mode: AssetMode::from_build(),
        }
    }
}

impl SheetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the critical rule; `None` disables confirmation rolls entirely.
    pub fn with_critical(mut self, rule: Option<CriticalRule>) -> Self {
        self.critical = rule;
        self
    }

    pub fn with_asset_mode(mut self, mode: AssetMode) -> Self {
        self.asset_mode = mode;
        self
    }
}

/// Player-facing settings pushed by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetSettings {
    pub confirm_criticals: bool,
    pub whisper_rolls: bool,
}

impl Default for SheetSettings {
    fn default() -> Self {
        Self {
            confirm_criticals: true,
            whisper_rolls: false,
        }
    }
}

impl SheetSettings {
    /// Parse settings from the host; `null` means defaults.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            Ok(Self::default())
        } else {
            serde_json::from_value(value)
        }
    }
}

/// A mounted character sheet.
pub struct Sheet {
    host: Arc<dyn HostBridge>,
    config: SheetConfig,
    settings: SheetSettings,
    character: CharacterSheet,
    dispatcher: ChatDispatcher,
    sync: SyncHandle,
    writer: JoinHandle<()>,
}

impl Sheet {
    /// Create a sheet and start its persistence writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(host: Arc<dyn HostBridge>, config: SheetConfig) -> Self {
        let (sync, writer) =
            SyncHandle::spawn(host.clone(), config.debounce, config.channel_capacity);
        let dispatcher = ChatDispatcher::new(host.clone()).with_critical(config.critical);
        Self {
            host,
            config,
            settings: SheetSettings::default(),
            character: CharacterSheet::default(),
            dispatcher,
            sync,
            writer,
        }
    }

    pub fn character(&self) -> &CharacterSheet {
        &self.character
    }

    pub fn settings(&self) -> &SheetSettings {
        &self.settings
    }

    pub fn config(&self) -> &SheetConfig {
        &self.config
    }

    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    /// React to a lifecycle callback from the host.
    pub async fn handle_event(&mut self, event: HostEvent) -> Result<(), SheetError> {
        match event {
            HostEvent::Init {
                character,
                settings,
            } => {
                info!(character = %character.name, "Sheet initialized");
                self.apply_settings(settings)?;
                self.hydrate(character).await
            }
            HostEvent::Change { character } => {
                debug!(character = %character.name, "Host pushed character change");
                self.hydrate(character).await
            }
            HostEvent::SettingsChange { settings } => self.apply_settings(settings),
        }
    }

    /// Replace the character with the host's version without echoing it back.
    pub async fn hydrate(&mut self, data: CharacterData) -> Result<(), SheetError> {
        // A push that fails to load leaves local state and pending writes alone
        let character = CharacterSheet::hydrate(&data)?;

        self.sync.begin_hydration().await?;
        self.character = character;
        self.sync.end_hydration().await?;

        self.refresh_post_options();
        Ok(())
    }

    /// Mutate the character and schedule persistence.
    pub async fn edit<R>(
        &mut self,
        f: impl FnOnce(&mut CharacterSheet) -> R,
    ) -> Result<R, SheetError> {
        let output = f(&mut self.character);
        let snapshot = self.character.dehydrate()?;
        self.sync.notify(snapshot).await?;
        Ok(output)
    }

    pub async fn send_to_chat(&self, params: ChatParams) -> Result<String, SheetError> {
        Ok(self.dispatcher.send_to_chat(params).await?)
    }

    pub async fn roll(&self, params: RollParams) -> Result<RollOutcome, SheetError> {
        Ok(self.dispatcher.roll_to_chat(params).await?)
    }

    /// Roll to hit with an attack, including active conditions and effects.
    pub async fn roll_attack(&self, attack_id: &str) -> Result<RollOutcome, SheetError> {
        let attack = self
            .character
            .attacks
            .get(attack_id)
            .ok_or_else(|| SheetError::NotFound {
                kind: "attack",
                id: attack_id.to_string(),
            })?;

        let mut components = vec![
            RollComponent::dice(1, 20),
            RollComponent::bonus(attack.attack_bonus).with_label("Attack Bonus"),
        ];
        components.extend(self.character.condition_components());
        components.extend(self.character.effect_components());

        let params = RollParams::new(attack.name.clone(), components)
            .with_subtitle("Attack")
            .with_template(TemplateKind::D20);
        self.roll(params).await
    }

    /// Roll an attack's damage. Critical hits double the dice.
    pub async fn roll_damage(
        &self,
        attack_id: &str,
        critical: bool,
    ) -> Result<RollOutcome, SheetError> {
        let attack = self
            .character
            .attacks
            .get(attack_id)
            .ok_or_else(|| SheetError::NotFound {
                kind: "attack",
                id: attack_id.to_string(),
            })?;

        let mut params = RollParams::new(
            attack.name.clone(),
            components_or_placeholder(&attack.damage, "Damage"),
        )
        .with_subtitle("Damage")
        .with_template(TemplateKind::Damage);
        if critical {
            params = params.with_multiplier(2);
        }
        if !attack.damage_type.is_empty() {
            params = params.with_tags(vec![attack.damage_type.clone()]);
        }
        self.roll(params).await
    }

    /// Roll initiative and add it to the tracker for the character's tokens.
    pub async fn roll_initiative(&self, bonus: i64) -> Result<RollOutcome, SheetError> {
        let mut components = vec![
            RollComponent::dice(1, 20),
            RollComponent::bonus(bonus).with_label("Initiative Bonus"),
        ];
        components.extend(self.character.condition_components());

        let params = RollParams::new("Initiative", components)
            .with_template(TemplateKind::D20)
            .as_initiative();
        self.roll(params).await
    }

    pub async fn search_compendium(&self, query: Value) -> Result<Value, SheetError> {
        Ok(self.host.compendium_request(query).await?)
    }

    /// Resolve the avatar against the asset base.
    pub fn avatar_url(&self) -> String {
        match self.character.avatar.as_deref() {
            Some(url) if is_absolute(url) => url.to_string(),
            Some(path) => format!("{}{}", self.config.asset_mode.asset_base(), path.trim_start_matches('/')),
            None => format!("{}{}", self.config.asset_mode.asset_base(), DEFAULT_AVATAR),
        }
    }

    /// Write pending edits now.
    pub async fn flush(&self) -> Result<(), SheetError> {
        Ok(self.sync.flush().await?)
    }

    /// Flush, stop the writer and wait for it to exit.
    pub async fn shutdown(self) -> Result<(), SheetError> {
        self.sync.flush().await?;
        drop(self.sync);
        if let Err(e) = self.writer.await {
            warn!(error = %e, "Persistence writer did not stop cleanly");
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: Value) -> Result<(), SheetError> {
        self.settings = SheetSettings::from_value(settings)?;
        let critical = if self.settings.confirm_criticals {
            self.config.critical
        } else {
            None
        };
        self.dispatcher = self.dispatcher.clone().with_critical(critical);
        self.refresh_post_options();
        debug!(settings = ?self.settings, "Applied settings");
        Ok(())
    }

    fn refresh_post_options(&mut self) {
        let character_id = Some(self.character.id.clone()).filter(|id| !id.is_empty());
        self.dispatcher.set_post_options(PostOptions {
            whisper: self.settings.whisper_rolls,
            character_id,
        });
    }
}

fn is_absolute(url: &str) -> bool {
    ["http://", "https://", "data:"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}
