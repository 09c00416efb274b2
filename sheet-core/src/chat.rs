//! Posting to the shared chat log.

use crate::component::RollComponent;
use crate::host::{HostBridge, HostError, PostOptions, TrackerEntry};
use crate::roll::{CriticalRule, ResolvedRoll, RollError, RollResolver};
use crate::template::{self, TemplateError, TemplateKind, TemplateParams};
use std::sync::Arc;
use thiserror::Error;

/// Label of tracker entries created by initiative rolls.
pub const INITIATIVE_LABEL: &str = "Initiative";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Roll failed: {0}")]
    Roll(#[from] RollError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// An informational post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatParams {
    pub title: String,
    pub subtitle: Option<String>,
    pub content: String,
}

impl ChatParams {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            content: content.into(),
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

/// A roll to resolve and post.
#[derive(Debug, Clone, PartialEq)]
pub struct RollParams {
    pub title: String,
    pub subtitle: Option<String>,
    pub components: Vec<RollComponent>,
    pub template: TemplateKind,
    pub target: Option<i64>,
    pub multiplier: Option<i64>,
    pub tags: Vec<String>,
    pub detect_doubles: bool,
    /// Push the total onto the turn tracker for the character's tokens.
    pub initiative: bool,
}

impl RollParams {
    pub fn new(title: impl Into<String>, components: Vec<RollComponent>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            components,
            template: TemplateKind::Roll,
            target: None,
            multiplier: None,
            tags: Vec::new(),
            detect_doubles: false,
            initiative: false,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_template(mut self, template: TemplateKind) -> Self {
        self.template = template;
        self
    }

    pub fn with_target(mut self, target: i64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_doubles(mut self, detect: bool) -> Self {
        self.detect_doubles = detect;
        self
    }

    pub fn as_initiative(mut self) -> Self {
        self.initiative = true;
        self
    }

    fn template_params(&self, roll: &ResolvedRoll) -> TemplateParams {
        TemplateParams {
            subtitle: self.subtitle.clone(),
            target: self.target,
            multiplier: self.multiplier,
            tags: self.tags.clone(),
            detect_doubles: self.detect_doubles,
            ..TemplateParams::from_roll(self.title.clone(), roll)
        }
    }
}

/// A roll that has been posted.
#[derive(Debug, Clone, PartialEq)]
pub struct RollOutcome {
    pub roll: ResolvedRoll,
    pub message_id: String,
    pub markup: String,
}

/// Renders and posts chat messages through the host.
#[derive(Clone)]
pub struct ChatDispatcher {
    host: Arc<dyn HostBridge>,
    critical: Option<CriticalRule>,
    options: PostOptions,
}

impl ChatDispatcher {
    pub fn new(host: Arc<dyn HostBridge>) -> Self {
        Self {
            host,
            critical: None,
            options: PostOptions::default(),
        }
    }

    pub fn with_critical(mut self, rule: Option<CriticalRule>) -> Self {
        self.critical = rule;
        self
    }

    pub fn with_post_options(mut self, options: PostOptions) -> Self {
        self.options = options;
        self
    }

    pub fn post_options(&self) -> &PostOptions {
        &self.options
    }

    pub fn set_post_options(&mut self, options: PostOptions) {
        self.options = options;
    }

    /// Post an informational message. No dice are rolled.
    pub async fn send_to_chat(&self, params: ChatParams) -> Result<String, ChatError> {
        let mut template_params = TemplateParams::chat(params.title, params.content);
        template_params.subtitle = params.subtitle;
        let markup = template::render(TemplateKind::Chat, &template_params)?;
        let id = self.host.post(markup, self.options.clone()).await?;
        Ok(id)
    }

    /// Resolve a roll, post it, and update the tracker for initiative rolls.
    ///
    /// A post cannot be retracted, so a tracker failure after posting is
    /// logged rather than returned.
    pub async fn roll_to_chat(&self, params: RollParams) -> Result<RollOutcome, ChatError> {
        let roll = RollResolver::new(self.host.as_ref())
            .with_critical(self.critical)
            .resolve(params.components.clone())
            .await?;

        let markup = template::render(params.template, &params.template_params(&roll))?;
        let message_id = self.host.post(markup.clone(), self.options.clone()).await?;
        tracing::debug!(title = %params.title, total = roll.total, "Posted roll");

        if params.initiative {
            self.track_initiative(roll.total).await;
        }

        Ok(RollOutcome {
            roll,
            message_id,
            markup,
        })
    }

    async fn track_initiative(&self, total: i64) {
        let Some(character_id) = self.options.character_id.as_deref() else {
            tracing::warn!("Initiative rolled without a character; tracker not updated");
            return;
        };

        let tokens = match self.host.get_tokens(character_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch tokens for initiative");
                return;
            }
        };
        if tokens.is_empty() {
            tracing::warn!(character_id, "No tokens on the scene; initiative not tracked");
            return;
        }

        for token in tokens {
            let entry = TrackerEntry {
                token_id: token.id,
                label: INITIATIVE_LABEL.to_string(),
                value: total,
            };
            if let Err(e) = self.host.add_to_tracker(entry).await {
                tracing::warn!(token = %token.name, error = %e, "Failed to update tracker");
            }
        }
    }
}
