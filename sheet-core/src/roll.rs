//! Roll resolution.
//!
//! The resolver turns a list of [`RollComponent`]s into concrete values by
//! asking the host for randomness once per roll, expanding compound formula
//! components into their die groups, and optionally running the two-step
//! critical confirmation some rulesets use.

use crate::component::{ComponentKind, RollComponent};
use crate::host::{DiceResult, HostBridge, HostError, RollRequest, RollResponse};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Label of the remainder component produced when a formula is expanded.
pub const MANUAL_BONUS_LABEL: &str = "Manual Bonus";

const CONFIRM_KEY: &str = "confirm";

/// Error type for roll resolution.
#[derive(Debug, Error)]
pub enum RollError {
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Host returned no result for '{key}' ({formula})")]
    MissingResult { key: String, formula: String },
}

/// Special result of a confirmed critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecialOutcome {
    CritSuccess,
    CritFail,
}

impl SpecialOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialOutcome::CritSuccess => "crit-success",
            SpecialOutcome::CritFail => "crit-fail",
        }
    }
}

/// Which natural faces trigger a confirmation roll, per ruleset.
///
/// Rulesets disagree on the thresholds, so each sheet configures its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalRule {
    /// Size of the primary die.
    pub die: u32,
    pub success_on: Option<i64>,
    pub failure_on: Option<i64>,
}

impl CriticalRule {
    pub fn new(die: u32) -> Self {
        Self {
            die,
            success_on: None,
            failure_on: None,
        }
    }

    /// Natural 20 succeeds, natural 1 fails.
    pub fn d20() -> Self {
        Self::new(20).with_success_on(20).with_failure_on(1)
    }

    pub fn with_success_on(mut self, face: i64) -> Self {
        self.success_on = Some(face);
        self
    }

    pub fn with_failure_on(mut self, face: i64) -> Self {
        self.failure_on = Some(face);
        self
    }

    /// The outcome a natural face would confirm into, if any.
    pub fn candidate(&self, natural: i64) -> Option<SpecialOutcome> {
        if self.success_on == Some(natural) {
            Some(SpecialOutcome::CritSuccess)
        } else if self.failure_on == Some(natural) {
            Some(SpecialOutcome::CritFail)
        } else {
            None
        }
    }
}

impl Default for CriticalRule {
    fn default() -> Self {
        Self::d20()
    }
}

/// A fully resolved roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRoll {
    pub components: Vec<RollComponent>,
    pub total: i64,
    /// Natural face of the primary die, when a critical rule is active.
    pub natural: Option<i64>,
    /// Natural face of the confirmation roll, if one was made.
    pub confirmation: Option<i64>,
    pub special: Option<SpecialOutcome>,
}

impl ResolvedRoll {
    /// Every natural face rolled, in component order.
    pub fn faces(&self) -> Vec<i64> {
        self.components
            .iter()
            .flat_map(|c| c.rolls.iter().copied())
            .collect()
    }
}

/// Resolves roll components against a host.
pub struct RollResolver<'h> {
    host: &'h dyn HostBridge,
    critical: Option<CriticalRule>,
}

impl<'h> RollResolver<'h> {
    pub fn new(host: &'h dyn HostBridge) -> Self {
        Self {
            host,
            critical: None,
        }
    }

    /// Enable critical confirmation for this resolver.
    pub fn with_critical(mut self, rule: Option<CriticalRule>) -> Self {
        self.critical = rule;
        self
    }

    /// Resolve components into values and a total.
    ///
    /// All dice and formula components are rolled in a single host request;
    /// bonus-only rolls never reach the host. Formula components are replaced
    /// in place by one component per die group plus a trailing
    /// [`MANUAL_BONUS_LABEL`] remainder.
    pub async fn resolve(&self, components: Vec<RollComponent>) -> Result<ResolvedRoll, RollError> {
        let request = build_request(&components);

        let resolved = if request.is_empty() {
            debug!("Bonus-only roll, skipping host randomness");
            components
        } else {
            debug!(dice = request.len(), "Requesting batched roll");
            let response = self.host.roll(request.clone()).await?;
            apply_results(components, &request, &response)?
        };

        let total = checked_total(&resolved)?;
        let mut roll = ResolvedRoll {
            components: resolved,
            total,
            natural: None,
            confirmation: None,
            special: None,
        };

        if let Some(rule) = self.critical {
            self.confirm_critical(&rule, &mut roll).await?;
        }

        Ok(roll)
    }

    async fn confirm_critical(&self, rule: &CriticalRule, roll: &mut ResolvedRoll) -> Result<(), RollError> {
        let primary = roll.components.iter().find(|c| {
            matches!(c.kind, ComponentKind::Dice { sides, .. } if sides == rule.die)
        });
        let Some(&natural) = primary.and_then(|c| c.rolls.first()) else {
            return Ok(());
        };
        roll.natural = Some(natural);

        let Some(candidate) = rule.candidate(natural) else {
            return Ok(());
        };

        debug!(natural, outcome = candidate.as_str(), "Rolling critical confirmation");
        let mut request = RollRequest::new();
        request.push(CONFIRM_KEY, format!("1d{}", rule.die));
        let response = self.host.roll(request.clone()).await?;
        let confirm = lookup(&response, &request, CONFIRM_KEY)?;

        let second = confirm.naturals().first().copied().unwrap_or(confirm.total);
        roll.confirmation = Some(second);
        if second == natural {
            roll.special = Some(candidate);
        }
        Ok(())
    }
}

fn dice_key(index: usize) -> String {
    format!("dice-{index}")
}

fn build_request(components: &[RollComponent]) -> RollRequest {
    let mut request = RollRequest::new();
    for (index, component) in components.iter().enumerate() {
        match &component.kind {
            // Zero dice contribute nothing and need no randomness
            ComponentKind::Dice { count: 0, .. } => {}
            ComponentKind::Dice { count, sides } => {
                request.push(dice_key(index), format!("{}d{}", count.unsigned_abs(), sides));
            }
            ComponentKind::Formula { formula } => request.push(dice_key(index), formula.clone()),
            ComponentKind::Bonus => {}
        }
    }
    request
}

fn malformed(message: impl Into<String>) -> RollError {
    RollError::Host(HostError::MalformedResponse(message.into()))
}

fn checked_total(components: &[RollComponent]) -> Result<i64, RollError> {
    components
        .iter()
        .try_fold(0i64, |acc, c| acc.checked_add(c.value_or_zero()))
        .ok_or_else(|| malformed("roll total overflows"))
}

fn lookup<'r>(response: &'r RollResponse, request: &RollRequest, key: &str) -> Result<&'r DiceResult, RollError> {
    let result = response.get(key).ok_or_else(|| RollError::MissingResult {
        key: key.to_string(),
        formula: request.formula(key).unwrap_or_default().to_string(),
    })?;
    result.validate()?;
    Ok(result)
}

fn apply_results(
    components: Vec<RollComponent>,
    request: &RollRequest,
    response: &RollResponse,
) -> Result<Vec<RollComponent>, RollError> {
    let mut resolved = Vec::with_capacity(components.len());

    for (index, mut component) in components.into_iter().enumerate() {
        let count = match component.kind {
            ComponentKind::Bonus => {
                resolved.push(component);
                continue;
            }
            ComponentKind::Dice { count: 0, .. } => {
                component.value = Some(0);
                resolved.push(component);
                continue;
            }
            ComponentKind::Dice { count, .. } => count,
            ComponentKind::Formula { .. } => {
                let result = lookup(response, request, &dice_key(index))?;
                resolved.extend(expand_formula(component, result)?);
                continue;
            }
        };

        let result = lookup(response, request, &dice_key(index))?;
        let value = if count < 0 {
            result.total.checked_neg()
        } else {
            Some(result.total)
        };
        let value = value.ok_or_else(|| malformed(format!("cannot negate {}", result.total)))?;
        component.value = Some(value);
        component.rolls = result.naturals();
        if component.label.is_none() {
            component.label = Some(result.formula.clone());
        }
        resolved.push(component);
    }

    Ok(resolved)
}

fn expand_formula(component: RollComponent, result: &DiceResult) -> Result<Vec<RollComponent>, RollError> {
    let label = component
        .label
        .clone()
        .unwrap_or_else(|| result.formula.clone());

    // Without a breakdown there is nothing to expand
    if result.rolls.is_empty() {
        return Ok(vec![RollComponent {
            label: Some(label),
            value: Some(result.total),
            ..component
        }]);
    }

    let mut expanded: Vec<RollComponent> = result
        .rolls
        .iter()
        .map(|group| RollComponent {
            value: Some(group.sum()),
            rolls: group.results.clone(),
            always_show_in_breakdown: component.always_show_in_breakdown,
            ..RollComponent::dice(group.count, group.sides)
                .with_label(format!("{label} [{}]", group.notation()))
        })
        .collect();

    let remainder = checked_total(&expanded)?
        .checked_neg()
        .and_then(|dice_sum| result.total.checked_add(dice_sum))
        .ok_or_else(|| malformed(format!("{} does not balance its dice", result.formula)))?;
    expanded.push(RollComponent::bonus(remainder).with_label(MANUAL_BONUS_LABEL));
    Ok(expanded)
}
