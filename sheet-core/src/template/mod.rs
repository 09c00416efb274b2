//! Chat templates.
//!
//! Every template is a plain render function registered under a fixed name.
//! The markup uses `sheet-*` class names that the host's chat log styles, and
//! all caller-supplied text is escaped.

pub mod helpers;

use crate::component::RollComponent;
use crate::roll::{ResolvedRoll, SpecialOutcome};
use helpers::{capitalize, escape_html, gt, has_duplicates, includes, signed, sum_with_multiplier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for template lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),
}

type RenderFn = fn(&TemplateParams) -> String;

/// The registered templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// Informational post, no roll.
    Chat,
    #[default]
    Roll,
    /// Roll with a natural face, critical banner and target check.
    D20,
    /// Damage roll with a dice multiplier and damage types.
    Damage,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 4] = [
        TemplateKind::Chat,
        TemplateKind::Roll,
        TemplateKind::D20,
        TemplateKind::Damage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TemplateKind::Chat => "chat",
            TemplateKind::Roll => "roll",
            TemplateKind::D20 => "d20",
            TemplateKind::Damage => "damage",
        }
    }

    fn renderer(self) -> RenderFn {
        match self {
            TemplateKind::Chat => render_chat,
            TemplateKind::Roll => render_roll,
            TemplateKind::D20 => render_d20,
            TemplateKind::Damage => render_damage,
        }
    }
}

impl FromStr for TemplateKind {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| TemplateError::UnknownTemplate(s.to_string()))
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

lazy_static::lazy_static! {
    /// Precompiled templates by name.
    static ref TEMPLATES: HashMap<&'static str, RenderFn> = TemplateKind::ALL
        .into_iter()
        .map(|kind| (kind.name(), kind.renderer()))
        .collect();
}

/// Values a template can draw on. Unused fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParams {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub components: Vec<RollComponent>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub natural: Option<i64>,
    #[serde(default)]
    pub special: Option<SpecialOutcome>,
    /// Difficulty the total is compared against.
    #[serde(default)]
    pub target: Option<i64>,
    /// Multiplier applied to dice in damage rolls.
    #[serde(default)]
    pub multiplier: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Flag rolls whose dice show a repeated face.
    #[serde(default)]
    pub detect_doubles: bool,
}

impl TemplateParams {
    pub fn chat(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn from_roll(title: impl Into<String>, roll: &ResolvedRoll) -> Self {
        Self {
            title: title.into(),
            components: roll.components.clone(),
            total: Some(roll.total),
            natural: roll.natural,
            special: roll.special,
            ..Self::default()
        }
    }

    fn total_or_sum(&self) -> i64 {
        self.total
            .unwrap_or_else(|| self.components.iter().map(RollComponent::value_or_zero).sum())
    }

    fn faces(&self) -> Vec<i64> {
        self.components
            .iter()
            .flat_map(|c| c.rolls.iter().copied())
            .collect()
    }
}

/// Render a registered template.
pub fn render(kind: TemplateKind, params: &TemplateParams) -> Result<String, TemplateError> {
    render_named(kind.name(), params)
}

/// Render a template looked up by its registered name.
pub fn render_named(name: &str, params: &TemplateParams) -> Result<String, TemplateError> {
    TEMPLATES
        .get(name)
        .map(|template| template(params))
        .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))
}

fn header(params: &TemplateParams) -> String {
    let mut html = format!(
        "<div class=\"sheet-title\">{}</div>",
        escape_html(&params.title)
    );
    if let Some(subtitle) = &params.subtitle {
        html.push_str(&format!(
            "<div class=\"sheet-subtitle\">{}</div>",
            escape_html(subtitle)
        ));
    }
    html
}

fn total_block(total: i64) -> String {
    format!("<div class=\"sheet-roll-total\">{total}</div>")
}

fn breakdown(components: &[RollComponent]) -> String {
    let show_all = components.len() > 1;
    let parts: Vec<String> = components
        .iter()
        .filter(|c| {
            // Zero-valued flat parts only add noise
            c.always_show_in_breakdown || (show_all && (c.is_rollable() || c.value_or_zero() != 0))
        })
        .map(|c| {
            let faces = if c.rolls.is_empty() {
                String::new()
            } else {
                let faces: Vec<String> = c.rolls.iter().map(|f| f.to_string()).collect();
                format!("<span class=\"sheet-roll-faces\">[{}]</span>", faces.join(", "))
            };
            format!(
                "<li class=\"sheet-roll-part\"><span class=\"sheet-roll-label\">{}</span>\
                 <span class=\"sheet-roll-value\">{}</span>{}</li>",
                escape_html(c.display_label()),
                signed(c.value_or_zero()),
                faces
            )
        })
        .collect();

    if parts.is_empty() {
        String::new()
    } else {
        format!("<ul class=\"sheet-roll-breakdown\">{}</ul>", parts.concat())
    }
}

fn special_banner(special: SpecialOutcome) -> String {
    let text = match special {
        SpecialOutcome::CritSuccess => "critical success",
        SpecialOutcome::CritFail => "critical failure",
    };
    format!(
        "<div class=\"sheet-roll-special sheet-{}\">{}</div>",
        special.as_str(),
        capitalize(text)
    )
}

fn card_open(base: &str, params: &TemplateParams, extra: &[&str]) -> String {
    let mut classes = vec![base.to_string()];
    classes.extend(extra.iter().map(|c| c.to_string()));
    if let Some(special) = params.special {
        classes.push(format!("sheet-{}", special.as_str()));
    }
    format!("<div class=\"{}\">", classes.join(" "))
}

fn render_chat(params: &TemplateParams) -> String {
    let mut html = String::from("<div class=\"sheet-chat\">");
    html.push_str(&header(params));
    if let Some(content) = &params.content {
        html.push_str(&format!(
            "<div class=\"sheet-chat-body\">{}</div>",
            escape_html(content)
        ));
    }
    html.push_str("</div>");
    html
}

fn render_roll(params: &TemplateParams) -> String {
    let mut html = card_open("sheet-roll", params, &[]);
    html.push_str(&header(params));
    html.push_str(&total_block(params.total_or_sum()));
    html.push_str(&breakdown(&params.components));
    if params.detect_doubles && has_duplicates(&params.faces()) {
        html.push_str("<div class=\"sheet-roll-stunt\">Doubles!</div>");
    }
    html.push_str("</div>");
    html
}

fn render_d20(params: &TemplateParams) -> String {
    let total = params.total_or_sum();
    let mut html = card_open("sheet-roll", params, &["sheet-d20"]);
    html.push_str(&header(params));
    if let Some(natural) = params.natural {
        html.push_str(&format!(
            "<div class=\"sheet-roll-natural\">Natural {natural}</div>"
        ));
    }
    html.push_str(&total_block(total));
    if let Some(special) = params.special {
        html.push_str(&special_banner(special));
    }
    if let Some(target) = params.target {
        let (class, text) = if gt(total, target) || helpers::eq(&total, &target) {
            ("sheet-success", "Success")
        } else {
            ("sheet-failure", "Failure")
        };
        html.push_str(&format!(
            "<div class=\"sheet-roll-result {class}\">{text} vs {target}</div>"
        ));
    }
    html.push_str(&breakdown(&params.components));
    html.push_str("</div>");
    html
}

fn render_damage(params: &TemplateParams) -> String {
    let multiplier = params.multiplier.unwrap_or(1);
    let dice: Vec<i64> = params
        .components
        .iter()
        .filter(|c| c.is_rollable())
        .map(RollComponent::value_or_zero)
        .collect();
    let flat: i64 = params
        .components
        .iter()
        .filter(|c| !c.is_rollable())
        .map(RollComponent::value_or_zero)
        .sum();
    let total = sum_with_multiplier(&dice, multiplier) + flat;

    let extra: &[&str] = if includes(params.tags.as_slice(), "healing") {
        &["sheet-damage", "sheet-healing"]
    } else {
        &["sheet-damage"]
    };
    let mut html = card_open("sheet-roll", params, extra);
    html.push_str(&header(params));
    html.push_str(&total_block(total));
    if multiplier != 1 {
        html.push_str(&format!(
            "<div class=\"sheet-roll-multiplier\">Dice x{multiplier}</div>"
        ));
    }
    if !params.tags.is_empty() {
        let tags: Vec<String> = params
            .tags
            .iter()
            .map(|t| format!("<span class=\"sheet-tag\">{}</span>", escape_html(&capitalize(t))))
            .collect();
        html.push_str(&format!("<div class=\"sheet-roll-tags\">{}</div>", tags.concat()));
    }
    html.push_str(&breakdown(&params.components));
    html.push_str("</div>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(label: &str, value: i64, faces: Vec<i64>) -> RollComponent {
        let mut component = RollComponent::dice(faces.len() as i64, 6).with_label(label);
        component.value = Some(value);
        component.rolls = faces;
        component
    }

    #[test]
    fn test_chat_template_escapes_content() {
        let html = render(TemplateKind::Chat, &TemplateParams::chat("Note", "<script>x</script>")).unwrap();
        assert!(html.starts_with("<div class=\"sheet-chat\">"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_every_kind_renders_through_registry() {
        let params = TemplateParams::chat("Hello", "world");
        for kind in TemplateKind::ALL {
            assert_eq!(render(kind, &params).unwrap(), (kind.renderer())(&params));
        }
        assert_eq!(TEMPLATES.len(), TemplateKind::ALL.len());
    }

    #[test]
    fn test_named_lookup() {
        let params = TemplateParams::chat("Hello", "world");
        assert_eq!(
            render_named("chat", &params).unwrap(),
            render(TemplateKind::Chat, &params).unwrap()
        );
        assert_eq!(
            render_named("sparkles", &params),
            Err(TemplateError::UnknownTemplate("sparkles".to_string()))
        );
        assert_eq!("damage".parse::<TemplateKind>().unwrap(), TemplateKind::Damage);
    }

    #[test]
    fn test_single_component_breakdown_hidden_unless_forced() {
        let params = TemplateParams {
            title: "Luck".to_string(),
            components: vec![resolved("1d6", 4, vec![4])],
            ..TemplateParams::default()
        };
        assert!(!render(TemplateKind::Roll, &params).unwrap().contains("sheet-roll-breakdown"));

        let params = TemplateParams {
            components: vec![RollComponent::bonus(2).with_label("Bless").always_shown()],
            ..params
        };
        let html = render(TemplateKind::Roll, &params).unwrap();
        assert!(html.contains("sheet-roll-breakdown"));
        assert!(html.contains("<div class=\"sheet-roll-total\">2</div>"));
    }

    #[test]
    fn test_zero_bonus_hidden_in_breakdown() {
        let params = TemplateParams {
            title: "Strike".to_string(),
            components: vec![
                resolved("2d6", 7, vec![3, 4]),
                RollComponent::bonus(0).with_label("Manual Bonus"),
            ],
            ..TemplateParams::default()
        };
        let html = render(TemplateKind::Roll, &params).unwrap();
        assert!(html.contains("[3, 4]"));
        assert!(!html.contains("Manual Bonus"));
    }

    #[test]
    fn test_doubles_flagged() {
        let params = TemplateParams {
            title: "Stunt".to_string(),
            components: vec![resolved("3d6", 11, vec![5, 1, 5])],
            detect_doubles: true,
            ..TemplateParams::default()
        };
        assert!(render(TemplateKind::Roll, &params).unwrap().contains("Doubles!"));
    }

    #[test]
    fn test_d20_special_and_target() {
        let params = TemplateParams {
            title: "Attack".to_string(),
            total: Some(25),
            natural: Some(20),
            special: Some(SpecialOutcome::CritSuccess),
            target: Some(15),
            ..TemplateParams::default()
        };
        let html = render(TemplateKind::D20, &params).unwrap();
        assert!(html.starts_with("<div class=\"sheet-roll sheet-d20 sheet-crit-success\">"));
        assert!(html.contains("Natural 20"));
        assert!(html.contains("Critical success"));
        assert!(html.contains("Success vs 15"));

        let params = TemplateParams { total: Some(14), special: None, ..params };
        assert!(render(TemplateKind::D20, &params).unwrap().contains("Failure vs 15"));
    }

    #[test]
    fn test_damage_multiplies_dice_only() {
        let params = TemplateParams {
            title: "Longsword".to_string(),
            components: vec![
                resolved("1d8", 6, vec![6]),
                RollComponent::bonus(3).with_label("Strength"),
            ],
            multiplier: Some(2),
            tags: vec!["slashing".to_string()],
            ..TemplateParams::default()
        };
        let html = render(TemplateKind::Damage, &params).unwrap();
        assert!(html.contains("<div class=\"sheet-roll-total\">15</div>"));
        assert!(html.contains("Dice x2"));
        assert!(html.contains("<span class=\"sheet-tag\">Slashing</span>"));
    }
}
