//! Roll components.
//!
//! A roll is an ordered list of components, each either a dice pool, a
//! compound formula rolled as one request, or a flat bonus. Components arrive
//! from the host in a loose shape (`{sides?, count?, rollFormula?, value?}`)
//! and are validated into [`ComponentKind`] on deserialization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error validating a roll component from its wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("Roll component has no dice, formula or value")]
    Empty,
    #[error("Roll component has a count but no sides")]
    CountWithoutSides,
    #[error("Die size must be at least 1")]
    InvalidSides,
    #[error("Roll formula is empty")]
    EmptyFormula,
    #[error("Dice count must not be zero")]
    ZeroCount,
    #[error("Dice and formula components cannot carry a preset value")]
    PresetValue,
}

/// What drives a component's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    /// `|count|` dice of `sides` faces; a negative count subtracts the result.
    Dice { count: i64, sides: u32 },
    /// A pre-aggregated formula (e.g. `2d6+3`) rolled as a single request and
    /// expanded into its parts once resolved.
    Formula { formula: String },
    /// A flat value; never sent to the host.
    Bonus,
}

/// One contributor to an aggregate roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawComponent", into = "RawComponent")]
pub struct RollComponent {
    pub kind: ComponentKind,
    pub label: Option<String>,
    /// Filled in by the resolver for dice and formula components.
    pub value: Option<i64>,
    pub always_show_in_breakdown: bool,
    /// Natural faces reported by the host.
    pub rolls: Vec<i64>,
}

impl RollComponent {
    fn with_kind(kind: ComponentKind) -> Self {
        Self {
            kind,
            label: None,
            value: None,
            always_show_in_breakdown: false,
            rolls: Vec::new(),
        }
    }

    pub fn dice(count: i64, sides: u32) -> Self {
        Self::with_kind(ComponentKind::Dice { count, sides })
    }

    pub fn formula(formula: impl Into<String>) -> Self {
        Self::with_kind(ComponentKind::Formula {
            formula: formula.into(),
        })
    }

    pub fn bonus(value: i64) -> Self {
        Self {
            value: Some(value),
            ..Self::with_kind(ComponentKind::Bonus)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Show this component in the breakdown even when it is the only one.
    pub fn always_shown(mut self) -> Self {
        self.always_show_in_breakdown = true;
        self
    }

    /// Whether resolving this component needs the host's randomness.
    pub fn is_rollable(&self) -> bool {
        !matches!(self.kind, ComponentKind::Bonus)
    }

    /// Resolved value, zero while unresolved.
    pub fn value_or_zero(&self) -> i64 {
        self.value.unwrap_or(0)
    }

    /// Label for the breakdown, empty when unset.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }
}

/// The host's loose component shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sides: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    roll_formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    always_show_in_breakdown: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rolls: Vec<i64>,
}

impl TryFrom<RawComponent> for RollComponent {
    type Error = ComponentError;

    fn try_from(raw: RawComponent) -> Result<Self, Self::Error> {
        // A formula takes precedence over any sides/count it is bundled with
        let kind = match (raw.roll_formula, raw.sides, raw.count) {
            (Some(formula), _, _) => {
                if formula.trim().is_empty() {
                    return Err(ComponentError::EmptyFormula);
                }
                ComponentKind::Formula { formula }
            }
            (None, Some(0), _) => return Err(ComponentError::InvalidSides),
            (None, Some(_), Some(0)) => return Err(ComponentError::ZeroCount),
            (None, Some(sides), count) => ComponentKind::Dice {
                count: count.unwrap_or(1),
                sides,
            },
            (None, None, Some(_)) => return Err(ComponentError::CountWithoutSides),
            (None, None, None) => {
                if raw.value.is_none() {
                    return Err(ComponentError::Empty);
                }
                ComponentKind::Bonus
            }
        };

        // Only the resolver sets a rolled value, alongside the faces behind it
        if !matches!(kind, ComponentKind::Bonus) && raw.value.is_some() && raw.rolls.is_empty() {
            return Err(ComponentError::PresetValue);
        }

        Ok(Self {
            kind,
            label: raw.label,
            value: raw.value,
            always_show_in_breakdown: raw.always_show_in_breakdown,
            rolls: raw.rolls,
        })
    }
}

impl From<RollComponent> for RawComponent {
    fn from(component: RollComponent) -> Self {
        let mut raw = RawComponent {
            label: component.label,
            value: component.value,
            always_show_in_breakdown: component.always_show_in_breakdown,
            rolls: component.rolls,
            ..RawComponent::default()
        };
        match component.kind {
            ComponentKind::Dice { count, sides } => {
                raw.sides = Some(sides);
                raw.count = Some(count);
            }
            ComponentKind::Formula { formula } => raw.roll_formula = Some(formula),
            ComponentKind::Bonus => {}
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_each_kind() {
        let dice: RollComponent = serde_json::from_value(json!({"sides": 20, "count": 1})).unwrap();
        assert_eq!(dice.kind, ComponentKind::Dice { count: 1, sides: 20 });
        assert!(dice.value.is_none());

        let formula: RollComponent =
            serde_json::from_value(json!({"rollFormula": "2d6+3", "sides": 6, "label": "Greatsword"}))
                .unwrap();
        assert_eq!(
            formula.kind,
            ComponentKind::Formula { formula: "2d6+3".to_string() }
        );

        let bonus: RollComponent =
            serde_json::from_value(json!({"value": 4, "label": "Strength", "alwaysShowInBreakdown": true}))
                .unwrap();
        assert_eq!(bonus.kind, ComponentKind::Bonus);
        assert_eq!(bonus.value, Some(4));
        assert!(bonus.always_show_in_breakdown);
    }

    #[test]
    fn test_sides_without_count_defaults_to_one_die() {
        let dice: RollComponent = serde_json::from_value(json!({"sides": 8})).unwrap();
        assert_eq!(dice.kind, ComponentKind::Dice { count: 1, sides: 8 });
    }

    #[test]
    fn test_malformed_components_rejected() {
        let cases = [
            json!({"label": "nothing"}),
            json!({"count": 2}),
            json!({"sides": 0, "count": 1}),
            json!({"rollFormula": "  "}),
            json!({"sides": 6, "count": 0}),
            json!({"sides": 6, "count": 1, "value": 99}),
            json!({"rollFormula": "2d6+3", "value": 12}),
        ];
        for case in cases {
            let parsed: Result<RollComponent, _> = serde_json::from_value(case.clone());
            assert!(parsed.is_err(), "expected {case} to be rejected");
        }
    }

    #[test]
    fn test_rolled_component_reads_back() {
        let json = json!({"sides": 20, "count": 1, "value": 17, "rolls": [17]});
        let component: RollComponent = serde_json::from_value(json).unwrap();
        assert_eq!(component.value, Some(17));
        assert_eq!(component.rolls, vec![17]);
    }

    #[test]
    fn test_serialize_to_wire_shape() {
        let component = RollComponent::dice(-2, 6).with_label("Penalty");
        assert_eq!(
            serde_json::to_value(&component).unwrap(),
            json!({"sides": 6, "count": -2, "label": "Penalty"})
        );

        let round_trip: RollComponent =
            serde_json::from_value(serde_json::to_value(&component).unwrap()).unwrap();
        assert_eq!(round_trip, component);
    }
}
