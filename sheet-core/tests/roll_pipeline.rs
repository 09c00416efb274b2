//! End-to-end tests for the roll pipeline.
//!
//! Formula text goes in, posted chat markup comes out, with the mock host
//! standing in for the VTT platform.
//! Run with: `cargo test -p sheet-core --test roll_pipeline`

use serde_json::json;
use sheet_core::codec::{from_keyed_map, to_keyed_map};
use sheet_core::dice::{self, average, create_components_from_formula, simplify, PoolEntry};
use sheet_core::host::{DiceResult, SubRoll};
use sheet_core::roll::MANUAL_BONUS_LABEL;
use sheet_core::{
    ChatDispatcher, ComponentKind, CriticalRule, MockHost, RollComponent, RollParams,
    RollResolver, TemplateKind,
};
use std::sync::Arc;

// =============================================================================
// Formulas
// =============================================================================

#[test]
fn test_simplify_is_idempotent() {
    for formula in ["2d6 + 1d8 + 3", "1d6-1d6+2", "d20+d20-1", "4d4-2d4+0", "-3+1d10", "7"] {
        let once = simplify(&dice::parse(formula).unwrap());
        let twice = simplify(&dice::parse(&once).unwrap());
        assert_eq!(once, twice, "simplify not idempotent for {formula}");
    }
}

#[test]
fn test_average_of_mixed_pool() {
    let pool = vec![PoolEntry::from(3i64), PoolEntry::from("1d6"), PoolEntry::from(-2i64)];
    assert_eq!(average(&pool), 4.5);
}

#[test]
fn test_formula_components_keep_nonzero_constants() {
    let components = create_components_from_formula("2d6 + 1d8 + 3", "Smite").unwrap();
    let kinds: Vec<_> = components.iter().map(|c| c.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            ComponentKind::Dice { count: 2, sides: 6 },
            ComponentKind::Dice { count: 1, sides: 8 },
            ComponentKind::Bonus,
        ]
    );
    assert!(components.iter().all(|c| c.label.as_deref() == Some("Smite")));

    let components = create_components_from_formula("1d4+0", "Bless").unwrap();
    assert_eq!(components.len(), 1);
}

// =============================================================================
// Codec
// =============================================================================

#[test]
fn test_keyed_map_round_trip_keeps_order() {
    let list: Vec<_> = ["m", "b", "x", "a"]
        .iter()
        .enumerate()
        .map(|(i, id)| json!({"_id": id, "rank": i, "notes": {"nested": [i]}}))
        .collect();

    let map = to_keyed_map(&list).unwrap();
    assert_eq!(from_keyed_map(Some(&map)).unwrap(), list);
}

#[test]
fn test_keyed_map_rejects_one_missing_identifier() {
    let list = vec![json!({"_id": "a", "name": "x"}), json!({"name": "y"})];
    assert!(to_keyed_map(&list).is_err());
}

// =============================================================================
// Resolution and dispatch
// =============================================================================

#[tokio::test]
async fn test_bonus_only_roll_never_reaches_host() {
    let host = MockHost::new();
    let components: Vec<_> = [4, -1, 7].into_iter().map(RollComponent::bonus).collect();

    let roll = RollResolver::new(&host).resolve(components).await.unwrap();

    assert_eq!(roll.total, 10);
    host.assert_roll_calls(0);
}

#[tokio::test]
async fn test_compound_formula_splits_into_groups_and_manual_bonus() {
    let host = MockHost::new();
    host.expect_roll(
        "2d6+3",
        DiceResult::new("2d6+3", 10).with_sub_roll(SubRoll::new(2, 6, vec![3, 4])),
    );

    let roll = RollResolver::new(&host)
        .resolve(vec![RollComponent::formula("2d6+3")])
        .await
        .unwrap();

    assert_eq!(roll.components.len(), 2);
    assert_eq!(roll.components[0].value, Some(7));
    assert_eq!(roll.components[0].rolls, vec![3, 4]);
    assert_eq!(roll.components[1].display_label(), MANUAL_BONUS_LABEL);
    assert_eq!(roll.components[1].value, Some(3));
    assert_eq!(roll.total, 10);
}

#[tokio::test]
async fn test_formula_to_chat() {
    let host = Arc::new(MockHost::new());
    host.expect_roll("2d6", DiceResult::dice(2, 6, vec![6, 6]));
    host.expect_roll("1d20", DiceResult::dice(1, 20, vec![1]));
    host.expect_roll("1d20", DiceResult::dice(1, 20, vec![1]));

    let dispatcher = ChatDispatcher::new(host.clone()).with_critical(Some(CriticalRule::d20()));

    let mut components = vec![RollComponent::dice(1, 20).with_label("Check")];
    components.extend(create_components_from_formula("2d6-1", "Stunt").unwrap());

    let outcome = dispatcher
        .roll_to_chat(
            RollParams::new("Stunt <check>", components)
                .with_template(TemplateKind::D20)
                .with_doubles(true),
        )
        .await
        .unwrap();

    assert_eq!(outcome.roll.total, 1 + 12 - 1);
    assert!(outcome.roll.special.is_some());
    assert!(outcome.markup.contains("Stunt &lt;check&gt;"));
    assert!(outcome.markup.contains("Critical failure"));
    host.assert_roll_calls(2);
    host.assert_posted_containing("sheet-crit-fail");
}

#[tokio::test]
async fn test_invalid_formula_becomes_placeholder_roll() {
    let host = Arc::new(MockHost::new());
    let dispatcher = ChatDispatcher::new(host.clone());

    let components = dice::components_or_placeholder("2d6++", "Sneak Attack");
    let outcome = dispatcher
        .roll_to_chat(RollParams::new("Sneak Attack", components).with_template(TemplateKind::Damage))
        .await
        .unwrap();

    assert_eq!(outcome.roll.total, 0);
    host.assert_roll_calls(0);
    host.assert_posted_containing("Sneak Attack");
}

#[test]
fn test_templates_registered_by_name() {
    for kind in TemplateKind::ALL {
        let markup = sheet_core::template::render_named(kind.name(), &Default::default()).unwrap();
        assert!(markup.starts_with("<div class=\"sheet-"));
    }
    assert!(sheet_core::template::render_named("spell", &Default::default()).is_err());
}
