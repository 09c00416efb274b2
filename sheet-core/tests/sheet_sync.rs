//! Integration tests for the sheet lifecycle and persistence.
//!
//! Time is paused, so debounce windows elapse instantly.
//! Run with: `cargo test -p sheet-core --test sheet_sync`

use serde_json::{json, Value};
use sheet_core::character::{Effect, Item, Tag};
use sheet_core::host::{CharacterData, HostEvent};
use sheet_core::{CharacterSheet, MockHost, Sheet, SheetConfig, SyncState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn host_character(name: &str) -> CharacterData {
    let mut sheet = CharacterSheet::new(name);
    sheet.id = "char-7".into();
    let cloak = sheet
        .items
        .add(Item::new("Cloak of Elvenkind").attunable())
        .unwrap();
    sheet.attune(&cloak).unwrap();
    sheet
        .effects
        .add(Effect::new("Elvenkind", "1d4").from_item(&cloak))
        .unwrap();
    sheet.tags.add(Tag::new("stealthy").on_item(&cloak)).unwrap();
    sheet.dehydrate().unwrap()
}

async fn mount(host: &Arc<MockHost>) -> Sheet {
    let mut sheet = Sheet::new(host.clone(), SheetConfig::new());
    sheet
        .handle_event(HostEvent::Init {
            character: host_character("Ilse"),
            settings: Value::Null,
        })
        .await
        .unwrap();
    sheet
}

// =============================================================================
// TEST 1: Host-pushed changes never echo
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeated_host_changes_do_not_echo() {
    let host = Arc::new(MockHost::new());
    let mut sheet = mount(&host).await;

    for name in ["Ilse", "Ilse the Quiet", "Ilse the Bold"] {
        sheet
            .handle_event(HostEvent::Change {
                character: host_character(name),
            })
            .await
            .unwrap();
    }
    sleep(Duration::from_secs(5)).await;

    assert_eq!(sheet.character().name, "Ilse the Bold");
    host.assert_updates(0);
}

// =============================================================================
// TEST 2: Cascading edit persists as one coalesced write
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cascading_removal_is_persisted_once() {
    let host = Arc::new(MockHost::new());
    let mut sheet = mount(&host).await;
    let cloak = sheet.character().items.ids()[0].to_string();

    sheet.edit(|c| c.remove_item(&cloak)).await.unwrap();
    sheet
        .edit(|c| c.items.add(Item::new("Boots")))
        .await
        .unwrap()
        .unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(sheet.sync().state(), SyncState::PendingWrite);
    sleep(Duration::from_secs(1)).await;

    host.assert_updates(1);
    let saved = host.last_update().unwrap();
    assert_eq!(saved.attributes["attunement"], json!({}));
    assert_eq!(saved.attributes["effects"], json!({}));
    assert_eq!(saved.attributes["tags"], json!({}));
    assert_eq!(saved.attributes["items"].as_object().unwrap().len(), 1);
}

// =============================================================================
// TEST 3: Persisted layout hydrates back to the same character
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_saved_character_rehydrates() {
    let host = Arc::new(MockHost::new());
    let mut sheet = mount(&host).await;
    sheet
        .edit(|c| c.bio = "Raised by wolves.".to_string())
        .await
        .unwrap();
    sheet.flush().await.unwrap();

    let saved = host.last_update().unwrap();
    let restored = CharacterSheet::hydrate(&saved).unwrap();
    assert_eq!(&restored, sheet.character());
    assert_eq!(restored.attunement().len(), 1);
}

// =============================================================================
// TEST 4: Initiative ignores item effects
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_initiative_includes_conditions_only() {
    let host = Arc::new(MockHost::new());
    let sheet = mount(&host).await;

    let outcome = sheet.roll_initiative(2).await.unwrap();

    // Seeded rolling keeps the face within the die
    let natural = outcome.roll.components[0].rolls[0];
    assert!((1..=20).contains(&natural));
    assert_eq!(outcome.roll.total, natural + 2);
    host.assert_posted_containing("Initiative");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_after_hydration_writes_nothing() {
    let host = Arc::new(MockHost::new());
    let sheet = mount(&host).await;
    sheet.shutdown().await.unwrap();
    host.assert_updates(0);
}
