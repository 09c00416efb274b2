//! The character sheet domain.
//!
//! A sheet owns one [`RecordStore`] per record type. Stores reference each
//! other only by identifier: an effect or tag names the item it came from,
//! and the attunement list names attuned items.

use crate::codec::{self, CodecError, KeyedMap};
use crate::component::RollComponent;
use crate::dice::components_or_placeholder;
use crate::host::CharacterData;
use crate::store::{Record, RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum number of attuned items.
pub const ATTUNEMENT_SLOTS: usize = 3;

/// Attribute key of the attunement list.
pub const ATTUNEMENT_STORE: &str = "attunement";

/// Errors from character-level operations.
#[derive(Debug, Error)]
pub enum CharacterError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("All {limit} attunement slots are in use")]
    AttunementFull { limit: usize },

    #[error("Item does not require attunement: {0}")]
    NotAttunable(String),
}

/// A condition affecting the character, optionally modifying rolls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, crate::Record)]
#[serde(rename_all = "camelCase")]
#[record(store = "conditions")]
pub struct Condition {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modifier: i64,
    #[serde(default)]
    pub active: bool,
}

impl Condition {
    pub fn new(name: impl Into<String>, modifier: i64) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            modifier,
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, crate::Record)]
#[serde(rename_all = "camelCase")]
#[record(store = "attacks")]
pub struct Attack {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub attack_bonus: i64,
    /// Damage formula, e.g. `1d8+3`.
    #[serde(default)]
    pub damage: String,
    #[serde(default)]
    pub damage_type: String,
}

impl Attack {
    pub fn new(name: impl Into<String>, attack_bonus: i64, damage: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            attack_bonus,
            damage: damage.into(),
            damage_type: String::new(),
        }
    }

    pub fn with_damage_type(mut self, damage_type: impl Into<String>) -> Self {
        self.damage_type = damage_type.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, crate::Record)]
#[serde(rename_all = "camelCase")]
#[record(store = "items")]
pub struct Item {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub requires_attunement: bool,
    #[serde(default)]
    pub description: String,
}

fn default_quantity() -> u32 {
    1
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            quantity: 1,
            requires_attunement: false,
            description: String::new(),
        }
    }

    pub fn attunable(mut self) -> Self {
        self.requires_attunement = true;
        self
    }
}

/// A roll modifier, possibly granted by an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, crate::Record)]
#[serde(rename_all = "camelCase")]
#[record(store = "effects")]
pub struct Effect {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    /// Bonus formula added to rolls while active, e.g. `1d4`.
    pub formula: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_item: Option<String>,
}

impl Effect {
    pub fn new(name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            formula: formula.into(),
            active: true,
            source_item: None,
        }
    }

    pub fn from_item(mut self, item_id: impl Into<String>) -> Self {
        self.source_item = Some(item_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, crate::Record)]
#[serde(rename_all = "camelCase")]
#[record(store = "tags")]
pub struct Tag {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            item_id: None,
        }
    }

    pub fn on_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }
}

/// A character and all of its stores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterSheet {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub bio: String,
    pub conditions: RecordStore<Condition>,
    pub attacks: RecordStore<Attack>,
    pub items: RecordStore<Item>,
    pub effects: RecordStore<Effect>,
    pub tags: RecordStore<Tag>,
    attunement: Vec<String>,
}

impl CharacterSheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Identifiers of attuned items, in attunement order.
    pub fn attunement(&self) -> &[String] {
        &self.attunement
    }

    pub fn attune(&mut self, item_id: &str) -> Result<(), CharacterError> {
        let item = self
            .items
            .get(item_id)
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))?;
        if !item.requires_attunement {
            return Err(CharacterError::NotAttunable(item_id.to_string()));
        }
        if self.attunement.iter().any(|id| id == item_id) {
            return Ok(());
        }
        if self.attunement.len() >= ATTUNEMENT_SLOTS {
            return Err(CharacterError::AttunementFull {
                limit: ATTUNEMENT_SLOTS,
            });
        }
        self.attunement.push(item_id.to_string());
        Ok(())
    }

    pub fn unattune(&mut self, item_id: &str) -> bool {
        let before = self.attunement.len();
        self.attunement.retain(|id| id != item_id);
        before != self.attunement.len()
    }

    /// Remove an item along with everything that hangs off it.
    ///
    /// The item is un-attuned and its effects and tags are deleted.
    pub fn remove_item(&mut self, item_id: &str) -> Option<Item> {
        let item = self.items.remove(item_id)?;
        self.unattune(item_id);
        let effects = self
            .effects
            .retain(|e| e.source_item.as_deref() != Some(item_id));
        let tags = self.tags.retain(|t| t.item_id.as_deref() != Some(item_id));
        tracing::debug!(item = %item.name, effects, tags, "Removed item and dependents");
        Some(item)
    }

    /// Bonus components for every active condition with a modifier.
    pub fn condition_components(&self) -> Vec<RollComponent> {
        self.conditions
            .iter()
            .filter(|c| c.active && c.modifier != 0)
            .map(|c| RollComponent::bonus(c.modifier).with_label(c.name.clone()))
            .collect()
    }

    /// Components for every active effect. Unparsable formulas become
    /// zero-valued placeholders.
    pub fn effect_components(&self) -> Vec<RollComponent> {
        self.effects
            .iter()
            .filter(|e| e.active)
            .flat_map(|e| components_or_placeholder(&e.formula, &e.name))
            .collect()
    }

    /// Convert to the host's persisted layout.
    pub fn dehydrate(&self) -> Result<CharacterData, CodecError> {
        let mut attributes = Map::new();
        insert_store(&mut attributes, Condition::STORE, self.conditions.dehydrate()?);
        insert_store(&mut attributes, Attack::STORE, self.attacks.dehydrate()?);
        insert_store(&mut attributes, Item::STORE, self.items.dehydrate()?);
        insert_store(&mut attributes, Effect::STORE, self.effects.dehydrate()?);
        insert_store(&mut attributes, Tag::STORE, self.tags.dehydrate()?);
        insert_store(
            &mut attributes,
            ATTUNEMENT_STORE,
            codec::to_indexed_map(&self.attunement)?,
        );

        Ok(CharacterData {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            bio: self.bio.clone(),
            attributes,
        })
    }

    /// Rebuild from the host's persisted layout.
    ///
    /// Missing stores are empty; attunement entries naming items that no
    /// longer exist are dropped.
    pub fn hydrate(data: &CharacterData) -> Result<Self, CodecError> {
        let attributes = &data.attributes;
        let items = RecordStore::<Item>::hydrate(store_map(attributes, Item::STORE)?)?;
        let attunement: Vec<String> =
            codec::from_indexed_map::<String>(store_map(attributes, ATTUNEMENT_STORE)?)?
                .into_iter()
                .filter(|id| items.contains(id))
                .collect();

        Ok(Self {
            id: data.id.clone(),
            name: data.name.clone(),
            avatar: data.avatar.clone(),
            bio: data.bio.clone(),
            conditions: RecordStore::hydrate(store_map(attributes, Condition::STORE)?)?,
            attacks: RecordStore::hydrate(store_map(attributes, Attack::STORE)?)?,
            items,
            effects: RecordStore::hydrate(store_map(attributes, Effect::STORE)?)?,
            tags: RecordStore::hydrate(store_map(attributes, Tag::STORE)?)?,
            attunement,
        })
    }
}

fn insert_store(attributes: &mut Map<String, Value>, name: &str, map: KeyedMap) {
    attributes.insert(name.to_string(), Value::Object(map));
}

fn store_map<'a>(attributes: &'a Map<String, Value>, name: &str) -> Result<Option<&'a KeyedMap>, CodecError> {
    match attributes.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(CodecError::InvalidEntry(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use serde_json::json;

    fn equipped_sheet() -> (CharacterSheet, String) {
        let mut sheet = CharacterSheet::new("Vex");
        let ring = sheet.items.add(Item::new("Ring of Protection").attunable()).unwrap();
        sheet.items.add(Item::new("Rope")).unwrap();
        sheet.attune(&ring).unwrap();
        sheet.effects.add(Effect::new("Warded", "1").from_item(&ring)).unwrap();
        sheet.effects.add(Effect::new("Bless", "1d4")).unwrap();
        sheet.tags.add(Tag::new("magic").on_item(&ring)).unwrap();
        sheet.tags.add(Tag::new("hero")).unwrap();
        (sheet, ring)
    }

    #[test]
    fn test_remove_item_cascades() {
        let (mut sheet, ring) = equipped_sheet();

        let removed = sheet.remove_item(&ring).unwrap();

        assert_eq!(removed.name, "Ring of Protection");
        assert!(sheet.attunement().is_empty());
        assert_eq!(sheet.effects.len(), 1);
        assert_eq!(sheet.effects.iter().next().unwrap().name, "Bless");
        assert_eq!(sheet.tags.len(), 1);
        assert_eq!(sheet.items.len(), 1);
        assert!(sheet.remove_item(&ring).is_none());
    }

    #[test]
    fn test_attunement_rules() {
        let mut sheet = CharacterSheet::new("Vex");
        let rope = sheet.items.add(Item::new("Rope")).unwrap();
        assert!(matches!(sheet.attune(&rope), Err(CharacterError::NotAttunable(_))));
        assert!(matches!(sheet.attune("ghost"), Err(CharacterError::Store(_))));

        for i in 0..ATTUNEMENT_SLOTS {
            let id = sheet.items.add(Item::new(format!("Trinket {i}")).attunable()).unwrap();
            sheet.attune(&id).unwrap();
            // Attuning twice is a no-op
            sheet.attune(&id).unwrap();
        }
        let extra = sheet.items.add(Item::new("One too many").attunable()).unwrap();
        assert!(matches!(
            sheet.attune(&extra),
            Err(CharacterError::AttunementFull { limit: ATTUNEMENT_SLOTS })
        ));
    }

    #[test]
    fn test_roll_modifiers() {
        let (mut sheet, _) = equipped_sheet();
        sheet.conditions.add(Condition::new("Poisoned", -2)).unwrap();
        let mut inactive = Condition::new("Hasted", 2);
        inactive.active = false;
        sheet.conditions.add(inactive).unwrap();
        sheet.effects.add(Effect::new("Cursed", "1q4")).unwrap();

        let conditions = sheet.condition_components();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].value, Some(-2));

        let effects = sheet.effect_components();
        assert_eq!(effects.len(), 3);
        assert_eq!(effects[0].value, Some(1));
        assert_eq!(effects[1].kind, ComponentKind::Dice { count: 1, sides: 4 });
        assert_eq!(effects[2].label.as_deref(), Some("Cursed (Invalid Formula)"));
    }

    #[test]
    fn test_dehydrate_layout_and_round_trip() {
        let (mut sheet, ring) = equipped_sheet();
        sheet.id = "char-1".into();
        sheet.bio = "A ranger.".into();

        let data = sheet.dehydrate().unwrap();
        assert_eq!(data.attributes["attunement"], json!({"0": ring}));
        assert_eq!(data.attributes["items"][&ring]["position"], json!(0));
        assert_eq!(data.attributes["conditions"], json!({}));

        let restored = CharacterSheet::hydrate(&data).unwrap();
        assert_eq!(restored, sheet);
    }

    #[test]
    fn test_hydrate_drops_dangling_attunement() {
        let data = CharacterData {
            name: "Vex".into(),
            attributes: json!({
                "items": {"ring": {"name": "Ring", "requiresAttunement": true, "position": 0}},
                "attunement": {"0": "ring", "1": "sold-long-ago"},
                "tags": null
            })
            .as_object()
            .cloned()
            .unwrap(),
            ..CharacterData::default()
        };

        let sheet = CharacterSheet::hydrate(&data).unwrap();
        assert_eq!(sheet.attunement(), &["ring".to_string()]);
        assert_eq!(sheet.items.get("ring").unwrap().quantity, 1);
        assert!(sheet.tags.is_empty());
    }

    #[test]
    fn test_hydrate_rejects_non_object_store() {
        let data = CharacterData {
            attributes: json!({"items": [1, 2]}).as_object().cloned().unwrap(),
            ..CharacterData::default()
        };
        assert!(matches!(
            CharacterSheet::hydrate(&data),
            Err(CodecError::InvalidEntry(name)) if name == "items"
        ));
    }
}
