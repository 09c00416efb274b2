//! Character sheet engine for virtual tabletops.
//!
//! This crate provides:
//! - Dice formula parsing, simplification and averages
//! - Roll resolution against a host-provided dice roller, with optional
//!   critical confirmation
//! - Chat templates and dispatch to the host's chat log
//! - Ordered record stores with the host's keyed persistence format
//! - Debounced, echo-free persistence of character edits
//!
//! # Quick Start
//!
//! ```ignore
//! use sheet_core::{HostEvent, RollParams, RollComponent, Sheet, SheetConfig};
//! use std::sync::Arc;
//!
//! async fn on_init(host: Arc<dyn sheet_core::HostBridge>, event: HostEvent) -> Result<(), sheet_core::SheetError> {
//!     let mut sheet = Sheet::new(host, SheetConfig::new());
//!     sheet.handle_event(event).await?;
//!
//!     let outcome = sheet
//!         .roll(RollParams::new("Stealth", vec![RollComponent::dice(1, 20), RollComponent::bonus(5)]))
//!         .await?;
//!     println!("Rolled {}", outcome.roll.total);
//!
//!     sheet.shutdown().await
//! }
//! ```

// Lets `#[derive(Record)]` expand to `::sheet_core::...` inside this crate.
extern crate self as sheet_core;

pub mod character;
pub mod chat;
pub mod codec;
pub mod component;
pub mod dice;
pub mod host;
pub mod roll;
pub mod sheet;
pub mod store;
pub mod sync;
pub mod template;
pub mod testing;

// Re-export for convenience
pub use sheet_macros::Record;

// Primary public API
pub use character::{Attack, CharacterError, CharacterSheet, Condition, Effect, Item, Tag};
pub use chat::{ChatDispatcher, ChatError, ChatParams, RollOutcome, RollParams};
pub use codec::{CodecError, KeyedMap};
pub use component::{ComponentKind, RollComponent};
pub use dice::{DiceFormula, FormulaError, PoolEntry, Term};
pub use host::{CharacterData, HostBridge, HostError, HostEvent};
pub use roll::{CriticalRule, ResolvedRoll, RollError, RollResolver, SpecialOutcome};
pub use sheet::{AssetMode, Sheet, SheetConfig, SheetError, SheetSettings};
pub use store::{RecordStore, StoreError};
pub use sync::{SyncHandle, SyncState};
pub use template::{TemplateKind, TemplateParams};
pub use testing::MockHost;
