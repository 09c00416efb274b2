//! Walk a sheet through a short session against the mock host.
//!
//! Run with: `RUST_LOG=sheet_core=debug cargo run -p sheet-core --example roll_demo`

use serde_json::Value;
use sheet_core::character::{Attack, Condition, Effect};
use sheet_core::host::{CharacterData, HostEvent};
use sheet_core::{ChatParams, MockHost, Sheet, SheetConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let host = Arc::new(MockHost::with_seed(42));
    let mut sheet = Sheet::new(host.clone(), SheetConfig::new());

    sheet
        .handle_event(HostEvent::Init {
            character: CharacterData {
                id: "demo".into(),
                name: "Thorin".into(),
                ..CharacterData::default()
            },
            settings: Value::Null,
        })
        .await?;

    let axe = sheet
        .edit(|c| -> Result<String, sheet_core::StoreError> {
            c.conditions.add(Condition::new("Blessed", 1))?;
            c.effects.add(Effect::new("Rage", "2"))?;
            c.attacks
                .add(Attack::new("Greataxe", 5, "1d12+3").with_damage_type("slashing"))
        })
        .await??;

    sheet
        .send_to_chat(ChatParams::new("Thorin", "Thorin hefts his axe."))
        .await?;

    let attack = sheet.roll_attack(&axe).await?;
    println!("Attack: {} (natural {:?})", attack.roll.total, attack.roll.natural);

    let critical = attack.roll.natural == Some(20);
    let damage = sheet.roll_damage(&axe, critical).await?;
    println!("Damage: {}", damage.roll.total);

    let initiative = sheet.roll_initiative(2).await?;
    println!("Initiative: {}", initiative.roll.total);

    sheet.shutdown().await?;

    for post in host.posts() {
        println!("\n{}", post.content);
    }
    println!("\nPersisted {} update(s)", host.updates().len());
    Ok(())
}
