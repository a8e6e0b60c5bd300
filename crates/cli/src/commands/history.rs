//! `voxchat history` — Print the turns of one conversation.

use std::sync::Arc;

use chrono::{DateTime, Local};
use voxchat_config::AppConfig;
use voxchat_core::character::CharacterId;
use voxchat_core::event::EventBus;
use voxchat_pipeline::CancellationToken;

pub async fn run(
    config: AppConfig,
    character: String,
    session: Option<String>,
    token: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let identity = super::identity_for(&config, token.as_deref())?;
    let pipeline = voxchat_gateway::build_pipeline(&config, Arc::new(EventBus::default())).await?;

    let scope = pipeline.resolver().resolve_existing(
        &identity,
        session.as_deref(),
        CharacterId::from(character),
    )?;
    let turns = pipeline.history(&scope, CancellationToken::new()).await?;

    if turns.is_empty() {
        println!("No turns yet.");
        return Ok(());
    }

    for turn in &turns {
        let at: DateTime<Local> = turn.created_at.into();
        println!("[{}]", at.format("%Y-%m-%d %H:%M:%S"));
        println!("  You > {}", turn.user_message);
        println!("  AI  > {}", turn.ai_message);
    }
    println!("\n{} turn(s)", turns.len());

    Ok(())
}
