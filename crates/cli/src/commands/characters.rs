//! `voxchat characters` — List characters.

use std::sync::Arc;

use voxchat_config::AppConfig;
use voxchat_core::character::CharacterQuery;
use voxchat_core::event::EventBus;

pub async fn run(
    config: AppConfig,
    search: Option<String>,
    page: u32,
    page_size: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = voxchat_gateway::build_pipeline(&config, Arc::new(EventBus::default())).await?;

    let listing = pipeline
        .characters()
        .list(CharacterQuery {
            page,
            page_size,
            search,
        })
        .await?;

    if listing.data.is_empty() {
        println!("No characters found.");
        return Ok(());
    }

    println!("{:<6} {:<24} {:<28} DESCRIPTION", "ID", "NAME", "VOICE");
    for c in &listing.data {
        println!(
            "{:<6} {:<24} {:<28} {}",
            c.id,
            c.name,
            c.default_voice().unwrap_or("-"),
            c.description
        );
    }
    println!(
        "\npage {} of {} ({} total)",
        listing.page,
        listing.total.div_ceil(listing.page_size.max(1) as usize).max(1),
        listing.total
    );

    Ok(())
}
