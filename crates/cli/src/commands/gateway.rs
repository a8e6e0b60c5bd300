//! `voxchat gateway` — Start the HTTP API server.

use voxchat_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("VoxChat Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Storage:   {:?}", config.storage.backend);
    println!("   Tokens:    {} configured", config.auth.tokens.len());

    voxchat_gateway::start(config).await?;

    Ok(())
}
