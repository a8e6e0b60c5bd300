pub mod characters;
pub mod chat;
pub mod gateway;
pub mod history;
pub mod onboard;
pub mod status;

use std::path::{Path, PathBuf};

use voxchat_config::AppConfig;
use voxchat_core::identity::{AuthProvider, RequestIdentity};
use voxchat_gateway::auth::StaticTokenAuth;

/// The config file in use: an explicit path, or the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load, apply environment overrides and validate.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match explicit {
        None => AppConfig::load(),
        Some(path) => AppConfig::load_from(path).and_then(|mut c| {
            c.apply_env(|key| std::env::var(key).ok())?;
            c.validate()?;
            Ok(c)
        }),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

/// Verify a bearer token the way the gateway does.
pub fn identity_for(
    config: &AppConfig,
    token: Option<&str>,
) -> Result<RequestIdentity, Box<dyn std::error::Error>> {
    let Some(token) = token else {
        return Ok(RequestIdentity::Anonymous);
    };
    StaticTokenAuth::from_config(&config.auth)
        .identify(token)
        .map(RequestIdentity::Verified)
        .ok_or_else(|| "Token is not listed in the [auth] table".into())
}
