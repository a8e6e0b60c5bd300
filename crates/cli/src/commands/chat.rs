//! `voxchat chat` — Interactive or single-message chat with a character.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use voxchat_config::AppConfig;
use voxchat_core::character::CharacterId;
use voxchat_core::event::EventBus;
use voxchat_pipeline::{CancellationToken, PipelineWarning};

pub async fn run(
    config: AppConfig,
    character: String,
    message: Option<String>,
    session: Option<String>,
    token: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    QINIU_LLM_KEY   = '...'   (Qiniu AI)");
        eprintln!("    OPENAI_API_KEY  = 'sk-...' (OpenAI-compatible)");
        eprintln!("    VOXCHAT_API_KEY = '...'   (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let identity = super::identity_for(&config, token.as_deref())?;
    let events = Arc::new(EventBus::default());
    let pipeline = voxchat_gateway::build_pipeline(&config, events).await?;

    let character_id = CharacterId::from(character);
    let persona = pipeline
        .characters()
        .get(&character_id)
        .await?
        .ok_or_else(|| format!("Unknown character '{character_id}'. Try `voxchat characters`."))?;

    let resolved =
        pipeline
            .resolver()
            .resolve(&identity, session.as_deref(), character_id.clone())?;

    // Ctrl-C cancels whatever turn is in flight.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let outcome = pipeline
            .chat(character_id, msg, &resolved.scope, cancel.child_token())
            .await;
        eprint!("\r              \r");
        let outcome = outcome?;
        println!("{}", outcome.reply);
        report_warnings(&outcome.warnings);
        if let Some(token) = &resolved.response_token {
            eprintln!("  session: {token}");
        }
        return Ok(());
    }

    println!();
    println!("  VoxChat — talking to {}", persona.name);
    if !persona.description.is_empty() {
        println!("  {}", persona.description);
    }
    println!();
    println!("  Model:     {}", pipeline.settings().model);
    if let Some(token) = &resolved.response_token {
        println!("  Session:   {token}  (resume with --session)");
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line.is_empty() {
            print!("  You > ");
            std::io::stdout().flush()?;
            continue;
        }
        if cancel.is_cancelled() {
            break;
        }

        eprint!("  ...");
        let result = pipeline
            .chat(
                character_id.clone(),
                line,
                &resolved.scope,
                cancel.child_token(),
            )
            .await;
        eprint!("\r     \r");

        match result {
            Ok(outcome) => {
                println!();
                for reply_line in outcome.reply.lines() {
                    println!("  {} > {reply_line}", persona.name);
                }
                report_warnings(&outcome.warnings);
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }

        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

fn report_warnings(warnings: &[PipelineWarning]) {
    for warning in warnings {
        match warning {
            PipelineWarning::PersistenceFailed(e) => {
                eprintln!("  [Warning] this turn was not saved: {e}")
            }
            PipelineWarning::SynthesisFailed(e) => {
                eprintln!("  [Warning] no audio for this reply: {e}")
            }
        }
    }
}
