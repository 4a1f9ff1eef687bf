//! `mcbridge status` — Show the resolved configuration.

use anyhow::Context;
use mcbridge_config::{AppConfig, FeedKind};
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).context("Failed to load configuration")?;
    let mc = &config.minecraft;

    println!("⛏️  mcbridge status");
    println!("==================");
    println!("  Config:       {}", AppConfig::resolve_path(config_path).display());
    println!(
        "  Server:       {}:{} (version {})",
        mc.host.as_deref().unwrap_or("?"),
        mc.port,
        mc.version.as_deref().unwrap_or("?")
    );
    println!("  Agent:        {}", config.agent_name());
    println!("  Self names:   {}", config.self_names().join(", "));
    println!(
        "  Engine:       {} (model {}, turn timeout {}s)",
        config.engine.command.as_deref().unwrap_or("?"),
        config.engine.model,
        config.engine.turn_timeout_secs
    );
    println!(
        "  Batching:     {}ms quiet period, idle tick {}",
        config.batching.message_batch_delay_ms,
        if config.batching.idle_tick_secs > 0 {
            format!("every {}s", config.batching.idle_tick_secs)
        } else {
            "off".to_string()
        }
    );
    println!("  Relevance:    {:?}", config.relevance.policy);
    println!(
        "  Reconnect:    {}",
        if config.reconnect.enabled {
            format!(
                "{}ms → {}ms (×{})",
                config.reconnect.initial_delay_ms,
                config.reconnect.max_delay_ms,
                config.reconnect.backoff_multiplier
            )
        } else {
            "disabled".to_string()
        }
    );
    let feed = match config.feed.kind {
        FeedKind::Command => format!("command {}", config.feed.command.as_deref().unwrap_or("?")),
        FeedKind::File => format!(
            "file {}",
            config
                .feed
                .path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "?".into())
        ),
    };
    println!("  Feed:         {feed}");
    println!("  Providers:");
    for (id, provider) in &config.providers {
        let role = match (provider.game, provider.optional) {
            (true, _) => "game",
            (false, true) => "optional",
            (false, false) => "required",
        };
        println!(
            "    {id:<12} {role:<9} {}",
            provider.command.as_deref().unwrap_or("?")
        );
    }
    Ok(())
}
