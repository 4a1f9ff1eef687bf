//! `mcbridge parse` — Classify server log lines from stdin.
//!
//! Prints one JSON object per recognized event. Handy for checking the line
//! grammar against a real server log.

use mcbridge_config::AppConfig;
use mcbridge_feed::{EventAdapter, SelfFilter};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub async fn run(config_path: Option<&Path>, names: Vec<String>) -> anyhow::Result<()> {
    let names = if names.is_empty() {
        AppConfig::read(config_path)
            .map(|c| c.self_names())
            .unwrap_or_default()
    } else {
        names
    };
    let adapter = EventAdapter::new(SelfFilter::new(names))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if let Some(event) = adapter.parse(&line) {
            let mut json = serde_json::to_string(&event)?;
            json.push('\n');
            stdout.write_all(json.as_bytes()).await?;
        }
    }
    stdout.flush().await?;
    Ok(())
}
