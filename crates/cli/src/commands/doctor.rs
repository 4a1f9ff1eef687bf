//! `mcbridge doctor` — Diagnose configuration and environment.

use mcbridge_config::{AppConfig, FeedKind};
use mcbridge_core::SystemInstructions;
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq)]
pub enum Check {
    Ok(String),
    Warn(String),
    Fail(String),
}

impl Check {
    fn is_issue(&self) -> bool {
        !matches!(self, Check::Ok(_))
    }
}

/// Locate `program` the way a process spawn would: paths are checked
/// directly, bare names are searched on `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn command_check(label: &str, command: Option<&str>, optional: bool) -> Check {
    match command {
        None => Check::Fail(format!("{label}: no command configured")),
        Some(cmd) => match find_program(cmd) {
            Some(path) => Check::Ok(format!("{label}: {}", path.display())),
            None if optional => Check::Warn(format!("{label}: '{cmd}' not found (optional)")),
            None => Check::Fail(format!("{label}: '{cmd}' not found")),
        },
    }
}

pub fn diagnose(config_path: Option<&Path>) -> Vec<Check> {
    let mut checks = Vec::new();
    let path = AppConfig::resolve_path(config_path);

    let config = match AppConfig::read(config_path) {
        Ok(config) => {
            checks.push(Check::Ok(format!("Config file: {}", path.display())));
            config
        }
        Err(e) => {
            checks.push(Check::Fail(e.to_string()));
            return checks;
        }
    };

    for field in config.missing_fields() {
        checks.push(Check::Fail(format!("Missing required field: {field}")));
    }
    for problem in config.invalid_fields() {
        checks.push(Check::Fail(format!("Invalid setting: {problem}")));
    }

    let instructions = SystemInstructions::load(&super::instruction_paths(&config));
    if instructions.loaded_files.is_empty() {
        checks.push(Check::Warn(format!(
            "No instruction files in {} or {}; the fallback instructions will be used",
            config.instructions.prompts_dir.display(),
            config.instructions.docs_dir.display()
        )));
    } else {
        checks.push(Check::Ok(format!(
            "Instructions: {} file(s), ~{} tokens",
            instructions.loaded_files.len(),
            instructions.estimated_tokens()
        )));
    }

    if config.engine.command.is_some() {
        checks.push(command_check(
            "Engine",
            config.engine.command.as_deref(),
            false,
        ));
    }

    match config.feed.kind {
        FeedKind::Command => {
            if config.feed.command.is_some() {
                checks.push(command_check("Feed", config.feed.command.as_deref(), false));
            }
        }
        FeedKind::File => match &config.feed.path {
            Some(path) if path.is_file() => {
                checks.push(Check::Ok(format!("Feed: {}", path.display())))
            }
            Some(path) => checks.push(Check::Warn(format!(
                "Feed: {} does not exist yet (will be followed once created)",
                path.display()
            ))),
            None => {}
        },
    }

    if config.game_provider().is_none() {
        checks.push(Check::Warn(
            "No provider has `game = true`; the game connection will not be managed".into(),
        ));
    }
    for (id, provider) in &config.providers {
        if provider.command.is_some() {
            checks.push(command_check(
                &format!("Provider '{id}'"),
                provider.command.as_deref(),
                provider.optional,
            ));
        }
    }

    checks
}

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("🩺 mcbridge doctor");
    println!("==================\n");

    let checks = diagnose(config_path);
    for check in &checks {
        match check {
            Check::Ok(msg) => println!("  ✅ {msg}"),
            Check::Warn(msg) => println!("  ⚠️  {msg}"),
            Check::Fail(msg) => println!("  ❌ {msg}"),
        }
    }

    println!();
    let failures = checks.iter().filter(|c| matches!(c, Check::Fail(_))).count();
    let issues = checks.iter().filter(|c| c.is_issue()).count();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    if failures > 0 {
        anyhow::bail!("{failures} check(s) failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let checks = diagnose(Some(&dir.path().join("agent.toml")));
        assert_eq!(checks.len(), 1);
        assert!(matches!(&checks[0], Check::Fail(msg) if msg.contains("mcbridge init")));
    }

    #[test]
    fn every_missing_field_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[minecraft]\nport = 25565\n").unwrap();

        let failures: Vec<String> = diagnose(Some(&path))
            .into_iter()
            .filter_map(|c| match c {
                Check::Fail(msg) => Some(msg),
                _ => None,
            })
            .collect();
        for field in [
            "minecraft.host",
            "minecraft.username",
            "minecraft.version",
            "engine.command",
        ] {
            assert!(
                failures.iter().any(|f| f.ends_with(field)),
                "{field} not reported in {failures:?}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn finds_programs_on_path_and_by_path() {
        assert!(find_program("sh").is_some());
        assert!(find_program("/bin/sh").is_some());
        assert!(find_program("definitely-not-a-real-program-xyz").is_none());
    }
}
