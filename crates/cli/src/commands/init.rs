//! `mcbridge init` — Write a configuration template.

use mcbridge_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = AppConfig::resolve_path(config_path);
    if path.exists() {
        anyhow::bail!(
            "{} already exists; remove it first to write a fresh template",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;

    println!("✅ Wrote {}", path.display());
    println!("   Fill in [minecraft], [engine] and [providers], then run `mcbridge doctor`.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_template_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/agent.toml");

        run(Some(&path)).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, AppConfig::default_toml());

        std::fs::write(&path, "# edited").unwrap();
        assert!(run(Some(&path)).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited");
    }
}
