//! `mcbridge prompt` — Print the system instructions the engine receives.

use mcbridge_config::AppConfig;
use mcbridge_core::SystemInstructions;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, list_files: bool) -> anyhow::Result<()> {
    // Works without a complete config: the default directories apply.
    let paths = match AppConfig::read(config_path) {
        Ok(config) => super::instruction_paths(&config),
        Err(_) => super::instruction_paths(&AppConfig::default()),
    };
    let instructions = SystemInstructions::load(&paths);

    if list_files {
        for file in &instructions.loaded_files {
            eprintln!("{file}");
        }
    }
    println!("{}", instructions.text);
    Ok(())
}
