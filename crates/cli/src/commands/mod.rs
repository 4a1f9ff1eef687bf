pub mod doctor;
pub mod init;
pub mod parse;
pub mod prompt;
pub mod run;
pub mod status;

use mcbridge_config::AppConfig;
use mcbridge_core::InstructionPaths;

pub(crate) fn instruction_paths(config: &AppConfig) -> InstructionPaths {
    InstructionPaths {
        prompts_dir: Some(config.instructions.prompts_dir.clone()),
        docs_dir: Some(config.instructions.docs_dir.clone()),
    }
}
