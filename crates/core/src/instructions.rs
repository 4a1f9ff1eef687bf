//! System instructions — the document sent to the engine at session start.
//!
//! Composition is fixed and happens once:
//!
//! 1. **Prompts** — every `*.md` in the prompts directory (shipped behavior
//!    and tips), in filename order
//! 2. **Docs** — every `*.md` in the docs directory (server-specific
//!    documentation written by the operator), in filename order
//!
//! Sections are joined with a horizontal rule. Missing directories are
//! skipped; if nothing was loaded a one-line fallback is used.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Separator placed between loaded documents.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

const FALLBACK_INSTRUCTIONS: &str = "You are a Minecraft bot agent.";

/// Where instruction documents live.
#[derive(Debug, Clone, Default)]
pub struct InstructionPaths {
    pub prompts_dir: Option<PathBuf>,
    pub docs_dir: Option<PathBuf>,
}

/// The composed instructions document and what went into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInstructions {
    pub text: String,

    /// Files loaded, in composition order (for diagnostics)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loaded_files: Vec<String>,
}

impl SystemInstructions {
    pub fn load(paths: &InstructionPaths) -> Self {
        let mut parts: Vec<String> = Vec::new();
        let mut loaded_files: Vec<String> = Vec::new();

        if let Some(dir) = &paths.prompts_dir {
            let n = Self::load_directory(dir, &mut parts, &mut loaded_files);
            if n > 0 {
                info!(count = n, dir = %dir.display(), "Loaded prompt files");
            }
        }

        if let Some(dir) = &paths.docs_dir {
            let n = Self::load_directory(dir, &mut parts, &mut loaded_files);
            if n > 0 {
                info!(count = n, dir = %dir.display(), "Loaded doc files");
            }
        }

        if parts.is_empty() {
            debug!("No instruction files found, using fallback");
            return Self::fallback();
        }

        Self {
            text: parts.join(SECTION_SEPARATOR),
            loaded_files,
        }
    }

    pub fn fallback() -> Self {
        Self {
            text: FALLBACK_INSTRUCTIONS.into(),
            loaded_files: vec![],
        }
    }

    /// Read every `*.md` file in `dir`, sorted by file name.
    fn load_directory(dir: &Path, parts: &mut Vec<String>, loaded: &mut Vec<String>) -> usize {
        if !dir.is_dir() {
            return 0;
        }

        let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .and_then(|ext| ext.to_str())
                            .is_some_and(|ext| ext == "md")
                })
                .collect(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read instructions directory");
                return 0;
            }
        };

        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut count = 0;
        for path in entries {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    loaded.push(path.display().to_string());
                    parts.push(content);
                    count += 1;
                }
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }
        count
    }

    /// Rough size estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.text.len() / 4
    }
}
