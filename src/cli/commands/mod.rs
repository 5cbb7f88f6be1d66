pub mod bootstrap;
pub mod config;
pub mod elevate;
pub mod install;
pub mod mirrors;
pub mod start;
pub mod status;

use std::io::IsTerminal;

use dialoguer::Select;

use bootkit::mirrors::MirrorKind;
use bootkit::{BootError, Orchestrator, Result};

/// Resolve a `--mirror` value: `ask` opens an interactive picker, anything
/// else passes through to the catalog.
pub fn choose_mirror(
    orchestrator: &Orchestrator,
    kind: MirrorKind,
    value: Option<String>,
    json: bool,
) -> Result<Option<String>> {
    match value.as_deref() {
        Some("ask") => {
            if json || !std::io::stdin().is_terminal() {
                return Err(BootError::Config(
                    "--mirror ask needs an interactive terminal".to_string(),
                ));
            }

            let mirrors = orchestrator.list_mirrors(kind);
            if mirrors.is_empty() {
                return Err(BootError::Config(format!("No {} mirrors configured", kind)));
            }
            let default_key = orchestrator
                .context()
                .catalog
                .default_entry(kind)
                .map(|e| e.key.clone());
            let items: Vec<String> = mirrors
                .iter()
                .map(|m| format!("{} ({})", m.entry.display_name, m.entry.url))
                .collect();
            let default = mirrors
                .iter()
                .position(|m| Some(&m.entry.key) == default_key.as_ref())
                .unwrap_or(0);

            let picked = Select::new()
                .with_prompt(format!("Select {} mirror", kind))
                .items(&items)
                .default(default)
                .interact()
                .map_err(|e| BootError::Other(anyhow::anyhow!("mirror selection failed: {}", e)))?;
            Ok(Some(mirrors[picked].entry.key.clone()))
        }
        _ => Ok(value),
    }
}
