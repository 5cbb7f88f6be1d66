use console::style;
use tokio_util::sync::CancellationToken;

use bootkit::backend::RunningBackend;
use bootkit::utils::format_duration;
use bootkit::{Orchestrator, Result};

use super::install::with_progress;

pub async fn execute(
    orchestrator: &Orchestrator,
    detach: bool,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let backend = with_progress(orchestrator, json, "start_backend", orchestrator.start_backend()).await?;
    supervise(backend, detach, json, cancel).await
}

/// Print readiness, then either release the backend or follow it until exit or Ctrl-C.
pub async fn supervise(
    backend: RunningBackend,
    detach: bool,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    if !json {
        println!(
            "{} Backend ready in {} (pid {})",
            style("✓").green().bold(),
            style(format_duration(backend.startup)).yellow(),
            backend
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }

    if detach {
        if !json {
            println!("  {}", style(format!("Output continues in {}", backend.log.display())).dim());
        }
        backend.detach();
        return Ok(());
    }

    if !json {
        println!("  {}", style("Following backend output, Ctrl-C to stop.").dim());
    }
    match backend.follow(cancel).await? {
        Some(code) if code != 0 => {
            tracing::warn!("Backend exited with code {}", code);
        }
        _ => {}
    }
    Ok(())
}
