use console::style;

use bootkit::config::AppConfig;
use bootkit::Result;

pub fn show(json: bool) -> Result<()> {
    let config_path = AppConfig::config_path()?;
    let config = AppConfig::load()?;

    if json {
        crate::cli::render::emit(&config);
        return Ok(());
    }

    if !config_path.exists() {
        println!("{}", style("No configuration file, showing defaults.").dim());
        println!();
    }

    let root = config
        .resolve_root()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "(unresolved)".to_string());

    println!("{}", style("Current Configuration").bold().cyan());
    println!();
    println!("  Root:             {}", style(root).white());
    println!("  Toolchain mirror: {}", style(&config.toolchain_mirror).white());
    println!("  VCS mirror:       {}", style(&config.vcs_mirror).white());
    println!("  Package mirror:   {}", style(&config.package_mirror).white());
    println!("  Repository:       {}", style(&config.repository).white());
    println!("  Branch:           {}", style(&config.branch).white());
    println!("  Manifest:         {}", style(&config.manifest).white());
    println!("  Entry point:      {}", style(&config.entry_point).white());
    println!("  Ready markers:    {}", style(config.ready_markers.join(", ")).white());
    println!("  Ready timeout:    {}", style(&config.ready_timeout).yellow());
    println!("  Bootstrap URL:    {}", style(&config.bootstrap_url).dim());
    println!();
    println!("Config file: {}", style(config_path.display()).dim());

    Ok(())
}

pub fn set(key: &str, value: String) -> Result<()> {
    let mut config = AppConfig::load().unwrap_or_default();

    if let Err(e) = config.set(key, value.clone()) {
        println!("{} {}", style("!").yellow().bold(), style(&e).red());
        println!("\nAvailable keys:");
        println!("  app_root, toolchain_mirror, vcs_mirror, package_mirror, repository,");
        println!("  branch, manifest, entry_point, ready_markers, ready_timeout,");
        println!("  bootstrap_url, connect_timeout, lock_stale_after");
        return Err(e);
    }

    config.save()?;

    println!(
        "{} Set {} = {}",
        style("✓").green().bold(),
        style(key).cyan(),
        style(&value).white()
    );

    Ok(())
}

pub fn path() -> Result<()> {
    println!("{}", AppConfig::config_path()?.display());
    Ok(())
}
