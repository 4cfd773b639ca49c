use anyhow::Result;

use crate::config::Config;

pub fn list_sources(config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<16} {:<8} {:<8} {}", "SOURCE", "CWD", "TIMEOUT", "COMMAND");
    for (name, source) in &config.sources {
        let cwd_status = if source.cwd.is_dir() { "OK" } else { "MISSING" };
        let timeout = source
            .timeout_secs
            .unwrap_or(config.pipeline.timeout_secs);
        println!(
            "{:<16} {:<8} {:<8} {}",
            name,
            cwd_status,
            format!("{}s", timeout),
            source.command.join(" ")
        );
    }

    Ok(())
}
