//! Project listing

use anyhow::Result;

use chatrelay::config::Config;
use chatrelay::workspace::ProjectRegistry;

use super::format_time;

pub fn list(config: &Config, json: bool) -> Result<()> {
    let projects = ProjectRegistry::open(&config.state_dir())?.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }

    if projects.is_empty() {
        println!("No projects registered. Run `chatrelay init <name>` inside a repository.");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<17} ROOT", "NAME", "ENGINE", "REGISTERED");
    for project in &projects {
        println!(
            "{:<20} {:<10} {:<17} {}",
            project.name.as_str(),
            project.default_engine.as_deref().unwrap_or("-"),
            format_time(&project.registered_at),
            project.root.display()
        );
    }
    Ok(())
}
