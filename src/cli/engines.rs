//! Engine listing

use anyhow::Result;

use chatrelay::agent::{EngineRegistry, install_message};
use chatrelay::config::Config;

pub fn list(config: &Config) -> Result<()> {
    let engines = EngineRegistry::from_settings(&config.engines)?;

    for engine in engines.engines() {
        let default = if engine.id() == config.default_engine {
            " (default)"
        } else {
            ""
        };
        if engine.is_available() {
            println!("  ✓ {}{}", engine.id(), default);
        } else {
            println!("  ✗ {}{} - {}", engine.id(), default, install_message(engine.as_ref()));
        }
    }
    Ok(())
}
