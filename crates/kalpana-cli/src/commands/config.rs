use std::path::PathBuf;

use anyhow::Result;

use kalpana_core::config::{AuthorityMode, Config, ConfigPaths};

pub fn print_effective() -> Result<()> {
    let config = super::load_config()?;
    println!("{}", config.to_toml_string()?);
    Ok(())
}

pub fn init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let paths = ConfigPaths::resolve()?;
    let config_path = path.unwrap_or_else(|| paths.config_path.clone());
    if config_path.exists() && !force {
        return Err(anyhow::anyhow!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        ));
    }
    let config = Config::default_config(AuthorityMode::from_env(), &paths);
    config.save(&config_path)?;
    println!("Config written to {}", config_path.display());
    Ok(())
}
