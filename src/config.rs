pub use config::{Config, File as ConfigFile};
pub use once_cell::sync::OnceCell;
use std::error::Error;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

/// Load `config.toml` from the working directory when present. Every key has
/// a built-in default, so the file is optional.
pub fn init_global_config() -> Result<(), Box<dyn Error>> {
    if GLOBAL_CONFIG.get().is_some() {
        return Ok(());
    }
    let config = Config::builder()
        .add_source(ConfigFile::with_name("config.toml").required(false))
        .build()?;
    let _ = GLOBAL_CONFIG.set(config);
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get_or_init(|| {
        Config::builder()
            .build()
            .expect("empty configuration is always valid")
    })
}

/// Number of parallel block-decode workers (`sync.workers`); defaults to the
/// machine's available parallelism.
pub fn loader_workers() -> usize {
    let config = get_global_config();
    match config.get_int("sync.workers") {
        Ok(n) if n > 0 => n as usize,
        _ => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

/// Capacity of the decoded-block channel between the loaders and the
/// sequencer (`sync.channel_capacity`); defaults to the worker count.
pub fn changeset_channel_capacity() -> usize {
    let config = get_global_config();
    match config.get_int("sync.channel_capacity") {
        Ok(n) if n > 0 => n as usize,
        _ => loader_workers(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        assert!(loader_workers() >= 1);
        assert!(changeset_channel_capacity() >= 1);
    }
}
