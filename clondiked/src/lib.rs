//! Shared daemon scaffolding for `ccnd` and `pend`: config loading and the
//! tracing setup both binaries use (ambient, spec. §1 workspace shape).

use clondike_node::ClondikeConfig;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod ctlsock;

/// Reads a `ClondikeConfig` from a TOML file, falling back to defaults when
/// unset or missing — mirrors `wormhole`'s plain-struct config, read once at
/// startup rather than through a global.
pub fn load_config(path: Option<&str>) -> anyhow::Result<ClondikeConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(toml_like_parse(&text)?)
        }
        None => Ok(ClondikeConfig::default()),
    }
}

/// A tiny hand-rolled reader to keep the dependency list need-driven: the
/// config file is `key = "value"` or `key = 123` lines, one per field.
/// (A real deployment would reach for the `toml` crate; none of this
/// workspace's other crates need it, so there's no precedent to follow.)
fn toml_like_parse(text: &str) -> anyhow::Result<ClondikeConfig> {
    let mut config = ClondikeConfig::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        match key {
            "checkpoint_dir" => config.checkpoint_dir = value.to_string(),
            "manager_table_capacity" => config.manager_table_capacity = value.parse()?,
            "local_arch" => config.local_arch = value.to_string(),
            _ => tracing::warn!(key, "unknown config key, ignoring"),
        }
    }
    Ok(config)
}

/// Matches `wormhole`'s `main.rs` tracing setup: `TRACE` under debug
/// assertions, `INFO` otherwise, span-close events.
pub fn init_tracing() {
    let level = if cfg!(debug_assertions) { Level::TRACE } else { Level::INFO };
    tracing_subscriber::fmt().with_span_events(FmtSpan::CLOSE).with_max_level(level).init();
}
