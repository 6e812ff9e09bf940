use std::collections::HashMap;

/// Read-only key/value configuration supplied by an external collaborator.
///
/// The core never parses configuration file syntax; it consults this
/// interface at initialization for tuning knobs.
pub trait Config: Send + Sync {
    /// Look up a string value by dotted key (for example `pack.depth`).
    fn get(&self, key: &str) -> Option<String>;

    /// Look up an integer value; `None` if absent or unparseable.
    fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

/// `HashMap`-backed [`Config`] for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl Config for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Typed settings the storage and pack layers consult at initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreSettings {
    /// Maximum delta chain depth accepted when resolving objects.
    pub delta_chain_limit: usize,
    /// Sliding-window size for delta base selection at pack-write time.
    pub delta_window: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            delta_chain_limit: 50,
            delta_window: 10,
        }
    }
}

impl CoreSettings {
    /// Read settings from a [`Config`], falling back to defaults for any
    /// absent or malformed key.
    pub fn from_config(config: &dyn Config) -> Self {
        let defaults = Self::default();
        Self {
            delta_chain_limit: config
                .get_int("pack.depth")
                .filter(|&v| v > 0)
                .map(|v| v as usize)
                .unwrap_or(defaults.delta_chain_limit),
            delta_window: config
                .get_int("pack.window")
                .filter(|&v| v > 0)
                .map(|v| v as usize)
                .unwrap_or(defaults.delta_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_config_empty() {
        let cfg = MapConfig::new();
        let settings = CoreSettings::from_config(&cfg);
        assert_eq!(settings, CoreSettings::default());
        assert_eq!(settings.delta_chain_limit, 50);
        assert_eq!(settings.delta_window, 10);
    }

    #[test]
    fn reads_overrides() {
        let mut cfg = MapConfig::new();
        cfg.set("pack.depth", "7");
        cfg.set("pack.window", "25");
        let settings = CoreSettings::from_config(&cfg);
        assert_eq!(settings.delta_chain_limit, 7);
        assert_eq!(settings.delta_window, 25);
    }

    #[test]
    fn malformed_values_fall_back() {
        let mut cfg = MapConfig::new();
        cfg.set("pack.depth", "not a number");
        cfg.set("pack.window", "-3");
        let settings = CoreSettings::from_config(&cfg);
        assert_eq!(settings, CoreSettings::default());
    }
}
