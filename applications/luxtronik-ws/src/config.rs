use crate::error::{AppError, Result};
use crate::layout::{FirmwareLayout, LayoutTable, DEFAULT_VARIANT};
use crate::session::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::Path};

pub const MIN_UPDATE_INTERVAL_SECS: u64 = 10;
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 900;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub luxtronik: LuxtronikConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LuxtronikConfig {
    /// Controller address; discovered by broadcast when empty
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    pub password: String,
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    /// Bound on one whole poll cycle: login, every GET and close
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
    /// When set, '.' and ',' in values are rewritten to this character
    #[serde(default)]
    pub decimal_separator: Option<char>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_update_interval() -> u64 {
    60
}

fn default_cycle_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Firmware variant to use
    #[serde(default = "default_variant")]
    pub variant: String,
    /// Extra or replacement variants
    #[serde(default)]
    pub variants: BTreeMap<String, FirmwareLayout>,
}

fn default_variant() -> String {
    DEFAULT_VARIANT.into()
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            variants: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

fn default_discovery_prefix() -> String {
    "homeassistant".into()
}

fn default_node_id() -> String {
    "luxtronik".into()
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// LUXTRONIK_HOST and LUXTRONIK_PASSWORD override the file when set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("LUXTRONIK_HOST") {
            cfg.luxtronik.host = Some(host);
        }
        if let Ok(password) = std::env::var("LUXTRONIK_PASSWORD") {
            cfg.luxtronik.password = password;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let interval = self.luxtronik.update_interval_secs;
        if !(MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&interval) {
            return Err(AppError::Config(format!(
                "update_interval_secs must be between {} and {}, got {}",
                MIN_UPDATE_INTERVAL_SECS, MAX_UPDATE_INTERVAL_SECS, interval
            )));
        }
        if self.luxtronik.cycle_timeout_secs == 0 {
            return Err(AppError::Config("cycle_timeout_secs cannot be 0".into()));
        }
        if self.luxtronik.password.is_empty() {
            return Err(AppError::Config("luxtronik password cannot be empty".into()));
        }
        if self.mqtt.host.is_empty() {
            return Err(AppError::Config("mqtt host cannot be empty".into()));
        }
        self.layout_table()?.get(&self.layout.variant)?;
        Ok(())
    }

    /// Configured host, if any. Blank means "discover".
    pub fn host(&self) -> Option<&str> {
        self.luxtronik
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.luxtronik.update_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.luxtronik.cycle_timeout_secs)
    }

    pub fn layout_table(&self) -> Result<LayoutTable> {
        LayoutTable::with_overrides(&self.layout.variants)
    }

    /// The layout selected by `layout.variant`.
    pub fn firmware_layout(&self) -> Result<FirmwareLayout> {
        Ok(self.layout_table()?.get(&self.layout.variant)?.clone())
    }
}

/// Replace $(VAR) and ${VAR} with environment values; "$$" is a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        chars.next();
        let name = read_until(&mut chars, close).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{close}'"))
        })?;
        let value = std::env::var(&name)
            .map_err(|_| AppError::Config(format!("missing environment variable: {name}")))?;
        out.push_str(&value);
    }

    Ok(out)
}

/// Collect characters up to `end`, consuming it. `None` if `end` never comes.
fn read_until<I>(chars: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in chars.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_expand_placeholders() {
        std::env::set_var("LUX_TEST_SECRET", "999999");
        let out = expand_env_placeholders("a: $(LUX_TEST_SECRET)\nb: ${LUX_TEST_SECRET}\nc: $$5\nd: $x").unwrap();
        assert_eq!(out, "a: 999999\nb: 999999\nc: $5\nd: $x");
        std::env::remove_var("LUX_TEST_SECRET");
    }

    #[test]
    #[serial]
    fn test_expand_missing_var_is_error() {
        std::env::remove_var("LUX_TEST_NOT_SET");
        let err = expand_env_placeholders("a: $(LUX_TEST_NOT_SET)").unwrap_err();
        assert!(err.to_string().contains("LUX_TEST_NOT_SET"));
    }

    #[test]
    fn test_expand_unterminated_is_error() {
        assert!(expand_env_placeholders("a: ${OOPS").is_err());
    }
}
