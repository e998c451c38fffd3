//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for every device REST call
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    #[serde(default)]
    pub hue: HueConfig,

    #[serde(default)]
    pub nanoleaf: NanoleafConfig,

    #[serde(default)]
    pub music: MusicConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            http_timeout_ms: default_http_timeout_ms(),
            hue: HueConfig::default(),
            nanoleaf: NanoleafConfig::default(),
            music: MusicConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    5555
}

fn default_http_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct HueConfig {
    #[serde(default = "default_hue_port")]
    pub port: u16,
    /// Bridge group whose lights are the default command targets
    #[serde(default = "default_hue_group")]
    pub group: String,
    /// Pre-provisioned bridge username; registered on connect when absent
    pub username: Option<String>,
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

impl Default for HueConfig {
    fn default() -> Self {
        Self {
            port: default_hue_port(),
            group: default_hue_group(),
            username: None,
            device_type: default_device_type(),
        }
    }
}

fn default_hue_port() -> u16 {
    80
}

fn default_hue_group() -> String {
    "lab".to_string()
}

fn default_device_type() -> String {
    "ambilight_bridge#server".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NanoleafConfig {
    #[serde(default = "default_nanoleaf_port")]
    pub port: u16,
    /// Pre-provisioned auth token; requested on connect when absent
    pub auth_token: Option<String>,
}

impl Default for NanoleafConfig {
    fn default() -> Self {
        Self {
            port: default_nanoleaf_port(),
            auth_token: None,
        }
    }
}

fn default_nanoleaf_port() -> u16 {
    16021
}

#[derive(Debug, Clone, Deserialize)]
pub struct MusicConfig {
    #[serde(default = "default_music_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Command-line player used by the process audio backend
    #[serde(default = "default_player")]
    pub player: String,
    #[serde(default = "default_player_args")]
    pub player_args: Vec<String>,
}

impl MusicConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            dir: default_music_dir(),
            extension: default_extension(),
            poll_interval_ms: default_poll_interval_ms(),
            player: default_player(),
            player_args: default_player_args(),
        }
    }
}

fn default_music_dir() -> PathBuf {
    PathBuf::from("./music")
}

fn default_extension() -> String {
    "mp3".to_string()
}

fn default_poll_interval_ms() -> u64 {
    300
}

fn default_player() -> String {
    "mpg123".to_string()
}

fn default_player_args() -> Vec<String> {
    vec!["-q".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub hue_cloud_fallback: bool,
    #[serde(default = "default_hue_cloud_url")]
    pub hue_cloud_url: String,
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_discovery_timeout_ms(),
            hue_cloud_fallback: true,
            hue_cloud_url: default_hue_cloud_url(),
        }
    }
}

fn default_discovery_timeout_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_hue_cloud_url() -> String {
    "https://discovery.meethue.com/".to_string()
}

/// Get config directory (AMBI_CONFIG_DIR, XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AMBI_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/ambilight-bridge");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("ambilight-bridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config/ambilight-bridge");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("ambilight-bridge");
        }
    }

    PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", i64::from(default_port()))?
        // Load from config file if it exists (config.toml, config.json, ...)
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // AMBI_PORT, AMBI_HUE__GROUP, AMBI_MUSIC__DIR, ...
        .add_source(
            ::config::Environment::with_prefix("AMBI")
                .prefix_separator("_")
                .separator("__")
                .list_separator(" ")
                .with_list_parse_key("music.player_args")
                .try_parsing(true),
        );

    // Explicit precedence: AMBI_PORT > PORT > config file > default
    if let Ok(port) = std::env::var("AMBI_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        for key in [
            "AMBI_PORT",
            "PORT",
            "AMBI_HUE__GROUP",
            "AMBI_MUSIC__DIR",
            "AMBI_NANOLEAF__AUTH_TOKEN",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_config_file() {
        clear_env();
        env::set_var("AMBI_CONFIG_DIR", "/tmp/ambi-test-nonexistent");

        let config = load_config().expect("config should load");

        env::remove_var("AMBI_CONFIG_DIR");

        assert_eq!(config.port, 5555);
        assert_eq!(config.hue.port, 80);
        assert_eq!(config.hue.group, "lab");
        assert!(config.hue.username.is_none());
        assert_eq!(config.nanoleaf.port, 16021);
        assert_eq!(config.music.dir, PathBuf::from("./music"));
        assert_eq!(config.music.extension, "mp3");
        assert_eq!(config.music.poll_interval(), Duration::from_millis(300));
        assert!(config.discovery.hue_cloud_fallback);
    }

    #[test]
    #[serial]
    fn test_nested_env_overrides() {
        clear_env();
        env::set_var("AMBI_CONFIG_DIR", "/tmp/ambi-test-nonexistent");
        env::set_var("AMBI_HUE__GROUP", "living");
        env::set_var("AMBI_MUSIC__DIR", "/srv/music");
        env::set_var("AMBI_NANOLEAF__AUTH_TOKEN", "tok123");

        let config = load_config().expect("config should load");

        clear_env();
        env::remove_var("AMBI_CONFIG_DIR");

        assert_eq!(config.hue.group, "living");
        assert_eq!(config.music.dir, PathBuf::from("/srv/music"));
        assert_eq!(config.nanoleaf.auth_token.as_deref(), Some("tok123"));
    }

    #[test]
    #[serial]
    fn test_port_env_fallback() {
        clear_env();
        env::set_var("AMBI_CONFIG_DIR", "/tmp/ambi-test-nonexistent");
        env::set_var("PORT", "3000");

        let config = load_config().expect("config should load");

        clear_env();
        env::remove_var("AMBI_CONFIG_DIR");

        assert_eq!(config.port, 3000, "PORT env var should set config.port");
    }

    #[test]
    #[serial]
    fn test_ambi_port_takes_precedence_over_port() {
        clear_env();
        env::set_var("AMBI_CONFIG_DIR", "/tmp/ambi-test-nonexistent");
        env::set_var("AMBI_PORT", "5000");
        env::set_var("PORT", "3000");

        let config = load_config().expect("config should load");

        clear_env();
        env::remove_var("AMBI_CONFIG_DIR");

        assert_eq!(config.port, 5000);
    }

    #[test]
    #[serial]
    fn test_invalid_port_uses_default() {
        clear_env();
        env::set_var("AMBI_CONFIG_DIR", "/tmp/ambi-test-nonexistent");
        env::set_var("PORT", "not-a-number");

        let config = load_config().expect("config should load");

        clear_env();
        env::remove_var("AMBI_CONFIG_DIR");

        assert_eq!(config.port, 5555, "Invalid PORT should fall back to default");
    }

    #[test]
    #[serial]
    fn test_config_file_is_read() {
        clear_env();
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(
            temp_dir.path().join("config.toml"),
            "port = 6000\n[hue]\ngroup = \"studio\"\nusername = \"abc\"\n[music]\nextension = \"ogg\"\n",
        )
        .expect("write config");
        env::set_var("AMBI_CONFIG_DIR", temp_dir.path());

        let config = load_config().expect("config should load");

        env::remove_var("AMBI_CONFIG_DIR");

        assert_eq!(config.port, 6000);
        assert_eq!(config.hue.group, "studio");
        assert_eq!(config.hue.username.as_deref(), Some("abc"));
        assert_eq!(config.music.extension, "ogg");
        assert_eq!(config.hue.port, 80);
    }
}
