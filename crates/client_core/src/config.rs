use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{conversation::DEFAULT_PAGE_SIZE, transport::ws_url_from_server_url};

pub const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub server_url: String,
    pub ws_url: Option<String>,
    pub page_size: u32,
    pub token_path: PathBuf,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub log_filter: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            ws_url: None,
            page_size: DEFAULT_PAGE_SIZE,
            token_path: default_token_path(),
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 5,
            log_filter: "info".into(),
        }
    }
}

impl ClientSettings {
    /// Realtime endpoint: explicit `ws_url`, else derived from `server_url`.
    pub fn realtime_url(&self) -> anyhow::Result<String> {
        match &self.ws_url {
            Some(ws_url) => Ok(ws_url.clone()),
            None => Ok(ws_url_from_server_url(&self.server_url)?),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_token_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskboard-chat")
        .join("token.json")
}

/// Defaults, then `client.toml` in the working directory, then `APP__*`
/// environment variables.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn apply_file(settings: &mut ClientSettings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    apply_pairs(settings, |key| file_cfg.get(key).cloned());
}

pub fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    apply_pairs(settings, |key| lookup(&format!("APP__{}", key.to_ascii_uppercase())));
}

fn apply_pairs(settings: &mut ClientSettings, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = get("ws_url") {
        settings.ws_url = Some(v);
    }
    if let Some(v) = get("page_size").and_then(|v| v.parse::<u32>().ok()) {
        settings.page_size = v.clamp(1, 100);
    }
    if let Some(v) = get("token_path") {
        settings.token_path = PathBuf::from(v);
    }
    if let Some(v) = get("reconnect_delay_ms").and_then(|v| v.parse().ok()) {
        settings.reconnect_delay_ms = v;
    }
    if let Some(v) = get("max_reconnect_attempts").and_then(|v| v.parse().ok()) {
        settings.max_reconnect_attempts = v;
    }
    if let Some(v) = get("log_filter") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut settings = ClientSettings::default();
        apply_file(
            &mut settings,
            r#"
server_url = "https://boards.example.com"
page_size = "500"
log_filter = "debug"
"#,
        );
        assert_eq!(settings.server_url, "https://boards.example.com");
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.log_filter, "debug");
        assert_eq!(
            settings.realtime_url().expect("ws url"),
            "wss://boards.example.com"
        );
    }

    #[test]
    fn env_overrides_file_and_ignores_garbage_numbers() {
        let mut settings = ClientSettings::default();
        apply_file(&mut settings, r#"reconnect_delay_ms = "250""#);
        apply_env(&mut settings, |key| match key {
            "APP__WS_URL" => Some("ws://127.0.0.1:9000".into()),
            "APP__RECONNECT_DELAY_MS" => Some("not-a-number".into()),
            "APP__MAX_RECONNECT_ATTEMPTS" => Some("2".into()),
            _ => None,
        });
        assert_eq!(settings.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(settings.max_reconnect_attempts, 2);
        assert_eq!(
            settings.realtime_url().expect("ws url"),
            "ws://127.0.0.1:9000"
        );
    }

    #[test]
    fn malformed_file_is_ignored() {
        let mut settings = ClientSettings::default();
        apply_file(&mut settings, "this is = = not toml");
        assert_eq!(settings.server_url, ClientSettings::default().server_url);
    }
}
