use std::{collections::HashMap, fs, time::Duration};

use crate::reconnect::ReconnectPolicy;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub service_url: String,
    pub stream_url: Option<String>,
    pub history_seed_limit: u32,
    pub pending_timeout_ms: u64,
    pub presence_interval_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_delay_secs: u64,
    pub reconnect_max_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8443".into(),
            stream_url: None,
            history_seed_limit: 100,
            pending_timeout_ms: 15_000,
            presence_interval_secs: 30,
            reconnect_base_ms: 1_000,
            reconnect_max_delay_secs: 30,
            reconnect_max_attempts: 5,
        }
    }
}

impl SyncSettings {
    pub fn stream_base(&self) -> &str {
        self.stream_url.as_deref().unwrap_or(&self.service_url)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs.max(1))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_ms.max(1)),
            max_delay: Duration::from_secs(self.reconnect_max_delay_secs.max(1)),
            max_attempts: self.reconnect_max_attempts.max(1),
        }
    }
}

pub fn load_settings() -> SyncSettings {
    let mut settings = SyncSettings::default();

    if let Ok(raw) = fs::read_to_string("sync.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            if let Some(v) = file_cfg.get("service_url").and_then(|v| v.as_str()) {
                settings.service_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("stream_url").and_then(|v| v.as_str()) {
                settings.stream_url = Some(v.to_string());
            }
            if let Some(v) = file_cfg.get("history_seed_limit").and_then(|v| v.as_integer()) {
                settings.history_seed_limit = v.max(1) as u32;
            }
            if let Some(v) = file_cfg.get("pending_timeout_ms").and_then(|v| v.as_integer()) {
                settings.pending_timeout_ms = v.max(1) as u64;
            }
            if let Some(v) = file_cfg
                .get("presence_interval_secs")
                .and_then(|v| v.as_integer())
            {
                settings.presence_interval_secs = v.max(1) as u64;
            }
            if let Some(v) = file_cfg.get("reconnect_base_ms").and_then(|v| v.as_integer()) {
                settings.reconnect_base_ms = v.max(1) as u64;
            }
            if let Some(v) = file_cfg
                .get("reconnect_max_delay_secs")
                .and_then(|v| v.as_integer())
            {
                settings.reconnect_max_delay_secs = v.max(1) as u64;
            }
            if let Some(v) = file_cfg
                .get("reconnect_max_attempts")
                .and_then(|v| v.as_integer())
            {
                settings.reconnect_max_attempts = v.max(1) as u32;
            }
        }
    }

    if let Ok(v) = std::env::var("SYNC_SERVICE_URL") {
        settings.service_url = v;
    }
    if let Ok(v) = std::env::var("APP__SERVICE_URL") {
        settings.service_url = v;
    }

    if let Ok(v) = std::env::var("SYNC_STREAM_URL") {
        settings.stream_url = Some(v);
    }
    if let Ok(v) = std::env::var("APP__STREAM_URL") {
        settings.stream_url = Some(v);
    }

    if let Ok(v) = std::env::var("APP__HISTORY_SEED_LIMIT") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.history_seed_limit = parsed.max(1);
        }
    }
    if let Ok(v) = std::env::var("APP__PENDING_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.pending_timeout_ms = parsed.max(1);
        }
    }
    if let Ok(v) = std::env::var("APP__PRESENCE_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.presence_interval_secs = parsed.max(1);
        }
    }
    if let Ok(v) = std::env::var("APP__RECONNECT_MAX_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.reconnect_max_attempts = parsed.max(1);
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    #[test]
    fn default_policy_matches_settings() {
        let settings = SyncSettings::default();
        let policy = settings.reconnect_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(settings.pending_timeout(), Duration::from_secs(15));
        assert_eq!(settings.stream_base(), "http://127.0.0.1:8443");
    }

    #[test]
    fn env_overrides_take_precedence() {
        env::set_var("APP__SERVICE_URL", "http://10.0.0.1:9000");
        env::set_var("APP__PENDING_TIMEOUT_MS", "2500");

        let settings = load_settings();
        assert_eq!(settings.service_url, "http://10.0.0.1:9000");
        assert_eq!(settings.pending_timeout_ms, 2500);

        env::remove_var("APP__SERVICE_URL");
        env::remove_var("APP__PENDING_TIMEOUT_MS");
    }
}
