use std::time::Duration;

use crate::waitlist::WaitlistSettings;

/// Start-up configuration, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub metrics_port: Option<u16>,
    pub offer_ttl_hours: u32,
    pub reaper_interval_secs: u64,
    pub accept_base_url: String,
    pub calendar_api_url: Option<String>,
    pub calendar_conflicts: bool,
    pub calendar_timeout_secs: u64,
    /// IANA name passed through to the calendar API.
    pub timezone: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_port: None,
            offer_ttl_hours: 24,
            reaper_interval_secs: 5,
            accept_base_url: "http://localhost:8080".into(),
            calendar_api_url: None,
            calendar_conflicts: false,
            calendar_timeout_secs: 5,
            timezone: "UTC".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            metrics_port: get("SLOTWISE_METRICS_PORT").and_then(|s| s.parse().ok()),
            offer_ttl_hours: get("SLOTWISE_OFFER_TTL_HOURS")
                .and_then(|s| s.parse().ok())
                .filter(|h| *h > 0)
                .unwrap_or(defaults.offer_ttl_hours),
            reaper_interval_secs: get("SLOTWISE_REAPER_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.reaper_interval_secs),
            accept_base_url: get("SLOTWISE_ACCEPT_BASE_URL").unwrap_or(defaults.accept_base_url),
            calendar_api_url: get("SLOTWISE_CALENDAR_API_URL").filter(|s| !s.is_empty()),
            calendar_conflicts: get("SLOTWISE_CALENDAR_CONFLICTS")
                .map(|s| parse_flag(&s))
                .unwrap_or(defaults.calendar_conflicts),
            calendar_timeout_secs: get("SLOTWISE_CALENDAR_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.calendar_timeout_secs),
            timezone: get("SLOTWISE_TIMEZONE").unwrap_or(defaults.timezone),
        }
    }

    pub fn waitlist_settings(&self) -> WaitlistSettings {
        WaitlistSettings {
            offer_ttl: chrono::Duration::hours(i64::from(self.offer_ttl_hours)),
            accept_base_url: self.accept_base_url.clone(),
            ..WaitlistSettings::default()
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn calendar_timeout(&self) -> Duration {
        Duration::from_secs(self.calendar_timeout_secs)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(Config::from_lookup(|_| None), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("SLOTWISE_METRICS_PORT", "9100"),
            ("SLOTWISE_OFFER_TTL_HOURS", "6"),
            ("SLOTWISE_REAPER_INTERVAL_SECS", "30"),
            ("SLOTWISE_ACCEPT_BASE_URL", "https://clinic.example"),
            ("SLOTWISE_CALENDAR_API_URL", "https://cal.example"),
            ("SLOTWISE_CALENDAR_CONFLICTS", "TRUE"),
            ("SLOTWISE_CALENDAR_TIMEOUT_SECS", "2"),
            ("SLOTWISE_TIMEZONE", "Europe/Paris"),
        ]));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.waitlist_settings().offer_ttl, chrono::Duration::hours(6));
        assert_eq!(cfg.reaper_interval(), Duration::from_secs(30));
        assert_eq!(cfg.accept_base_url, "https://clinic.example");
        assert_eq!(cfg.calendar_api_url.as_deref(), Some("https://cal.example"));
        assert!(cfg.calendar_conflicts);
        assert_eq!(cfg.calendar_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.timezone, "Europe/Paris");
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("SLOTWISE_METRICS_PORT", "http"),
            ("SLOTWISE_OFFER_TTL_HOURS", "0"),
            ("SLOTWISE_REAPER_INTERVAL_SECS", "-1"),
            ("SLOTWISE_CALENDAR_API_URL", ""),
            ("SLOTWISE_CALENDAR_CONFLICTS", "maybe"),
        ]));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.offer_ttl_hours, 24);
        assert_eq!(cfg.reaper_interval_secs, 5);
        assert_eq!(cfg.calendar_api_url, None);
        assert!(!cfg.calendar_conflicts);
    }
}
