use super::NearYouConfig;
use std::str::FromStr;
use tracing::warn;

impl NearYouConfig {
    /// Apply environment variable overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overrides from an arbitrary lookup. Unparseable values are logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NATS_URL") {
            self.nats.url = v;
        }
        if let Some(n) = parsed(&lookup, "NEARYOU_RADIUS_M") {
            self.proximity.radius_m = n;
        }
        if let Some(n) = parsed(&lookup, "NEARYOU_EXIT_RADIUS_M") {
            self.proximity.exit_radius_m = n;
        }
        if let Some(n) = parsed(&lookup, "NEARYOU_COOLDOWN_SECS") {
            self.proximity.cooldown_secs = n;
        }
        if let Some(n) = parsed(&lookup, "NEARYOU_CACHE_TTL_SECS") {
            self.cache.ttl_secs = n;
        }
        if let Some(v) = lookup("NEARYOU_LLM_BASE_URL") {
            self.generator.base_url = v;
        }
        if let Some(v) = lookup("NEARYOU_LLM_API_KEY") {
            self.generator.api_key = Some(v).filter(|key| !key.is_empty());
        }
        if let Some(v) = lookup("NEARYOU_LLM_MODEL") {
            self.generator.model = v;
        }
        if let Some(v) = lookup("NEARYOU_CLICKHOUSE_URL") {
            self.sink.url = v;
        }
        if let Some(v) = lookup("NEARYOU_OSRM_URL") {
            self.simulation.osrm_url = v;
        }
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = NearYouConfig::default();
        config.apply_overrides_from(lookup(&[
            ("NATS_URL", "nats://bus:4222"),
            ("NEARYOU_RADIUS_M", "75"),
            ("NEARYOU_EXIT_RADIUS_M", "90.5"),
            ("NEARYOU_COOLDOWN_SECS", "60"),
            ("NEARYOU_CACHE_TTL_SECS", "3600"),
            ("NEARYOU_LLM_API_KEY", "sk-test"),
            ("NEARYOU_OSRM_URL", "http://osrm-milano:5000"),
        ]));

        assert_eq!(config.nats.url, "nats://bus:4222");
        assert_eq!(config.proximity.radius_m, 75.0);
        assert_eq!(config.proximity.exit_radius_m, 90.5);
        assert_eq!(config.proximity.cooldown_secs, 60);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.generator.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.simulation.osrm_url, "http://osrm-milano:5000");
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let mut config = NearYouConfig::default();
        config.apply_overrides_from(lookup(&[
            ("NEARYOU_RADIUS_M", "near"),
            ("NEARYOU_COOLDOWN_SECS", "-5"),
            ("NEARYOU_LLM_API_KEY", ""),
        ]));

        assert_eq!(config.proximity.radius_m, 200.0);
        assert_eq!(config.proximity.cooldown_secs, 300);
        assert_eq!(config.generator.api_key, None);
    }
}
