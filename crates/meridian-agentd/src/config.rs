use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use meridian_limiter::LimitTable;
use meridian_model::Period;
use meridian_observe::LoggerFormat;
use meridian_sanitize::validate_url;

const DEFAULT_PLATFORMS: &str = "twitter,mastodon,discord";

const DEFAULT_TOPICS: [&str; 6] = [
    "business automation tips",
    "AI and productivity",
    "social media marketing strategies",
    "entrepreneurship insights",
    "customer engagement best practices",
    "technology trends for business",
];

/// All configuration problems found in one pass, so the operator fixes the
/// whole environment at once instead of replaying startup per missing key.
#[derive(Debug)]
pub struct ConfigError {
    pub errors: Vec<String>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.errors.len())
    }
}

impl std::error::Error for ConfigError {}

/// Per-platform settings: where to publish, what to fetch, and the post
/// limits that feed the rate limiter.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub name: String,
    pub webhook_url: String,
    pub inbox_url: Option<String>,
    pub token: Option<String>,
    pub hourly_limit: u64,
    pub daily_limit: u64,
    pub max_post_length: usize,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `host:port` of the primary networked store; absent means local-only.
    pub store_addr: Option<String>,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub log_format: LoggerFormat,
    pub log_file: Option<PathBuf>,
    pub bind_addr: SocketAddr,
    pub generator_url: String,
    pub generator_key: String,
    pub payment_url: String,
    pub payment_client_id: String,
    pub payment_secret: String,
    pub platforms: Vec<PlatformConfig>,
    pub topics: Vec<String>,
}

impl AgentConfig {
    /// Load from process environment. Any validation failure here is fatal
    /// to startup by design.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (the environment in production,
    /// a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let mut required = |key: &str, why: &str| -> String {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(value) => value,
                None => {
                    errors.push(format!("{key} is required: {why}"));
                    String::new()
                }
            }
        };

        let generator_url = required("MERIDIAN_GENERATOR_URL", "AI content generation endpoint");
        let generator_key = required("MERIDIAN_GENERATOR_KEY", "AI content generation credential");
        let payment_url = required("MERIDIAN_PAYMENT_URL", "payment provider endpoint");
        let payment_client_id = required("MERIDIAN_PAYMENT_CLIENT_ID", "payment provider login");
        let payment_secret = required("MERIDIAN_PAYMENT_CLIENT_SECRET", "payment provider secret");

        for (key, url) in [
            ("MERIDIAN_GENERATOR_URL", &generator_url),
            ("MERIDIAN_PAYMENT_URL", &payment_url),
        ] {
            if !url.is_empty() && !validate_url(url) {
                errors.push(format!("{key}: unsafe or non-http(s) url {url:?}"));
            }
        }

        let log_level = lookup("MERIDIAN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_format = match lookup("MERIDIAN_LOG_FORMAT").as_deref() {
            None => LoggerFormat::Text,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                errors.push(format!("MERIDIAN_LOG_FORMAT: {e}"));
                LoggerFormat::Text
            }),
        };

        let host = lookup("MERIDIAN_HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(&lookup, "MERIDIAN_HTTP_PORT", 8080u16, &mut errors);
        let bind_addr = match format!("{host}:{port}").parse() {
            Ok(addr) => addr,
            Err(_) => {
                errors.push(format!("MERIDIAN_HTTP_HOST: invalid host {host:?}"));
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let platform_names = lookup("MERIDIAN_PLATFORMS")
            .unwrap_or_else(|| DEFAULT_PLATFORMS.to_string());
        let mut platforms = Vec::new();
        for name in platform_names.split(',') {
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() {
                continue;
            }
            platforms.push(load_platform(&lookup, &name, &mut errors));
        }
        if platforms.is_empty() {
            errors.push("MERIDIAN_PLATFORMS: at least one platform is required".to_string());
        }

        let topics = match lookup("MERIDIAN_TOPICS") {
            Some(raw) => raw
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            None => DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
        };

        if !errors.is_empty() {
            return Err(ConfigError { errors });
        }

        Ok(Self {
            store_addr: lookup("MERIDIAN_STORE_ADDR").filter(|v| !v.trim().is_empty()),
            data_dir: lookup("MERIDIAN_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            log_level,
            log_format,
            log_file: lookup("MERIDIAN_LOG_FILE").map(PathBuf::from),
            bind_addr,
            generator_url,
            generator_key,
            payment_url,
            payment_client_id,
            payment_secret,
            platforms,
            topics,
        })
    }

    /// Rate-limiter configuration derived from the platform entries.
    pub fn limit_table(&self) -> LimitTable {
        let mut table = LimitTable::new();
        for platform in &self.platforms {
            table.insert(
                platform.name.clone(),
                [
                    (Period::Hourly, platform.hourly_limit),
                    (Period::Daily, platform.daily_limit),
                ]
                .into(),
            );
        }
        table
    }

    /// Per-platform character budgets for generated content.
    pub fn post_limits(&self) -> HashMap<String, usize> {
        self.platforms
            .iter()
            .map(|p| (p.name.clone(), p.max_post_length))
            .collect()
    }
}

/// Built-in posting defaults per known platform: (hourly, daily, max chars).
fn platform_defaults(name: &str) -> (u64, u64, usize) {
    match name {
        "twitter" => (5, 50, 280),
        "mastodon" => (10, 100, 500),
        "discord" => (20, 200, 2_000),
        _ => (5, 50, 1_000),
    }
}

fn load_platform(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    errors: &mut Vec<String>,
) -> PlatformConfig {
    let upper = name.to_ascii_uppercase();
    let (hourly, daily, max_len) = platform_defaults(name);

    let webhook_key = format!("MERIDIAN_{upper}_WEBHOOK_URL");
    let webhook_url = match lookup(&webhook_key).filter(|v| !v.trim().is_empty()) {
        Some(url) if !validate_url(&url) => {
            errors.push(format!("{webhook_key}: unsafe or non-http(s) url {url:?}"));
            url
        }
        Some(url) => url,
        None => {
            errors.push(format!("{webhook_key} is required: publish endpoint for {name}"));
            String::new()
        }
    };

    let inbox_key = format!("MERIDIAN_{upper}_INBOX_URL");
    let inbox_url = lookup(&inbox_key);
    if let Some(url) = &inbox_url
        && !validate_url(url)
    {
        errors.push(format!("{inbox_key}: unsafe or non-http(s) url {url:?}"));
    }

    PlatformConfig {
        name: name.to_string(),
        webhook_url,
        inbox_url,
        token: lookup(&format!("MERIDIAN_{upper}_TOKEN")),
        hourly_limit: parse_or(lookup, &format!("MERIDIAN_{upper}_HOURLY_LIMIT"), hourly, errors),
        daily_limit: parse_or(lookup, &format!("MERIDIAN_{upper}_DAILY_LIMIT"), daily, errors),
        max_post_length: parse_or(
            lookup,
            &format!("MERIDIAN_{upper}_MAX_POST_LENGTH"),
            max_len,
            errors,
        ),
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    errors: &mut Vec<String>,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                errors.push(format!("{key}: invalid value {raw:?}"));
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal() -> HashMap<String, String> {
        env(&[
            ("MERIDIAN_GENERATOR_URL", "https://gen.example.com"),
            ("MERIDIAN_GENERATOR_KEY", "gk"),
            ("MERIDIAN_PAYMENT_URL", "https://pay.example.com"),
            ("MERIDIAN_PAYMENT_CLIENT_ID", "cid"),
            ("MERIDIAN_PAYMENT_CLIENT_SECRET", "cs"),
            ("MERIDIAN_TWITTER_WEBHOOK_URL", "https://t.example.com/hook"),
            ("MERIDIAN_MASTODON_WEBHOOK_URL", "https://m.example.com/hook"),
            ("MERIDIAN_DISCORD_WEBHOOK_URL", "https://d.example.com/hook"),
        ])
    }

    fn load(vars: &HashMap<String, String>) -> Result<AgentConfig, ConfigError> {
        AgentConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn minimal_environment_loads_with_defaults() {
        let config = load(&minimal()).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.platforms.len(), 3);
        assert!(config.store_addr.is_none());
        assert!(!config.topics.is_empty());

        let twitter = config.platforms.iter().find(|p| p.name == "twitter").unwrap();
        assert_eq!(twitter.hourly_limit, 5);
        assert_eq!(twitter.daily_limit, 50);
        assert_eq!(twitter.max_post_length, 280);
    }

    #[test]
    fn missing_keys_are_all_reported() {
        let err = load(&HashMap::new()).unwrap_err();

        // Five service keys plus three platform webhook URLs.
        assert_eq!(err.errors.len(), 8);
        assert!(err.errors.iter().any(|e| e.contains("MERIDIAN_GENERATOR_URL")));
        assert!(err.errors.iter().any(|e| e.contains("MERIDIAN_PAYMENT_CLIENT_SECRET")));
        assert!(err.errors.iter().any(|e| e.contains("MERIDIAN_DISCORD_WEBHOOK_URL")));
    }

    #[test]
    fn unsafe_urls_are_rejected() {
        let mut vars = minimal();
        vars.insert("MERIDIAN_GENERATOR_URL".into(), "ftp://gen.example.com".into());
        vars.insert(
            "MERIDIAN_TWITTER_WEBHOOK_URL".into(),
            "http://127.0.0.1/hook".into(),
        );

        let err = load(&vars).unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert!(err.errors.iter().any(|e| e.contains("MERIDIAN_GENERATOR_URL")));
        assert!(err.errors.iter().any(|e| e.contains("MERIDIAN_TWITTER_WEBHOOK_URL")));
    }

    #[test]
    fn invalid_numbers_are_reported_per_key() {
        let mut vars = minimal();
        vars.insert("MERIDIAN_HTTP_PORT".into(), "not-a-port".into());
        vars.insert("MERIDIAN_TWITTER_HOURLY_LIMIT".into(), "many".into());

        let err = load(&vars).unwrap_err();
        assert_eq!(err.errors.len(), 2);
    }

    #[test]
    fn custom_platform_list_with_overrides() {
        let mut vars = env(&[
            ("MERIDIAN_GENERATOR_URL", "https://gen.example.com"),
            ("MERIDIAN_GENERATOR_KEY", "gk"),
            ("MERIDIAN_PAYMENT_URL", "https://pay.example.com"),
            ("MERIDIAN_PAYMENT_CLIENT_ID", "cid"),
            ("MERIDIAN_PAYMENT_CLIENT_SECRET", "cs"),
        ]);
        vars.insert("MERIDIAN_PLATFORMS".into(), "bluesky".into());
        vars.insert(
            "MERIDIAN_BLUESKY_WEBHOOK_URL".into(),
            "https://b.example.com/hook".into(),
        );
        vars.insert("MERIDIAN_BLUESKY_HOURLY_LIMIT".into(), "7".into());

        let config = load(&vars).unwrap();
        assert_eq!(config.platforms.len(), 1);
        let platform = &config.platforms[0];
        assert_eq!(platform.name, "bluesky");
        assert_eq!(platform.hourly_limit, 7);
        assert_eq!(platform.daily_limit, 50);
        assert_eq!(platform.max_post_length, 1_000);
    }

    #[test]
    fn limit_table_covers_every_platform() {
        let config = load(&minimal()).unwrap();
        let table = config.limit_table();

        assert_eq!(table["discord"][&Period::Hourly], 20);
        assert_eq!(table["mastodon"][&Period::Daily], 100);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn store_addr_blank_is_treated_as_absent() {
        let mut vars = minimal();
        vars.insert("MERIDIAN_STORE_ADDR".into(), "  ".into());
        assert!(load(&vars).unwrap().store_addr.is_none());

        vars.insert("MERIDIAN_STORE_ADDR".into(), "cache.internal:6379".into());
        assert_eq!(
            load(&vars).unwrap().store_addr.as_deref(),
            Some("cache.internal:6379")
        );
    }
}
