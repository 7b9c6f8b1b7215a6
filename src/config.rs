use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Base URL of the hosted auth service (e.g. `https://<project>.supabase.co`).
    pub auth_url: String,
    pub auth_anon_key: String,
    pub webhook_secret: Option<String>, // Optional: webhooks are open when unset
    pub public_base_url: Option<String>,
    pub dashboard_utc_offset_minutes: i32,
    pub realtime_channel: String,
    pub session_cache_ttl_secs: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub feed_limit: i64,
    pub lead_list_limit: i64,
    pub lead_events_limit: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: parse_or("PORT", 3000)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 10)
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a positive number"))?,
            auth_url: std::env::var("AUTH_URL")
                .or_else(|_| std::env::var("SUPABASE_URL"))
                .map_err(|_| anyhow::anyhow!("AUTH_URL or SUPABASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("AUTH_URL cannot be empty");
                    }
                    validate_http_url("AUTH_URL", &url)?;
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            auth_anon_key: std::env::var("AUTH_ANON_KEY")
                .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!("AUTH_ANON_KEY or SUPABASE_ANON_KEY environment variable required")
                })
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("AUTH_ANON_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            webhook_secret: optional("WEBHOOK_SECRET"),
            public_base_url: optional("PUBLIC_BASE_URL")
                .map(|url| {
                    validate_http_url("PUBLIC_BASE_URL", &url)?;
                    Ok::<_, anyhow::Error>(url.trim_end_matches('/').to_string())
                })
                .transpose()?,
            dashboard_utc_offset_minutes: parse_or("DASHBOARD_UTC_OFFSET_MINUTES", -180)
                .map_err(|_| anyhow::anyhow!("DASHBOARD_UTC_OFFSET_MINUTES must be an integer"))
                .and_then(|minutes: i32| {
                    if minutes.abs() >= 24 * 60 {
                        anyhow::bail!("DASHBOARD_UTC_OFFSET_MINUTES must be within +/- 1439");
                    }
                    Ok(minutes)
                })?,
            realtime_channel: optional("REALTIME_CHANNEL")
                .unwrap_or_else(|| "lead_events_inserts".to_string()),
            session_cache_ttl_secs: parse_or("SESSION_CACHE_TTL_SECS", 300)
                .map_err(|_| anyhow::anyhow!("SESSION_CACHE_TTL_SECS must be a number"))?,
            rate_limit_per_second: parse_or("RATE_LIMIT_PER_SECOND", 10)
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_PER_SECOND must be a number"))?,
            rate_limit_burst: parse_or("RATE_LIMIT_BURST", 20)
                .map_err(|_| anyhow::anyhow!("RATE_LIMIT_BURST must be a number"))?,
            feed_limit: 80,
            lead_list_limit: 100,
            lead_events_limit: 200,
        };

        if config.webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set: ingestion endpoints accept unauthenticated calls");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database URL: {}", redacted_url(&config.database_url));
        tracing::debug!("Auth URL: {}", config.auth_url);
        tracing::debug!("Realtime channel: {}", config.realtime_channel);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Configuration with defaults for everything except the external URLs.
    /// Used by tests and tooling that never touch the environment.
    pub fn for_tests(auth_url: impl Into<String>) -> Self {
        Self {
            database_url: "postgresql://test".to_string(),
            port: 0,
            db_max_connections: 1,
            auth_url: auth_url.into(),
            auth_anon_key: "test-anon-key".to_string(),
            webhook_secret: None,
            public_base_url: None,
            dashboard_utc_offset_minutes: 0,
            realtime_channel: "lead_events_inserts".to_string(),
            session_cache_ttl_secs: 300,
            rate_limit_per_second: 0,
            rate_limit_burst: 0,
            feed_limit: 80,
            lead_list_limit: 100,
            lead_events_limit: 200,
        }
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.rate_limit_per_second > 0 && self.rate_limit_burst > 0
    }
}

/// Absolute http(s) URL check for service endpoints.
fn validate_http_url(name: &str, raw: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(())
}

/// URL with the password stripped, for logging.
fn redacted_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() && parsed.set_password(Some("***")).is_err() {
                return "<unprintable>".to_string();
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, T::Err> {
    match optional(name) {
        Some(raw) => raw.trim().parse(),
        None => Ok(default),
    }
}
