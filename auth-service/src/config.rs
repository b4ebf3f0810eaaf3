use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration;
use common_auth::JwtConfig;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const DEFAULT_ISSUER: &str = "maicare";
const DEFAULT_TOTP_ISSUER: &str = "Maicare";
const DEFAULT_RECOVERY_CODE_COUNT: usize = 10;

#[derive(Clone)]
pub struct AuthConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    pub access_secret: String,
    pub refresh_secret: String,
    pub two_factor_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub two_factor_ttl: Duration,
    pub token_issuer: String,
    pub token_leeway_seconds: u32,
    pub totp_issuer: String,
    pub recovery_code_count: usize,
    pub rotate_refresh_tokens: bool,
    pub cors_origins: Vec<String>,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup so tests need not touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));
        let require = |key: &str| get(key).ok_or_else(|| anyhow!("{key} must be set"));

        let database_url = require("DATABASE_URL")?;

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let ip: IpAddr = host
            .parse()
            .with_context(|| format!("Invalid HOST '{host}'"))?;
        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT '{raw}'"))?,
            None => 8085,
        };

        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("Invalid DB_MAX_CONNECTIONS '{raw}'"))?,
            None => 10,
        };

        let access_ttl = duration_or(get("ACCESS_TOKEN_DURATION"), Duration::minutes(15))
            .context("Failed to parse ACCESS_TOKEN_DURATION")?;
        let refresh_ttl = duration_or(get("REFRESH_TOKEN_DURATION"), Duration::hours(24))
            .context("Failed to parse REFRESH_TOKEN_DURATION")?;
        let two_factor_ttl = duration_or(get("TWO_FA_TOKEN_DURATION"), Duration::minutes(5))
            .context("Failed to parse TWO_FA_TOKEN_DURATION")?;

        let token_leeway_seconds = match get("AUTH_TOKEN_LEEWAY_SECONDS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("Invalid AUTH_TOKEN_LEEWAY_SECONDS '{raw}'"))?,
            None => 0,
        };

        let recovery_code_count = match get("AUTH_RECOVERY_CODE_COUNT") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("Invalid AUTH_RECOVERY_CODE_COUNT '{raw}'"))?,
            None => DEFAULT_RECOVERY_CODE_COUNT,
        };

        let cors_origins = get("AUTH_CORS_ORIGINS")
            .map(|value| parse_list(&value))
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);

        Ok(Self {
            database_url,
            bind_addr: SocketAddr::from((ip, port)),
            db_max_connections,
            access_secret: require("ACCESS_TOKEN_SECRET_KEY")?,
            refresh_secret: require("REFRESH_TOKEN_SECRET_KEY")?,
            two_factor_secret: require("TWO_FA_TOKEN_SECRET_KEY")?,
            access_ttl,
            refresh_ttl,
            two_factor_ttl,
            token_issuer: get("AUTH_TOKEN_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            token_leeway_seconds,
            totp_issuer: get("AUTH_TOTP_ISSUER").unwrap_or_else(|| DEFAULT_TOTP_ISSUER.to_string()),
            recovery_code_count,
            rotate_refresh_tokens: get("AUTH_ROTATE_REFRESH_TOKENS")
                .map(|value| parse_bool(&value))
                .unwrap_or(false),
            cors_origins,
        })
    }

    pub fn jwt_config(&self) -> JwtConfig {
        JwtConfig::new(
            self.token_issuer.clone(),
            self.access_secret.clone(),
            self.refresh_secret.clone(),
            self.two_factor_secret.clone(),
        )
        .with_leeway(self.token_leeway_seconds)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_max_connections", &self.db_max_connections)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("two_factor_ttl", &self.two_factor_ttl)
            .field("token_issuer", &self.token_issuer)
            .field("token_leeway_seconds", &self.token_leeway_seconds)
            .field("totp_issuer", &self.totp_issuer)
            .field("recovery_code_count", &self.recovery_code_count)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("cors_origins", &self.cors_origins)
            .finish_non_exhaustive()
    }
}

const MAX_DURATION_DAYS: i64 = 365;

fn max_duration() -> Duration {
    Duration::days(MAX_DURATION_DAYS)
}

/// Parse `90`, `30s`, `15m`, `24h` or `7d`, up to a year.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().find(|(_, ch)| !ch.is_ascii_digit()) {
        Some((idx, _)) => value.split_at(idx),
        None => (value, "s"),
    };
    if digits.is_empty() {
        bail!("Duration '{value}' has no amount");
    }
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("Invalid duration amount '{digits}'"))?;

    let duration = match unit.trim().to_ascii_lowercase().as_str() {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        other => bail!("Unsupported duration unit '{other}'. Use s, m, h, or d."),
    }
    .ok_or_else(|| anyhow!("Duration '{value}' is out of range"))?;

    if duration <= Duration::zero() {
        bail!("Duration '{value}' must be positive");
    }
    if duration > max_duration() {
        bail!("Duration '{value}' exceeds {MAX_DURATION_DAYS} days");
    }
    Ok(duration)
}

fn duration_or(value: Option<String>, default: Duration) -> Result<Duration> {
    value.map_or(Ok(default), |raw| parse_duration(&raw))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';' || c == ' ')
        .filter_map(normalize_optional)
        .collect()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
