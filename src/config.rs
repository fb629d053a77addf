//! Configuration loader and validator for the shop launchers.
//!
//! Each process role reads the environment exactly once at startup and
//! validates every field it needs before touching the network. All problems
//! are reported together so an operator can fix the `.env` file in one pass.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::{Host, Url};

use crate::gate::{Endpoint, GateError};

/// Environment variable names.
pub mod keys {
    pub const POSTGRES_DB: &str = "POSTGRES_DB";
    pub const POSTGRES_USER: &str = "POSTGRES_USER";
    pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
    pub const POSTGRES_HOST: &str = "POSTGRES_HOST";
    pub const POSTGRES_PORT: &str = "POSTGRES_PORT";
    pub const DATABASE_URL: &str = "DATABASE_URL";

    pub const SETTINGS_MODULE: &str = "DJANGO_SETTINGS_MODULE";
    pub const SECRET_KEY: &str = "DJANGO_SECRET_KEY";
    pub const DEBUG: &str = "DJANGO_DEBUG";

    pub const ADMIN_USERNAME: &str = "DJANGO_SUPERUSER_USERNAME";
    pub const ADMIN_PASSWORD: &str = "DJANGO_SUPERUSER_PASSWORD";
    pub const ADMIN_EMAIL: &str = "DJANGO_SUPERUSER_EMAIL";

    pub const BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";

    pub const PAYMENT_SHOP_ID: &str = "YOOKASSA_SHOP_ID";
    pub const PAYMENT_API_KEY: &str = "YOOKASSA_API_KEY";
    pub const PAYMENT_RETURN_URL: &str = "YOOKASSA_RETURN_URL";

    pub const LOG_DIR: &str = "LOG_DIR";
    pub const WAIT_TIMEOUT: &str = "DB_WAIT_TIMEOUT";
    pub const WAIT_INTERVAL_MS: &str = "DB_WAIT_INTERVAL_MS";
}

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_POSTGRES_PORT: u16 = 5432;
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_WAIT_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("incomplete configuration: {}", describe(.missing, .invalid))]
    Incomplete {
        missing: Vec<&'static str>,
        invalid: Vec<String>,
    },
}

impl ConfigError {
    /// Names of required variables that were unset or blank.
    pub fn missing(&self) -> &[&'static str] {
        match self {
            ConfigError::Incomplete { missing, .. } => missing,
            ConfigError::Io(_) => &[],
        }
    }
}

fn describe(missing: &[&'static str], invalid: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing {}", missing.join(", ")));
    }
    if !invalid.is_empty() {
        parts.push(format!("invalid {}", invalid.join("; ")));
    }
    parts.join("; ")
}

/// A string that must never show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub name: String,
    pub user: String,
    pub password: Secret,
    pub host: String,
    pub port: u16,
    /// Full URL taking precedence over the individual fields when set.
    pub url_override: Option<Secret>,
}

impl Database {
    /// Connection URL handed to the pool. Credentials are percent-encoded.
    pub fn url(&self) -> String {
        if let Some(url) = &self.url_override {
            return url.expose().to_string();
        }
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "postgres://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.user),
            urlencoding::encode(self.password.expose()),
            host,
            self.port,
            urlencoding::encode(&self.name),
        )
    }

    /// The endpoint the pool connects to, which is what the readiness gate
    /// must probe. A `DATABASE_URL` override wins over `POSTGRES_HOST` and
    /// `POSTGRES_PORT`. File-backed SQLite URLs have no network endpoint, so
    /// the configured host and port are probed instead.
    pub fn endpoint(&self) -> Result<Endpoint, GateError> {
        let from_url = match &self.url_override {
            Some(url) => url_endpoint(url.expose())?,
            None => None,
        };
        Ok(from_url.unwrap_or_else(|| Endpoint::new(self.host.clone(), self.port)))
    }
}

fn url_endpoint(raw: &str) -> Result<Option<Endpoint>, GateError> {
    let url = Url::parse(raw)
        .map_err(|e| GateError::InvalidEndpoint(format!("{}: {e}", keys::DATABASE_URL)))?;
    let invalid = || {
        let mut shown = url.clone();
        let _ = shown.set_password(None);
        GateError::InvalidEndpoint(shown.to_string())
    };
    match url.scheme() {
        "sqlite" => Ok(None),
        "postgres" | "postgresql" => {
            let host = match url.host() {
                Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
                Some(Host::Ipv4(addr)) => addr.to_string(),
                Some(Host::Ipv6(addr)) => addr.to_string(),
                _ => return Err(invalid()),
            };
            match url.port().unwrap_or(DEFAULT_POSTGRES_PORT) {
                0 => Err(invalid()),
                port => Ok(Some(Endpoint::new(host, port))),
            }
        }
        _ => Err(invalid()),
    }
}

/// Web framework settings shared by the admin server and the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Web {
    pub settings_module: String,
    pub secret_key: Secret,
    pub debug: bool,
}

/// Identity of the administrative account ensured by the bootstrap step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub username: String,
    pub password: Secret,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: Secret,
}

/// Payment provider credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub shop_id: String,
    pub api_key: Secret,
    pub return_url: Option<String>,
}

/// Settings of the launcher itself; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub log_dir: PathBuf,
    /// `None` waits forever.
    pub wait_timeout: Option<Duration>,
    pub wait_interval: Duration,
}

impl Launcher {
    /// Ensure required directories exist (creates `log_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.log_dir.as_os_str().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.log_dir)
    }
}

/// Everything the web-admin entrypoint needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAdminConfig {
    pub database: Database,
    pub web: Web,
    pub admin: Admin,
    pub payment: Payment,
    pub launcher: Launcher,
}

/// Everything the bot entrypoint needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub database: Database,
    pub web: Web,
    pub telegram: Telegram,
    pub payment: Payment,
    pub launcher: Launcher,
}

/// Load `.env` from `path` (if it exists) into the process environment.
pub fn load_env_file(path: Option<&Path>) -> Result<(), ConfigError> {
    let path = path.unwrap_or_else(|| Path::new(".env"));
    if !path.exists() {
        return Ok(());
    }
    dotenvy::from_path(path).map_err(|e| ConfigError::Io(e.to_string()))
}

impl WebAdminConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(lookup);
        let database = read_database(&mut env);
        let web = read_web(&mut env);
        let admin = read_admin(&mut env);
        let payment = read_payment(&mut env);
        let launcher = read_launcher(&mut env);
        env.finish()?;
        Ok(Self {
            database,
            web,
            admin,
            payment,
            launcher,
        })
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(lookup);
        let database = read_database(&mut env);
        let web = read_web(&mut env);
        let telegram = Telegram {
            bot_token: Secret::new(env.required(keys::BOT_TOKEN)),
        };
        let payment = read_payment(&mut env);
        let launcher = read_launcher(&mut env);
        env.finish()?;
        Ok(Self {
            database,
            web,
            telegram,
            payment,
            launcher,
        })
    }
}

fn read_database<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Database {
    let name = env.required(keys::POSTGRES_DB);
    let user = env.required(keys::POSTGRES_USER);
    let password = Secret::new(env.required(keys::POSTGRES_PASSWORD));
    let host = env.required(keys::POSTGRES_HOST);
    let port = match env.required_parsed::<u16>(keys::POSTGRES_PORT) {
        Some(0) => {
            env.reject(keys::POSTGRES_PORT, "must be a port between 1 and 65535");
            0
        }
        Some(port) => port,
        None => 0,
    };
    let url_override = env.optional(keys::DATABASE_URL);
    if let Some(url) = &url_override {
        if url_endpoint(url).is_err() {
            env.reject(
                keys::DATABASE_URL,
                "must be a postgres:// URL with a host, or a sqlite: URL",
            );
        }
    }
    Database {
        name,
        user,
        password,
        host,
        port,
        url_override: url_override.map(Secret::new),
    }
}

fn read_web<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Web {
    let settings_module = env.required(keys::SETTINGS_MODULE);
    if !settings_module.is_empty()
        && !settings_module
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'))
    {
        env.reject(keys::SETTINGS_MODULE, "must be a dotted module path");
    }
    let secret_key = Secret::new(env.required(keys::SECRET_KEY));
    let debug = match env.required_raw(keys::DEBUG) {
        Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
            env.reject(keys::DEBUG, "must be True or False");
            false
        }),
        None => false,
    };
    Web {
        settings_module,
        secret_key,
        debug,
    }
}

fn read_admin<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Admin {
    let username = env.required(keys::ADMIN_USERNAME);
    let password = Secret::new(env.required(keys::ADMIN_PASSWORD));
    let email = env.required(keys::ADMIN_EMAIL);
    if !email.is_empty() && !email.contains('@') {
        env.reject(keys::ADMIN_EMAIL, "must be an email address");
    }
    Admin {
        username,
        password,
        email,
    }
}

fn read_payment<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Payment {
    let shop_id = env.required(keys::PAYMENT_SHOP_ID);
    let api_key = Secret::new(env.required(keys::PAYMENT_API_KEY));
    let return_url = env.optional(keys::PAYMENT_RETURN_URL);
    if let Some(url) = &return_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            env.reject(keys::PAYMENT_RETURN_URL, "must be an http(s) URL");
        }
    }
    Payment {
        shop_id,
        api_key,
        return_url,
    }
}

fn read_launcher<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Launcher {
    let log_dir = env
        .optional(keys::LOG_DIR)
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
    let timeout_secs = env.parsed_or(keys::WAIT_TIMEOUT, DEFAULT_WAIT_TIMEOUT_SECS);
    let interval_ms = env.parsed_or(keys::WAIT_INTERVAL_MS, DEFAULT_WAIT_INTERVAL_MS);
    if interval_ms == 0 {
        env.reject(keys::WAIT_INTERVAL_MS, "must be > 0");
    }
    Launcher {
        log_dir: PathBuf::from(log_dir),
        wait_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        wait_interval: Duration::from_millis(interval_ms.max(1)),
    }
}

/// `True`/`False` as written by Django settings, plus the usual spellings.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reads variables through `lookup`, recording problems instead of stopping
/// at the first one.
struct EnvReader<F> {
    lookup: F,
    missing: Vec<&'static str>,
    invalid: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required_raw(&mut self, key: &'static str) -> Option<String> {
        let value = self.get(key);
        if value.is_none() {
            self.missing.push(key);
        }
        value
    }

    fn required(&mut self, key: &'static str) -> String {
        self.required_raw(key).unwrap_or_default()
    }

    fn required_parsed<T: FromStr>(&mut self, key: &'static str) -> Option<T> {
        let raw = self.required_raw(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                self.reject(key, "could not be parsed");
                None
            }
        }
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.get(key)
    }

    fn parsed_or<T: FromStr>(&mut self, key: &'static str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                self.reject(key, "must be a non-negative integer");
                default
            }),
        }
    }

    fn reject(&mut self, key: &str, reason: &str) {
        let entry = format!("{key} {reason}");
        if !self.invalid.contains(&entry) {
            self.invalid.push(entry);
        }
    }

    fn finish(self) -> Result<(), ConfigError> {
        if self.missing.is_empty() && self.invalid.is_empty() {
            return Ok(());
        }
        Err(ConfigError::Incomplete {
            missing: self.missing,
            invalid: self.invalid,
        })
    }
}

/// Returns the example `.env` shipped with the repository.
pub fn example() -> &'static str {
    include_str!("../.env.example")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn example_vars() -> HashMap<String, String> {
        dotenvy::from_read_iter(example().as_bytes())
            .map(|item| item.unwrap())
            .collect()
    }

    fn lookup(vars: &HashMap<String, String>) -> impl Fn(&str) -> Option<String> + '_ {
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn parse_example_ok() {
        let vars = example_vars();
        let web = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(web.database.port, 5432);
        assert_eq!(web.admin.username, "admin");
        assert!(!web.web.debug);
        assert_eq!(web.launcher.wait_interval, Duration::from_millis(1000));

        let bot = BotConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(bot.telegram.bot_token.expose(), "123456:YOUR_TELEGRAM_BOT_TOKEN");
    }

    #[test]
    fn missing_bot_token_is_named() {
        let mut vars = example_vars();
        vars.remove(keys::BOT_TOKEN);
        let err = BotConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(err.missing(), &[keys::BOT_TOKEN]);
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));

        // The web admin does not need the token.
        WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut vars = example_vars();
        vars.insert(keys::POSTGRES_PASSWORD.into(), "   ".into());
        vars.insert(keys::ADMIN_EMAIL.into(), String::new());
        let err = WebAdminConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(err.missing(), &[keys::POSTGRES_PASSWORD, keys::ADMIN_EMAIL]);
    }

    #[test]
    fn reports_every_problem_at_once() {
        let mut vars = example_vars();
        vars.remove(keys::POSTGRES_HOST);
        vars.insert(keys::POSTGRES_PORT.into(), "not-a-port".into());
        vars.insert(keys::DEBUG.into(), "maybe".into());
        vars.insert(keys::PAYMENT_RETURN_URL.into(), "ftp://example.com".into());
        let err = WebAdminConfig::from_lookup(lookup(&vars)).unwrap_err();
        match err {
            ConfigError::Incomplete { missing, invalid } => {
                assert_eq!(missing, vec![keys::POSTGRES_HOST]);
                assert_eq!(invalid.len(), 3);
                assert!(invalid[0].starts_with("POSTGRES_PORT"));
                assert!(invalid[1].starts_with("DJANGO_DEBUG"));
                assert!(invalid[2].starts_with("YOOKASSA_RETURN_URL"));
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn port_zero_is_invalid() {
        let mut vars = example_vars();
        vars.insert(keys::POSTGRES_PORT.into(), "0".into());
        let err = BotConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("POSTGRES_PORT"));
    }

    #[test]
    fn launcher_defaults_and_overrides() {
        let mut vars = example_vars();
        vars.remove(keys::LOG_DIR);
        vars.remove(keys::WAIT_TIMEOUT);
        vars.remove(keys::WAIT_INTERVAL_MS);
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.launcher.log_dir, PathBuf::from("logs"));
        assert_eq!(cfg.launcher.wait_timeout, Some(Duration::from_secs(60)));

        vars.insert(keys::WAIT_TIMEOUT.into(), "0".into());
        vars.insert(keys::WAIT_INTERVAL_MS.into(), "250".into());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.launcher.wait_timeout, None);
        assert_eq!(cfg.launcher.wait_interval, Duration::from_millis(250));

        vars.insert(keys::WAIT_INTERVAL_MS.into(), "0".into());
        assert!(WebAdminConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn database_url_encodes_credentials() {
        let mut vars = example_vars();
        vars.insert(keys::POSTGRES_PASSWORD.into(), "p@ss:w/rd".into());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(
            cfg.database.url(),
            "postgres://shop:p%40ss%3Aw%2Frd@db:5432/shop"
        );

        vars.insert(keys::DATABASE_URL.into(), "sqlite::memory:".into());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.database.url(), "sqlite::memory:");
    }

    #[test]
    fn ipv6_host_is_bracketed_in_url() {
        let mut vars = example_vars();
        vars.insert(keys::POSTGRES_HOST.into(), "fd00::5".into());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(
            cfg.database.url(),
            "postgres://shop:change-me-postgres@[fd00::5]:5432/shop"
        );
        assert_eq!(cfg.database.endpoint().unwrap(), Endpoint::new("fd00::5", 5432));
    }

    #[test]
    fn gate_endpoint_follows_database_url_override() {
        let mut vars = example_vars();
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.database.endpoint().unwrap(), Endpoint::new("db", 5432));

        vars.insert(
            keys::DATABASE_URL.into(),
            "postgres://u:p@replica.internal:6432/shop".into(),
        );
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(
            cfg.database.endpoint().unwrap(),
            Endpoint::new("replica.internal", 6432)
        );

        vars.insert(keys::DATABASE_URL.into(), "postgresql://u:p@10.0.0.7/shop".into());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.database.endpoint().unwrap(), Endpoint::new("10.0.0.7", 5432));

        vars.insert(keys::DATABASE_URL.into(), "postgres://u:p@[::1]:5433/shop".into());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.database.endpoint().unwrap(), Endpoint::new("::1", 5433));

        // No network endpoint in the URL: the configured host and port are probed.
        vars.insert(keys::DATABASE_URL.into(), "sqlite:///tmp/shop.db".into());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.database.endpoint().unwrap(), Endpoint::new("db", 5432));
    }

    #[test]
    fn unusable_database_url_is_rejected() {
        for bad in ["mysql://u:p@db/shop", "postgres:///shop", "not a url"] {
            let mut vars = example_vars();
            vars.insert(keys::DATABASE_URL.into(), bad.into());
            let err = WebAdminConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(err.to_string().contains("DATABASE_URL"), "{bad}: {err}");
        }
    }

    #[test]
    fn very_large_wait_timeout_is_accepted() {
        let mut vars = example_vars();
        vars.insert(keys::WAIT_TIMEOUT.into(), u64::MAX.to_string());
        let cfg = WebAdminConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(cfg.launcher.wait_timeout, Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let vars = example_vars();
        let cfg = BotConfig::from_lookup(lookup(&vars)).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("YOUR_TELEGRAM_BOT_TOKEN"));
        assert!(!rendered.contains("change-me-postgres"));
        assert!(rendered.contains("Secret(***)"));
    }

    #[test]
    fn ensure_dirs_creates_log_dir() {
        let td = tempfile::tempdir().unwrap();
        let log_path = td.path().join("logs");
        let launcher = Launcher {
            log_dir: log_path.clone(),
            wait_timeout: None,
            wait_interval: Duration::from_millis(10),
        };
        launcher.ensure_dirs().unwrap();
        assert!(log_path.exists());
    }
}
