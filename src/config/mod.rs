//! Application configuration.
//!
//! [`Config::default`] plus the `with_*` builders is enough for tests and
//! embedded use. Deployments call [`Config::from_env`], which reads an optional
//! `.env` file and then the process environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `APP_ENV` | `local` (`production` turns debug mode off) |
//! | `APP_DEBUG` | derived from `APP_ENV` |
//! | `APP_HTTP_HOST` / `APP_HTTP_PORT` | `0.0.0.0` / `80` |
//! | `APP_MAX_UPLOAD_FILE_SIZE` | 20 MiB |
//! | `APP_REQUEST_TIMEOUT_SECS` | none |
//! | `JWT_ENABLED`, `JWT_SECRET`, `JWT_LIFESPAN_MINUTES` | off, none, 10080 |
//! | `CACHE_ENABLED` | `false` |
//! | `SESSION_ENABLED`, `SESSION_COOKIE_NAME` | off, `condor_session` |
//! | `SESSION_LIFETIME_MINUTES` | 120 |
//! | `HASHING_COST` | 10 |
//! | `DB_DRIVER` + `MYSQL_*` / `POSTGRES_*` / `SQLITE_DB_PATH` | none |
//! | `LOG_LEVEL` / `LOG_FORMAT` | `info` / `text` |

use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

pub const PRODUCTION: &str = "production";

const DEFAULT_MAX_UPLOAD_SIZE: usize = 20 * 1024 * 1024;
const DEFAULT_JWT_LIFESPAN_MINUTES: u64 = 7 * 24 * 60;
const DEFAULT_SESSION_LIFETIME_MINUTES: u64 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("unsupported database driver {driver:?} (expected mysql, postgres or sqlite)")]
    UnsupportedDriver { driver: String },

    #[error("JWT is enabled but JWT_SECRET is not set")]
    MissingJwtSecret,

    #[error("failed to load .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl HttpConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtConfig {
    pub enabled: bool,
    pub secret: Option<String>,
    pub lifespan: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: None,
            lifespan: Duration::from_secs(DEFAULT_JWT_LIFESPAN_MINUTES * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub enabled: bool,
    pub cookie_name: String,
    /// How long an untouched session is kept.
    pub lifetime: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: "condor_session".into(),
            lifetime: Duration::from_secs(DEFAULT_SESSION_LIFETIME_MINUTES * 60),
        }
    }
}

/// Connection settings for the database the application's ORM connects to.
///
/// condor does not open the connection itself; [`dsn`](Self::dsn) produces the
/// string to hand to whichever client is registered with
/// [`AppBuilder::provide_lazy`](crate::app::AppBuilder::provide_lazy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    Mysql {
        host: String,
        port: String,
        username: String,
        password: String,
        database: String,
        charset: String,
    },
    Postgres {
        host: String,
        port: String,
        user: String,
        password: String,
        database: String,
        ssl_mode: String,
        timezone: String,
    },
    Sqlite {
        path: String,
    },
}

impl DatabaseConfig {
    pub fn driver(&self) -> &'static str {
        match self {
            Self::Mysql { .. } => "mysql",
            Self::Postgres { .. } => "postgres",
            Self::Sqlite { .. } => "sqlite",
        }
    }

    pub fn dsn(&self) -> String {
        match self {
            Self::Mysql {
                host,
                port,
                username,
                password,
                database,
                charset,
            } => format!(
                "{username}:{password}@tcp({host}:{port})/{database}?charset={charset}&parseTime=True&loc=Local"
            ),
            Self::Postgres {
                host,
                port,
                user,
                password,
                database,
                ssl_mode,
                timezone,
            } => format!(
                "host={host} user={user} password={password} dbname={database} port={port} sslmode={ssl_mode} TimeZone={timezone}"
            ),
            Self::Sqlite { path } => path.clone(),
        }
    }

    fn from_lookup(
        driver: &str,
        var: &impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |name: &str| var(name).unwrap_or_default();
        match driver.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::Mysql {
                host: get("MYSQL_HOST"),
                port: get("MYSQL_PORT"),
                username: get("MYSQL_USERNAME"),
                password: get("MYSQL_PASSWORD"),
                database: get("MYSQL_DB_NAME"),
                charset: var("MYSQL_CHARSET").unwrap_or_else(|| "utf8mb4".into()),
            }),
            "postgres" => Ok(Self::Postgres {
                host: get("POSTGRES_HOST"),
                port: get("POSTGRES_PORT"),
                user: get("POSTGRES_USER"),
                password: get("POSTGRES_PASSWORD"),
                database: get("POSTGRES_DB_NAME"),
                ssl_mode: var("POSTGRES_SSL_MODE").unwrap_or_else(|| "disable".into()),
                timezone: var("POSTGRES_TIMEZONE").unwrap_or_else(|| "UTC".into()),
            }),
            "sqlite" => Ok(Self::Sqlite {
                path: get("SQLITE_DB_PATH"),
            }),
            _ => Err(ConfigError::UnsupportedDriver {
                driver: driver.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub env: String,
    /// Expose panic messages and stack traces in 500 responses.
    pub debug: bool,
    pub http: HttpConfig,
    pub max_upload_size: usize,
    pub request_timeout: Option<Duration>,
    pub jwt: JwtConfig,
    pub cache_enabled: bool,
    pub session: SessionConfig,
    /// bcrypt cost for [`Hashing`](crate::hashing::Hashing).
    pub hashing_cost: u32,
    pub database: Option<DatabaseConfig>,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: "local".into(),
            debug: true,
            http: HttpConfig::default(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            request_timeout: None,
            jwt: JwtConfig::default(),
            cache_enabled: false,
            session: SessionConfig::default(),
            hashing_cost: crate::hashing::DEFAULT_COST,
            database: None,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed `.env` file, a value that does not
    /// parse, an unsupported `DB_DRIVER`, or JWT enabled without a secret.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `var`, which maps a variable name to its value.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(env) = var("APP_ENV") {
            config.env = env;
        }
        config.debug = match var("APP_DEBUG") {
            Some(value) => parse_bool("APP_DEBUG", &value)?,
            None => !config.is_production(),
        };

        if let Some(host) = var("APP_HTTP_HOST") {
            config.http.host = host;
        }
        if let Some(port) = var("APP_HTTP_PORT") {
            config.http.port = parse("APP_HTTP_PORT", &port, "port number")?;
        }
        if let Some(size) = var("APP_MAX_UPLOAD_FILE_SIZE") {
            config.max_upload_size = parse("APP_MAX_UPLOAD_FILE_SIZE", &size, "byte count")?;
        }
        if let Some(secs) = var("APP_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse("APP_REQUEST_TIMEOUT_SECS", &secs, "number of seconds")?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        config.jwt.secret = var("JWT_SECRET").filter(|s| !s.is_empty());
        config.jwt.enabled = match var("JWT_ENABLED") {
            Some(value) => parse_bool("JWT_ENABLED", &value)?,
            None => config.jwt.secret.is_some(),
        };
        if let Some(minutes) = var("JWT_LIFESPAN_MINUTES") {
            let minutes: u64 = parse("JWT_LIFESPAN_MINUTES", &minutes, "number of minutes")?;
            config.jwt.lifespan = Duration::from_secs(minutes * 60);
        }

        if let Some(value) = var("CACHE_ENABLED") {
            config.cache_enabled = parse_bool("CACHE_ENABLED", &value)?;
        }

        if let Some(value) = var("SESSION_ENABLED") {
            config.session.enabled = parse_bool("SESSION_ENABLED", &value)?;
        }
        if let Some(name) = var("SESSION_COOKIE_NAME").filter(|n| !n.is_empty()) {
            config.session.cookie_name = name;
        }
        if let Some(minutes) = var("SESSION_LIFETIME_MINUTES") {
            let minutes: u64 = parse("SESSION_LIFETIME_MINUTES", &minutes, "number of minutes")?;
            config.session.lifetime = Duration::from_secs(minutes * 60);
        }
        if let Some(cost) = var("HASHING_COST") {
            config.hashing_cost = parse("HASHING_COST", &cost, "bcrypt cost")?;
        }

        if let Some(driver) = var("DB_DRIVER").filter(|d| !d.is_empty()) {
            config.database = Some(DatabaseConfig::from_lookup(&driver, &var)?);
        }

        if let Some(level) = var("LOG_LEVEL") {
            config.log.level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            config.log.format = format.parse().map_err(|()| ConfigError::Invalid {
                var: "LOG_FORMAT",
                value: format.clone(),
                expected: "log format (text or json)",
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.enabled && self.jwt.secret.is_none() {
            return Err(ConfigError::MissingJwtSecret);
        }
        if !(4..=31).contains(&self.hashing_cost) {
            return Err(ConfigError::Invalid {
                var: "HASHING_COST",
                value: self.hashing_cost.to_string(),
                expected: "bcrypt cost between 4 and 31",
            });
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.env == PRODUCTION
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self.debug = !self.is_production();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_addr(mut self, host: impl Into<String>, port: u16) -> Self {
        self.http = HttpConfig {
            host: host.into(),
            port,
        };
        self
    }

    pub fn with_max_upload_size(mut self, bytes: usize) -> Self {
        self.max_upload_size = bytes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Enables JWT with `secret`.
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt.enabled = true;
        self.jwt.secret = Some(secret.into());
        self
    }

    pub fn with_jwt_lifespan(mut self, lifespan: Duration) -> Self {
        self.jwt.lifespan = lifespan;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_sessions(mut self, enabled: bool) -> Self {
        self.session.enabled = enabled;
        self
    }

    pub fn with_hashing_cost(mut self, cost: u32) -> Self {
        self.hashing_cost = cost;
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = Some(database);
        self
    }
}

fn parse<T: FromStr>(
    var: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_owned(),
        expected,
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_owned(),
            expected: "boolean",
        }),
    }
}
