use service_core::config as core_config;
use service_core::error::CoreError;
use std::env;
use std::str::FromStr;

use crate::services::jwt::{DEFAULT_ACCESS_TOKEN_TTL_SECONDS, DEFAULT_ISSUER};
use crate::services::keys::{DEFAULT_KEY_BITS, DEFAULT_KEY_ID};
use crate::utils::Password;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub password: PasswordConfig,
    /// Redis refresh store; in-memory when absent
    pub redis: Option<RedisConfig>,
    /// PostgreSQL directory; in-memory when absent
    pub database: Option<DatabaseConfig>,
    /// Seeded ADMIN principal
    pub admin: Option<AdminConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub key_id: String,
    pub key_bits: usize,
    /// PEM file to load instead of generating a key
    pub private_key_path: Option<String>,
    pub access_token_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub refresh_token_ttl_seconds: i64,
    pub rotate_refresh_on_renewal: bool,
    pub require_approved_scope: bool,
    /// 0 disables the background sweep
    pub cache_sweep_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub min_length: usize,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    /// How long records are kept past their expiry
    pub retention_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: Password,
    pub email: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            key_id: DEFAULT_KEY_ID.to_string(),
            key_bits: DEFAULT_KEY_BITS,
            private_key_path: None,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_token_ttl_seconds: 3600,
            rotate_refresh_on_renewal: true,
            require_approved_scope: false,
            cache_sweep_interval_seconds: 300,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
            min_length: 8,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "credential-engine".to_string(),
            jwt: JwtConfig::default(),
            session: SessionConfig::default(),
            password: PasswordConfig::default(),
            redis: None,
            database: None,
            admin: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(
        common: core_config::Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let env_str = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string());
        let environment: Environment = env_str.parse().map_err(CoreError::config)?;
        let is_prod = environment == Environment::Prod;
        let vars = Vars { lookup: &lookup, is_prod };

        let config = EngineConfig {
            common,
            environment: environment.clone(),
            service_name: vars.get("SERVICE_NAME", Some("credential-engine"))?,
            jwt: JwtConfig {
                issuer: vars.get("JWT_ISSUER", Some(DEFAULT_ISSUER))?,
                key_id: vars.get("JWT_KEY_ID", Some(DEFAULT_KEY_ID))?,
                key_bits: vars.parse("JWT_KEY_BITS", Some("2048"))?,
                private_key_path: lookup("JWT_PRIVATE_KEY_PATH"),
                access_token_ttl_seconds: vars.parse("JWT_ACCESS_TOKEN_TTL_SECONDS", Some("3600"))?,
            },
            session: SessionConfig {
                refresh_token_ttl_seconds: vars.parse("REFRESH_TOKEN_TTL_SECONDS", Some("3600"))?,
                rotate_refresh_on_renewal: vars.parse("ROTATE_REFRESH_ON_RENEWAL", Some("true"))?,
                require_approved_scope: vars.parse("REQUIRE_APPROVED_SCOPE", Some("false"))?,
                cache_sweep_interval_seconds: vars.parse("CACHE_SWEEP_INTERVAL_SECONDS", Some("300"))?,
            },
            password: PasswordConfig {
                memory_kib: vars.parse("PASSWORD_MEMORY_KIB", Some("19456"))?,
                iterations: vars.parse("PASSWORD_ITERATIONS", Some("2"))?,
                parallelism: vars.parse("PASSWORD_PARALLELISM", Some("1"))?,
                min_length: vars.parse("PASSWORD_MIN_LENGTH", Some("8"))?,
            },
            redis: match lookup("REDIS_URL") {
                Some(url) => Some(RedisConfig {
                    url,
                    key_prefix: vars.get("REDIS_KEY_PREFIX", Some("credential-engine:"))?,
                    retention_seconds: vars.parse("REDIS_RETENTION_SECONDS", Some("86400"))?,
                }),
                None => None,
            },
            database: match lookup("DATABASE_URL") {
                Some(url) => Some(DatabaseConfig {
                    url,
                    max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", Some("10"))?,
                }),
                None => None,
            },
            admin: match lookup("ADMIN_USERNAME") {
                Some(username) => Some(AdminConfig {
                    username,
                    password: Password::new(vars.get("ADMIN_PASSWORD", None)?),
                    email: lookup("ADMIN_EMAIL"),
                }),
                None => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.jwt.issuer.trim().is_empty() {
            return Err(CoreError::config("JWT_ISSUER must not be empty"));
        }

        if self.jwt.key_id.trim().is_empty() {
            return Err(CoreError::config("JWT_KEY_ID must not be empty"));
        }

        if self.jwt.key_bits < DEFAULT_KEY_BITS {
            return Err(CoreError::config(format!(
                "JWT_KEY_BITS must be at least {}",
                DEFAULT_KEY_BITS
            )));
        }

        if self.jwt.access_token_ttl_seconds <= 0 {
            return Err(CoreError::config("JWT_ACCESS_TOKEN_TTL_SECONDS must be positive"));
        }

        if self.session.refresh_token_ttl_seconds <= 0 {
            return Err(CoreError::config("REFRESH_TOKEN_TTL_SECONDS must be positive"));
        }

        if self.password.min_length == 0 {
            return Err(CoreError::config("PASSWORD_MIN_LENGTH must be positive"));
        }

        if let Some(redis) = &self.redis {
            if redis.retention_seconds < 0 {
                return Err(CoreError::config("REDIS_RETENTION_SECONDS must not be negative"));
            }
        }

        if let Some(database) = &self.database {
            if database.max_connections == 0 {
                return Err(CoreError::config("DATABASE_MAX_CONNECTIONS must be positive"));
            }
        }

        if let Some(admin) = &self.admin {
            if admin.password.len() < self.password.min_length {
                return Err(CoreError::config(format!(
                    "ADMIN_PASSWORD must be at least {} characters",
                    self.password.min_length
                )));
            }
        }

        if self.environment == Environment::Prod && self.jwt.private_key_path.is_none() {
            tracing::warn!("Signing key is generated per process; tokens do not survive restarts");
        }

        Ok(())
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
    is_prod: bool,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, key: &str, default: Option<&str>) -> Result<String, CoreError> {
        match (self.lookup)(key) {
            Some(val) => Ok(val),
            None => {
                if self.is_prod {
                    Err(CoreError::config(format!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(CoreError::config(format!("{} is required but not set", key)))
                }
            }
        }
    }

    fn parse<T>(&self, key: &str, default: Option<&str>) -> Result<T, CoreError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key, default)?
            .trim()
            .parse()
            .map_err(|e: T::Err| CoreError::config(format!("{} is invalid: {}", key, e)))
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
