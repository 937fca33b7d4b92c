use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use uuid::Uuid;

#[derive(Deserialize, Clone)]
pub struct Config {
    pub application: ApplicationConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub referral: ReferralConfig,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub debug_mode: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub database_name: String,
    #[serde(default)]
    pub require_ssl: bool,
}

impl DatabaseConfig {
    pub fn get_connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .database(&self.database_name)
            .ssl_mode(ssl_mode)
    }
}

#[derive(Deserialize, Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub iss: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub exp: u64,
}

/// Knobs for the referral lifecycle and the in-process fraud gate.
#[derive(Deserialize, Clone, Debug)]
pub struct ReferralConfig {
    pub base_url: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
    #[serde(default = "default_create_window_secs")]
    pub create_window_secs: u64,
    #[serde(default = "default_max_creates_per_window")]
    pub max_creates_per_window: usize,
    #[serde(default = "default_min_signature_len")]
    pub min_signature_len: usize,
    #[serde(default)]
    pub blocked_users: Vec<Uuid>,
    #[serde(default = "default_max_link_attempts")]
    pub max_link_attempts: u32,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            base_url: "https://refer.link/".into(),
            validity_days: default_validity_days(),
            create_window_secs: default_create_window_secs(),
            max_creates_per_window: default_max_creates_per_window(),
            min_signature_len: default_min_signature_len(),
            blocked_users: Vec::new(),
            max_link_attempts: default_max_link_attempts(),
        }
    }
}

fn default_request_timeout() -> u64 {
    10
}

fn default_validity_days() -> i64 {
    30
}

fn default_create_window_secs() -> u64 {
    10
}

fn default_max_creates_per_window() -> usize {
    2
}

fn default_min_signature_len() -> usize {
    10
}

fn default_max_link_attempts() -> u32 {
    3
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(e.to_string()))?;
    let config_dir = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_file = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(config_dir.join("base.yaml")))
        .add_source(config::File::from(config_dir.join(environment_file)))
        .add_source(environment_source())
        .build()?;

    settings.try_deserialize::<Config>()
}

/// `APP_` overrides, e.g. `APP_REFERRAL__BLOCKED_USERS=<uuid>,<uuid>`.
fn environment_source() -> config::Environment {
    config::Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("referral.blocked_users")
}
