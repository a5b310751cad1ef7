use clap::Args;
use sqlx::postgres::PgConnectOptions;

use crate::error::ConfigError;

#[derive(Debug, Clone, Args)]
pub struct AppConfig {
    #[command(flatten)]
    pub database: DatabaseConfig,
    #[command(flatten)]
    pub llm: LlmConfig,
    #[command(flatten)]
    pub vector: VectorConfig,
}

#[derive(Debug, Clone, Args)]
pub struct DatabaseConfig {
    #[arg(
        id = "db_host",
        long = "db-host",
        env = "PGHOST",
        default_value = "localhost",
        global = true
    )]
    pub host: String,
    #[arg(
        id = "db_port",
        long = "db-port",
        env = "PGPORT",
        default_value_t = 5432,
        global = true
    )]
    pub port: u16,
    #[arg(id = "db_user", long = "db-user", env = "PGUSER", global = true)]
    pub user: Option<String>,
    #[arg(
        id = "db_password",
        long = "db-password",
        env = "PGPASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub password: Option<String>,
    #[arg(id = "db_name", long = "db-name", env = "PGDATABASE", global = true)]
    pub database: Option<String>,
    #[arg(long = "db-max-connections", default_value_t = 5, global = true)]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("PGHOST"));
        }
        let user = required(self.user.as_deref(), "PGUSER")?;
        let database = required(self.database.as_deref(), "PGDATABASE")?;

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(user)
            .database(database);
        if let Some(password) = self.password.as_deref() {
            options = options.password(password);
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, Args)]
pub struct LlmConfig {
    #[arg(
        id = "llm_api_key",
        long = "llm-api-key",
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        global = true
    )]
    pub api_key: Option<String>,
    #[arg(
        long = "llm-model",
        env = "LLM_MODEL",
        default_value = "gpt-4o-mini",
        global = true
    )]
    pub model: String,
    #[arg(
        long = "llm-base-url",
        env = "LLM_BASE_URL",
        default_value = "https://api.openai.com/v1",
        global = true
    )]
    pub base_url: String,
    #[arg(long = "llm-max-tokens", default_value_t = 1024, global = true)]
    pub max_tokens: u32,
    #[arg(long = "llm-temperature", default_value_t = 0.4, global = true)]
    pub temperature: f32,
}

impl LlmConfig {
    /// Returns the API key once every setting checks out.
    pub fn validate(&self) -> Result<&str, ConfigError> {
        let api_key = required(self.api_key.as_deref(), "OPENAI_API_KEY")?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid {
                name: "llm-temperature",
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                name: "llm-max-tokens",
                reason: "must be positive".to_string(),
            });
        }
        Ok(api_key)
    }
}

#[derive(Debug, Clone, Args)]
pub struct VectorConfig {
    #[arg(
        id = "vector_host",
        long = "vector-host",
        env = "VECTOR_INDEX_HOST",
        global = true
    )]
    pub host: Option<String>,
    #[arg(
        id = "vector_api_key",
        long = "vector-api-key",
        env = "VECTOR_API_KEY",
        hide_env_values = true,
        global = true
    )]
    pub api_key: Option<String>,
    #[arg(
        long = "vector-namespace",
        env = "VECTOR_NAMESPACE",
        default_value = "",
        global = true
    )]
    pub namespace: String,
    #[arg(
        long = "vector-dimension",
        env = "VECTOR_DIMENSION",
        default_value_t = 1536,
        global = true
    )]
    pub dimension: usize,
    /// Upper bound on matches fetched per query
    #[arg(
        long = "vector-top-k",
        env = "VECTOR_TOP_K",
        default_value_t = 1000,
        global = true
    )]
    pub top_k: usize,
}

impl VectorConfig {
    pub fn is_configured(&self) -> bool {
        self.host.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        let host = required(self.host.as_deref(), "VECTOR_INDEX_HOST")?;
        let api_key = required(self.api_key.as_deref(), "VECTOR_API_KEY")?;
        if self.dimension == 0 {
            return Err(ConfigError::Invalid {
                name: "vector-dimension",
                reason: "must be positive".to_string(),
            });
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid {
                name: "vector-top-k",
                reason: "must be positive".to_string(),
            });
        }
        Ok((host, api_key))
    }
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 5433,
            user: Some("reviewer".to_string()),
            password: Some("secret".to_string()),
            database: Some("reviews".to_string()),
            max_connections: 5,
        }
    }

    fn vector() -> VectorConfig {
        VectorConfig {
            host: Some("https://activities.svc.example".to_string()),
            api_key: Some("key".to_string()),
            namespace: String::new(),
            dimension: 1536,
            top_k: 100,
        }
    }

    #[test]
    fn database_options_carry_named_fields() {
        let options = database().connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "reviewer");
        assert_eq!(options.get_database(), Some("reviews"));
    }

    #[test]
    fn database_requires_user_and_name() {
        let mut config = database();
        config.user = Some("  ".to_string());
        assert!(matches!(
            config.connect_options(),
            Err(ConfigError::Missing("PGUSER"))
        ));

        let mut config = database();
        config.database = None;
        assert!(matches!(
            config.connect_options(),
            Err(ConfigError::Missing("PGDATABASE"))
        ));
    }

    #[test]
    fn llm_requires_api_key_and_sane_temperature() {
        let mut config = LlmConfig {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 512,
            temperature: 0.4,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("OPENAI_API_KEY"))
        ));

        config.api_key = Some("sk-test".to_string());
        assert_eq!(config.validate().unwrap(), "sk-test");

        config.temperature = 3.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn vector_credentials_need_host_and_key() {
        assert!(vector().credentials().is_ok());

        let mut config = vector();
        config.api_key = None;
        assert!(config.is_configured());
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::Missing("VECTOR_API_KEY"))
        ));

        config.host = None;
        assert!(!config.is_configured());
    }
}
