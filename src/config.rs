use serde::Deserialize;

/// Runtime flavour. Development additionally echoes internal error details to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            _ => Environment::Production,
        }
    }

    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2id work factor. Memory is in KiB.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetConfig {
    /// Prefix of the link mailed to the user, e.g. `https://api.example.com`.
    pub link_base_url: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub from: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub reset: ResetConfig,
    pub email: EmailConfig,
    pub revocation_sweep_secs: u64,
}

/// Reset credentials always live for ten minutes.
pub const RESET_TOKEN_TTL_MINUTES: i64 = 10;

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let environment = Environment::parse(
            &std::env::var("APP_ENV").unwrap_or_else(|_| "production".into()),
        );
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "sonic-connect".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "sonic-connect-users".into()),
            ttl_minutes: env_parsed("JWT_TTL_MINUTES", 60 * 24 * 90),
        };
        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: env_parsed("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: env_parsed("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: env_parsed("ARGON2_PARALLELISM", defaults.parallelism),
        };
        let reset = ResetConfig {
            link_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            ttl_minutes: RESET_TOKEN_TTL_MINUTES,
        };
        let email = EmailConfig {
            from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "\"Sonic Connect\" <support@sonic-connect.com>".into()),
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into()),
            endpoint: std::env::var("SES_ENDPOINT").ok(),
            access_key: std::env::var("SES_ACCESS_KEY").ok(),
            secret_key: std::env::var("SES_SECRET_KEY").ok(),
        };
        Ok(Self {
            database_url,
            environment,
            jwt,
            password,
            reset,
            email,
            revocation_sweep_secs: env_parsed("REVOCATION_SWEEP_SECS", 600),
        })
    }
}
