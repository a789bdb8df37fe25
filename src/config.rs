use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Account created at start-up when no administrator exists.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// How the spreadsheet service account is supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetsCredentials {
    /// Path to a downloaded service-account JSON key.
    KeyFile(PathBuf),
    Inline {
        client_email: String,
        private_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Sql {
        database_url: String,
    },
    Sheets {
        spreadsheet_id: String,
        credentials: SheetsCredentials,
    },
    Memory,
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite://user_info/users.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub jwt: JwtConfig,
    pub admin: AdminConfig,
    pub host: String,
    pub port: u16,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

fn sheets_credentials() -> anyhow::Result<SheetsCredentials> {
    if let Some(path) = var("GOOGLE_APPLICATION_CREDENTIALS") {
        return Ok(SheetsCredentials::KeyFile(PathBuf::from(path)));
    }
    match (var("GOOGLE_SERVICE_ACCOUNT_EMAIL"), var("GOOGLE_PRIVATE_KEY")) {
        (Some(client_email), Some(private_key)) => Ok(SheetsCredentials::Inline {
            client_email,
            private_key,
        }),
        _ => bail!(
            "sheets storage needs GOOGLE_APPLICATION_CREDENTIALS or \
             GOOGLE_SERVICE_ACCOUNT_EMAIL + GOOGLE_PRIVATE_KEY"
        ),
    }
}

impl StorageConfig {
    /// `STORAGE_BACKEND` wins; otherwise a configured spreadsheet selects
    /// sheets and everything else falls back to the SQL database.
    pub fn from_env() -> anyhow::Result<Self> {
        let spreadsheet_id = var("GOOGLE_SPREADSHEET_ID");
        let backend = var("STORAGE_BACKEND").unwrap_or_else(|| {
            if spreadsheet_id.is_some() { "sheets" } else { "sql" }.to_string()
        });

        match backend.trim().to_ascii_lowercase().as_str() {
            "sql" | "sqlite" | "postgres" => Ok(StorageConfig::Sql {
                database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            }),
            "sheets" => Ok(StorageConfig::Sheets {
                spreadsheet_id: spreadsheet_id
                    .context("GOOGLE_SPREADSHEET_ID is required for sheets storage")?,
                credentials: sheets_credentials()?,
            }),
            "memory" => Ok(StorageConfig::Memory),
            other => bail!("unknown STORAGE_BACKEND {other:?} (expected sql, sheets or memory)"),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: var("JWT_SECRET").context("JWT_SECRET is required")?,
            issuer: var_or("JWT_ISSUER", "inventory-hub"),
            audience: var_or("JWT_AUDIENCE", "inventory-hub-users"),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: parsed_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        let admin = AdminConfig {
            username: var_or("ADMIN_USERNAME", "admin"),
            email: var_or("ADMIN_EMAIL", "admin@rcinv.local"),
            password: var_or("ADMIN_PASSWORD", "admin123"),
        };
        Ok(Self {
            storage: StorageConfig::from_env()?,
            jwt,
            admin,
            host: var_or("APP_HOST", "0.0.0.0"),
            port: parsed_or("APP_PORT", 10000),
        })
    }

    /// Settings for tests and local experiments: in-memory storage and a
    /// fixed signing secret.
    pub fn for_tests() -> Self {
        Self {
            storage: StorageConfig::Memory,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
            admin: AdminConfig {
                username: "admin".into(),
                email: "admin@rcinv.local".into(),
                password: "admin123".into(),
            },
            host: "127.0.0.1".into(),
            port: 0,
        }
    }
}
