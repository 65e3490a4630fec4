use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Base URL of the platform social API (friendship/blacklist/profile).
    /// When unset the service falls back to the permissive in-process oracles,
    /// which is only meant for local runs and tests.
    pub social_api_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;
        let social_api_url = env::var("SOCIAL_API_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            database_url,
            port,
            jwt_secret,
            social_api_url,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/dm_test".into(),
            port: 3000,
            jwt_secret: "test-secret".into(),
            social_api_url: None,
        }
    }
}
