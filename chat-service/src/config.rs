use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window length in seconds for all per-operation counters.
    pub window_secs: u64,
    pub max_sends: u32,
    pub max_typing_updates: u32,
    pub max_reactions: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// When set, caches/rate limits/presence use Redis so multiple
    /// instances agree; otherwise everything is process-local.
    pub redis_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub master_key: [u8; 32],
    pub rate_limits: RateLimitConfig,
    pub max_content_len: usize,
    pub max_attachments: usize,
    pub typing_ttl_secs: u64,
    pub presence_ttl_secs: u64,
    pub unread_cache_ttl_secs: u64,
    /// Horizon after which an undelivered queue entry expires.
    pub delivery_expiry_days: i64,
    pub delivery_max_attempts: i32,
    /// Soft-deleted messages older than this are physically purged.
    pub retention_days: i64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty());
        let port = env_parse("PORT", 3000);

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| crate::error::AppError::Config("JWT_SECRET missing".into()))?;

        let master_key_b64 = env::var("CHAT_MASTER_KEY")
            .map_err(|_| crate::error::AppError::Config("CHAT_MASTER_KEY missing".into()))?;
        let master_key_bytes = STANDARD
            .decode(master_key_b64.trim())
            .map_err(|_| crate::error::AppError::Config("CHAT_MASTER_KEY invalid base64".into()))?;
        if master_key_bytes.len() != 32 {
            return Err(crate::error::AppError::Config(
                "CHAT_MASTER_KEY must decode to 32 bytes".into(),
            ));
        }
        let mut master_key = [0u8; 32];
        master_key.copy_from_slice(&master_key_bytes);

        Ok(Self {
            database_url,
            redis_url,
            port,
            jwt_secret,
            master_key,
            rate_limits: RateLimitConfig {
                window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 60),
                max_sends: env_parse("RATE_LIMIT_SENDS", 30),
                max_typing_updates: env_parse("RATE_LIMIT_TYPING", 60),
                max_reactions: env_parse("RATE_LIMIT_REACTIONS", 60),
            },
            max_content_len: env_parse("MAX_CONTENT_LEN", 8_000),
            max_attachments: env_parse("MAX_ATTACHMENTS", 10),
            typing_ttl_secs: env_parse("TYPING_TTL_SECS", 10),
            presence_ttl_secs: env_parse("PRESENCE_TTL_SECS", 60),
            unread_cache_ttl_secs: env_parse("UNREAD_CACHE_TTL_SECS", 30),
            delivery_expiry_days: env_parse("DELIVERY_EXPIRY_DAYS", 7),
            delivery_max_attempts: env_parse("DELIVERY_MAX_ATTEMPTS", 5),
            retention_days: env_parse("MESSAGE_RETENTION_DAYS", 30),
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            redis_url: None,
            port: 3000,
            jwt_secret: "test-secret".into(),
            master_key: [0u8; 32],
            rate_limits: RateLimitConfig {
                window_secs: 60,
                max_sends: 30,
                max_typing_updates: 60,
                max_reactions: 60,
            },
            max_content_len: 8_000,
            max_attachments: 10,
            typing_ttl_secs: 10,
            presence_ttl_secs: 60,
            unread_cache_ttl_secs: 30,
            delivery_expiry_days: 7,
            delivery_max_attempts: 5,
            retention_days: 30,
        }
    }
}
