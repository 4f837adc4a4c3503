// src/config/mod.rs
// Load ALL values from .env file, no hardcoded credentials

use once_cell::sync::Lazy;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AlbanyConfig {
    // ── Backend Configuration
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub perplexity_base_url: String,
    pub api_key: String,
    pub bearer_token: String,
    pub default_model: String,

    // ── Context Assembly
    pub history_turn_cap: usize,
    pub session_title_max_chars: usize,

    // ── Enrichment
    pub related_entity_limit: usize,
    pub sibling_contract_limit: usize,

    // ── Usage Quota
    pub daily_word_limit: usize,

    // ── Database Configuration
    pub database_url: String,
    pub sqlite_max_connections: usize,

    // ── Timeouts (in seconds)
    pub stream_connect_timeout: u64,

    // ── Logging Configuration
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            // Trim whitespace and remove inline comments before parsing
            let clean_val = val.split('#').next().unwrap_or("").trim();
            match clean_val.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl AlbanyConfig {
    pub fn from_env() -> Self {
        // Load from .env file first if it exists
        let _ = dotenvy::dotenv();

        Self {
            openai_base_url: env_var_or("ALBANY_OPENAI_BASE_URL", "https://api.openai.com".to_string()),
            anthropic_base_url: env_var_or("ALBANY_ANTHROPIC_BASE_URL", "https://api.anthropic.com".to_string()),
            perplexity_base_url: env_var_or("ALBANY_PERPLEXITY_BASE_URL", "https://api.perplexity.ai".to_string()),
            api_key: env_var_or("ALBANY_API_KEY", String::new()),
            bearer_token: env_var_or("ALBANY_BEARER_TOKEN", String::new()),
            default_model: env_var_or("ALBANY_DEFAULT_MODEL", "gpt-4o-mini".to_string()),
            history_turn_cap: env_var_or("ALBANY_HISTORY_TURN_CAP", 10),
            session_title_max_chars: env_var_or("ALBANY_SESSION_TITLE_MAX_CHARS", 50),
            related_entity_limit: env_var_or("ALBANY_RELATED_ENTITY_LIMIT", 5),
            sibling_contract_limit: env_var_or("ALBANY_SIBLING_CONTRACT_LIMIT", 10),
            daily_word_limit: env_var_or("ALBANY_DAILY_WORD_LIMIT", 2000),
            database_url: env_var_or("DATABASE_URL", "sqlite::memory:".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),
            stream_connect_timeout: env_var_or("ALBANY_STREAM_CONNECT_TIMEOUT", 30),
            log_level: env_var_or("ALBANY_LOG_LEVEL", "info".to_string()),
        }
    }
}

pub static CONFIG: Lazy<AlbanyConfig> = Lazy::new(AlbanyConfig::from_env);
