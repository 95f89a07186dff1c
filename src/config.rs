use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

const DEFAULT_LLM_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const DEFAULT_LLM_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_EMBEDDING_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "nomic-ai/nomic-embed-text-v1.5";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_timeout_secs: u64,
    pub embedding_api_key: String,
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub similarity_index_path: String,
    pub duplicate_threshold: f32,
    pub duplicate_neighbors: usize,
    pub relevance_threshold: f32,
    pub max_generation_retries: u32,
    pub max_verification_retries: u32,
    pub context_char_budget: usize,
    pub prompt_context_chars: usize,
    pub generate_rps: u32,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let llm_api_key = get_env("LLM_API_KEY")?;
        let embedding_api_key =
            env::var("EMBEDDING_API_KEY").unwrap_or_else(|_| llm_api_key.clone());

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            llm_api_key,
            llm_base_url: get_env_or("LLM_BASE_URL", DEFAULT_LLM_BASE_URL),
            llm_model: get_env_or("LLM_MODEL", DEFAULT_LLM_MODEL),
            llm_temperature: get_env_parse_or("LLM_TEMPERATURE", 0.7)?,
            llm_timeout_secs: get_env_parse_or("LLM_TIMEOUT_SECS", 120)?,
            embedding_api_key,
            embedding_base_url: get_env_or("EMBEDDING_BASE_URL", DEFAULT_EMBEDDING_BASE_URL),
            embedding_model: get_env_or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            embedding_dimension: get_env_parse_or("EMBEDDING_DIMENSION", 768)?,
            similarity_index_path: get_env_or("SIMILARITY_INDEX_PATH", "similarity_index.json"),
            duplicate_threshold: get_env_parse_or("DUPLICATE_THRESHOLD", 0.90)?,
            duplicate_neighbors: get_env_parse_or("DUPLICATE_NEIGHBORS", 5)?,
            relevance_threshold: get_env_parse_or("RELEVANCE_THRESHOLD", 0.40)?,
            max_generation_retries: get_env_parse_or("MAX_GENERATION_RETRIES", 3)?,
            max_verification_retries: get_env_parse_or("MAX_VERIFICATION_RETRIES", 5)?,
            context_char_budget: get_env_parse_or("CONTEXT_CHAR_BUDGET", 15_000)?,
            prompt_context_chars: get_env_parse_or("PROMPT_CONTEXT_CHARS", 5_000)?,
            generate_rps: get_env_parse_or("GENERATE_RPS", 5)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
