use serde::{Deserialize, Serialize};

use crate::services::assembler::AssemblerConfig;
use crate::services::dampening::DampeningConfig;
use crate::services::distribution::DistributionConfig;
use crate::services::diversity::DiversityConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub ranking: RankingConfig,
    pub diversity: DiversityConfig,
    pub distribution: DistributionConfig,
    pub dampening: DampeningConfig,
    pub visibility: VisibilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub candidate_limit: i64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub tie_band: f64,
}

impl RankingConfig {
    pub fn assembler(&self) -> AssemblerConfig {
        AssemblerConfig {
            candidate_limit: self.candidate_limit,
            tie_band: self.tie_band,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 500,
            default_page_size: 20,
            max_page_size: 100,
            tie_band: 20.0,
        }
    }
}

/// Follower sampling settings.
///
/// The server only reads visibility records; `follower_feed_fraction` is the
/// value publishing code passes to `services::visibility::record_feed_sampling`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityConfig {
    pub follower_feed_fraction: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let diversity_defaults = DiversityConfig::default();
        let distribution_defaults = DistributionConfig::default();
        let dampening_defaults = DampeningConfig::default();

        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: env_or("APP_PORT", 8080)?,
                log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            ranking: RankingConfig {
                candidate_limit: at_least("FEED_CANDIDATE_LIMIT", env_or("FEED_CANDIDATE_LIMIT", 500)?, 1)?,
                default_page_size: at_least("FEED_DEFAULT_PAGE_SIZE", env_or("FEED_DEFAULT_PAGE_SIZE", 20)?, 1)?,
                max_page_size: at_least("FEED_MAX_PAGE_SIZE", env_or("FEED_MAX_PAGE_SIZE", 100)?, 1)?,
                tie_band: env_or("FEED_TIE_BAND", 20.0)?,
            },
            diversity: DiversityConfig {
                max_per_author: at_least(
                    "FEED_MAX_PER_AUTHOR",
                    env_or("FEED_MAX_PER_AUTHOR", diversity_defaults.max_per_author)?,
                    1,
                )?,
                company_ratio: unit_fraction(
                    "FEED_COMPANY_RATIO",
                    env_or("FEED_COMPANY_RATIO", diversity_defaults.company_ratio)?,
                )?,
                min_gap: env_or("FEED_MIN_GAP", diversity_defaults.min_gap)?,
            },
            distribution: DistributionConfig {
                testing_size: env_or("ROLLOUT_TESTING_SIZE", distribution_defaults.testing_size)?,
                expanding_size: env_or(
                    "ROLLOUT_EXPANDING_SIZE",
                    distribution_defaults.expanding_size,
                )?,
                viral_size: env_or("ROLLOUT_VIRAL_SIZE", distribution_defaults.viral_size)?,
                max_reach: env_or("ROLLOUT_MAX_REACH", distribution_defaults.max_reach)?,
                testing_to_expanding: env_or(
                    "ROLLOUT_TESTING_TO_EXPANDING",
                    distribution_defaults.testing_to_expanding,
                )?,
                expanding_to_viral: env_or(
                    "ROLLOUT_EXPANDING_TO_VIRAL",
                    distribution_defaults.expanding_to_viral,
                )?,
                minimum_viable: env_or(
                    "ROLLOUT_MINIMUM_VIABLE",
                    distribution_defaults.minimum_viable,
                )?,
            },
            dampening: DampeningConfig {
                enabled: env_or("DAMPENING_ENABLED", dampening_defaults.enabled)?,
                min_age_hours: env_or("DAMPENING_MIN_AGE_HOURS", dampening_defaults.min_age_hours)?,
                min_rate_per_hour: env_or(
                    "DAMPENING_MIN_RATE_PER_HOUR",
                    dampening_defaults.min_rate_per_hour,
                )?,
                keep_fraction: unit_fraction(
                    "DAMPENING_KEEP_FRACTION",
                    env_or("DAMPENING_KEEP_FRACTION", dampening_defaults.keep_fraction)?,
                )?,
            },
            visibility: VisibilityConfig {
                follower_feed_fraction: unit_fraction(
                    "FOLLOWER_FEED_FRACTION",
                    env_or("FOLLOWER_FEED_FRACTION", 0.15)?,
                )?,
            },
        })
    }
}

/// Parse `key` when set, fall back to `default` when unset.
/// A value that is set but does not parse is an error.
fn env_or<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid value for {}: {:?} ({})", key, raw, e).into()),
        Err(_) => Ok(default),
    }
}

fn at_least<T>(key: &str, value: T, min: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min {
        return Err(format!("invalid value for {}: {} (must be >= {})", key, value, min).into());
    }
    Ok(value)
}

fn unit_fraction(key: &str, value: f64) -> Result<f64, Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("invalid value for {}: {} (must be within 0..=1)", key, value).into());
    }
    Ok(value)
}
