use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_STEAMSPY_API_URL: &str = "https://steamspy.com/api.php";
pub const DEFAULT_STEAM_REVIEWS_API_URL: &str = "https://store.steampowered.com/appreviews";
pub const DEFAULT_BQ_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_LANDING_ZONE_PREFIX: &str = "raw_data/steam_reviews_api_raw";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Process configuration. Read once at startup; a missing required value aborts the process
/// before the listener binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Landing-zone bucket. required.
    pub gcs_bucket_name: String,
    /// Warehouse project. required.
    pub bq_project_id: String,
    pub bq_dataset_id: String,
    pub bq_table_id: String,
    /// Dataset location used when the dataset has to be created.
    pub region: String,
    pub port: u16,

    pub steamspy_api_url: String,
    pub steam_reviews_api_url: String,
    pub bq_api_url: String,
    pub bq_access_token: Option<String>,

    pub top_n: usize,
    pub reviews_per_page: u32,
    pub max_pages: u32,
    pub page_delay: Duration,
    pub review_language: String,
    pub request_timeout: Duration,
    pub global_rps: NonZeroU32,
    /// 1 keeps the sequential fetch model.
    pub entity_concurrency: usize,
    pub page_retry_attempts: u32,

    pub landing_zone_prefix: String,
    /// When set, the landing zone is a local directory instead of the GCS bucket.
    pub landing_zone_root: Option<PathBuf>,
    pub dedup_key: Option<String>,

    pub run_timeout: Duration,
    pub job_poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::MissingEnvVar(key));
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            gcs_bucket_name: required("GCS_BUCKET_NAME")?,
            bq_project_id: required("BQ_PROJECT_ID")?,
            bq_dataset_id: or_default("BQ_DATASET_ID", "steam_reviews"),
            bq_table_id: or_default("BQ_RAW_TABLE_ID", "raw_reviews"),
            region: or_default("REGION", "US"),
            port: parse_or("PORT", get("PORT"), 8081)?,

            steamspy_api_url: or_default("STEAMSPY_API_URL", DEFAULT_STEAMSPY_API_URL),
            steam_reviews_api_url: or_default(
                "STEAM_REVIEWS_API_URL",
                DEFAULT_STEAM_REVIEWS_API_URL,
            ),
            bq_api_url: or_default("BQ_API_URL", DEFAULT_BQ_API_URL),
            bq_access_token: get("BQ_ACCESS_TOKEN"),

            top_n: parse_or("TOP_N", get("TOP_N"), 10)?,
            reviews_per_page: parse_or("REVIEWS_PER_PAGE", get("REVIEWS_PER_PAGE"), 100)?,
            max_pages: parse_or("MAX_PAGES", get("MAX_PAGES"), 5)?,
            page_delay: Duration::from_millis(parse_or(
                "PAGE_DELAY_MS",
                get("PAGE_DELAY_MS"),
                200,
            )?),
            review_language: or_default("REVIEW_LANGUAGE", "english"),
            request_timeout: Duration::from_secs(parse_or(
                "REQUEST_TIMEOUT_SECS",
                get("REQUEST_TIMEOUT_SECS"),
                60,
            )?),
            global_rps: parse_or(
                "GLOBAL_RPS",
                get("GLOBAL_RPS"),
                nonzero_ext::nonzero!(10u32),
            )?,
            entity_concurrency: positive("ENTITY_CONCURRENCY", get("ENTITY_CONCURRENCY"), 1)?,
            page_retry_attempts: positive(
                "PAGE_RETRY_ATTEMPTS",
                get("PAGE_RETRY_ATTEMPTS"),
                1,
            )?,

            landing_zone_prefix: or_default("LANDING_ZONE_PREFIX", DEFAULT_LANDING_ZONE_PREFIX)
                .trim_matches('/')
                .to_string(),
            landing_zone_root: get("LANDING_ZONE_ROOT").map(PathBuf::from),
            dedup_key: get("DEDUP_KEY"),

            run_timeout: Duration::from_secs(positive(
                "RUN_TIMEOUT_SECS",
                get("RUN_TIMEOUT_SECS"),
                900,
            )?),
            job_poll_interval: Duration::from_millis(parse_or(
                "JOB_POLL_INTERVAL_MS",
                get("JOB_POLL_INTERVAL_MS"),
                1000,
            )?),
        })
    }

    /// `project.dataset.table`, as the warehouse addresses the destination.
    pub fn table_path(&self) -> String {
        format!(
            "{}.{}.{}",
            self.bq_project_id, self.bq_dataset_id, self.bq_table_id
        )
    }
}

fn parse_or<T: FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

fn positive<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let parsed = parse_or(key, raw.clone(), default)?;
    if parsed <= T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: raw.unwrap_or_default(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError};
    use std::collections::HashMap;
    use std::time::Duration;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_bucket_is_fatal() {
        let err = config_from(&[("BQ_PROJECT_ID", "proj")]).expect_err("bucket is required");
        assert_eq!(err, ConfigError::MissingEnvVar("GCS_BUCKET_NAME"));
    }

    #[test]
    fn blank_project_counts_as_missing() {
        let err = config_from(&[("GCS_BUCKET_NAME", "bucket"), ("BQ_PROJECT_ID", "  ")])
            .expect_err("blank project is missing");
        assert_eq!(err, ConfigError::MissingEnvVar("BQ_PROJECT_ID"));
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = config_from(&[("GCS_BUCKET_NAME", "bucket"), ("BQ_PROJECT_ID", "proj")])
            .expect("required values present");

        assert_eq!(config.bq_dataset_id, "steam_reviews");
        assert_eq!(config.bq_table_id, "raw_reviews");
        assert_eq!(config.region, "US");
        assert_eq!(config.port, 8081);
        assert_eq!(config.top_n, 10);
        assert_eq!(config.reviews_per_page, 100);
        assert_eq!(config.max_pages, 5);
        assert_eq!(config.page_delay, Duration::from_millis(200));
        assert_eq!(config.entity_concurrency, 1);
        assert_eq!(config.page_retry_attempts, 1);
        assert_eq!(config.landing_zone_root, None);
        assert_eq!(config.dedup_key, None);
        assert_eq!(config.table_path(), "proj.steam_reviews.raw_reviews");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config_from(&[
            ("GCS_BUCKET_NAME", "bucket"),
            ("BQ_PROJECT_ID", "proj"),
            ("MAX_PAGES", "five"),
        ])
        .expect_err("non-numeric page count");
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "MAX_PAGES",
                value: "five".to_string()
            }
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = config_from(&[
            ("GCS_BUCKET_NAME", "bucket"),
            ("BQ_PROJECT_ID", "proj"),
            ("ENTITY_CONCURRENCY", "0"),
        ])
        .expect_err("zero workers");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ENTITY_CONCURRENCY",
                ..
            }
        ));
    }

    #[test]
    fn landing_zone_prefix_is_trimmed_of_slashes() {
        let config = config_from(&[
            ("GCS_BUCKET_NAME", "bucket"),
            ("BQ_PROJECT_ID", "proj"),
            ("LANDING_ZONE_PREFIX", "/raw/reviews/"),
        ])
        .expect("valid config");
        assert_eq!(config.landing_zone_prefix, "raw/reviews");
    }
}
