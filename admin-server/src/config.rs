use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::info;

use crate::uploads::{DOCUMENT_SIZE_LIMIT, IMAGE_SIZE_LIMIT};

pub const DEFAULT_PURGE_BASE: &str = "https://purge.jsdelivr.net/gh/nsmwce/webapp@main/build";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Site root holding `data/`, `images/` and `files/`.
    pub public_dir: PathBuf,
    /// Static admin UI served for every path no API route claims.
    pub admin_ui_dir: PathBuf,
    pub body_limit: usize,
    pub image_limit: usize,
    pub document_limit: usize,
    pub build_command: String,
    pub build_dir: PathBuf,
    pub cdn_purge_base: String,
    pub purge_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: try_load(&lookup, "ADMIN_HOST", "0.0.0.0")?,
            port: try_load(&lookup, "ADMIN_PORT", "5000")?,
            public_dir: try_load(&lookup, "ADMIN_PUBLIC_DIR", "public")?,
            admin_ui_dir: try_load(&lookup, "ADMIN_UI_DIR", "admin")?,
            body_limit: try_load(&lookup, "ADMIN_BODY_LIMIT", "62914560")?,
            image_limit: try_load(&lookup, "ADMIN_IMAGE_LIMIT", &IMAGE_SIZE_LIMIT.to_string())?,
            document_limit: try_load(
                &lookup,
                "ADMIN_DOCUMENT_LIMIT",
                &DOCUMENT_SIZE_LIMIT.to_string(),
            )?,
            build_command: try_load(&lookup, "ADMIN_BUILD_COMMAND", "npm run build")?,
            build_dir: try_load(&lookup, "ADMIN_BUILD_DIR", ".")?,
            cdn_purge_base: try_load(&lookup, "ADMIN_CDN_PURGE_BASE", DEFAULT_PURGE_BASE)?,
            purge_timeout_secs: try_load(&lookup, "ADMIN_PURGE_TIMEOUT_SECS", "30")?,
        })
    }

    /// Defaults rooted at `public_dir`, for embedding and tests.
    pub fn with_public_dir(public_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            public_dir: public_dir.into(),
            admin_ui_dir: PathBuf::from("admin"),
            body_limit: 62_914_560,
            image_limit: IMAGE_SIZE_LIMIT,
            document_limit: DOCUMENT_SIZE_LIMIT,
            build_command: "npm run build".to_string(),
            build_dir: PathBuf::from("."),
            cdn_purge_base: DEFAULT_PURGE_BASE.to_string(),
            purge_timeout_secs: 30,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.public_dir.join("data")
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.public_dir, PathBuf::from("public"));
        assert_eq!(config.data_dir(), PathBuf::from("public").join("data"));
        assert_eq!(config.image_limit, IMAGE_SIZE_LIMIT);
        assert_eq!(config.document_limit, DOCUMENT_SIZE_LIMIT);
        assert_eq!(config.build_command, "npm run build");
        assert_eq!(config.cdn_purge_base, DEFAULT_PURGE_BASE);
        assert_eq!(config.address(), "0.0.0.0:5000");
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("ADMIN_PORT", "8080"),
            ("ADMIN_PUBLIC_DIR", "/srv/site/public"),
            ("ADMIN_BUILD_COMMAND", "make site"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_dir, PathBuf::from("/srv/site/public"));
        assert_eq!(config.build_command, "make site");
    }

    #[test]
    fn unparsable_value_is_an_error() {
        let err = Config::from_lookup(lookup(&[("ADMIN_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ADMIN_PORT", .. }));
    }
}
