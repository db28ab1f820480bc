// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Client configuration.
//!
//! # Example
//!
//! ```toml
//! [aws]
//! region = "eu-west-1"
//!
//! [eureka]
//! service_urls = ["http://eureka-1:8080/eureka/v2", "http://eureka-2:8080/eureka/v2"]
//! poll_interval_seconds = 15
//! wire_format = "xml"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::WireFormat;

const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_SERVER_PORT: u16 = 7001;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

/// Errors raised when loading a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not match the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range or the combination of values is unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AWS specific settings.
    pub aws: AwsConfig,
    /// Registry settings.
    pub eureka: EurekaConfig,
}

/// AWS specific settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region used for DNS discovery. Looked up from the instance metadata service if unset.
    pub region: Option<String>,
}

/// Registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EurekaConfig {
    /// Per request timeout.
    pub connect_timeout_seconds: u64,
    /// Discover registry servers through DNS TXT records.
    pub use_dns_for_service_urls: bool,
    /// Domain holding the discovery TXT records.
    pub dns_discovery_zone: String,
    /// Static registry host, used when `service_urls` is empty.
    pub server_dns_name: String,
    /// Static registry base URLs.
    pub service_urls: Vec<String>,
    /// Port of discovered registry servers.
    pub server_port: u16,
    /// Path of the registry API on discovered servers, e.g. `eureka/v2`.
    pub server_url_base: String,
    /// Period of scheduled updates.
    pub poll_interval_seconds: u64,
    /// Retries of requests that failed in transit.
    pub retries: u32,
    /// Encoding of request and response bodies, `"json"` or `"xml"`.
    pub wire_format: WireFormat,
    /// Advisory, not used by the client.
    pub prefer_same_zone: bool,
    /// Advisory, not used by the client.
    pub register_with_eureka: bool,
}

impl Default for EurekaConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
            use_dns_for_service_urls: false,
            dns_discovery_zone: String::new(),
            server_dns_name: String::new(),
            service_urls: Vec::new(),
            server_port: DEFAULT_SERVER_PORT,
            server_url_base: String::new(),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            retries: DEFAULT_RETRIES,
            wire_format: WireFormat::default(),
            prefer_same_zone: false,
            register_with_eureka: false,
        }
    }
}

impl EurekaConfig {
    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// The request timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl Config {
    /// Loads and validates the configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            ConfigError::Io {
                path: path.as_ref().display().to_string(),
                source,
            }
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads and validates the configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(contents)?;
        config.fill_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Replaces unset values with their defaults.
    ///
    /// Zero timeouts, intervals and ports count as unset. The server DNS name becomes the only
    /// static URL if no URLs are configured.
    pub fn fill_defaults(&mut self) {
        let eureka = &mut self.eureka;
        if eureka.connect_timeout_seconds == 0 {
            eureka.connect_timeout_seconds = DEFAULT_CONNECT_TIMEOUT_SECONDS;
        }
        if eureka.server_port == 0 {
            eureka.server_port = DEFAULT_SERVER_PORT;
        }
        if eureka.poll_interval_seconds == 0 {
            eureka.poll_interval_seconds = DEFAULT_POLL_INTERVAL_SECONDS;
        }
        if eureka.service_urls.is_empty() && !eureka.server_dns_name.is_empty() {
            eureka.service_urls.push(eureka.server_dns_name.clone());
        }
    }

    /// Checks that the configuration can be used to create a connection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let eureka = &self.eureka;
        if eureka.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_seconds must be greater than 0".into(),
            ));
        }
        if eureka.connect_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_seconds must be greater than 0".into(),
            ));
        }
        if eureka.use_dns_for_service_urls {
            if eureka.dns_discovery_zone.is_empty() {
                return Err(ConfigError::Invalid(
                    "dns_discovery_zone is required when use_dns_for_service_urls is set".into(),
                ));
            }
        } else if eureka.service_urls.is_empty() {
            return Err(ConfigError::Invalid(
                "no service_urls or server_dns_name configured and DNS discovery is disabled"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.eureka.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.eureka.server_port, 7001);
        assert_eq!(config.eureka.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.eureka.retries, 3);
        assert!(!config.eureka.use_dns_for_service_urls);
        assert_eq!(config.aws.region, None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [aws]
            region = "eu-west-1"

            [eureka]
            service_urls = ["http://127.0.0.1:8080/eureka/v2"]
            poll_interval_seconds = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.eureka.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.eureka.server_port, 7001);
        assert_eq!(config.eureka.retries, 3);
    }

    #[test]
    fn server_dns_name_is_url_fallback() {
        let config = Config::from_toml_str(
            r#"
            [eureka]
            server_dns_name = "http://eureka.internal:8080/eureka/v2"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.eureka.service_urls,
            vec!["http://eureka.internal:8080/eureka/v2".to_string()]
        );
    }

    #[test]
    fn zero_values_take_defaults() {
        let config = Config::from_toml_str(
            r#"
            [eureka]
            service_urls = ["http://a"]
            poll_interval_seconds = 0
            connect_timeout_seconds = 0
            server_port = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.eureka.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.eureka.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.eureka.server_port, 7001);

        let mut unfilled = config.clone();
        unfilled.eureka.poll_interval_seconds = 0;
        assert!(matches!(unfilled.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn wire_format() {
        assert_eq!(Config::default().eureka.wire_format, WireFormat::Json);
        let config = Config::from_toml_str(
            r#"
            [eureka]
            service_urls = ["http://a"]
            wire_format = "xml"
            "#,
        )
        .unwrap();
        assert_eq!(config.eureka.wire_format, WireFormat::Xml);
        assert!(matches!(
            Config::from_toml_str(
                r#"
                [eureka]
                service_urls = ["http://a"]
                wire_format = "yaml"
                "#
            ),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn dns_discovery_requires_zone() {
        let err = Config::from_toml_str(
            r#"
            [eureka]
            use_dns_for_service_urls = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = Config::from_toml_str(
            r#"
            [eureka]
            use_dns_for_service_urls = true
            dns_discovery_zone = "example.com"
            server_url_base = "eureka/v2"
            "#,
        )
        .unwrap();
        assert!(config.eureka.service_urls.is_empty());
    }

    #[test]
    fn invalid_configs() {
        assert!(matches!(
            Config::from_toml_str(""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[eureka]\nretries = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn from_file() {
        let path = std::env::temp_dir().join(format!("eureka-client-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[eureka]\nservice_urls = [\"http://a:1/eureka\"]").unwrap();
        drop(file);

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.eureka.service_urls.len(), 1);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            Config::from_toml_file(&path),
            Err(ConfigError::Io { .. })
        ));
    }
}
