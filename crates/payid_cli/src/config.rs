// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

// CLI configuration, validated against `config.schema.json` before use.
use serde::Deserialize;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use verifiable_payid::{Algorithm, CertificateChainValidator, PayIdError};

pub const DEFAULT_CONFIG_FILE: &str = "payid.config.json";

const SCHEMA: &str = include_str!("../config.schema.json");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{file}': {source}")]
    Read {
        file: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to deserialize JSON config '{file}': {source}")]
    Json {
        file: PathBuf,
        source: serde_json::Error,
    },
    #[error("config '{file}' does not match schema 'config.schema.json': {message}")]
    Schema { file: PathBuf, message: String },
    #[error(transparent)]
    PayId(#[from] PayIdError),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub logging_level: Option<String>,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    #[serde(default = "default_use_system_roots")]
    pub use_system_roots: bool,
    pub system_roots_file: Option<String>,
    #[serde(default)]
    pub trusted_roots: Vec<String>,
    pub identity_key_algorithm: Option<String>,
    pub server_key_algorithm: Option<String>,
}

fn default_storage_dir() -> String {
    ".payid".into()
}

fn default_use_system_roots() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging_level: None,
            storage_dir: default_storage_dir(),
            use_system_roots: default_use_system_roots(),
            system_roots_file: None,
            trusted_roots: Vec::new(),
            identity_key_algorithm: None,
            server_key_algorithm: None,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from `file`. A missing file yields the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not JSON, or does not
    /// match the schema.
    pub fn load(file: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(file) {
            Ok(contents) => Self::from_json(file, &contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("no config file at '{}', using defaults", file.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                file: file.to_owned(),
                source,
            }),
        }
    }

    /// Parses configuration JSON read from `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not JSON or does not match the schema.
    pub fn from_json(file: &Path, contents: &str) -> Result<Self, ConfigError> {
        let json_err = |source| ConfigError::Json {
            file: file.to_owned(),
            source,
        };
        let json: serde_json::Value = serde_json::from_str(contents).map_err(json_err)?;
        let schema: serde_json::Value = serde_json::from_str(SCHEMA).map_err(json_err)?;
        jsonschema::validate(&schema, &json).map_err(|e| ConfigError::Schema {
            file: file.to_owned(),
            message: e.to_string(),
        })?;
        serde_json::from_value(json).map_err(json_err)
    }

    /// Builds the trust store for chain validation: the system bundle if
    /// enabled, plus every configured root file.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured root file cannot be loaded.
    pub fn validator(&self) -> Result<CertificateChainValidator, ConfigError> {
        let mut validator = if self.use_system_roots {
            CertificateChainValidator::from_system_bundle(
                self.system_roots_file.as_deref().map(Path::new),
            )
        } else {
            CertificateChainValidator::empty()
        };
        for file in &self.trusted_roots {
            validator.add_root_certificate_file(file)?;
        }
        Ok(validator)
    }

    /// The configured identity-key algorithm, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedAlgorithm`] for an unknown name.
    pub fn identity_algorithm(&self) -> Result<Option<Algorithm>, ConfigError> {
        Ok(parse_algorithm(self.identity_key_algorithm.as_deref())?)
    }

    /// The configured server-key algorithm, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PayIdError::UnsupportedAlgorithm`] for an unknown name.
    pub fn server_algorithm(&self) -> Result<Option<Algorithm>, ConfigError> {
        Ok(parse_algorithm(self.server_key_algorithm.as_deref())?)
    }
}

fn parse_algorithm(alg: Option<&str>) -> Result<Option<Algorithm>, PayIdError> {
    alg.map(Algorithm::from_str).transpose()
}
