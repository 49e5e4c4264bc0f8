// ABOUTME: Application-wide error types for kahua.
// ABOUTME: Configuration, registry, and I/O failures, plus lifecycle errors surfaced to the CLI.

use std::path::PathBuf;
use thiserror::Error;

use crate::exec::TemplateError;
use crate::hosts::HostsFileError;
use crate::lifecycle::LifecycleError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("unknown infrastructure kind '{kind}' (known: {known})")]
    UnknownInfrastructure { kind: String, known: String },

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid command template: {0}")]
    Template(#[from] TemplateError),

    #[error("invalid hosts file {path}: {source}")]
    HostsFile {
        path: PathBuf,
        #[source]
        source: HostsFileError,
    },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
