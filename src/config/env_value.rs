// ABOUTME: Secret values given literally or read from the environment.
// ABOUTME: Used for the credentials passed to launched nodes.

use crate::error::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }

    /// Where the value comes from, safe to print.
    pub fn describe(&self) -> String {
        match self {
            EnvValue::Literal(_) => "inline value".to_string(),
            EnvValue::FromEnv { var, .. } => format!("${var}"),
        }
    }
}
