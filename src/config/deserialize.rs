// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles source names, command templates, and host lists.

use nonempty::NonEmpty;
use serde::Deserialize;

use crate::exec::CommandTemplate;
use crate::hosts::{HostTarget, parse_entry};

pub fn deserialize_source_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(serde::de::Error::custom(format!(
            "invalid source name '{s}': must be non-empty without whitespace or '/'"
        )));
    }
    Ok(s)
}

pub fn deserialize_template<'de, D>(deserializer: D) -> Result<CommandTemplate, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    CommandTemplate::parse(&s).map_err(serde::de::Error::custom)
}

pub fn deserialize_template_option<'de, D>(
    deserializer: D,
) -> Result<Option<CommandTemplate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    opt.map(|s| CommandTemplate::parse(&s).map_err(serde::de::Error::custom))
        .transpose()
}

pub fn deserialize_hosts_option<'de, D>(
    deserializer: D,
) -> Result<Option<NonEmpty<HostTarget>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<Vec<HostEntry>> = Option::deserialize(deserializer)?;
    let Some(values) = opt else {
        return Ok(None);
    };

    let hosts = values
        .into_iter()
        .enumerate()
        .map(|(index, entry)| entry.into_target(index + 1))
        .collect::<Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)?;

    NonEmpty::from_vec(hosts)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom("hosts list cannot be empty"))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostEntry {
    Simple(String),
    Detailed {
        host: String,
        #[serde(default = "default_count")]
        count: u32,
    },
}

fn default_count() -> u32 {
    1
}

impl HostEntry {
    fn into_target(self, position: usize) -> Result<HostTarget, String> {
        match self {
            HostEntry::Simple(s) => parse_entry(&s, position)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("host entry {position} is empty")),
            HostEntry::Detailed { host, count } => {
                if host.trim().is_empty() {
                    return Err(format!("host entry {position} has an empty address"));
                }
                Ok(HostTarget::new(host.trim(), count))
            }
        }
    }
}
