// ABOUTME: Config scaffolding for new node sources.
// ABOUTME: Writes a kahua.yml template for the chosen infrastructure kind.

use std::path::Path;

use crate::error::{Error, Result};

use super::CONFIG_FILENAME;

/// Kinds `kahua init` can scaffold.
pub const INFRASTRUCTURE_KINDS: &[&str] = &["ssh", "script", "local", "pbs", "lsf", "sge"];

pub fn init_config(dir: &Path, kind: &str, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let yaml = generate_template_yaml(kind)?;
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

pub fn generate_template_yaml(kind: &str) -> Result<String> {
    let infrastructure = match kind {
        "ssh" => {
            r#"  kind: ssh
  hosts:
    - node1.example.org 2
    - node2.example.org
  # hosts_file: hosts.txt
  command: "start-node --url {url} --name {node} --credentials {credentials}"
  # removal_command: "pkill -f 'start-node.*{source}'"
  node_timeout: 60s
  failure_threshold: 5
  wait_between_failures: 5s
  ssh:
    user: deploy
    # SSH host key verification (default: false for security)
    # Set to true to enable Trust-On-First-Use, or pre-populate ~/.ssh/known_hosts
    # trust_first_connection: true
"#
        }
        "script" => {
            r#"  kind: script
  hosts:
    - node1.example.org
  # Runs on this machine; the script reaches {host} itself
  command: "./deploy-node.sh {host} {node} {url}"
  node_timeout: 60s
"#
        }
        "local" => {
            r#"  kind: local
  nodes: 2
  command: "start-node --url {url} --name {node}"
  node_timeout: 60s
"#
        }
        "pbs" | "lsf" | "sge" => {
            return Ok(format!(
                r#"{HEADER}infrastructure:
  kind: {kind}
  # front_end: login.cluster.example.org
  # ssh:
  #   user: deploy
  command: "start-node --url {{url}} --name {{node}}"
  submit_options: ""
  max_nodes: 4
  node_timeout: 5m
"#
            ));
        }
        other => {
            return Err(Error::InvalidConfig(format!(
                "cannot scaffold infrastructure kind '{}' (known: {})",
                other,
                INFRASTRUCTURE_KINDS.join(", ")
            )));
        }
    };

    Ok(format!("{HEADER}infrastructure:\n{infrastructure}"))
}

const HEADER: &str = r#"source: default
registration_url: pnp://manager.example.org:64738
workers: 20
# credentials:
#   env: KAHUA_CREDENTIALS
recovery:
  enabled: false
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn every_kind_scaffolds_a_loadable_config() {
        for kind in INFRASTRUCTURE_KINDS {
            let yaml = generate_template_yaml(kind).unwrap();
            let config = Config::from_yaml(&yaml).unwrap();
            assert_eq!(config.infrastructure.kind, *kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            generate_template_yaml("kubernetes"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), "ssh", false).unwrap();
        assert!(matches!(
            init_config(dir.path(), "ssh", false),
            Err(Error::AlreadyExists(_))
        ));
        init_config(dir.path(), "pbs", true).unwrap();

        let content = std::fs::read_to_string(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert!(content.contains("kind: pbs"));
    }
}
