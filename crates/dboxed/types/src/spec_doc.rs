//! Declarative spec document
//!
//! A spec document maps logical names to volume and box descriptors. It is
//! YAML with camelCase keys; unknown keys are rejected so that typos surface
//! as user errors instead of silently ignored fields.
//!
//! ```yaml
//! volumes:
//!   data:
//!     fsSize: 1073741824
//! boxes:
//!   web:
//!     network: default
//!     volumes:
//!       - name: data
//!     composeProjects:
//!       app: |
//!         services: {}
//!     portForwards:
//!       - protocol: tcp
//!         hostPortFirst: 8080
//!         sandboxPort: 80
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::models::Protocol;

/// Errors produced while parsing or validating a spec document
#[derive(Debug, Error)]
pub enum SpecParseError {
    #[error("Malformed spec document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid spec document: {0}")]
    Invalid(String),
}

/// Typed spec fragment that can be stored in a mapping row
pub trait SpecFragment: Serialize {
    /// Changing this key forces the object to be deleted and recreated.
    fn recreate_key(&self) -> &str;
}

/// Root of a spec document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SpecDocument {
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeSpec>,
    #[serde(default)]
    pub boxes: BTreeMap<String, BoxSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeSpec {
    #[serde(default)]
    pub recreate_key: String,
    pub fs_size: u64,
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BoxSpec {
    #[serde(default)]
    pub recreate_key: String,
    /// Name of an existing network in the same workspace
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub volumes: Vec<BoxVolumeSpec>,
    #[serde(default)]
    pub compose_projects: BTreeMap<String, String>,
    #[serde(default)]
    pub port_forwards: Vec<PortForwardSpec>,
    #[serde(default)]
    pub ingresses: Vec<IngressSpec>,
}

/// Volume mounted into a box, referencing a volume of the same document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BoxVolumeSpec {
    pub name: String,
    #[serde(default)]
    pub root_uid: u32,
    #[serde(default)]
    pub root_gid: u32,
    #[serde(default = "default_root_mode")]
    pub root_mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortForwardSpec {
    pub protocol: Protocol,
    pub host_port_first: u16,
    /// Defaults to `host_port_first` for a single port
    #[serde(default)]
    pub host_port_last: Option<u16>,
    pub sandbox_port: u16,
}

impl PortForwardSpec {
    pub fn last_port(&self) -> u16 {
        self.host_port_last.unwrap_or(self.host_port_first)
    }
}

/// Route from an ingress proxy to a port of the box
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IngressSpec {
    /// Name of an ingress proxy in the same workspace
    pub proxy: String,
    pub hostname: String,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    pub port: u16,
}

fn default_fs_type() -> String {
    "ext4".to_string()
}

fn default_root_mode() -> String {
    "0700".to_string()
}

fn default_path_prefix() -> String {
    "/".to_string()
}

impl SpecFragment for VolumeSpec {
    fn recreate_key(&self) -> &str {
        &self.recreate_key
    }
}

impl SpecFragment for BoxSpec {
    fn recreate_key(&self) -> &str {
        &self.recreate_key
    }
}

impl SpecDocument {
    /// Parse and validate a YAML document.
    pub fn parse(bytes: &[u8]) -> Result<Self, SpecParseError> {
        // An empty file is an empty document
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let doc: Self = serde_yaml::from_slice(bytes)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn validate(&self) -> Result<(), SpecParseError> {
        for (name, volume) in &self.volumes {
            validate_name("volume", name)?;
            if volume.fs_size == 0 {
                return Err(invalid(format!("volume '{name}': fsSize must be positive")));
            }
            if volume.fs_type.is_empty() {
                return Err(invalid(format!("volume '{name}': fsType must not be empty")));
            }
        }

        for (name, spec) in &self.boxes {
            validate_name("box", name)?;
            self.validate_box(name, spec)?;
        }
        Ok(())
    }

    fn validate_box(&self, name: &str, spec: &BoxSpec) -> Result<(), SpecParseError> {
        let mut mounted = BTreeSet::new();
        for volume in &spec.volumes {
            if !self.volumes.contains_key(&volume.name) {
                return Err(invalid(format!(
                    "box '{name}': unknown volume '{}'",
                    volume.name
                )));
            }
            if !mounted.insert(volume.name.as_str()) {
                return Err(invalid(format!(
                    "box '{name}': volume '{}' mounted twice",
                    volume.name
                )));
            }
        }

        for project in spec.compose_projects.keys() {
            validate_name("compose project", project)?;
        }

        for pf in &spec.port_forwards {
            if pf.host_port_first == 0 || pf.sandbox_port == 0 {
                return Err(invalid(format!("box '{name}': port 0 is not allowed")));
            }
            if pf.last_port() < pf.host_port_first {
                return Err(invalid(format!(
                    "box '{name}': port range {}-{} is reversed",
                    pf.host_port_first,
                    pf.last_port()
                )));
            }
        }

        for ingress in &spec.ingresses {
            if ingress.hostname.is_empty() {
                return Err(invalid(format!("box '{name}': ingress hostname is empty")));
            }
            if !ingress.path_prefix.starts_with('/') {
                return Err(invalid(format!(
                    "box '{name}': ingress path prefix '{}' must start with '/'",
                    ingress.path_prefix
                )));
            }
            if ingress.port == 0 {
                return Err(invalid(format!("box '{name}': ingress port 0 is not allowed")));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> SpecParseError {
    SpecParseError::Invalid(message)
}

/// Logical names are DNS-label like: lowercase alphanumerics and dashes.
fn validate_name(kind: &str, name: &str) -> Result<(), SpecParseError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(invalid(format!("invalid {kind} name '{name}'")))
    }
}
