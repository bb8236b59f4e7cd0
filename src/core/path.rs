// src/core/path.rs

//! Identifies an object cluster-wide: a `(namespace, kind, name)` triple
//! with the textual form `namespace/kind/name`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

use crate::core::errors::OrchestratorError;

/// The kind of a managed object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Svc,
    Vol,
    Cfg,
    Sec,
    Usr,
    /// The singleton cluster config object.
    Ccfg,
}

/// A triple identifying an object cluster-wide. Serializes to/from its
/// textual form (`namespace/kind/name`), not a struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    pub namespace: String,
    pub kind: Kind,
    pub name: String,
}

impl Path {
    pub fn new(namespace: impl Into<String>, kind: Kind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }

    /// The well-known singleton cluster config path, `cluster/ccfg/cluster`.
    pub fn cluster_config() -> Self {
        Self::new("cluster", Kind::Ccfg, "cluster")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for Path {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let (namespace, kind, name) = match parts.as_slice() {
            [namespace, kind, name] => (*namespace, *kind, *name),
            _ => {
                return Err(OrchestratorError::InvalidParameters(format!(
                    "invalid path '{s}': expected namespace/kind/name"
                )));
            }
        };
        let kind = Kind::from_str(kind).map_err(|_| {
            OrchestratorError::InvalidParameters(format!("invalid path '{s}': unknown kind '{kind}'"))
        })?;
        Ok(Path::new(namespace, kind, name))
    }
}

impl Serialize for Path {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Path::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_text_form() {
        let p = Path::new("default", Kind::Svc, "s1");
        assert_eq!(p.to_string(), "default/svc/s1");
        assert_eq!(Path::from_str("default/svc/s1").unwrap(), p);
    }

    #[test]
    fn rejects_malformed_path() {
        assert!(Path::from_str("default/svc").is_err());
        assert!(Path::from_str("default/bogus/s1").is_err());
    }

    #[test]
    fn json_round_trip() {
        let p = Path::new("default", Kind::Svc, "s1");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"default/svc/s1\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
