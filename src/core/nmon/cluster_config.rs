// src/core/nmon/cluster_config.rs

//! The singleton cluster-config object: cluster-wide membership, mutated
//! only by nmon and serialized through its single actor. Grounded in
//! `daemon/nmon/cluster_config.go`'s `addClusterNode`/`removeClusterNode`.

use crate::core::errors::OrchestratorError;

/// In-memory membership list for the `cluster/ccfg/cluster` object. Parsing
/// the on-disk config stub format is out of scope; this struct is the
/// already-parsed form `config::Config` hands to nmon at startup.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    pub nodes: Vec<String>,
}

impl ClusterConfig {
    pub fn new(nodes: Vec<String>) -> Self {
        Self { nodes }
    }

    pub fn add_node(&mut self, node: String) -> Result<(), OrchestratorError> {
        if self.nodes.iter().any(|n| n == &node) {
            return Err(OrchestratorError::Conflict(format!(
                "{node} is already a cluster member"
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn remove_node(&mut self, node: &str) -> Result<(), OrchestratorError> {
        let before = self.nodes.len();
        self.nodes.retain(|n| n != node);
        if self.nodes.len() == before {
            return Err(OrchestratorError::NotFound(format!(
                "{node} is not a cluster member"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_round_trips() {
        let mut cfg = ClusterConfig::new(vec!["n1".into()]);
        cfg.add_node("n2".into()).unwrap();
        assert_eq!(cfg.nodes, vec!["n1".to_string(), "n2".to_string()]);
        cfg.remove_node("n1").unwrap();
        assert_eq!(cfg.nodes, vec!["n2".to_string()]);
    }

    #[test]
    fn add_existing_node_conflicts() {
        let mut cfg = ClusterConfig::new(vec!["n1".into()]);
        assert!(cfg.add_node("n1".into()).is_err());
    }

    #[test]
    fn remove_unknown_node_not_found() {
        let mut cfg = ClusterConfig::new(vec!["n1".into()]);
        assert!(cfg.remove_node("n9").is_err());
    }
}
