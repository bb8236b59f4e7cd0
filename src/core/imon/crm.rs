// src/core/imon/crm.rs

//! The CRM action interface: the external collaborator that actually
//! mutates resources. The core only ever calls through this trait; no
//! resource-driver logic lives here (out of scope per spec).

use async_trait::async_trait;

use crate::core::errors::OrchestratorError;
use crate::core::model::InstanceStatus;
use crate::core::path::Path;

/// The eight CRM verbs the orchestrator may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrmVerb {
    Start,
    Stop,
    Freeze,
    Unfreeze,
    Status,
    Provision,
    Unprovision,
    Purge,
}

#[async_trait]
pub trait CrmAction: Send + Sync {
    async fn start(&self, path: &Path) -> Result<(), OrchestratorError>;
    async fn stop(&self, path: &Path) -> Result<(), OrchestratorError>;
    async fn freeze(&self, path: &Path) -> Result<(), OrchestratorError>;
    async fn unfreeze(&self, path: &Path) -> Result<(), OrchestratorError>;
    async fn status(&self, path: &Path) -> Result<InstanceStatus, OrchestratorError>;
    async fn provision(&self, path: &Path) -> Result<(), OrchestratorError>;
    async fn unprovision(&self, path: &Path) -> Result<(), OrchestratorError>;
    async fn purge(&self, path: &Path) -> Result<(), OrchestratorError>;

    async fn run(&self, verb: CrmVerb, path: &Path) -> Result<(), OrchestratorError> {
        match verb {
            CrmVerb::Start => self.start(path).await,
            CrmVerb::Stop => self.stop(path).await,
            CrmVerb::Freeze => self.freeze(path).await,
            CrmVerb::Unfreeze => self.unfreeze(path).await,
            CrmVerb::Status => self.status(path).await.map(|_| ()),
            CrmVerb::Provision => self.provision(path).await,
            CrmVerb::Unprovision => self.unprovision(path).await,
            CrmVerb::Purge => self.purge(path).await,
        }
    }
}

/// A CRM implementation that logs the call and immediately succeeds.
/// Resource drivers (filesystems, IP, applications, ...) are out of scope;
/// this stands in for them at the orchestration boundary.
pub struct LoggingCrm;

#[async_trait]
impl CrmAction for LoggingCrm {
    async fn start(&self, path: &Path) -> Result<(), OrchestratorError> {
        tracing::info!(%path, "crm start");
        Ok(())
    }

    async fn stop(&self, path: &Path) -> Result<(), OrchestratorError> {
        tracing::info!(%path, "crm stop");
        Ok(())
    }

    async fn freeze(&self, path: &Path) -> Result<(), OrchestratorError> {
        tracing::info!(%path, "crm freeze");
        Ok(())
    }

    async fn unfreeze(&self, path: &Path) -> Result<(), OrchestratorError> {
        tracing::info!(%path, "crm unfreeze");
        Ok(())
    }

    async fn status(&self, path: &Path) -> Result<InstanceStatus, OrchestratorError> {
        tracing::debug!(%path, "crm status");
        Ok(InstanceStatus::default())
    }

    async fn provision(&self, path: &Path) -> Result<(), OrchestratorError> {
        tracing::info!(%path, "crm provision");
        Ok(())
    }

    async fn unprovision(&self, path: &Path) -> Result<(), OrchestratorError> {
        tracing::info!(%path, "crm unprovision");
        Ok(())
    }

    async fn purge(&self, path: &Path) -> Result<(), OrchestratorError> {
        tracing::info!(%path, "crm purge");
        Ok(())
    }
}
