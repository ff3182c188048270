//! Backend registration for the orchestration root

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::events::CoreEvent;
use crate::manager::CallManager;

impl super::CallCore {
    /// Register a protocol backend
    ///
    /// Registration order matters: dial dispatch tries managers in the
    /// order they were added. Protocols are unique.
    pub async fn add_manager(&self, manager: Arc<dyn CallManager>) -> CoreResult<()> {
        let protocol = manager.protocol_name().to_string();
        {
            let mut managers = self.managers.write().await;
            if managers.iter().any(|m| m.protocol_name() == protocol) {
                return Err(CoreError::ManagerAlreadyRegistered { protocol });
            }
            managers.push(manager);
        }
        tracing::info!(%protocol, "manager registered");
        let _ = self.event_tx.send(CoreEvent::ManagerAdded { protocol });
        Ok(())
    }

    /// Deregister a protocol backend
    ///
    /// The manager's own calls are untouched; shutting them down is the
    /// caller's responsibility.
    pub async fn remove_manager(&self, protocol: &str) -> CoreResult<Arc<dyn CallManager>> {
        let manager = {
            let mut managers = self.managers.write().await;
            let position = managers
                .iter()
                .position(|m| m.protocol_name() == protocol)
                .ok_or_else(|| CoreError::ManagerNotFound {
                    protocol: protocol.to_string(),
                })?;
            managers.remove(position)
        };
        tracing::info!(%protocol, "manager deregistered");
        let _ = self.event_tx.send(CoreEvent::ManagerRemoved {
            protocol: protocol.to_string(),
        });
        Ok(manager)
    }

    /// Look up a backend by protocol name
    pub async fn manager(&self, protocol: &str) -> Option<Arc<dyn CallManager>> {
        self.managers
            .read()
            .await
            .iter()
            .find(|m| m.protocol_name() == protocol)
            .cloned()
    }

    /// Snapshot of the registered backends, in registration order
    pub async fn managers(&self) -> Vec<Arc<dyn CallManager>> {
        self.managers.read().await.clone()
    }
}
