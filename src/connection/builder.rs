//! One-shot establishment of all sessions behind a single address.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::{
    address::Address,
    common::Role,
    session::Session,
    settings::SessionSettings,
    transport::{ConnectError, Connector},
};

#[derive(Debug, Error)]
pub enum BuildConnectionError {
    #[error("rendezvous at `{0}` timed out after {1:?}")]
    Timeout(Address, Duration),
    #[error("connect to `{0}` failed: {1}")]
    Connect(Address, #[source] ConnectError),
    #[error("no pair of `{0}` produced a session")]
    NoSubGroup(Address),
}

/// Builds every session one address yields.
///
/// A world of two yields one session; a larger world fans out into one
/// session per follower on the leader's side. A pair that fails during
/// session construction is logged and skipped, the build only fails
/// outright when no pair at all survives.
pub struct ConnectionBuilder {
    address: Address,
    role: Role,
    session_settings: SessionSettings,
    connect_timeout: Duration,
}

impl ConnectionBuilder {
    pub fn new(address: Address, role: Role) -> Self {
        Self {
            address,
            role,
            session_settings: SessionSettings::defaults_for(role),
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_session_settings(mut self, settings: SessionSettings) -> Self {
        self.session_settings = settings;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn build(
        &self,
        connector: &dyn Connector,
    ) -> Result<Vec<Session>, BuildConnectionError> {
        let pairs = tokio::time::timeout(
            self.connect_timeout,
            connector.connect(&self.address, self.role),
        )
        .await
        .map_err(|_| BuildConnectionError::Timeout(self.address.clone(), self.connect_timeout))?
        .map_err(|e| BuildConnectionError::Connect(self.address.clone(), e))?;

        let setups = pairs
            .into_iter()
            .map(|pair| Session::new(pair, self.role, self.session_settings.clone()));
        let mut sessions = Vec::new();
        for outcome in futures::future::join_all(setups).await {
            match outcome {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(address = %self.address, "pair dropped during session setup: {}", e),
            }
        }
        if sessions.is_empty() {
            return Err(BuildConnectionError::NoSubGroup(self.address.clone()));
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::Backend,
        transport::{in_memory_world, MockConnector},
    };

    fn addr() -> Address {
        Address::new(Backend::Null, "null").unwrap()
    }

    #[tokio::test]
    async fn test_build_yields_one_session_per_pair() {
        let (leader_connector, _followers) = in_memory_world(3);
        let sessions = ConnectionBuilder::new(addr(), Role::Leader)
            .build(&leader_connector)
            .await
            .unwrap();
        assert_eq!(sessions.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_world_is_no_sub_group() {
        let mut connector = MockConnector::new();
        connector.expect_connect().returning(|_, _| Ok(Vec::new()));
        let err = ConnectionBuilder::new(addr(), Role::Leader)
            .build(&connector)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildConnectionError::NoSubGroup(_)));
    }
}
