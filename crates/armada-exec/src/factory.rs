use std::collections::HashSet;
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;

use armada_common::DeviceProfile;

use crate::credentials::{Credential, CredentialStore};
use crate::executor::RemoteExecutor;
use crate::local::LocalExecutor;
use crate::ssh::SshExecutor;

/// Builds the executor that reaches a given device.
pub trait ExecutorFactory: Send + Sync {
    fn executor_for(&self, device: &DeviceProfile) -> Arc<dyn RemoteExecutor>;
}

/// Local shell for this machine, ssh for everything else.
#[derive(Debug, Clone)]
pub struct DefaultExecutorFactory {
    credentials: CredentialStore,
    local_names: HashSet<String>,
    default_username: String,
}

impl DefaultExecutorFactory {
    pub fn new(credentials: CredentialStore) -> Self {
        let mut local_names: HashSet<String> = ["localhost", "127.0.0.1", "::1"]
            .into_iter()
            .map(str::to_string)
            .collect();
        if let Some(ip) = primary_local_ip() {
            local_names.insert(ip.to_string());
        }
        let default_username = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
        Self {
            credentials,
            local_names,
            default_username,
        }
    }

    /// Also treat `name` as this machine.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_names.insert(name.into());
        self
    }

    pub fn is_local(&self, address: &str) -> bool {
        if self.local_names.contains(address) {
            return true;
        }
        address
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }

    fn credential_for(&self, device: &DeviceProfile) -> Credential {
        if let Some(c) = self.credentials.get(&device.address) {
            return c.clone();
        }
        Credential {
            username: device
                .remote_access
                .username
                .clone()
                .unwrap_or_else(|| self.default_username.clone()),
            password: None,
            port: device.remote_access.port,
            identity_file: None,
        }
    }
}

impl ExecutorFactory for DefaultExecutorFactory {
    fn executor_for(&self, device: &DeviceProfile) -> Arc<dyn RemoteExecutor> {
        if self.is_local(&device.address) {
            return Arc::new(LocalExecutor::new());
        }
        let cred = self.credential_for(device);
        Arc::new(SshExecutor::from_credential(device.address.clone(), &cred))
    }
}

/// Address of the interface that routes to the outside world. Connecting a
/// UDP socket sends no packets; it only resolves the route.
pub fn primary_local_ip() -> Option<IpAddr> {
    let sock = UdpSocket::bind("0.0.0.0:0").ok()?;
    sock.connect("192.0.2.1:9").ok()?;
    sock.local_addr().ok().map(|a| a.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_and_named_hosts_are_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("c.json")).unwrap();
        let factory = DefaultExecutorFactory::new(store).with_local_name("workstation");
        assert!(factory.is_local("127.0.0.1"));
        assert!(factory.is_local("127.0.1.1"));
        assert!(factory.is_local("localhost"));
        assert!(factory.is_local("workstation"));
        assert!(!factory.is_local("203.0.113.50"));
    }

    #[test]
    fn test_remote_device_uses_stored_credential() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::open(dir.path().join("c.json")).unwrap();
        store
            .set(
                "203.0.113.50",
                Credential {
                    username: "ops".into(),
                    password: None,
                    port: 2222,
                    identity_file: None,
                },
            )
            .unwrap();
        let factory = DefaultExecutorFactory::new(store);
        let exec = factory.executor_for(&DeviceProfile::new("gpu1", "203.0.113.50"));
        assert_eq!(exec.target(), "203.0.113.50");
    }
}
