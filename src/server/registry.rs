//! Device registry and change fan-out.
//!
//! The server keeps an in-memory map from username to the addresses of
//! that user's live clients. Clients register their local listener
//! address after login and unregister on exit. After every successful
//! mutation the server signals the user's devices: a bare TCP connect,
//! closed immediately, that tells each client "something changed, pull
//! again". No payload ever crosses that connection.
//!
//! ## Locking
//! One mutex guards the whole map. `signal` snapshots the address list
//! under the lock, probes without it (a dial can block for seconds),
//! then re-acquires it once to drop every dead address in a single
//! commit. Registrations that land during the probe window survive the
//! commit untouched.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;

/// How long a probe waits for a connect before declaring a device dead.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// In-memory map of each user's reachable client addresses.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, Vec<String>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device address for a user. Re-registering an address the
    /// user already has is a no-op; first-seen order is preserved.
    pub fn register(&self, username: &str, addr: &str) {
        let mut devices = self.devices.lock();
        let addrs = devices.entry(username.to_string()).or_default();
        if !addrs.iter().any(|a| a == addr) {
            addrs.push(addr.to_string());
        }
        tracing::info!(user = username, addr = addr, "Device registered");
    }

    /// Remove a device address. Unknown users and unknown addresses are
    /// both ignored.
    pub fn unregister(&self, username: &str, addr: &str) {
        let mut devices = self.devices.lock();
        if let Some(addrs) = devices.get_mut(username) {
            addrs.retain(|a| a != addr);
            tracing::info!(user = username, addr = addr, "Device unregistered");
        }
    }

    /// Nudge every device the user has registered.
    ///
    /// Each address gets one TCP connect with a short timeout, closed
    /// right away on success. Addresses that refuse or time out are
    /// dropped from the registry; a device that comes back later simply
    /// registers again.
    pub async fn signal(&self, username: &str) {
        let addrs = {
            let devices = self.devices.lock();
            match devices.get(username) {
                Some(addrs) => addrs.clone(),
                None => return,
            }
        };

        let mut dead = Vec::new();
        for addr in &addrs {
            match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr.as_str())).await {
                Ok(Ok(stream)) => drop(stream),
                Ok(Err(_)) | Err(_) => {
                    tracing::info!(
                        user = username,
                        addr = addr.as_str(),
                        "Device unreachable, dropping"
                    );
                    dead.push(addr.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut devices = self.devices.lock();
            if let Some(addrs) = devices.get_mut(username) {
                addrs.retain(|a| !dead.contains(a));
            }
        }
    }

    /// Current addresses for a user, in registration order.
    pub fn addresses(&self, username: &str) -> Vec<String> {
        self.devices
            .lock()
            .get(username)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of users that have ever registered a device this run.
    pub fn user_count(&self) -> usize {
        self.devices.lock().len()
    }
}
