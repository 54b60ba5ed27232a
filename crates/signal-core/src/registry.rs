//! Identity registry: connection <-> code bindings
//!
//! The registry owns all identifier allocation state. It maintains the
//! forward map (connection to code), the inverse map (code to connection) and
//! the allocated set, all behind a single mutex so every operation observes a
//! consistent view. The allocated set is a superset of the bound codes:
//! releasing a connection keeps its code reserved so the same endpoint can
//! reconnect and recover it, and only [`IdentityRegistry::invalidate`] (or a
//! regenerate on the owning connection) truly frees a code for reuse.
//!
//! No two concurrent allocations can return the same code, and a regenerate
//! is atomic: no other caller observes the connection with zero or two codes.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use crate::error::{Result, SignalError};
use crate::types::{CodeConfig, ConnectionId, PeerCode};

#[derive(Default)]
struct RegistryInner {
    /// connection -> code, for every live binding
    forward: HashMap<ConnectionId, PeerCode>,
    /// code -> connection, exactly mirroring `forward`
    inverse: HashMap<PeerCode, ConnectionId>,
    /// every code currently reserved, bound or not
    allocated: HashSet<PeerCode>,
}

impl RegistryInner {
    /// Bind `code` to `connection`, dropping any code the connection held.
    fn bind(&mut self, connection: ConnectionId, code: PeerCode) {
        if let Some(old) = self.forward.insert(connection, code.clone()) {
            self.inverse.remove(&old);
        }
        self.inverse.insert(code, connection);
    }
}

/// Allocates collision-free rendezvous codes and tracks which live connection
/// each one is bound to.
pub struct IdentityRegistry {
    config: CodeConfig,
    inner: Mutex<RegistryInner>,
}

impl IdentityRegistry {
    /// Create a registry drawing codes from `config`.
    pub fn new(config: CodeConfig) -> Self {
        IdentityRegistry {
            config,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Assign a code to a newly connected endpoint.
    ///
    /// If `requested` names a code that is reserved but not bound to a live
    /// connection, the endpoint is reconnecting: the code is rebound to
    /// `connection` and returned. In every other case a fresh code is drawn
    /// uniformly from the alphabet until an unallocated one is found.
    pub fn allocate(
        &self,
        connection: ConnectionId,
        requested: Option<&PeerCode>,
    ) -> Result<PeerCode> {
        let mut inner = self.inner.lock();

        if let Some(code) = requested {
            if inner.allocated.contains(code) && !inner.inverse.contains_key(code) {
                inner.bind(connection, code.clone());
                debug!(%connection, %code, "rebound reserved code");
                return Ok(code.clone());
            }
        }

        let code = self.generate(&inner)?;
        inner.allocated.insert(code.clone());
        inner.bind(connection, code.clone());
        debug!(%connection, %code, "allocated fresh code");
        Ok(code)
    }

    /// Drop the connection's binding, keeping its code reserved.
    ///
    /// Returns the code that was bound, if any. The code stays in the
    /// allocated set so a reconnecting endpoint can recover it; it does not
    /// re-enter the allocatable pool until [`invalidate`](Self::invalidate).
    pub fn release(&self, connection: ConnectionId) -> Option<PeerCode> {
        let mut inner = self.inner.lock();
        let code = inner.forward.remove(&connection)?;
        inner.inverse.remove(&code);
        debug!(%connection, %code, "released binding, code stays reserved");
        Some(code)
    }

    /// Remove `code` from the allocated set and drop any binding it has.
    ///
    /// The code becomes immediately reusable by other endpoints.
    pub fn invalidate(&self, code: &PeerCode) {
        let mut inner = self.inner.lock();
        inner.allocated.remove(code);
        if let Some(connection) = inner.inverse.remove(code) {
            inner.forward.remove(&connection);
        }
    }

    /// Swap the connection's code for a fresh one in a single atomic step.
    ///
    /// The old code is invalidated and a new one allocated under one lock
    /// acquisition; if generation fails the old binding is left intact.
    pub fn regenerate(&self, connection: ConnectionId) -> Result<PeerCode> {
        let mut inner = self.inner.lock();

        let old = inner.forward.remove(&connection);
        if let Some(ref old_code) = old {
            inner.inverse.remove(old_code);
            inner.allocated.remove(old_code);
        }

        match self.generate(&inner) {
            Ok(fresh) => {
                inner.allocated.insert(fresh.clone());
                inner.bind(connection, fresh.clone());
                debug!(%connection, code = %fresh, "regenerated code");
                Ok(fresh)
            }
            Err(err) => {
                if let Some(old_code) = old {
                    inner.allocated.insert(old_code.clone());
                    inner.bind(connection, old_code);
                }
                Err(err)
            }
        }
    }

    /// Look up the live connection bound to `code`.
    ///
    /// Fails with [`SignalError::NotFound`] when the code is unallocated or
    /// reserved but currently unbound.
    pub fn resolve(&self, code: &PeerCode) -> Result<ConnectionId> {
        self.inner
            .lock()
            .inverse
            .get(code)
            .copied()
            .ok_or_else(|| SignalError::NotFound(code.clone()))
    }

    /// Whether `code` is in the allocated set, bound or not.
    pub fn exists(&self, code: &PeerCode) -> bool {
        self.inner.lock().allocated.contains(code)
    }

    /// The code currently bound to `connection`, if any.
    pub fn code_of(&self, connection: ConnectionId) -> Option<PeerCode> {
        self.inner.lock().forward.get(&connection).cloned()
    }

    /// Number of codes currently reserved. Introspection helper for tests
    /// and diagnostics.
    pub fn allocated_count(&self) -> usize {
        self.inner.lock().allocated.len()
    }

    /// Draw codes uniformly from the alphabet until an unallocated one turns
    /// up. The capacity check up front guarantees termination.
    fn generate(&self, inner: &RegistryInner) -> Result<PeerCode> {
        if (inner.allocated.len() as u128) >= self.config.capacity() {
            return Err(SignalError::AllocationExhausted(inner.allocated.len()));
        }
        let mut rng = rand::thread_rng();
        loop {
            let raw: String = (0..self.config.length)
                .map(|_| self.config.alphabet[rng.gen_range(0..self.config.alphabet.len())])
                .collect();
            let code = PeerCode::new(raw);
            if !inner.allocated.contains(&code) {
                return Ok(code);
            }
        }
    }
}
