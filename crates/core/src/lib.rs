//! The cooperative core of an IRC server: BufferedLink, Resolver,
//! AuthAgent, Registry and Router, tied together by a single owning
//! [`Core`] context.
//!
//! Every mutable structure here — the SendQ pool, the Registry's tables,
//! the resolver's in-flight list and cache — is owned by exactly one
//! `Core` value, driven from one accept/poll loop. Cross-task
//! communication with it goes through bounded channels, never a shared
//! `Mutex<Core>`.

pub mod auth;
pub mod channel;
pub mod dbuf;
pub mod error;
pub mod link;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod sendq;

use std::sync::Arc;

use auth::AuthAgent;
use registry::Registry;
use resolver::Resolver;
use sendq::Pool;

/// The single context holding every shared structure described above. A
/// value of this type is never handed to more than one task at a time.
pub struct Core {
    pub registry: Registry,
    pub pool: Arc<Pool>,
    pub resolver: Resolver,
    pub auth: AuthAgent,
}

impl Core {
    pub fn new(registry: Registry, pool: Arc<Pool>, resolver: Resolver, auth: AuthAgent) -> Self {
        Self {
            registry,
            pool,
            resolver,
            auth,
        }
    }
}
