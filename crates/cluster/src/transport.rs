//! In-process transport connecting the members of a [`LocalCluster`].
//!
//! [`LocalCluster`]: crate::local_cluster::LocalCluster

use async_trait::async_trait;
use corelib::error::{Error, Result};
use corelib::network::{Request, RequestHandler, Response, Transport};
use corelib::node::{Member, NodeId};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tracing::trace;

/// Delivers requests by calling the target's handler directly.
///
/// A member that is not registered, or is marked down, is unreachable.
#[derive(Default)]
pub struct LocalTransport {
    handlers: DashMap<NodeId, Arc<dyn RequestHandler>>,
    down: DashSet<NodeId>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, member: &Member, handler: Arc<dyn RequestHandler>) {
        self.down.remove(&member.id);
        self.handlers.insert(member.id, handler);
    }

    pub fn deregister(&self, member: &Member) {
        self.handlers.remove(&member.id);
    }

    /// Drop every request to `member` from now on.
    pub fn set_down(&self, member: &Member, down: bool) {
        if down {
            self.down.insert(member.id);
        } else {
            self.down.remove(&member.id);
        }
    }

    pub fn is_down(&self, member: &Member) -> bool {
        self.down.contains(&member.id)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, target: &Member, request: Request) -> Result<Response> {
        if self.down.contains(&target.id) {
            return Err(Error::Unreachable { target: target.clone() });
        }
        let handler = self
            .handlers
            .get(&target.id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| Error::Unreachable { target: target.clone() })?;
        trace!(target = %target, cache = ?request.cache(), "delivering request");
        Ok(handler.handle(request).await)
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("registered", &self.handlers.len())
            .field("down", &self.down.len())
            .finish()
    }
}
