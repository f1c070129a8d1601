//! Core partitioner trait definitions.

use crate::token::Token;
use std::fmt::Debug;

/// A partitioner converts keys into tokens for placement on the hash ring.
///
/// Partitioners are stateless and thread-safe, allowing concurrent token
/// generation without synchronization overhead. Every node and every client
/// of a cache must use the same partitioner, since segment routing is
/// computed independently on each side.
pub trait Partitioner: Send + Sync + Debug + 'static {
    /// Converts a key into a token.
    ///
    /// Must be stable across processes and releases: the same bytes always
    /// produce the same token.
    fn partition(&self, key: &[u8]) -> Token;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;
}
