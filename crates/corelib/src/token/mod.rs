//! Ring tokens.
//!
//! Tokens represent positions on the 64-bit hash ring. Keys, virtual nodes
//! and segments are all placed on the same ring, so a single compact token
//! type is enough.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position on the hash ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
