//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different identifier kinds and
//! make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A durable-queue ticket.
///
/// Assigned by the [`DirQueue`](crate::dirq::DirQueue) when an entry is
/// stored. Tickets are opaque strings whose lexicographic order correlates
/// with creation time. The form is `<shard>/<entry>` where both components
/// are fixed-width hex, so string comparison gives a total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(pub String);

impl Ticket {
    pub fn new(s: impl Into<String>) -> Self {
        Ticket(s.into())
    }

    /// The sentinel "lowest possible ticket".
    ///
    /// The loader checkpoint starts here; every real ticket compares greater.
    pub fn lowest() -> Self {
        Ticket(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Ticket {
    fn from(s: String) -> Self {
        Ticket(s)
    }
}

impl From<&str> for Ticket {
    fn from(s: &str) -> Self {
        Ticket(s.to_string())
    }
}
