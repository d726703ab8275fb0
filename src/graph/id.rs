//! Stable node identity.
//!
//! Ids are random UUIDs assigned at creation and kept through persistence,
//! so they never depend on a node's position in the graph.

use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub const NIL: NodeId = NodeId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }

    /// First 8 hex digits, enough to tell nodes apart in logs.
    pub fn short(&self) -> String {
        let mut text = self.0.simple().to_string();
        text.truncate(8);
        text
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "NodeId(NIL)")
        } else {
            write!(f, "NodeId({})", self.short())
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
