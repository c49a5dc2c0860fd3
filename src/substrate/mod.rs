mod local;
pub use local::*;

use core::{fmt, ops::BitOr, time::Duration};
use std::sync::Arc;

use thiserror::Error;

use crate::{name::ContentName, packet::Interest};

// The substrate is the named-data network underneath the router.

// Every face owns one attachment: a point in the substrate where it can
//  register prefixes, inject request units, and receive the units the
//  substrate forwards to it.

// RP modules register prefix handlers instead, which see matching units
//  before ordinary prefix forwarding and may consume them.

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttachmentId(pub(crate) u32);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "att{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub(crate) u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ForwardingFlags(u8);

impl ForwardingFlags {
    pub const ACTIVE: ForwardingFlags = ForwardingFlags(1);
    pub const CHILD_INHERIT: ForwardingFlags = ForwardingFlags(2);

    pub fn contains(self, other: ForwardingFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ForwardingFlags {
    type Output = ForwardingFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ForwardingFlags(self.0 | rhs.0)
    }
}

/// Called with every unit under the handler's prefix; returns true if it
/// consumed the unit.
pub type PrefixHandler = Arc<dyn Fn(&Interest) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstrateError {
    #[error("substrate is closed")]
    Closed,
    #[error("no such attachment: {0}")]
    NoSuchAttachment(AttachmentId),
}

pub trait Substrate: Send + Sync + 'static {
    type Attachment: Attachment;

    fn create_attachment(&self) -> Result<Self::Attachment, SubstrateError>;

    fn destroy_attachment(&self, attachment: AttachmentId) -> Result<(), SubstrateError>;

    fn register_prefix(
        &self,
        attachment: AttachmentId,
        prefix: &ContentName,
        flags: ForwardingFlags,
    ) -> Result<(), SubstrateError>;

    fn unregister_prefix(
        &self,
        attachment: AttachmentId,
        prefix: &ContentName,
    ) -> Result<bool, SubstrateError>;

    fn register_prefix_handler(
        &self,
        prefix: &ContentName,
        handler: PrefixHandler,
    ) -> Result<HandlerId, SubstrateError>;

    fn unregister_prefix_handler(&self, handler: HandlerId) -> Result<bool, SubstrateError>;

    /// Injects an encoded request unit at `from`.
    fn send(&self, from: AttachmentId, unit: &[u8]) -> Result<(), SubstrateError>;

    fn close(&self);
}

/// The receiving half of an attachment.
pub trait Attachment: Send + 'static {
    fn id(&self) -> AttachmentId;

    /// Waits at most `timeout` for a unit; returns its length, or 0 if none
    /// arrived. Units longer than `dst` are dropped.
    fn recv(&mut self, dst: &mut [u8], timeout: Duration) -> Result<usize, SubstrateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let both = ForwardingFlags::ACTIVE | ForwardingFlags::CHILD_INHERIT;
        assert!(both.contains(ForwardingFlags::ACTIVE));
        assert!(both.contains(ForwardingFlags::CHILD_INHERIT));
        assert!(!ForwardingFlags::ACTIVE.contains(ForwardingFlags::CHILD_INHERIT));
        assert!(!ForwardingFlags::default().contains(ForwardingFlags::ACTIVE));
    }
}
