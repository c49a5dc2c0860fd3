use core::time::Duration;
use std::{
    collections::HashMap,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    name::ContentName,
    packet::Interest,
    substrate::{
        Attachment, AttachmentId, ForwardingFlags, HandlerId, PrefixHandler, Substrate,
        SubstrateError,
    },
    tables::NameTable,
};

/// An in-process named-data forwarder.
///
/// Units injected at an attachment are offered to prefix handlers first,
/// longest prefix first. Units no handler consumes go to every attachment
/// registered at the longest matching FIB prefix, except the one they came
/// from.
pub struct LocalSubstrate {
    inner: RwLock<Inner>,
}

struct Inner {
    closed: bool,
    next_attachment: u32,
    next_handler: u32,
    attachments: HashMap<AttachmentId, Sender<Vec<u8>>>,
    fib: NameTable<FibEntry>,
    handlers: NameTable<HandlerEntry>,
    handler_prefixes: HashMap<HandlerId, ContentName>,
}

// Entries are identified by their attachment alone
struct FibEntry {
    attachment: AttachmentId,
    flags: ForwardingFlags,
}

impl PartialEq for FibEntry {
    fn eq(&self, other: &Self) -> bool {
        self.attachment == other.attachment
    }
}

struct HandlerEntry {
    id: HandlerId,
    handler: PrefixHandler,
}

impl PartialEq for HandlerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

pub struct LocalAttachment {
    id: AttachmentId,
    receiver: Receiver<Vec<u8>>,
}

impl Default for LocalSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSubstrate {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                closed: false,
                next_attachment: 1,
                next_handler: 1,
                attachments: HashMap::new(),
                fib: NameTable::new(),
                handlers: NameTable::new(),
                handler_prefixes: HashMap::new(),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// FIB entries as `(prefix, attachment)`.
    pub fn routes(&self) -> Vec<(ContentName, AttachmentId)> {
        let mut routes = Vec::new();
        self.inner
            .read()
            .fib
            .for_each(|prefix, entry| routes.push((prefix.clone(), entry.attachment)));
        routes
    }
}

impl Inner {
    fn check_open(&self) -> Result<(), SubstrateError> {
        if self.closed {
            Err(SubstrateError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_attachment(&self, attachment: AttachmentId) -> Result<(), SubstrateError> {
        self.check_open()?;
        if self.attachments.contains_key(&attachment) {
            Ok(())
        } else {
            Err(SubstrateError::NoSuchAttachment(attachment))
        }
    }

    // The entries at the longest FIB prefix that has any usable entry
    fn next_hops(&self, name: &ContentName, from: AttachmentId) -> Vec<Sender<Vec<u8>>> {
        let mut hops = Vec::new();
        let mut matched_len = None;
        for m in self.fib.matches_all(name) {
            if matched_len.is_some_and(|len| len != m.prefix_len) {
                break;
            }
            let flags = m.value.flags;
            if !flags.contains(ForwardingFlags::ACTIVE) {
                continue;
            }
            if !m.is_exact_for(name) && !flags.contains(ForwardingFlags::CHILD_INHERIT) {
                continue;
            }
            matched_len = Some(m.prefix_len);
            if m.value.attachment == from {
                continue;
            }
            if let Some(sender) = self.attachments.get(&m.value.attachment) {
                hops.push(sender.clone());
            }
        }
        hops
    }
}

impl Substrate for LocalSubstrate {
    type Attachment = LocalAttachment;

    fn create_attachment(&self) -> Result<LocalAttachment, SubstrateError> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        let id = AttachmentId(inner.next_attachment);
        inner.next_attachment += 1;
        let (sender, receiver) = mpsc::channel();
        inner.attachments.insert(id, sender);
        debug!(attachment = %id, "Created attachment");
        Ok(LocalAttachment { id, receiver })
    }

    fn destroy_attachment(&self, attachment: AttachmentId) -> Result<(), SubstrateError> {
        let mut inner = self.inner.write();
        inner.check_attachment(attachment)?;
        inner.attachments.remove(&attachment);
        let removed = inner.fib.remove_value(&FibEntry {
            attachment,
            flags: ForwardingFlags::default(),
        });
        debug!(%attachment, prefixes = removed.len(), "Destroyed attachment");
        Ok(())
    }

    fn register_prefix(
        &self,
        attachment: AttachmentId,
        prefix: &ContentName,
        flags: ForwardingFlags,
    ) -> Result<(), SubstrateError> {
        let mut inner = self.inner.write();
        inner.check_attachment(attachment)?;
        let entry = FibEntry { attachment, flags };
        // Re-registering replaces the flags
        inner.fib.remove(prefix, &entry);
        inner.fib.add(prefix, entry);
        debug!(%prefix, %attachment, "Registered prefix");
        Ok(())
    }

    fn unregister_prefix(
        &self,
        attachment: AttachmentId,
        prefix: &ContentName,
    ) -> Result<bool, SubstrateError> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        Ok(inner.fib.remove(
            prefix,
            &FibEntry {
                attachment,
                flags: ForwardingFlags::default(),
            },
        ))
    }

    fn register_prefix_handler(
        &self,
        prefix: &ContentName,
        handler: PrefixHandler,
    ) -> Result<HandlerId, SubstrateError> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        let id = HandlerId(inner.next_handler);
        inner.next_handler += 1;
        inner.handlers.add(prefix, HandlerEntry { id, handler });
        inner.handler_prefixes.insert(id, prefix.clone());
        debug!(%prefix, "Registered prefix handler");
        Ok(id)
    }

    fn unregister_prefix_handler(&self, handler: HandlerId) -> Result<bool, SubstrateError> {
        let mut inner = self.inner.write();
        inner.check_open()?;
        let prefix = match inner.handler_prefixes.remove(&handler) {
            Some(prefix) => prefix,
            None => return Ok(false),
        };
        // Only the id takes part in the comparison
        let probe = HandlerEntry {
            id: handler,
            handler: std::sync::Arc::new(|_: &Interest| false),
        };
        Ok(inner.handlers.remove(&prefix, &probe))
    }

    fn send(&self, from: AttachmentId, unit: &[u8]) -> Result<(), SubstrateError> {
        let interest = match Interest::from_bytes(unit) {
            Ok(interest) => interest,
            Err(err) => {
                debug!(%from, %err, "Dropping undecodable unit");
                return Ok(());
            }
        };

        let (handlers, next_hops) = {
            let inner = self.inner.read();
            inner.check_attachment(from)?;
            let handlers: Vec<PrefixHandler> = inner
                .handlers
                .matches_all(&interest.name)
                .map(|m| m.value.handler.clone())
                .collect();
            let next_hops = inner.next_hops(&interest.name, from);
            (handlers, next_hops)
        };

        for handler in handlers {
            if handler(&interest) {
                debug!(name = %interest.name, "Unit consumed by prefix handler");
                return Ok(());
            }
        }

        if next_hops.is_empty() {
            debug!(name = %interest.name, %from, "No route for unit");
            return Ok(());
        }
        for hop in next_hops {
            if hop.send(unit.to_vec()).is_err() {
                debug!(name = %interest.name, "Next hop went away");
            }
        }
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.write();
        inner.closed = true;
        inner.attachments.clear();
        inner.handler_prefixes.clear();
        inner.fib = NameTable::new();
        inner.handlers = NameTable::new();
    }
}

impl Attachment for LocalAttachment {
    fn id(&self) -> AttachmentId {
        self.id
    }

    fn recv(&mut self, dst: &mut [u8], timeout: Duration) -> Result<usize, SubstrateError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(unit) => {
                if unit.len() > dst.len() {
                    warn!(attachment = %self.id, len = unit.len(), "Dropping oversized unit");
                    return Ok(0);
                }
                dst[..unit.len()].copy_from_slice(&unit);
                Ok(unit.len())
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(SubstrateError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::Encode;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    const WAIT: Duration = Duration::from_millis(200);

    fn name(uri: &str) -> ContentName {
        uri.parse().unwrap()
    }

    fn unit(uri: &str) -> Vec<u8> {
        Interest::new(name(uri)).to_bytes().unwrap()
    }

    fn routable() -> ForwardingFlags {
        ForwardingFlags::ACTIVE | ForwardingFlags::CHILD_INHERIT
    }

    fn recv(attachment: &mut LocalAttachment) -> Option<Vec<u8>> {
        let mut buf = [0u8; 1024];
        match attachment.recv(&mut buf, WAIT).unwrap() {
            0 => None,
            n => Some(buf[..n].to_vec()),
        }
    }

    #[test]
    fn test_forwards_to_longest_prefix() {
        let substrate = LocalSubstrate::new();
        let a = substrate.create_attachment().unwrap();
        let mut b = substrate.create_attachment().unwrap();
        let mut c = substrate.create_attachment().unwrap();
        substrate.register_prefix(b.id(), &name("/RP"), routable()).unwrap();
        substrate.register_prefix(c.id(), &name("/RP/east"), routable()).unwrap();

        let east = unit("/RP/east/control/x");
        substrate.send(a.id(), &east).unwrap();
        assert_eq!(recv(&mut c), Some(east));
        assert_eq!(recv(&mut b), None);

        let west = unit("/RP/west/x");
        substrate.send(a.id(), &west).unwrap();
        assert_eq!(recv(&mut b), Some(west));
        assert_eq!(recv(&mut c), None);
    }

    #[test]
    fn test_never_back_out_the_same_attachment() {
        let substrate = LocalSubstrate::new();
        let mut a = substrate.create_attachment().unwrap();
        let mut b = substrate.create_attachment().unwrap();
        substrate.register_prefix(a.id(), &name("/RP"), routable()).unwrap();
        substrate.register_prefix(b.id(), &name("/RP"), routable()).unwrap();

        let u = unit("/RP/x");
        substrate.send(a.id(), &u).unwrap();
        assert_eq!(recv(&mut b), Some(u));
        assert_eq!(recv(&mut a), None);
    }

    #[test]
    fn test_flags_are_honoured() {
        let substrate = LocalSubstrate::new();
        let a = substrate.create_attachment().unwrap();
        let mut b = substrate.create_attachment().unwrap();
        substrate
            .register_prefix(b.id(), &name("/exact"), ForwardingFlags::ACTIVE)
            .unwrap();
        substrate
            .register_prefix(b.id(), &name("/off"), ForwardingFlags::CHILD_INHERIT)
            .unwrap();

        substrate.send(a.id(), &unit("/exact/child")).unwrap();
        assert_eq!(recv(&mut b), None);
        let exact = unit("/exact");
        substrate.send(a.id(), &exact).unwrap();
        assert_eq!(recv(&mut b), Some(exact));
        substrate.send(a.id(), &unit("/off/x")).unwrap();
        assert_eq!(recv(&mut b), None);
    }

    #[test]
    fn test_handlers_see_units_first() {
        let substrate = LocalSubstrate::new();
        let a = substrate.create_attachment().unwrap();
        let mut b = substrate.create_attachment().unwrap();
        substrate.register_prefix(b.id(), &name("/RP"), routable()).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = substrate
            .register_prefix_handler(
                &name("/RP"),
                Arc::new(move |interest: &Interest| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    interest.name.component(1) == Some(&b"multicast"[..])
                }),
            )
            .unwrap();

        substrate.send(a.id(), &unit("/RP/multicast/abc")).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(recv(&mut b), None);

        // Declined units continue to the FIB
        let declined = unit("/RP/control/abc");
        substrate.send(a.id(), &declined).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(recv(&mut b), Some(declined));

        assert!(substrate.unregister_prefix_handler(handler).unwrap());
        assert!(!substrate.unregister_prefix_handler(handler).unwrap());
        let after = unit("/RP/multicast/abc");
        substrate.send(a.id(), &after).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(recv(&mut b), Some(after));
    }

    #[test]
    fn test_handler_may_send_reentrantly() {
        let substrate = Arc::new(LocalSubstrate::new());
        let a = substrate.create_attachment().unwrap();
        let mut b = substrate.create_attachment().unwrap();
        substrate.register_prefix(b.id(), &name("/out"), routable()).unwrap();

        let inner = Arc::downgrade(&substrate);
        let from = a.id();
        substrate
            .register_prefix_handler(
                &name("/in"),
                Arc::new(move |_: &Interest| {
                    if let Some(substrate) = inner.upgrade() {
                        let _ = substrate.send(from, &unit("/out/x"));
                    }
                    true
                }),
            )
            .unwrap();

        substrate.send(a.id(), &unit("/in/x")).unwrap();
        let forwarded = recv(&mut b).unwrap();
        assert_eq!(Interest::from_bytes(&forwarded).unwrap().name, name("/out/x"));
    }

    #[test]
    fn test_destroy_and_close() {
        let substrate = LocalSubstrate::new();
        let a = substrate.create_attachment().unwrap();
        let mut b = substrate.create_attachment().unwrap();
        substrate.register_prefix(b.id(), &name("/RP"), routable()).unwrap();
        assert_eq!(substrate.routes(), vec![(name("/RP"), b.id())]);

        substrate.destroy_attachment(b.id()).unwrap();
        assert!(substrate.routes().is_empty());
        assert_eq!(
            substrate.register_prefix(b.id(), &name("/RP"), routable()),
            Err(SubstrateError::NoSuchAttachment(b.id()))
        );
        let mut buf = [0u8; 64];
        assert_eq!(b.recv(&mut buf, WAIT), Err(SubstrateError::Closed));

        substrate.close();
        assert!(substrate.is_closed());
        assert_eq!(substrate.send(a.id(), &unit("/RP/x")), Err(SubstrateError::Closed));
        assert!(substrate.create_attachment().is_err());
    }

    #[test]
    fn test_undecodable_units_dropped() {
        let substrate = LocalSubstrate::new();
        let a = substrate.create_attachment().unwrap();
        assert_eq!(substrate.send(a.id(), &[200, 0]), Ok(()));
    }
}
