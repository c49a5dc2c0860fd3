use core::{fmt, time::Duration};
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigError, RouterConfig},
    face::{Face, FaceTable, FaceToken},
    name::ContentName,
    packet::Interest,
    platform::{
        udp::{UdpListener, UdpSender},
        Step, Worker,
    },
    protocol::{
        encap::Encapsulate, peek_envelope, Control, ControlType, DecodeError, EncodeError,
        Envelope, Multicast, MAX_DATAGRAM_SIZE,
    },
    rp::RpModule,
    substrate::{Attachment, AttachmentId, ForwardingFlags, Substrate, SubstrateError},
    tables::{rendezvous::RpMappingTable, subscription::SubscriptionTable},
    tlv::Encode,
};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("substrate error: {0}")]
    Substrate(#[from] SubstrateError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Linked(FaceToken),
    AlreadyLinked,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FibStatus {
    Added,
    Removed,
    NoSuchFace,
}

/// Where a multicast message entered this router.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// From a directly attached end host; this router is the first hop.
    Direct(FaceToken),
    /// From a peer router.
    RouterRelay(FaceToken),
    /// Delivered by one of this router's own RP modules.
    RpInjected,
}

/// The COPSS router core.
///
/// Owns the face table, the subscription table, the RP modules and the
/// CD to RP mapping, and runs the loop that receives datagrams from linked
/// faces.
pub struct Router<S: Substrate> {
    shared: Arc<Shared<S>>,
    worker: Worker,
}

struct Shared<S: Substrate> {
    substrate: Arc<S>,
    sender: UdpSender,
    local_addr: SocketAddr,
    poll_interval: Duration,
    mapping: RpMappingTable,
    running: AtomicBool,
    // Lock order: faces before subscriptions. Neither is held while sending.
    faces: RwLock<FaceTable>,
    subscriptions: RwLock<SubscriptionTable>,
    rps: Mutex<Vec<RpModule>>,
}

impl<S: Substrate> Router<S> {
    /// Binds the listening socket and starts receiving.
    pub fn start(config: &RouterConfig, substrate: Arc<S>) -> Result<Self, RouterError> {
        config.validate()?;
        let mapping = config.rp_mapping_table()?;
        let poll_interval = config.poll_interval();

        let mut listener = UdpListener::bind(config.listen_addr()?)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            substrate,
            sender: listener.sender()?,
            local_addr,
            poll_interval,
            mapping,
            running: AtomicBool::new(true),
            faces: RwLock::new(FaceTable::new()),
            subscriptions: RwLock::new(SubscriptionTable::new()),
            rps: Mutex::new(Vec::new()),
        });

        let core = Arc::clone(&shared);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let worker = Worker::spawn("copss-router", move || {
            match listener.recv_from(&mut buf, poll_interval) {
                Ok(Some((len, src))) => core.handle_datagram(&buf[..len], src),
                Ok(None) => {}
                Err(err) => warn!(%err, "Cannot read from listening socket"),
            }
            Step::Continue
        })?;

        info!(%local_addr, "COPSS router started");
        Ok(Self { shared, worker })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn substrate(&self) -> &Arc<S> {
        &self.shared.substrate
    }

    /// Creates a face towards `remote`, unless one already exists.
    pub fn link(&self, remote: SocketAddr, is_router: bool) -> Result<LinkStatus, RouterError> {
        let shared = &self.shared;
        let mut faces = shared.faces.write();
        if faces.contains_remote(&remote) {
            debug!(%remote, "Already linked");
            return Ok(LinkStatus::AlreadyLinked);
        }

        let attachment = shared.substrate.create_attachment()?;
        let attachment_id = attachment.id();
        let token = faces.next_token();
        let sender = shared.sender.try_clone()?;
        let face = match Face::open(
            token,
            remote,
            is_router,
            attachment,
            sender,
            shared.poll_interval,
        ) {
            Ok(face) => face,
            Err(err) => {
                let _ = shared.substrate.destroy_attachment(attachment_id);
                return Err(err.into());
            }
        };

        info!(face = %token, %remote, is_router, "Linked");
        faces.insert(face);
        Ok(LinkStatus::Linked(token))
    }

    /// Stops and removes the face towards `remote`, dropping its
    /// subscriptions. Nothing is announced upstream.
    pub fn unlink(&self, remote: SocketAddr) -> bool {
        let shared = &self.shared;
        let face = {
            let mut faces = shared.faces.write();
            let face = match faces.remove(&remote) {
                Some(face) => face,
                None => return false,
            };
            let orphaned = shared.subscriptions.write().remove_face(face.token());
            info!(face = %face.token(), %remote, orphaned = orphaned.len(), "Unlinked");
            face
        };
        shutdown_face(&*shared.substrate, face);
        true
    }

    /// Routes `prefix` in the substrate to the face towards `remote`.
    pub fn add_fib(&self, prefix: &ContentName, remote: SocketAddr) -> Result<FibStatus, RouterError> {
        let mut faces = self.shared.faces.write();
        let face = match faces.by_remote_mut(&remote) {
            Some(face) => face,
            None => {
                warn!(%prefix, %remote, "No face for FIB entry");
                return Ok(FibStatus::NoSuchFace);
            }
        };
        self.shared.substrate.register_prefix(
            face.attachment(),
            prefix,
            ForwardingFlags::ACTIVE | ForwardingFlags::CHILD_INHERIT,
        )?;
        face.record_fib(prefix);
        info!(%prefix, face = %face.token(), "FIB entry added");
        Ok(FibStatus::Added)
    }

    pub fn remove_fib(&self, prefix: &ContentName, remote: SocketAddr) -> Result<FibStatus, RouterError> {
        let mut faces = self.shared.faces.write();
        let face = match faces.by_remote_mut(&remote) {
            Some(face) => face,
            None => return Ok(FibStatus::NoSuchFace),
        };
        self.shared
            .substrate
            .unregister_prefix(face.attachment(), prefix)?;
        face.forget_fib(prefix);
        info!(%prefix, face = %face.token(), "FIB entry removed");
        Ok(FibStatus::Removed)
    }

    /// Hosts a rendezvous point for `prefix`. Returns false if this router
    /// already hosts it.
    pub fn set_rp(&self, prefix: ContentName) -> Result<bool, RouterError> {
        let mut rps = self.shared.rps.lock();
        if rps.iter().any(|rp| rp.prefix() == &prefix) {
            return Ok(false);
        }
        let core = Arc::downgrade(&self.shared);
        let rp = RpModule::start(&*self.shared.substrate, prefix, move |multicast| {
            if let Some(core) = core.upgrade() {
                core.inject(&multicast);
            }
        })?;
        rps.push(rp);
        Ok(true)
    }

    /// Applies the links, FIB entries and RPs listed in `config`.
    pub fn provision(&self, config: &RouterConfig) -> Result<(), RouterError> {
        for (remote, is_router) in config.links()? {
            self.link(remote, is_router)?;
        }
        for (prefix, remote) in config.fibs()? {
            self.add_fib(&prefix, remote)?;
        }
        for rp in config.rp_names()? {
            self.set_rp(rp)?;
        }
        Ok(())
    }

    pub fn status(&self) -> RouterStatus {
        let shared = &self.shared;
        let faces = shared.faces.read();
        let subscriptions = shared.subscriptions.read();
        let rps = shared.rps.lock();

        RouterStatus {
            listen_address: shared.local_addr,
            running: self.is_running(),
            rps: rps.iter().map(|rp| rp.prefix().clone()).collect(),
            faces: faces
                .iter()
                .map(|face| FaceStatus {
                    id: face.token(),
                    remote: face.remote(),
                    is_router: face.is_router(),
                    fibs: face.fibs().to_vec(),
                })
                .collect(),
            subscriptions: subscriptions
                .entries()
                .into_iter()
                .map(|(name, face)| SubscriptionStatus { name, face })
                .collect(),
            rp_mappings: shared
                .mapping
                .mappings()
                .into_iter()
                .map(|(prefix, rp)| MappingStatus { prefix, rp })
                .collect(),
        }
    }

    /// Stops every loop and releases the substrate. Use `join` to wait for
    /// the loops to exit.
    pub fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.worker.stop();

        for face in shared.faces.read().iter() {
            face.stop();
            if let Err(err) = shared.substrate.destroy_attachment(face.attachment()) {
                debug!(face = %face.token(), %err, "Cannot release attachment");
            }
        }
        for rp in shared.rps.lock().drain(..) {
            rp.stop(&*shared.substrate);
        }
        shared.substrate.close();
        info!(local_addr = %shared.local_addr, "COPSS router stopped");
    }

    pub fn join(&mut self) {
        self.worker.join();
        let faces = self.shared.faces.write().drain();
        for mut face in faces {
            face.join();
        }
    }
}

impl<S: Substrate> Drop for Router<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn shutdown_face<S: Substrate>(substrate: &S, mut face: Face) {
    face.stop();
    if let Err(err) = substrate.destroy_attachment(face.attachment()) {
        debug!(face = %face.token(), %err, "Cannot release attachment");
    }
    face.join();
}

impl<S: Substrate> Shared<S> {
    fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        let (face, is_router) = match self.faces.read().by_remote(&src) {
            Some(face) => (face.token(), face.is_router()),
            None => {
                warn!(%src, len = bytes.len(), "Dropping datagram from unknown source");
                return;
            }
        };

        match peek_envelope(bytes) {
            Envelope::Multicast => match Multicast::from_wire(bytes) {
                Ok(multicast) => {
                    let origin = if is_router {
                        Origin::RouterRelay(face)
                    } else {
                        Origin::Direct(face)
                    };
                    self.forward_multicast(&multicast, bytes, origin)
                }
                Err(err) => warn!(%src, %err, "Dropping undecodable multicast"),
            },
            Envelope::Control => match Control::from_wire(bytes) {
                Ok(control) => self.process_control(&control, face),
                Err(err) => warn!(%src, %err, "Dropping undecodable control message"),
            },
            Envelope::Interest => {
                let control = Interest::from_bytes(bytes)
                    .map_err(DecodeError::from)
                    .and_then(|interest| Control::decapsulate(&interest));
                match control {
                    Ok(Some(control)) => self.process_control(&control, face),
                    Ok(None) => self.pass_through(bytes, face),
                    Err(err) => {
                        debug!(%src, %err, "Unit is not a usable control message");
                        self.pass_through(bytes, face)
                    }
                }
            }
            Envelope::Other => self.pass_through(bytes, face),
        }
    }

    fn attachment_of(&self, face: FaceToken) -> Option<AttachmentId> {
        self.faces.read().get(face).map(|f| f.attachment())
    }

    // Anything not meant for the router goes into the substrate unchanged
    fn pass_through(&self, bytes: &[u8], face: FaceToken) {
        let attachment = match self.attachment_of(face) {
            Some(attachment) => attachment,
            None => return,
        };
        debug!(%face, len = bytes.len(), "Passing unit to substrate");
        if let Err(err) = self.substrate.send(attachment, bytes) {
            warn!(%face, %err, "Cannot write to substrate");
        }
    }

    /// `raw` is the wire encoding of `multicast`, forwarded as is.
    fn forward_multicast(&self, multicast: &Multicast, raw: &[u8], origin: Origin) {
        match origin {
            Origin::Direct(face) => self.tunnel_multicast(multicast, face),
            Origin::RouterRelay(face) => self.fan_out(multicast, raw, Some(face)),
            Origin::RpInjected => self.fan_out(multicast, raw, None),
        }
    }

    fn inject(&self, multicast: &Multicast) {
        match multicast.to_wire() {
            Ok(raw) => self.forward_multicast(multicast, &raw, Origin::RpInjected),
            Err(err) => warn!(%err, "Cannot re-encode multicast"),
        }
    }

    // First hop: hand the message to the RPs of its CDs
    fn tunnel_multicast(&self, multicast: &Multicast, face: FaceToken) {
        let attachment = match self.attachment_of(face) {
            Some(attachment) => attachment,
            None => return,
        };
        for (rp, part) in multicast.split_by_rp(&self.mapping) {
            debug!(%face, %rp, cds = part.cds().len(), "Tunnelling multicast towards RP");
            self.tunnel(&part, &rp, attachment);
        }
    }

    fn fan_out(&self, multicast: &Multicast, raw: &[u8], exclude: Option<FaceToken>) {
        let destinations: Vec<(FaceToken, SocketAddr)> = {
            let faces = self.faces.read();
            let subscriptions = self.subscriptions.read();
            let mut tokens: Vec<FaceToken> = Vec::new();
            for cd in multicast.cds() {
                for token in subscriptions.subscribers(cd) {
                    if Some(token) != exclude && !tokens.contains(&token) {
                        tokens.push(token);
                    }
                }
            }
            tokens
                .into_iter()
                .filter_map(|token| faces.get(token).map(|f| (token, f.remote())))
                .collect()
        };

        if destinations.is_empty() {
            debug!(cds = ?multicast.cds(), "No subscribers for multicast");
        }
        for (face, remote) in destinations {
            debug!(%face, %remote, "Forwarding multicast");
            if let Err(err) = self.sender.send_to(raw, remote) {
                warn!(%face, %remote, %err, "Cannot write to remote");
            }
        }
    }

    fn process_control(&self, control: &Control, face: FaceToken) {
        if control.typ() != ControlType::StChange {
            info!(%face, %control, "Ignoring control message");
            return;
        }

        let (attachment, delta) = {
            let faces = self.faces.read();
            let attachment = match faces.get(face) {
                Some(f) => f.attachment(),
                None => return,
            };
            let delta = self
                .subscriptions
                .write()
                .apply(face, control.added(), control.removed());
            (attachment, delta)
        };

        debug!(%face, added = ?delta.added, removed = ?delta.removed, "Subscriptions updated");
        if delta.is_empty() {
            return;
        }
        let upstream = Control::st_change(delta.added, delta.removed);
        for (rp, part) in upstream.split_by_rp(&self.mapping) {
            self.tunnel(&part, &rp, attachment);
        }
    }

    fn tunnel<M: Encapsulate>(&self, message: &M, rp: &ContentName, attachment: AttachmentId) {
        let unit = match message
            .encapsulate(rp)
            .and_then(|interest| interest.to_bytes().map_err(EncodeError::from))
        {
            Ok(unit) => unit,
            Err(err) => {
                warn!(%rp, %err, "Cannot encapsulate message");
                return;
            }
        };
        if let Err(err) = self.substrate.send(attachment, &unit) {
            warn!(%rp, %err, "Cannot write to substrate");
        }
    }
}

/// A snapshot of the router's tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterStatus {
    pub listen_address: SocketAddr,
    pub running: bool,
    pub rps: Vec<ContentName>,
    pub faces: Vec<FaceStatus>,
    pub subscriptions: Vec<SubscriptionStatus>,
    pub rp_mappings: Vec<MappingStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceStatus {
    pub id: FaceToken,
    pub remote: SocketAddr,
    pub is_router: bool,
    pub fibs: Vec<ContentName>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStatus {
    pub name: ContentName,
    pub face: FaceToken,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingStatus {
    pub prefix: ContentName,
    pub rp: ContentName,
}

impl fmt::Display for RouterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.running { "running" } else { "stopped" };
        writeln!(f, "COPSS router on {} ({state})", self.listen_address)?;
        writeln!(f, "Faces:")?;
        for face in self.faces.iter() {
            write!(f, "  Face {}, {}, {}", face.id, face.remote, face.is_router)?;
            if !face.fibs.is_empty() {
                let fibs: Vec<String> = face.fibs.iter().map(|p| p.to_string()).collect();
                write!(f, " FIB: {}", fibs.join(" "))?;
            }
            writeln!(f)?;
        }
        writeln!(f, "ST:")?;
        for entry in self.subscriptions.iter() {
            writeln!(f, "  {} -> Face {}", entry.name, entry.face)?;
        }
        writeln!(f, "RPs:")?;
        for rp in self.rps.iter() {
            writeln!(f, "  {rp}")?;
        }
        writeln!(f, "CD to RP:")?;
        for mapping in self.rp_mappings.iter() {
            writeln!(f, "  {} -> {}", mapping.prefix, mapping.rp)?;
        }
        Ok(())
    }
}
