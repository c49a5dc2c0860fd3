use core::{fmt, time::Duration};
use std::{
    collections::{BTreeMap, HashMap},
    io,
    net::SocketAddr,
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    name::ContentName,
    platform::{udp::UdpSender, Step, Worker},
    protocol::MAX_DATAGRAM_SIZE,
    substrate::{Attachment, AttachmentId, SubstrateError},
};

// A face is the router's end of one link, to an end host or to a peer
//  router. It is a two-way tunnel: datagrams from the remote enter the
//  substrate through the face's attachment (driven by the router), and units
//  the substrate forwards to the attachment go out to the remote (driven by
//  the face's own loop).

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FaceToken(pub(crate) u32);

impl FaceToken {
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FaceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Face {
    token: FaceToken,
    remote: SocketAddr,
    is_router: bool,
    attachment: AttachmentId,
    fibs: Vec<ContentName>,
    worker: Worker,
}

impl Face {
    /// Starts the loop that relays units arriving at `attachment` to `remote`.
    pub(crate) fn open<A: Attachment>(
        token: FaceToken,
        remote: SocketAddr,
        is_router: bool,
        mut attachment: A,
        sender: UdpSender,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let attachment_id = attachment.id();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let worker = Worker::spawn(format!("copss-face-{}", token.0), move || {
            match attachment.recv(&mut buf, poll_interval) {
                Ok(0) => Step::Continue,
                Ok(n) => {
                    if let Err(err) = sender.send_to(&buf[..n], remote) {
                        warn!(face = %token, %remote, %err, "Cannot write to remote");
                    }
                    Step::Continue
                }
                Err(SubstrateError::Closed) => {
                    debug!(face = %token, "Attachment closed");
                    Step::Finished
                }
                Err(err) => {
                    warn!(face = %token, %err, "Cannot read from substrate");
                    Step::Continue
                }
            }
        })?;

        Ok(Self {
            token,
            remote,
            is_router,
            attachment: attachment_id,
            fibs: Vec::new(),
            worker,
        })
    }

    pub fn token(&self) -> FaceToken {
        self.token
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_router(&self) -> bool {
        self.is_router
    }

    pub fn attachment(&self) -> AttachmentId {
        self.attachment
    }

    pub fn fibs(&self) -> &[ContentName] {
        &self.fibs
    }

    pub(crate) fn record_fib(&mut self, prefix: &ContentName) {
        if !self.fibs.contains(prefix) {
            self.fibs.push(prefix.clone());
        }
    }

    pub(crate) fn forget_fib(&mut self, prefix: &ContentName) {
        self.fibs.retain(|p| p != prefix);
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn stop(&self) {
        self.worker.stop();
    }

    pub fn join(&mut self) {
        self.worker.join();
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Face {}, {}, {}", self.token, self.remote, self.is_router)
    }
}

/// Faces keyed both by token and by remote endpoint.
#[derive(Default)]
pub(crate) struct FaceTable {
    faces: BTreeMap<FaceToken, Face>,
    by_remote: HashMap<SocketAddr, FaceToken>,
    next_token: u32,
}

impl FaceTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_token(&mut self) -> FaceToken {
        self.next_token += 1;
        FaceToken(self.next_token)
    }

    pub(crate) fn insert(&mut self, face: Face) {
        self.by_remote.insert(face.remote, face.token);
        self.faces.insert(face.token, face);
    }

    pub(crate) fn remove(&mut self, remote: &SocketAddr) -> Option<Face> {
        let token = self.by_remote.remove(remote)?;
        self.faces.remove(&token)
    }

    pub(crate) fn contains_remote(&self, remote: &SocketAddr) -> bool {
        self.by_remote.contains_key(remote)
    }

    pub(crate) fn by_remote(&self, remote: &SocketAddr) -> Option<&Face> {
        self.by_remote
            .get(remote)
            .and_then(|token| self.faces.get(token))
    }

    pub(crate) fn by_remote_mut(&mut self, remote: &SocketAddr) -> Option<&mut Face> {
        let token = self.by_remote.get(remote)?;
        self.faces.get_mut(token)
    }

    pub(crate) fn get(&self, token: FaceToken) -> Option<&Face> {
        self.faces.get(&token)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Face> {
        self.faces.values()
    }

    pub(crate) fn drain(&mut self) -> Vec<Face> {
        self.by_remote.clear();
        core::mem::take(&mut self.faces).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::udp::UdpListener,
        substrate::{LocalSubstrate, Substrate},
    };
    use std::net::UdpSocket;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_face_relays_substrate_units_to_remote() {
        let substrate = LocalSubstrate::new();
        let listener = UdpListener::bind(loopback()).unwrap();
        let remote = UdpSocket::bind(loopback()).unwrap();
        remote.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let injector = substrate.create_attachment().unwrap();
        let attachment = substrate.create_attachment().unwrap();
        let prefix: ContentName = "/RP".parse().unwrap();
        substrate
            .register_prefix(
                attachment.id(),
                &prefix,
                crate::substrate::ForwardingFlags::ACTIVE
                    | crate::substrate::ForwardingFlags::CHILD_INHERIT,
            )
            .unwrap();

        let mut face = Face::open(
            FaceToken(1),
            remote.local_addr().unwrap(),
            true,
            attachment,
            listener.sender().unwrap(),
            Duration::from_millis(50),
        )
        .unwrap();

        use crate::tlv::Encode;
        let unit = crate::packet::Interest::new("/RP/x".parse().unwrap())
            .to_bytes()
            .unwrap();
        substrate.send(injector.id(), &unit).unwrap();

        let mut buf = [0u8; 256];
        let (n, from) = remote.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &unit[..]);
        assert_eq!(from, listener.local_addr().unwrap());

        face.stop();
        face.join();
        assert!(!face.is_running());
    }

    #[test]
    fn test_face_loop_ends_when_attachment_destroyed() {
        let substrate = LocalSubstrate::new();
        let listener = UdpListener::bind(loopback()).unwrap();
        let attachment = substrate.create_attachment().unwrap();
        let id = attachment.id();
        let mut face = Face::open(
            FaceToken(7),
            loopback(),
            false,
            attachment,
            listener.sender().unwrap(),
            Duration::from_millis(20),
        )
        .unwrap();

        substrate.destroy_attachment(id).unwrap();
        face.join();
        assert!(!face.is_running());
        assert_eq!(face.to_string(), "Face 7, 127.0.0.1:0, false");
    }

    #[test]
    fn test_fib_bookkeeping() {
        let substrate = LocalSubstrate::new();
        let listener = UdpListener::bind(loopback()).unwrap();
        let mut face = Face::open(
            FaceToken(2),
            loopback(),
            true,
            substrate.create_attachment().unwrap(),
            listener.sender().unwrap(),
            Duration::from_millis(20),
        )
        .unwrap();

        let rp: ContentName = "/RP1".parse().unwrap();
        face.record_fib(&rp);
        face.record_fib(&rp);
        assert_eq!(face.fibs(), &[rp.clone()]);
        face.forget_fib(&rp);
        assert!(face.fibs().is_empty());
        face.stop();
        face.join();
    }
}
