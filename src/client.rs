use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::DEFAULT_PORT,
    name::ContentName,
    platform::{
        udp::{UdpListener, UdpSender},
        Step, Worker, DEFAULT_POLL_INTERVAL,
    },
    protocol::{peek_envelope, Control, EncodeError, Envelope, Multicast, MAX_DATAGRAM_SIZE},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("receive loop already started")]
    AlreadyStarted,
}

/// The router an end host talks to when none is given.
pub fn default_router() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

/// An end host attached to one COPSS router.
pub struct CopssClient {
    router: SocketAddr,
    sender: UdpSender,
    listener: Option<UdpListener>,
    local_addr: SocketAddr,
    subscribed: Vec<ContentName>,
    worker: Option<Worker>,
}

impl CopssClient {
    pub fn bind(local: SocketAddr, router: SocketAddr) -> Result<Self, ClientError> {
        let listener = UdpListener::bind(local)?;
        Ok(Self {
            router,
            sender: listener.sender()?,
            local_addr: listener.local_addr()?,
            listener: Some(listener),
            subscribed: Vec::new(),
            worker: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn router(&self) -> SocketAddr {
        self.router
    }

    pub fn subscriptions(&self) -> &[ContentName] {
        &self.subscribed
    }

    /// Subscribes to the CDs not already held and returns them. Nothing is
    /// sent when every CD is already held.
    pub fn subscribe(&mut self, cds: &[ContentName]) -> Result<Vec<ContentName>, ClientError> {
        let mut added: Vec<ContentName> = Vec::new();
        for cd in cds {
            if !self.subscribed.contains(cd) && !added.contains(cd) {
                added.push(cd.clone());
            }
        }
        if added.is_empty() {
            return Ok(added);
        }
        self.send(&Control::st_change(added.clone(), Vec::new()).to_wire()?)?;
        self.subscribed.extend(added.iter().cloned());
        info!(cds = ?added, "Subscribed");
        Ok(added)
    }

    /// Drops the held CDs among `cds` and returns them.
    pub fn unsubscribe(&mut self, cds: &[ContentName]) -> Result<Vec<ContentName>, ClientError> {
        let mut removed: Vec<ContentName> = Vec::new();
        for cd in cds {
            if self.subscribed.contains(cd) && !removed.contains(cd) {
                removed.push(cd.clone());
            }
        }
        if removed.is_empty() {
            return Ok(removed);
        }
        self.send(&Control::st_change(Vec::new(), removed.clone()).to_wire()?)?;
        self.subscribed.retain(|cd| !removed.contains(cd));
        info!(cds = ?removed, "Unsubscribed");
        Ok(removed)
    }

    pub fn publish(&self, cds: Vec<ContentName>, payload: Vec<u8>) -> Result<(), ClientError> {
        let multicast = Multicast::new(cds, payload)?;
        self.send(&multicast.to_wire()?)?;
        debug!(cds = ?multicast.cds(), "Published");
        Ok(())
    }

    fn send(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.sender.send_to(bytes, self.router)?;
        Ok(())
    }

    /// Starts delivering received multicast messages to `handler`.
    pub fn start<F>(&mut self, mut handler: F) -> Result<(), ClientError>
    where
        F: FnMut(Multicast) + Send + 'static,
    {
        let mut listener = self.listener.take().ok_or(ClientError::AlreadyStarted)?;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let worker = Worker::spawn(format!("copss-client-{}", self.local_addr.port()), move || {
            match listener.recv_from(&mut buf, DEFAULT_POLL_INTERVAL) {
                Ok(Some((len, src))) => {
                    let bytes = &buf[..len];
                    if peek_envelope(bytes) != Envelope::Multicast {
                        debug!(%src, len, "Ignoring non-multicast datagram");
                        return Step::Continue;
                    }
                    match Multicast::from_wire(bytes) {
                        Ok(multicast) => handler(multicast),
                        Err(err) => warn!(%src, %err, "Dropping undecodable multicast"),
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "Cannot read from socket"),
            }
            Step::Continue
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            worker.join();
        }
    }
}

impl Drop for CopssClient {
    fn drop(&mut self) {
        self.stop();
    }
}
