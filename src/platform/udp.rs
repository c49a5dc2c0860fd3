use core::time::Duration;
use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, UdpSocket},
};

/// A bound UDP socket whose receives wait at most a given timeout.
pub struct UdpListener {
    socket: UdpSocket,
    poller: poller::ReadPoller,
}

impl UdpListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let poller = poller::ReadPoller::new(&socket)?;
        Ok(Self { socket, poller })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// A handle for sending from the listening address.
    pub fn sender(&self) -> io::Result<UdpSender> {
        Ok(UdpSender {
            socket: self.socket.try_clone()?,
        })
    }

    /// Returns `Ok(None)` if nothing arrived within `timeout`.
    pub fn recv_from(
        &mut self,
        dst: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        if !self.poller.wait(timeout)? {
            return Ok(None);
        }
        match self.socket.recv_from(dst) {
            Ok(received) => Ok(Some(received)),
            Err(io_err) => match io_err.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => Ok(None),
                _ => Err(io_err),
            },
        }
    }
}

#[derive(Debug)]
pub struct UdpSender {
    socket: UdpSocket,
}

impl UdpSender {
    pub fn send_to(&self, src: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(src, addr)
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
        })
    }
}

#[cfg(all(feature = "poller", any(unix, windows)))]
mod poller {
    use core::time::Duration;
    use std::{io, net::UdpSocket};

    use polling::{Event, Events, PollMode, Poller};

    #[cfg(unix)]
    type OwnedSource = std::os::fd::OwnedFd;

    #[cfg(windows)]
    type OwnedSource = std::os::windows::io::OwnedSocket;

    const KEY: usize = 0;

    pub(crate) struct ReadPoller {
        source: OwnedSource,
        socket_poller: Poller,
        socket_events: Events,
        should_re_add: bool,
    }

    impl ReadPoller {
        pub(crate) fn new(socket: &UdpSocket) -> io::Result<Self> {
            socket.set_nonblocking(true)?;
            let source = owned_source(socket)?;
            let socket_poller = Poller::new()?;
            let should_re_add = !socket_poller.supports_level();
            let mode = if should_re_add {
                PollMode::Oneshot
            } else {
                PollMode::Level
            };

            // We promise to delete the source from the poller in ReadPoller::drop()
            unsafe {
                socket_poller.add_with_mode(raw_source(&source), Event::readable(KEY), mode)?;
            }

            Ok(Self {
                source,
                socket_poller,
                socket_events: Events::new(),
                should_re_add,
            })
        }

        pub(crate) fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
            self.socket_events.clear();
            match self.socket_poller.wait(&mut self.socket_events, Some(timeout)) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(false),
                Err(err) => return Err(err),
            }

            let readable = self.socket_events.iter().any(|ee| ee.readable);
            if readable && self.should_re_add {
                self.socket_poller
                    .modify(borrowed_source(&self.source), Event::readable(KEY))?;
            }
            Ok(readable)
        }
    }

    impl Drop for ReadPoller {
        fn drop(&mut self) {
            let _ = self.socket_poller.delete(borrowed_source(&self.source));
        }
    }

    #[cfg(unix)]
    fn owned_source(socket: &UdpSocket) -> io::Result<OwnedSource> {
        use std::os::fd::AsFd;
        socket.as_fd().try_clone_to_owned()
    }

    #[cfg(unix)]
    fn raw_source(source: &OwnedSource) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        source.as_raw_fd()
    }

    #[cfg(unix)]
    fn borrowed_source(source: &OwnedSource) -> std::os::fd::BorrowedFd<'_> {
        use std::os::fd::AsFd;
        source.as_fd()
    }

    #[cfg(windows)]
    fn owned_source(socket: &UdpSocket) -> io::Result<OwnedSource> {
        use std::os::windows::io::AsSocket;
        socket.as_socket().try_clone_to_owned()
    }

    #[cfg(windows)]
    fn raw_source(source: &OwnedSource) -> std::os::windows::io::RawSocket {
        use std::os::windows::io::AsRawSocket;
        source.as_raw_socket()
    }

    #[cfg(windows)]
    fn borrowed_source(source: &OwnedSource) -> std::os::windows::io::BorrowedSocket<'_> {
        use std::os::windows::io::AsSocket;
        source.as_socket()
    }
}

// Without a poller the socket's own read timeout bounds each receive
#[cfg(not(all(feature = "poller", any(unix, windows))))]
mod poller {
    use core::time::Duration;
    use std::{io, net::UdpSocket};

    pub(crate) struct ReadPoller {
        socket: UdpSocket,
        timeout: Option<Duration>,
    }

    impl ReadPoller {
        pub(crate) fn new(socket: &UdpSocket) -> io::Result<Self> {
            Ok(Self {
                socket: socket.try_clone()?,
                timeout: None,
            })
        }

        pub(crate) fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
            if self.timeout != Some(timeout) {
                self.socket.set_read_timeout(Some(timeout))?;
                self.timeout = Some(timeout);
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_receive_within_timeout() {
        let mut listener = UdpListener::bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = UdpSocket::bind(loopback()).unwrap();
        peer.send_to(b"hello", addr).unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = listener
            .recv_from(&mut buf, Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, peer.local_addr().unwrap());
    }

    #[test]
    fn test_timeout_returns_none() {
        let mut listener = UdpListener::bind(loopback()).unwrap();
        let mut buf = [0u8; 64];
        let started = Instant::now();
        assert!(listener
            .recv_from(&mut buf, Duration::from_millis(100))
            .unwrap()
            .is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_sender_uses_listening_address() {
        let listener = UdpListener::bind(loopback()).unwrap();
        let sender = listener.sender().unwrap();
        let peer = UdpSocket::bind(loopback()).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        sender.send_to(b"x", peer.local_addr().unwrap()).unwrap();
        let mut buf = [0u8; 8];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(n, 1);
        assert_eq!(from, listener.local_addr().unwrap());
    }
}
