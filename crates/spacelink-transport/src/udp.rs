use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::pacing::Pacer;
use crate::traits::Sender;

/// Default UDP port agents listen on.
pub const DEFAULT_PORT: u16 = 10020;

/// IPv4 + UDP header bytes charged against link throughput.
pub const UDP_OVERHEAD: usize = 28;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Configuration for a UDP link.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Link throughput in bytes per second. Default: 1000.
    pub throughput: u32,
    /// How long a single receive call may block. Default: 5 ms.
    pub recv_timeout: Duration,
    /// Write timeout applied to sending sockets.
    pub send_timeout: Option<Duration>,
}

impl UdpConfig {
    /// Throughput used on slow (radio) links.
    pub const THROUGHPUT_LO: u32 = 130;
    /// Throughput used on fast (network) links.
    pub const THROUGHPUT_HI: u32 = 1000;

    pub fn with_throughput(mut self, throughput: u32) -> Self {
        self.throughput = throughput;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            throughput: Self::THROUGHPUT_HI,
            recv_timeout: Duration::from_millis(5),
            send_timeout: Some(Duration::from_millis(100)),
        }
    }
}

/// A bound UDP socket used as the receiving end of a link.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    local: SocketAddr,
}

impl UdpLink {
    /// Bind a listening socket on `addr`.
    pub fn bind(addr: SocketAddr, config: &UdpConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        socket.set_read_timeout(non_zero(config.recv_timeout))?;
        let local = socket.local_addr()?;
        info!(%local, "udp link bound");
        Ok(Self { socket, local })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Change the receive timeout.
    pub fn set_recv_timeout(&self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(non_zero(timeout))?;
        Ok(())
    }

    /// Receive one datagram.
    ///
    /// Returns `Ok(None)` when the timeout expires with nothing to read.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(err) if is_timeout(&err) => Ok(None),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    /// Try to clone the socket (new descriptor, same binding).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            local: self.local,
        })
    }
}

/// Paced UDP sender bound to one peer.
#[derive(Debug)]
pub struct UdpSender {
    peer: SocketAddr,
    socket: Option<UdpSocket>,
    pacer: Pacer,
    send_timeout: Option<Duration>,
}

impl UdpSender {
    /// Create a sender for `peer`. No socket is opened until [`Sender::init`].
    pub fn new(peer: SocketAddr, config: &UdpConfig) -> Self {
        Self {
            peer,
            socket: None,
            pacer: Pacer::new(config.throughput),
            send_timeout: config.send_timeout,
        }
    }

    /// Resolve `host:port` and create a sender for the first address found.
    pub fn resolve(host: &str, port: u16, config: &UdpConfig) -> Result<Self> {
        let peer = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("no address for {host}"),
            ))
        })?;
        Ok(Self::new(peer, config))
    }

    /// Send from an existing socket instead of binding an ephemeral one.
    pub fn from_link(link: &UdpLink, peer: SocketAddr, config: &UdpConfig) -> Result<Self> {
        let socket = link.socket.try_clone()?;
        socket.set_write_timeout(config.send_timeout)?;
        Ok(Self {
            peer,
            socket: Some(socket),
            pacer: Pacer::new(config.throughput),
            send_timeout: config.send_timeout,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn set_throughput(&mut self, throughput: u32) {
        self.pacer.set_throughput(throughput);
    }
}

impl Sender for UdpSender {
    fn init(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let addr: SocketAddr = if self.peer.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        socket.set_write_timeout(self.send_timeout)?;
        debug!(peer = %self.peer, "udp sender ready");
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotInitialized)?;
        self.pacer.wait();
        let sent = socket.send_to(bytes, self.peer)?;
        self.pacer.record(sent);
        if sent != bytes.len() {
            return Err(TransportError::ShortSend {
                sent,
                len: bytes.len(),
            });
        }
        Ok(sent)
    }

    fn label(&self) -> String {
        format!("udp:{}", self.peer)
    }
}

fn non_zero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn send_and_receive_one_datagram() {
        let config = UdpConfig::default()
            .with_throughput(0)
            .with_recv_timeout(Duration::from_millis(500));
        let link = UdpLink::bind(loopback(), &config).unwrap();

        let mut sender = UdpSender::new(link.local_addr(), &config);
        sender.init().unwrap();
        assert_eq!(sender.send(b"beacon").unwrap(), 6);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = link.recv(&mut buf).unwrap().expect("datagram should arrive");
        assert_eq!(&buf[..len], b"beacon");
    }

    #[test]
    fn recv_timeout_returns_none() {
        let config = UdpConfig::default().with_recv_timeout(Duration::from_millis(5));
        let link = UdpLink::bind(loopback(), &config).unwrap();
        let mut buf = [0u8; 64];
        assert!(link.recv(&mut buf).unwrap().is_none());
    }

    #[test]
    fn send_before_init_fails() {
        let mut sender = UdpSender::new(SocketAddr::from(([127, 0, 0, 1], 9)), &UdpConfig::default());
        let err = sender.send(b"x").unwrap_err();
        assert!(matches!(err, TransportError::NotInitialized));
    }

    #[test]
    fn sender_from_link_replies_from_bound_port() {
        let config = UdpConfig::default()
            .with_throughput(0)
            .with_recv_timeout(Duration::from_millis(500));
        let a = UdpLink::bind(loopback(), &config).unwrap();
        let b = UdpLink::bind(loopback(), &config).unwrap();

        let mut sender = UdpSender::from_link(&a, b.local_addr(), &config).unwrap();
        sender.init().unwrap();
        sender.send(b"ping").unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = b.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr());
    }
}
