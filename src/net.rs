//! Mock APIs for network connections, listeners and name resolution.
//!
//! Networks are named like `"tcp"`, `"tcp4"`, `"tcp6"`, `"udp"`, `"udp4"` and `"udp6"`.
//! Addresses are `host:port` strings, where an empty host means the local system.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use unimock::unimock;

use crate::io::{Closer, Reader, Writer};

pub mod http;

mod system;

pub use system::{NetAddr, SystemNet, TcpStreamConn, TcpSocketListener, UdpPacketConn, UdpStreamConn};

#[cfg_attr(feature = "unstable-doc-cfg", doc(cfg(feature = "tokio-1")))]
#[cfg(feature = "tokio-1")]
pub use system::SystemResolver;

/// A network endpoint address.
#[unimock(api = AddrMock)]
pub trait Addr: fmt::Debug + fmt::Display + Send + Sync {
    /// Name of the network, e.g. `"tcp"`.
    fn network(&self) -> String;
}

/// A stream oriented network connection.
#[unimock(api = ConnMock)]
pub trait Conn: Reader + Writer + Closer + Send + Sync {
    fn local_addr(&self) -> Box<dyn Addr>;

    fn remote_addr(&self) -> Box<dyn Addr>;

    /// Set both the read and write deadline. `None` means no deadline.
    ///
    /// Operations attempted after the deadline fail with [io::ErrorKind::TimedOut].
    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;
}

/// A stream oriented network listener.
#[unimock(api = ListenerMock)]
pub trait Listener: Closer + Send + Sync {
    /// Wait for and return the next connection.
    fn accept(&mut self) -> io::Result<Box<dyn Conn>>;

    /// The address the listener is bound to.
    fn addr(&self) -> Box<dyn Addr>;
}

/// A packet oriented network endpoint.
#[unimock(api = PacketConnMock)]
pub trait PacketConn: Closer + Send + Sync {
    /// Receive one packet into `buf`, returning its size and sender.
    fn read_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, Box<dyn Addr>)>;

    /// Send `buf` as one packet to `addr`.
    fn write_to(&mut self, buf: &[u8], addr: &dyn Addr) -> io::Result<usize>;

    fn local_addr(&self) -> Box<dyn Addr>;

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()>;
}

/// A TCP connection.
#[unimock(api = TcpConnMock)]
pub trait TcpConn: Conn {
    /// Shut down the reading side.
    fn close_read(&mut self) -> io::Result<()>;

    /// Shut down the writing side.
    fn close_write(&mut self) -> io::Result<()>;

    fn set_keep_alive(&self, keep_alive: bool) -> io::Result<()>;

    fn set_no_delay(&self, no_delay: bool) -> io::Result<()>;

    /// How long close lingers to send unsent data. `None` restores the system default.
    fn set_linger(&self, linger: Option<Duration>) -> io::Result<()>;
}

/// A TCP listener.
#[unimock(api = TcpListenerMock)]
pub trait TcpListener: Listener {
    fn accept_tcp(&mut self) -> io::Result<Box<dyn TcpConn>>;
}

/// Connection establishment.
#[unimock(api = DialerMock)]
pub trait Dialer: Send + Sync {
    fn dial(&self, network: &str, address: &str) -> io::Result<Box<dyn Conn>>;

    fn dial_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> io::Result<Box<dyn Conn>>;
}

/// Name resolution.
#[unimock(api = ResolverMock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Addresses of `host`, as strings.
    async fn lookup_host(&self, host: &str) -> io::Result<Vec<String>>;

    /// The port of `service` on `network`. Numeric services are parsed directly.
    async fn lookup_port(&self, network: &str, service: &str) -> io::Result<u16>;
}

/// The network package: dialing and listening.
#[unimock(api = NetMock)]
pub trait Net: Send + Sync {
    fn dial(&self, network: &str, address: &str) -> io::Result<Box<dyn Conn>>;

    fn dial_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> io::Result<Box<dyn Conn>>;

    /// Listen for stream connections. Only TCP networks are supported.
    fn listen(&self, network: &str, address: &str) -> io::Result<Box<dyn Listener>>;

    /// Listen for packets. Only UDP networks are supported.
    fn listen_packet(&self, network: &str, address: &str) -> io::Result<Box<dyn PacketConn>>;
}

/// The port of a well known `service`, or a numeric port.
pub fn service_port(network: &str, service: &str) -> io::Result<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }

    let tcp = network.starts_with("tcp") || network.is_empty();
    let udp = network.starts_with("udp") || network.is_empty();
    let port = match service.to_ascii_lowercase().as_str() {
        "domain" if tcp || udp => Some(53),
        "ftp" if tcp => Some(21),
        "ssh" if tcp => Some(22),
        "telnet" if tcp => Some(23),
        "smtp" if tcp => Some(25),
        "http" if tcp => Some(80),
        "pop3" if tcp => Some(110),
        "ntp" if udp => Some(123),
        "imap" if tcp => Some(143),
        "snmp" if udp => Some(161),
        "https" if tcp => Some(443),
        _ => None,
    };
    port.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("lookup {network}/{service}: unknown port"),
        )
    })
}
