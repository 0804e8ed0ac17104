use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Addr, Conn, Dialer, Listener, Net, PacketConn, TcpConn, TcpListener};
use crate::io::{Closer, Reader, Writer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    Any,
    V4,
    V6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Network {
    Tcp(Family),
    Udp(Family),
}

impl Network {
    fn parse(network: &str) -> io::Result<Self> {
        Ok(match network {
            "tcp" => Self::Tcp(Family::Any),
            "tcp4" => Self::Tcp(Family::V4),
            "tcp6" => Self::Tcp(Family::V6),
            "udp" => Self::Udp(Family::Any),
            "udp4" => Self::Udp(Family::V4),
            "udp6" => Self::Udp(Family::V6),
            _ => return Err(unknown_network(network)),
        })
    }

    fn family(self) -> Family {
        match self {
            Self::Tcp(family) | Self::Udp(family) => family,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Udp(_) => "udp",
        }
    }
}

fn unknown_network(network: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unknown network {network}"),
    )
}

fn timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
}

fn closed_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "use of closed network connection",
    )
}

/// Resolve `address`. An empty host means the unspecified address when
/// listening, and the loopback address when dialing.
fn resolve(network: Network, address: &str, listening: bool) -> io::Result<Vec<SocketAddr>> {
    let address = match address.strip_prefix(':') {
        Some(port) => {
            let host = match (network.family(), listening) {
                (Family::V6, true) => "[::]",
                (Family::V6, false) => "[::1]",
                (_, true) => "0.0.0.0",
                (_, false) => "127.0.0.1",
            };
            format!("{host}:{port}")
        }
        None => address.to_string(),
    };

    let addrs: Vec<SocketAddr> = address
        .to_socket_addrs()?
        .filter(|addr| match network.family() {
            Family::Any => true,
            Family::V4 => addr.is_ipv4(),
            Family::V6 => addr.is_ipv6(),
        })
        .collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no suitable address found for {address}"),
        ));
    }
    Ok(addrs)
}

/// The real [Addr], a socket address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetAddr {
    network: &'static str,
    addr: SocketAddr,
}

impl NetAddr {
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            network: "tcp",
            addr,
        }
    }

    pub fn udp(addr: SocketAddr) -> Self {
        Self {
            network: "udp",
            addr,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

impl Addr for NetAddr {
    fn network(&self) -> String {
        self.network.to_string()
    }
}

fn boxed_addr(network: &'static str, addr: io::Result<SocketAddr>) -> Box<dyn Addr> {
    match addr {
        Ok(addr) => Box::new(NetAddr { network, addr }),
        Err(_) => Box::new(NetAddr {
            network,
            addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        }),
    }
}

/// Read and write deadlines, translated to socket timeouts before each operation.
#[derive(Debug, Default)]
struct Deadlines {
    read: Mutex<Option<Instant>>,
    write: Mutex<Option<Instant>>,
}

fn remaining(deadline: Option<Instant>) -> io::Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                Err(timeout_error())
            } else {
                Ok(Some(deadline - now))
            }
        }
    }
}

impl Deadlines {
    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        remaining(*self.read.lock())
    }

    fn write_timeout(&self) -> io::Result<Option<Duration>> {
        remaining(*self.write.lock())
    }

    fn set(&self, deadline: Option<Instant>) {
        *self.read.lock() = deadline;
        *self.write.lock() = deadline;
    }
}

fn map_timeout(err: io::Error) -> io::Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => timeout_error(),
        _ => err,
    }
}

/// A TCP [Conn] over [std::net::TcpStream].
#[derive(Debug)]
pub struct TcpStreamConn {
    stream: Option<TcpStream>,
    local: io::Result<SocketAddr>,
    remote: io::Result<SocketAddr>,
    deadlines: Deadlines,
}

impl TcpStreamConn {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            local: stream.local_addr(),
            remote: stream.peer_addr(),
            stream: Some(stream),
            deadlines: Deadlines::default(),
        }
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        self.stream.as_ref().ok_or_else(closed_error)
    }
}

fn copy_addr(addr: &io::Result<SocketAddr>) -> io::Result<SocketAddr> {
    match addr {
        Ok(addr) => Ok(*addr),
        Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
    }
}

impl Reader for TcpStreamConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.deadlines.read_timeout()?;
        let mut stream = self.stream()?;
        stream.set_read_timeout(timeout)?;
        stream.read(buf).map_err(map_timeout)
    }
}

impl Writer for TcpStreamConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let timeout = self.deadlines.write_timeout()?;
        let mut stream = self.stream()?;
        stream.set_write_timeout(timeout)?;
        stream.write(buf).map_err(map_timeout)
    }
}

impl Closer for TcpStreamConn {
    fn close(&mut self) -> io::Result<()> {
        let stream = self.stream.take().ok_or_else(closed_error)?;
        trace!(remote = ?self.remote.as_ref().ok(), "close tcp connection");
        drop(stream);
        Ok(())
    }
}

impl Conn for TcpStreamConn {
    fn local_addr(&self) -> Box<dyn Addr> {
        boxed_addr("tcp", copy_addr(&self.local))
    }

    fn remote_addr(&self) -> Box<dyn Addr> {
        boxed_addr("tcp", copy_addr(&self.remote))
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.stream()?;
        self.deadlines.set(deadline);
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.stream()?;
        *self.deadlines.read.lock() = deadline;
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.stream()?;
        *self.deadlines.write.lock() = deadline;
        Ok(())
    }
}

impl TcpConn for TcpStreamConn {
    fn close_read(&mut self) -> io::Result<()> {
        self.stream()?.shutdown(Shutdown::Read)
    }

    fn close_write(&mut self) -> io::Result<()> {
        self.stream()?.shutdown(Shutdown::Write)
    }

    fn set_keep_alive(&self, _keep_alive: bool) -> io::Result<()> {
        self.stream()?;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "set_keep_alive: not supported on std sockets",
        ))
    }

    fn set_no_delay(&self, no_delay: bool) -> io::Result<()> {
        self.stream()?.set_nodelay(no_delay)
    }

    fn set_linger(&self, _linger: Option<Duration>) -> io::Result<()> {
        self.stream()?;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "set_linger: not supported on std sockets",
        ))
    }
}

/// A TCP [Listener] over [std::net::TcpListener].
#[derive(Debug)]
pub struct TcpSocketListener {
    listener: Option<std::net::TcpListener>,
    addr: io::Result<SocketAddr>,
}

impl TcpSocketListener {
    pub fn new(listener: std::net::TcpListener) -> Self {
        Self {
            addr: listener.local_addr(),
            listener: Some(listener),
        }
    }
}

impl Closer for TcpSocketListener {
    fn close(&mut self) -> io::Result<()> {
        self.listener.take().ok_or_else(closed_error)?;
        debug!(addr = ?self.addr.as_ref().ok(), "listener closed");
        Ok(())
    }
}

impl Listener for TcpSocketListener {
    fn accept(&mut self) -> io::Result<Box<dyn Conn>> {
        Ok(Box::new(self.accept_stream()?))
    }

    fn addr(&self) -> Box<dyn Addr> {
        boxed_addr("tcp", copy_addr(&self.addr))
    }
}

impl TcpListener for TcpSocketListener {
    fn accept_tcp(&mut self) -> io::Result<Box<dyn TcpConn>> {
        Ok(Box::new(self.accept_stream()?))
    }
}

impl TcpSocketListener {
    fn accept_stream(&mut self) -> io::Result<TcpStreamConn> {
        let listener = self.listener.as_ref().ok_or_else(closed_error)?;
        let (stream, remote) = listener.accept()?;
        debug!(%remote, "accepted connection");
        Ok(TcpStreamConn::new(stream))
    }
}

#[derive(Debug)]
struct Socket {
    socket: Option<UdpSocket>,
    local: io::Result<SocketAddr>,
    deadlines: Deadlines,
}

impl Socket {
    fn new(socket: UdpSocket) -> Self {
        Self {
            local: socket.local_addr(),
            socket: Some(socket),
            deadlines: Deadlines::default(),
        }
    }

    fn for_read(&self) -> io::Result<&UdpSocket> {
        let timeout = self.deadlines.read_timeout()?;
        let socket = self.socket.as_ref().ok_or_else(closed_error)?;
        socket.set_read_timeout(timeout)?;
        Ok(socket)
    }

    fn for_write(&self) -> io::Result<&UdpSocket> {
        let timeout = self.deadlines.write_timeout()?;
        let socket = self.socket.as_ref().ok_or_else(closed_error)?;
        socket.set_write_timeout(timeout)?;
        Ok(socket)
    }

    fn close(&mut self) -> io::Result<()> {
        self.socket.take().ok_or_else(closed_error)?;
        Ok(())
    }

    fn live(&self) -> io::Result<()> {
        self.socket.as_ref().map(|_| ()).ok_or_else(closed_error)
    }
}

/// A connected UDP [Conn], as returned when dialing a UDP network.
#[derive(Debug)]
pub struct UdpStreamConn {
    socket: Socket,
    remote: SocketAddr,
}

impl Reader for UdpStreamConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.for_read()?.recv(buf).map_err(map_timeout)
    }
}

impl Writer for UdpStreamConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.for_write()?.send(buf).map_err(map_timeout)
    }
}

impl Closer for UdpStreamConn {
    fn close(&mut self) -> io::Result<()> {
        self.socket.close()
    }
}

impl Conn for UdpStreamConn {
    fn local_addr(&self) -> Box<dyn Addr> {
        boxed_addr("udp", copy_addr(&self.socket.local))
    }

    fn remote_addr(&self) -> Box<dyn Addr> {
        Box::new(NetAddr::udp(self.remote))
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.socket.live()?;
        self.socket.deadlines.set(deadline);
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.socket.live()?;
        *self.socket.deadlines.read.lock() = deadline;
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.socket.live()?;
        *self.socket.deadlines.write.lock() = deadline;
        Ok(())
    }
}

/// An unconnected UDP [PacketConn].
#[derive(Debug)]
pub struct UdpPacketConn {
    socket: Socket,
}

impl Closer for UdpPacketConn {
    fn close(&mut self) -> io::Result<()> {
        self.socket.close()
    }
}

impl PacketConn for UdpPacketConn {
    fn read_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, Box<dyn Addr>)> {
        let (n, from) = self.socket.for_read()?.recv_from(buf).map_err(map_timeout)?;
        Ok((n, Box::new(NetAddr::udp(from))))
    }

    fn write_to(&mut self, buf: &[u8], addr: &dyn Addr) -> io::Result<usize> {
        let target: SocketAddr = addr.to_string().parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid address {addr}"),
            )
        })?;
        self.socket.for_write()?.send_to(buf, target).map_err(map_timeout)
    }

    fn local_addr(&self) -> Box<dyn Addr> {
        boxed_addr("udp", copy_addr(&self.socket.local))
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.socket.live()?;
        self.socket.deadlines.set(deadline);
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.socket.live()?;
        *self.socket.deadlines.read.lock() = deadline;
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.socket.live()?;
        *self.socket.deadlines.write.lock() = deadline;
        Ok(())
    }
}

/// The real [Net] and [Dialer], over `std::net`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemNet;

impl SystemNet {
    fn connect(
        &self,
        network: &str,
        address: &str,
        timeout: Option<Duration>,
    ) -> io::Result<Box<dyn Conn>> {
        let net = Network::parse(network)?;
        let addrs = resolve(net, address, false)?;
        let mut last_err = None;

        for addr in addrs {
            let result = match net {
                Network::Tcp(_) => match timeout {
                    Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                    None => TcpStream::connect(addr),
                }
                .map(|stream| Box::new(TcpStreamConn::new(stream)) as Box<dyn Conn>),
                Network::Udp(_) => {
                    let unspecified: SocketAddr = if addr.is_ipv4() {
                        SocketAddr::from(([0, 0, 0, 0], 0))
                    } else {
                        SocketAddr::from(([0u16; 8], 0))
                    };
                    UdpSocket::bind(unspecified).and_then(|socket| {
                        socket.connect(addr)?;
                        Ok(Box::new(UdpStreamConn {
                            socket: Socket::new(socket),
                            remote: addr,
                        }) as Box<dyn Conn>)
                    })
                }
            };

            match result {
                Ok(conn) => {
                    debug!(network = net.name(), %addr, "dialed");
                    return Ok(conn);
                }
                Err(err) => {
                    trace!(%addr, %err, "dial attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("dial {network} {address}"))
        }))
    }
}

impl Dialer for SystemNet {
    fn dial(&self, network: &str, address: &str) -> io::Result<Box<dyn Conn>> {
        self.connect(network, address, None)
    }

    fn dial_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> io::Result<Box<dyn Conn>> {
        self.connect(network, address, Some(timeout))
    }
}

impl Net for SystemNet {
    fn dial(&self, network: &str, address: &str) -> io::Result<Box<dyn Conn>> {
        self.connect(network, address, None)
    }

    fn dial_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> io::Result<Box<dyn Conn>> {
        self.connect(network, address, Some(timeout))
    }

    fn listen(&self, network: &str, address: &str) -> io::Result<Box<dyn Listener>> {
        let net = Network::parse(network)?;
        if !matches!(net, Network::Tcp(_)) {
            return Err(unknown_network(network));
        }
        let listener = std::net::TcpListener::bind(resolve(net, address, true)?.as_slice())?;
        debug!(addr = ?listener.local_addr().ok(), "listening");
        Ok(Box::new(TcpSocketListener::new(listener)))
    }

    fn listen_packet(&self, network: &str, address: &str) -> io::Result<Box<dyn PacketConn>> {
        let net = Network::parse(network)?;
        if !matches!(net, Network::Udp(_)) {
            return Err(unknown_network(network));
        }
        let socket = UdpSocket::bind(resolve(net, address, true)?.as_slice())?;
        debug!(addr = ?socket.local_addr().ok(), "listening for packets");
        Ok(Box::new(UdpPacketConn {
            socket: Socket::new(socket),
        }))
    }
}

/// The real [super::Resolver], using the resolver of the tokio runtime.
#[cfg_attr(feature = "unstable-doc-cfg", doc(cfg(feature = "tokio-1")))]
#[cfg(feature = "tokio-1")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

#[cfg(feature = "tokio-1")]
#[async_trait::async_trait]
impl super::Resolver for SystemResolver {
    async fn lookup_host(&self, host: &str) -> io::Result<Vec<String>> {
        let mut hosts: Vec<String> = Vec::new();
        for addr in tokio_1::net::lookup_host((host, 0)).await? {
            let ip = addr.ip().to_string();
            if !hosts.contains(&ip) {
                hosts.push(ip);
            }
        }
        trace!(host, count = hosts.len(), "resolved host");
        Ok(hosts)
    }

    async fn lookup_port(&self, network: &str, service: &str) -> io::Result<u16> {
        super::service_port(network, service)
    }
}
