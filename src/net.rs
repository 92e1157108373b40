use std::{
    future::Future,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tracing::trace;

use crate::error::PingError;

/// Runs a whole exchange under one deadline.
///
/// The sockets an exchange opens live inside `exchange`, so when the deadline
/// fires they're dropped (and closed) along with it.
pub async fn with_deadline<T>(
    timeout: Duration,
    exchange: impl Future<Output = Result<T, PingError>>,
) -> Result<T, PingError> {
    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(PingError::Timeout(timeout)),
    }
}

pub async fn connect_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    // requests are tiny and we want them out immediately
    stream.set_nodelay(true)?;
    trace!("tcp connected to {host}:{port} from {:?}", stream.local_addr());
    Ok(stream)
}

/// Binds an ephemeral UDP socket of the right address family and connects it
/// to the target, so only the target's datagrams (and ICMP errors) reach us.
pub async fn connect_udp(host: &str, port: u16) -> io::Result<UdpSocket> {
    let addr = resolve(host, port).await?;
    let bind_addr: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;
    trace!("udp socket {:?} connected to {addr}", socket.local_addr());
    Ok(socket)
}

async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{host} did not resolve to any address"),
        )
    })
}
