use std::io;
use std::net::{IpAddr, SocketAddr};

use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use socket2::Protocol;

/// Bind a non-blocking UDP socket. IPv6 sockets are bound v6-only so that a
/// v4 and a v6 socket can share one port.
pub fn bind_udp(addr: SocketAddr) -> io::Result<tokio::net::UdpSocket> {
    let socket = if addr.is_ipv4() {
        socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?
    } else {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV6,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_only_v6(true)?;
        socket
    };
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|e| io::Error::new(e.kind(), format!("bind_udp {addr}: {e}")))?;
    tokio::net::UdpSocket::from_std(socket.into())
}

pub fn create_tcp_listener(addr: SocketAddr) -> io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv6() {
        let socket = socket2::Socket::new(socket2::Domain::IPV6, socket2::Type::STREAM, None)?;
        socket.set_only_v6(false)?;
        socket
    } else {
        socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None)?
    };
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    tokio::net::TcpListener::from_std(socket.into())
}

/// Unicast addresses of the local network cards, loopback and link-local excluded.
pub fn local_ips() -> io::Result<Vec<IpAddr>> {
    let network_interfaces = NetworkInterface::show()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{e:?}")))?;
    let mut ips = Vec::new();
    for iface in network_interfaces {
        for addr in iface.addr {
            let ip = addr.ip();
            if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
                continue;
            }
            if let IpAddr::V6(v6) = ip {
                // fe80::/10
                if v6.segments()[0] & 0xffc0 == 0xfe80 {
                    continue;
                }
            }
            if let IpAddr::V4(v4) = ip {
                if v4.is_link_local() {
                    continue;
                }
            }
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
    }
    Ok(ips)
}
