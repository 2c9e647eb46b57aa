//! TCP port occupancy probing.
//!
//! A port counts as occupied when we cannot bind a listener to it on the
//! wildcard address. The check does not know *who* holds the port; the
//! supervisor keeps that distinction separately (see `ServiceSnapshot::owned`).

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket};

/// Returns `true` if binding `0.0.0.0:port` fails, or if a dual-stack
/// `[::]:port` bind reports the address in use (dev servers bound to
/// `localhost` often listen on `::1` only).
///
/// The listeners are dropped as soon as the binds succeed, so the port is
/// free again by the time this returns `false`.
pub fn is_port_occupied(port: u16) -> bool {
    match try_bind_v4(port) {
        Ok(socket) => drop(socket),
        Err(e) => {
            tracing::trace!("Port {} IPv4 bind failed: {}", port, e);
            return true;
        }
    }
    match try_bind_v6(port) {
        Ok(socket) => {
            drop(socket);
            false
        }
        // hosts without IPv6 report other errors; those say nothing about the port
        Err(e) => {
            tracing::trace!("Port {} IPv6 bind failed: {}", port, e);
            e.kind() == std::io::ErrorKind::AddrInUse
        }
    }
}

fn try_bind_v4(port: u16) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    // Same semantics as a plain std listener: a port stuck in TIME_WAIT
    // after a stop is not "occupied".
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(socket)
}

fn try_bind_v6(port: u16) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    // BSD lets SO_REUSEADDR bind the wildcard over a specific-address
    // listener, which would hide exactly the `::1` case; Linux does not.
    #[cfg(target_os = "linux")]
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(socket)
}

/// Async wrapper so callers on the runtime never block a worker on a syscall.
pub async fn is_port_occupied_async(port: u16) -> bool {
    tokio::task::spawn_blocking(move || is_port_occupied(port))
        .await
        .unwrap_or(true)
}

/// Valid user-facing port range (0 is reserved for "not configured").
pub fn is_valid_port(port: u32) -> bool {
    (1..=65535).contains(&port)
}

/// Best-effort LAN address of this machine, used to build the frontend URL.
/// Connecting a UDP socket sends nothing; it only asks the OS which local
/// interface would route outward.
pub fn local_ip() -> String {
    let outward = || -> std::io::Result<std::net::IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match outward() {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => ip.to_string(),
        _ => "localhost".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_occupied_while_held_and_free_after_release() {
        let holder = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        assert!(is_port_occupied(port), "port held by another listener must read as occupied");

        drop(holder);
        assert!(!is_port_occupied(port), "port must read as free once the holder releases it");
    }

    #[test]
    fn test_ipv6_loopback_listener_is_occupied() {
        // IPv6가 없는 환경에서는 건너뜀
        let Ok(holder) = TcpListener::bind("[::1]:0") else {
            return;
        };
        let port = holder.local_addr().unwrap().port();

        assert!(is_port_occupied(port), "listener on [::1] must read as occupied");

        drop(holder);
        assert!(!is_port_occupied(port));
    }

    #[test]
    fn test_check_does_not_keep_port() {
        let holder = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        drop(holder);

        // 두 번 연속 호출해도 프로브가 포트를 잡고 있지 않아야 함
        assert!(!is_port_occupied(port));
        assert!(!is_port_occupied(port));
    }

    #[tokio::test]
    async fn test_async_occupancy_check() {
        let holder = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        assert!(is_port_occupied_async(port).await);
    }

    #[test]
    fn test_valid_port_range() {
        assert!(!is_valid_port(0));
        assert!(is_valid_port(1));
        assert!(is_valid_port(8080));
        assert!(is_valid_port(65535));
        assert!(!is_valid_port(65536));
    }

    #[test]
    fn test_local_ip_never_empty() {
        assert!(!local_ip().is_empty());
    }
}
