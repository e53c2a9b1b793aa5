// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The blocking listener pool.
//!
//! For each configured address, one UDP worker thread and one TCP
//! accept thread are started (with SO_REUSEPORT, so several instances
//! can share a port). Shutdown is cooperative: every loop observes a
//! shared flag between operations, and [`ListenerPool::shutdown`] joins
//! the listener threads once they have drained.

// I/O error handling here is to log and carry on: a failed send or a
// broken connection affects one client, and the receive loops must
// keep serving.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, SockaddrStorage};

use super::{ReceivedInfo, Response, Server, Transport};

/// The maximum interval between shutdown-flag checks in the receive and
/// accept loops; consequently, the longest the shutdown procedure has
/// to wait for a listener.
const CHECK_FOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// The maximum amount of time a TCP client may take to send us a full
/// DNS message before the connection is closed, to counter
/// Slowloris-style denial of service.
const READ_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

////////////////////////////////////////////////////////////////////////
// THE LISTENER POOL                                                  //
////////////////////////////////////////////////////////////////////////

/// The running listeners for one server.
pub struct ListenerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl ListenerPool {
    /// Binds UDP and TCP listeners on each address and starts serving.
    /// Binding all sockets happens before any thread starts, so a bad
    /// address fails the whole call and nothing is left half-running.
    pub fn start(server: Arc<Server>, addrs: &[SocketAddr]) -> io::Result<Self> {
        let mut udp_sockets = Vec::with_capacity(addrs.len());
        let mut tcp_listeners = Vec::with_capacity(addrs.len());
        for addr in addrs {
            udp_sockets.push((*addr, bind_udp(*addr)?));
            tcp_listeners.push((*addr, bind_tcp(*addr)?));
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for (addr, socket) in udp_sockets {
            info!("Listen on: udp {}", addr);
            let server = server.clone();
            let shutdown = shutdown.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("udp {}", addr))
                    .spawn(move || run_udp_worker(&server, &socket, &shutdown))?,
            );
        }
        for (addr, listener) in tcp_listeners {
            info!("Listen on: tcp {}", addr);
            let server = server.clone();
            let shutdown = shutdown.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("tcp {}", addr))
                    .spawn(move || run_tcp_listener(&server, &listener, &shutdown))?,
            );
        }

        Ok(Self { shutdown, handles })
    }

    /// Stops accepting and waits for every listener to drain. In-flight
    /// TCP requests are allowed to finish naturally.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// UDP                                                                //
////////////////////////////////////////////////////////////////////////

fn run_udp_worker(server: &Arc<Server>, socket: &UdpSocket, shutdown: &AtomicBool) {
    let mut buf = vec![0u8; u16::MAX as usize];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if would_block(&e) => continue,
            Err(e) => {
                error!("udp receive failed: {}", e);
                continue;
            }
        };

        let info = ReceivedInfo {
            source: peer.ip(),
            transport: Transport::Udp,
        };
        if let Response::Single(wire) = server.handle_message(&buf[..n], info) {
            if let Err(e) = socket.send_to(&wire, peer) {
                debug!("udp send to {} failed: {}", peer, e);
                server.note_write_error();
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TCP                                                                //
////////////////////////////////////////////////////////////////////////

fn run_tcp_listener(server: &Arc<Server>, listener: &TcpListener, shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if would_block(&e) => {
                // The listener is nonblocking so this loop can observe
                // shutdown; idle-wait between polls.
                thread::sleep(CHECK_FOR_SHUTDOWN_TIMEOUT / 10);
                continue;
            }
            Err(e) => {
                error!("tcp accept failed: {}", e);
                continue;
            }
        };

        let server = server.clone();
        let spawned = thread::Builder::new()
            .name(format!("tcp conn {}", peer))
            .spawn(move || {
                if let Err(e) = handle_tcp_connection(&server, stream, peer) {
                    debug!("tcp connection {}: {}", peer, e);
                }
            });
        if let Err(e) = spawned {
            error!("could not spawn connection handler: {}", e);
        }
    }
}

/// Serves one TCP connection: length-framed messages until the client
/// closes, errs, or stalls past the read timeout.
fn handle_tcp_connection(
    server: &Arc<Server>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    // The stream may inherit nonblocking mode from the listener.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_MESSAGE_TIMEOUT))?;
    stream.set_write_timeout(Some(READ_MESSAGE_TIMEOUT))?;

    loop {
        let mut length = [0u8; 2];
        match stream.read_exact(&mut length) {
            Ok(()) => (),
            // Normal close between messages.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let mut body = vec![0u8; u16::from_be_bytes(length) as usize];
        stream.read_exact(&mut body)?;

        let info = ReceivedInfo {
            source: peer.ip(),
            transport: Transport::Tcp,
        };
        if let Response::Single(wire) = server.handle_message(&body, info) {
            let mut framed = Vec::with_capacity(2 + wire.len());
            framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
            framed.extend_from_slice(&wire);
            if let Err(e) = stream.write_all(&framed) {
                server.note_write_error();
                return Err(e);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SOCKET SETUP                                                       //
////////////////////////////////////////////////////////////////////////

/// Binds a UDP socket with SO_REUSEADDR and SO_REUSEPORT, and a read
/// timeout so the worker loop can observe shutdown.
fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let fd = reusable_socket(addr, SockType::Datagram)?;
    let socket = UdpSocket::from(fd);
    socket.set_read_timeout(Some(CHECK_FOR_SHUTDOWN_TIMEOUT))?;
    Ok(socket)
}

/// Binds a TCP listener with SO_REUSEADDR and SO_REUSEPORT, in
/// nonblocking mode so the accept loop can observe shutdown.
fn bind_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    let fd = reusable_socket(addr, SockType::Stream)?;
    socket::listen(&fd, 128).map_err(nix_to_io)?;
    let listener = TcpListener::from(fd);
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Creates and binds a socket with the reuse options set, which the
/// standard library's bind-only constructors cannot do.
fn reusable_socket(addr: SocketAddr, sock_type: SockType) -> io::Result<OwnedFd> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket::socket(family, sock_type, SockFlag::empty(), None).map_err(nix_to_io)?;
    socket::setsockopt(&fd, socket::sockopt::ReuseAddr, &true).map_err(nix_to_io)?;
    socket::setsockopt(&fd, socket::sockopt::ReusePort, &true).map_err(nix_to_io)?;
    let sockaddr = SockaddrStorage::from(addr);
    socket::bind(fd.as_raw_fd(), &sockaddr).map_err(nix_to_io)?;
    Ok(fd)
}

fn nix_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

fn would_block(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockets_bind_with_reuse_options() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let first = bind_udp(addr).unwrap();
        let bound = first.local_addr().unwrap();
        // With SO_REUSEPORT, a second socket can bind the same port.
        let _second = bind_udp(bound).unwrap();

        let listener = bind_tcp(addr).unwrap();
        let bound = listener.local_addr().unwrap();
        let _second = bind_tcp(bound).unwrap();
    }
}
