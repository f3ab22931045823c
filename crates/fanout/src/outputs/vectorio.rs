//! Vectored datagram send: header and payload in one syscall

use std::io::{self, IoSlice};

use tokio::io::Interest;
use tokio::net::UdpSocket;

/// Send `bufs` as one datagram on a connected socket
#[cfg(unix)]
pub async fn send_vectored(socket: &UdpSocket, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
    socket
        .async_io(Interest::WRITABLE, || {
            nix::sys::uio::writev(socket, bufs).map_err(io::Error::from)
        })
        .await
}

#[cfg(not(unix))]
pub async fn send_vectored(socket: &UdpSocket, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
    let joined: Vec<u8> = bufs.iter().flat_map(|b| b.iter().copied()).collect();
    socket
        .async_io(Interest::WRITABLE, || socket.try_send(&joined))
        .await
}
