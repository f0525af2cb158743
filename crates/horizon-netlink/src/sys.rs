//! Thin wrappers around the netlink syscalls.
//!
//! Every wrapper retries `EINTR` and reports failures as `io::Error`; callers
//! attach the operation description.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use bytes::Bytes;

use crate::addr::NetlinkAddr;

const SOCKADDR_NL_LEN: libc::socklen_t = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn cvt_size(rc: libc::ssize_t) -> io::Result<usize> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

fn retry_eintr<T>(mut call: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match call() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Open a non-blocking, close-on-exec `AF_NETLINK`/`SOCK_RAW` socket.
pub(crate) fn socket(protocol: u32) -> io::Result<OwnedFd> {
    let ty = libc::SOCK_RAW | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK;
    // SAFETY: plain syscall; a non-negative return is a fresh descriptor we own.
    let fd = cvt(unsafe { libc::socket(libc::AF_NETLINK, ty, protocol as libc::c_int) })?;
    // SAFETY: `fd` was just returned by socket(2) and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn bind(fd: BorrowedFd<'_>, addr: NetlinkAddr) -> io::Result<()> {
    let raw = addr.to_raw();
    // SAFETY: `raw` is a valid sockaddr_nl of the length passed.
    cvt(unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&raw as *const libc::sockaddr_nl).cast(),
            SOCKADDR_NL_LEN,
        )
    })?;
    Ok(())
}

pub(crate) fn getsockname(fd: BorrowedFd<'_>) -> io::Result<NetlinkAddr> {
    // SAFETY: all-zero is a valid sockaddr_nl.
    let mut raw: libc::sockaddr_nl = unsafe { mem::zeroed() };
    let mut len = SOCKADDR_NL_LEN;
    // SAFETY: `raw` and `len` are valid for writes of the sizes passed.
    cvt(unsafe {
        libc::getsockname(
            fd.as_raw_fd(),
            (&mut raw as *mut libc::sockaddr_nl).cast(),
            &mut len,
        )
    })?;
    debug_assert!(raw.nl_family as libc::c_int == libc::AF_NETLINK && len == SOCKADDR_NL_LEN);
    Ok(NetlinkAddr::from_raw(&raw))
}

pub(crate) fn setsockopt_int(
    fd: BorrowedFd<'_>,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    // SAFETY: `value` is a c_int and the length matches.
    cvt(unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            level,
            name,
            (&value as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

pub(crate) fn getsockopt_int(
    fd: BorrowedFd<'_>,
    level: libc::c_int,
    name: libc::c_int,
) -> io::Result<libc::c_int> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `value` and `len` are valid for writes of the sizes passed.
    cvt(unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            level,
            name,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    })?;
    debug_assert_eq!(len as usize, mem::size_of::<libc::c_int>());
    Ok(value)
}

/// Send `buffers` gathered into one datagram to `dest`.
pub(crate) fn sendmsg(
    fd: BorrowedFd<'_>,
    dest: NetlinkAddr,
    buffers: &[Bytes],
) -> io::Result<usize> {
    let mut addr = dest.to_raw();
    let mut iov: Vec<libc::iovec> = buffers
        .iter()
        .map(|buf| libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        })
        .collect();

    // SAFETY: all-zero is a valid msghdr.
    let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
    hdr.msg_name = (&mut addr as *mut libc::sockaddr_nl).cast();
    hdr.msg_namelen = SOCKADDR_NL_LEN;
    hdr.msg_iov = iov.as_mut_ptr();
    hdr.msg_iovlen = iov.len() as _;

    retry_eintr(|| {
        // SAFETY: `hdr` points at `addr` and `iov`, which outlive the call;
        // the kernel only reads through the iovecs.
        cvt_size(unsafe { libc::sendmsg(fd.as_raw_fd(), &hdr, 0) })
    })
}

/// Outcome of one `recvmsg` call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Received {
    /// The datagram's size on the wire (`MSG_TRUNC` semantics).
    pub size: usize,
    pub source: NetlinkAddr,
    /// The kernel set `MSG_TRUNC` in the returned flags.
    pub truncated: bool,
}

/// Receive one datagram into `buf`. `flags` should include `MSG_TRUNC` so
/// the returned size is the wire size even when `buf` is shorter.
pub(crate) fn recvmsg(
    fd: BorrowedFd<'_>,
    buf: &mut [u8],
    flags: libc::c_int,
) -> io::Result<Received> {
    // SAFETY: all-zero is a valid sockaddr_nl.
    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // SAFETY: all-zero is a valid msghdr.
    let mut hdr: libc::msghdr = unsafe { mem::zeroed() };

    let size = retry_eintr(|| {
        hdr.msg_name = (&mut addr as *mut libc::sockaddr_nl).cast();
        hdr.msg_namelen = SOCKADDR_NL_LEN;
        hdr.msg_iov = &mut iov;
        hdr.msg_iovlen = 1;
        hdr.msg_flags = 0;
        // SAFETY: `hdr` points at `addr` and at `iov`, which covers `buf`;
        // all three outlive the call.
        cvt_size(unsafe { libc::recvmsg(fd.as_raw_fd(), &mut hdr, flags) })
    })?;

    debug_assert!(
        addr.nl_family as libc::c_int == libc::AF_NETLINK && hdr.msg_namelen == SOCKADDR_NL_LEN,
        "recvmsg returned a non-netlink source address"
    );
    Ok(Received {
        size,
        source: NetlinkAddr::from_raw(&addr),
        truncated: hdr.msg_flags & libc::MSG_TRUNC != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn test_retry_eintr() {
        let mut calls = 0;
        let result = retry_eintr(|| {
            calls += 1;
            if calls < 3 {
                Err(io::Error::from_raw_os_error(libc::EINTR))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_socket_is_cloexec_and_nonblocking() {
        let fd = socket(libc::NETLINK_USERSOCK as u32).unwrap();
        // SAFETY: querying flags of a descriptor we own.
        let fd_flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
        let fl_flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
        assert_ne!(fd_flags & libc::FD_CLOEXEC, 0);
        assert_ne!(fl_flags & libc::O_NONBLOCK, 0);
    }

    #[test]
    fn test_recv_on_empty_socket_would_block() {
        let fd = socket(libc::NETLINK_USERSOCK as u32).unwrap();
        let mut buf = [0u8; 16];
        let err = recvmsg(fd.as_fd(), &mut buf, libc::MSG_TRUNC).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
