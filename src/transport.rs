//! The transport collaborator (§6): turns a parsed [`Address`] into a
//! connected duplex byte stream. Concrete socket creation is the one piece
//! of the system spec.md explicitly treats as an external collaborator, but
//! a default implementation is provided so the crate is usable standalone,
//! the way `tokio-dbus`'s `Connection::from_std` is.

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::net::UnixStream;

use crate::address::Address;
use crate::error::{Error, Result};

/// A connected duplex byte stream, as produced by a [`Transport`].
pub type Stream = UnixStream;

/// Dials the socket described by an [`Address`].
///
/// Implementations are injected so the core never hard-codes a single way
/// to reach the broker (§6). [`UnixTransport`] is the default, covering
/// both filesystem-path and Linux abstract-namespace unix sockets.
pub trait Transport: Send + Sync {
    fn connect<'a>(
        &'a self,
        address: &'a Address,
    ) -> Pin<Box<dyn Future<Output = Result<Stream>> + Send + 'a>>;
}

/// The default transport: dials a unix domain socket, either at a
/// filesystem path or in the Linux abstract namespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixTransport;

impl Transport for UnixTransport {
    fn connect<'a>(
        &'a self,
        address: &'a Address,
    ) -> Pin<Box<dyn Future<Output = Result<Stream>> + Send + 'a>> {
        Box::pin(async move { connect(address).await })
    }
}

async fn connect(address: &Address) -> Result<Stream> {
    match address {
        Address::Path(path) => Ok(UnixStream::connect(path).await?),
        Address::Abstract { name, .. } => connect_abstract(name).await,
    }
}

/// Connects to a Linux abstract-namespace unix socket.
///
/// This isn't reachable through `std`'s or Tokio's safe `UnixStream::connect`
/// (both require a filesystem path), so the socket is built with raw
/// `libc` calls and then handed to Tokio via `from_std`, mirroring how
/// [`crate::sasl::External::from_current_user`] already reaches for `libc`
/// for the one other piece of POSIX-specific plumbing this crate needs.
#[cfg(all(unix, feature = "libc"))]
async fn connect_abstract(name: &str) -> Result<Stream> {
    use std::mem;
    use std::os::fd::FromRawFd;
    use std::os::unix::net::UnixStream as StdUnixStream;

    let name_bytes = name.as_bytes();
    // Abstract-namespace paths are conventionally stored without a leading
    // NUL in the address string; the kernel identifies the abstract form by
    // the embedded NUL we prepend into `sun_path` here.
    if name_bytes.len() + 1 > 108 {
        return Err(Error::new(crate::error::ErrorKind::InvalidAddress(
            format!("abstract socket name `{name}` is too long"),
        )));
    }

    // SAFETY: a plain `AF_UNIX`/`SOCK_STREAM` socket creation has no
    // preconditions; the returned fd is owned exclusively by this function
    // until it is wrapped below.
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };

    if fd < 0 {
        return Err(Error::from(io::Error::last_os_error()));
    }

    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    // addr.sun_path[0] stays 0, marking this as an abstract-namespace address.
    for (i, byte) in name_bytes.iter().enumerate() {
        addr.sun_path[i + 1] = *byte as libc::c_char;
    }

    let addr_len = (mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;

    // SAFETY: `fd` is a valid, freshly created socket and `addr`/`addr_len`
    // describe a well-formed `sockaddr_un` of the correct length.
    let result = unsafe {
        libc::connect(
            fd,
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            addr_len,
        )
    };

    if result < 0 {
        let err = io::Error::last_os_error();
        // SAFETY: `fd` was returned by `socket(2)` above and has not been
        // closed yet; closing it here avoids leaking it on the error path.
        unsafe {
            libc::close(fd);
        }
        return Err(Error::from(err));
    }

    // SAFETY: `fd` is a valid, connected stream socket, transferred to the
    // `std` wrapper exactly once.
    let std_stream = unsafe { StdUnixStream::from_raw_fd(fd) };
    std_stream.set_nonblocking(true)?;
    Ok(UnixStream::from_std(std_stream)?)
}

#[cfg(not(all(unix, feature = "libc")))]
async fn connect_abstract(_name: &str) -> Result<Stream> {
    Err(Error::new(crate::error::ErrorKind::InvalidAddress(
        "abstract-namespace sockets require the `libc` feature on unix".to_owned(),
    )))
}
