use may::coroutine::JoinHandle;
use may_minihttp::{HttpServerWithHeaders, HttpService};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Header slots per request; proxies in front of a whiteboard add plenty.
const MAX_HEADERS: usize = 32;

/// A `may_minihttp` server running one [`HttpService`].
pub struct HttpServer<T>(pub T);

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until the listener accepts connections.
    ///
    /// # Errors
    ///
    /// `TimedOut` if nothing accepts within `timeout`.
    pub fn wait_ready(&self, timeout: Duration) -> io::Result<()> {
        let target = loopback_target(self.addr);
        let deadline = Instant::now() + timeout;
        loop {
            if TcpStream::connect_timeout(&target, Duration::from_millis(50)).is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("server on {} not ready", self.addr),
        ))
    }

    /// Cancel the accept loop and wait for it.
    pub fn stop(self) {
        // SAFETY: the handle is owned here and the coroutine is only ever
        // cancelled once, when the server is torn down.
        #[allow(unsafe_code)]
        unsafe {
            self.handle.coroutine().cancel();
        }
        if self.handle.join().is_err() {
            warn!(addr = %self.addr, "HTTP server coroutine ended with a panic");
        }
        info!(addr = %self.addr, "HTTP server stopped");
    }

    /// Wait for the server to exit on its own.
    ///
    /// # Errors
    ///
    /// The accept loop panicked.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

/// Wildcard binds are checked on loopback.
fn loopback_target(addr: SocketAddr) -> SocketAddr {
    let mut target = addr;
    if target.ip().is_unspecified() {
        match target {
            SocketAddr::V4(_) => target.set_ip([127, 0, 0, 1].into()),
            SocketAddr::V6(_) => target.set_ip(std::net::Ipv6Addr::LOCALHOST.into()),
        }
    }
    target
}

impl<T: HttpService + Clone + Send + Sync + 'static> HttpServer<T> {
    /// Bind `addr` and start serving.
    ///
    /// # Errors
    ///
    /// The address does not resolve or cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let handle = HttpServerWithHeaders::<_, MAX_HEADERS>(self.0).start(addr)?;
        info!(addr = %addr, "HTTP server started");
        Ok(ServerHandle { addr, handle })
    }
}
