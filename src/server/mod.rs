pub mod config;
pub mod connection_manager;
pub mod directory;
pub mod http_status;
mod listing;
pub mod request;
pub mod responder;

use libc::{FD_ISSET, FD_SET, FD_ZERO, fd_set, pselect, timespec};
use log::{debug, error, info, warn};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::thread;
use std::time::{Duration, Instant};
use threadpool::ThreadPool;

use crate::error::ServeError;
use crate::lifecycle::shutdown::ShutdownSignal;
use config::ServerConfig;
use connection_manager::{ConnectionGuard, ConnectionManager};
use request::Request;
use responder::{Response, StaticResponder};

/// How long the accept loop blocks before looking at the shutdown signal again.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A bound listener together with everything needed to answer on it.
pub struct HttpServer {
    listener: TcpListener,
    responder: StaticResponder,
    connection_manager: ConnectionManager,
    thread_pool: ThreadPool,
}

impl HttpServer {
    pub fn bind(config: &ServerConfig, responder: StaticResponder) -> Result<Self, ServeError> {
        let port = u16::try_from(config.port).map_err(|_| ServeError::InvalidPort(config.port))?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let listener = TcpListener::bind(addr).map_err(|source| ServeError::Bind { port, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServeError::Bind { port, source })?;

        info!("Listening on {}", addr);

        Ok(Self {
            listener,
            responder,
            connection_manager: ConnectionManager::new(),
            thread_pool: ThreadPool::with_name("http-worker".to_string(), config.threads.max(1)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires, then drains in-flight
    /// requests until the deadline carried by the signal.
    pub fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServeError> {
        info!(
            "Server running with {} threads, serving {:?}",
            self.thread_pool.max_count(),
            self.responder.root()
        );

        let listener_fd = self.listener.as_raw_fd();

        loop {
            if let Some(deadline) = shutdown.poll() {
                return self.drain(deadline);
            }

            match wait_readable(listener_fd, ACCEPT_POLL_INTERVAL) {
                Ok(true) => self.accept_new_connections()?,
                Ok(false) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("pselect error: {}", e);
                    return Err(ServeError::Serve(e));
                }
            }
        }
    }

    fn accept_new_connections(&self) -> Result<(), ServeError> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.dispatch(stream, addr),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if is_transient_accept_error(&e) => {
                    warn!("Error accepting connection: {}", e);
                    thread::sleep(ACCEPT_RETRY_DELAY);
                    return Ok(());
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    return Err(ServeError::Serve(e));
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(false) {
            error!("Failed to set blocking mode for {}: {}", addr, e);
            return;
        }
        if let Err(e) = stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT)) {
            warn!("Failed to set read timeout for {}: {}", addr, e);
        }

        let guard = self.connection_manager.add_connection(&stream, addr);
        debug!(
            "Accepted connection from {} (active: {})",
            addr,
            self.connection_manager.get_connections_count()
        );

        let responder = self.responder.clone();
        self.thread_pool.execute(move || {
            handle_client(stream, addr, &responder, guard);
        });
    }

    fn drain(self, deadline: Instant) -> Result<(), ServeError> {
        let Self {
            listener,
            connection_manager,
            thread_pool,
            ..
        } = self;

        drop(listener);
        info!(
            "Listener closed, waiting for {} in-flight connection(s)",
            connection_manager.get_connections_count()
        );

        while !connection_manager.is_empty() {
            if Instant::now() >= deadline {
                let in_flight = connection_manager.close_all();
                warn!("Shutdown deadline reached, closed {} connection(s)", in_flight);
                return Err(ServeError::ShutdownTimedOut { in_flight });
            }
            thread::sleep(DRAIN_POLL_INTERVAL);
        }

        debug!("All connections drained ({} workers idle)", thread_pool.max_count());
        Ok(())
    }
}

fn handle_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    responder: &StaticResponder,
    _guard: ConnectionGuard,
) {
    debug!(
        "[Thread {:?}] Handling connection from {}",
        thread::current().id(),
        addr
    );

    let response = match Request::read_from(&mut stream) {
        Ok(request) => responder.respond(&request),
        Err(e) => match e.status() {
            Some(status) => {
                warn!("Rejecting request from {}: {}", addr, e);
                Response::error(status)
            }
            None => {
                debug!("No response for {}: {}", addr, e);
                return;
            }
        },
    };

    let status = response.status;
    match response.write_to(&mut stream) {
        Ok(sent) => debug!("Answered {} with {} ({} body bytes)", addr, status.code(), sent),
        Err(e) => error!("Error sending response to {}: {}", addr, e),
    }
}

/// Per-connection failures that should not bring the accept loop down.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
    ) || matches!(e.raw_os_error(), Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM))
}

/// Blocks until `fd` is readable or `timeout` passes.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    // fd_set is a fixed bitmap, FD_SET past its end is undefined behaviour
    if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("descriptor {} does not fit in an fd_set", fd),
        ));
    }

    let mut read_set: fd_set = unsafe { std::mem::zeroed() };
    unsafe { FD_ZERO(&mut read_set) };
    unsafe { FD_SET(fd, &mut read_set) };

    let timeout = timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };

    let ready_count = unsafe {
        pselect(
            fd + 1,
            &mut read_set,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &timeout,
            std::ptr::null(),
        )
    };

    match ready_count {
        n if n < 0 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(unsafe { FD_ISSET(fd, &read_set) }),
    }
}
