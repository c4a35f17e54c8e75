use log::{debug, error};
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The set of connections accepted but not yet answered. Shutdown waits for
/// it to drain and force-closes whatever is left at the deadline.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<Mutex<HashMap<u64, (SocketAddr, Option<TcpStream>)>>>,
    next_id: Arc<AtomicU64>,
}

/// Deregisters its connection when dropped, however the worker finishes.
pub struct ConnectionGuard {
    id: u64,
    manager: ConnectionManager,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, (SocketAddr, Option<TcpStream>)>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection. A clone of the stream is kept so the
    /// connection can be shut down from outside its worker.
    pub fn add_connection(&self, stream: &TcpStream, addr: SocketAddr) -> ConnectionGuard {
        let handle = match stream.try_clone() {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Cannot clone stream from {}, it will not be force-closable: {}", addr, e);
                None
            }
        };
        self.track(addr, handle)
    }

    /// Without a handle the connection still counts as in flight.
    fn track(&self, addr: SocketAddr, handle: Option<TcpStream>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, (addr, handle));
        ConnectionGuard {
            id,
            manager: self.clone(),
        }
    }

    pub fn get_connections_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.get_connections_count() == 0
    }

    /// Shuts down every tracked connection and returns how many there were.
    pub fn close_all(&self) -> usize {
        let connections: Vec<_> = self.lock().drain().collect();
        for (_, (addr, stream)) in &connections {
            debug!("Forcibly closing connection from {}", addr);
            if let Some(stream) = stream {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        connections.len()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, addr) = listener.accept().unwrap();
        (client, server, addr)
    }

    #[test]
    fn guard_removes_connection_on_drop() {
        let manager = ConnectionManager::new();
        let (_client, server, addr) = pair();

        let guard = manager.add_connection(&server, addr);
        assert_eq!(manager.get_connections_count(), 1);
        drop(guard);
        assert!(manager.is_empty());
    }

    #[test]
    fn connection_without_handle_is_still_counted() {
        let manager = ConnectionManager::new();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        let guard = manager.track(addr, None);
        assert_eq!(manager.get_connections_count(), 1);
        assert_eq!(manager.close_all(), 1);
        drop(guard);
        assert!(manager.is_empty());
    }

    #[test]
    fn close_all_shuts_down_streams() {
        let manager = ConnectionManager::new();
        let (mut client, server, addr) = pair();
        let _guard = manager.add_connection(&server, addr);

        assert_eq!(manager.close_all(), 1);
        assert!(manager.is_empty());

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
