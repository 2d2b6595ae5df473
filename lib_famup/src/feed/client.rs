//! # Local Feed Client
//!
//! Maintains exactly one outbound connection to the local Beast producer. The
//! producer is a prerequisite service, so a failed connect is reported straight
//! back to the caller and never retried.
//!
//! While connected, a reader task hands every chunk it receives to the attached
//! [`FeedConsumer`]. The relay loop never looks at the bytes; it only asks the
//! [`ConnectionGauge`] whether the connection is still open.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::configs::FeedEndpoint;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Errors raised while establishing or starting the feed connection.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The producer could not be reached.
    #[error("failed to connect to {endpoint} (is dump1090 running?): {source}")]
    Connect {
        /// `host:port` that was dialled.
        endpoint: String,
        /// Underlying socket error.
        source: io::Error,
    },

    /// `start` was called on a client whose socket was already handed off or closed.
    #[error("feed connection to {0} is not available")]
    NotConnected(String),
}

/// Receives raw feed bytes, in arrival order.
pub trait FeedConsumer {
    /// Handles one chunk as read from the socket. Chunk boundaries are arbitrary.
    fn consume(&mut self, bytes: &[u8]);
}

/// # Connection Gauge
///
/// Shared count of open connections for one service. Clones observe the same
/// counter. Each open connection is represented by a [`ConnectionGuard`], so
/// the count drops exactly once per connection no matter how it ends.
#[derive(Debug, Clone, Default)]
pub struct ConnectionGauge {
    open: Arc<AtomicUsize>,
}

impl ConnectionGauge {
    /// A gauge with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new open connection.
    pub fn attach(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            gauge: self.clone(),
        }
    }

    /// Number of connections currently open.
    pub fn connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Whether at least one connection is open.
    pub fn is_open(&self) -> bool {
        self.connections() > 0
    }
}

/// Keeps one connection counted on its [`ConnectionGauge`] until dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    gauge: ConnectionGauge,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.gauge.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// # Feed Client
///
/// Owns the feed socket, then the reader task once [`FeedClient::start`] runs.
pub struct FeedClient {
    endpoint: FeedEndpoint,
    gauge: ConnectionGauge,
    stream: Option<(TcpStream, ConnectionGuard)>,
    reader: Option<JoinHandle<()>>,
}

impl FeedClient {
    /// Opens the connection to the producer.
    ///
    /// # Errors
    /// Returns [`FeedError::Connect`] if nothing is listening or the host cannot
    /// be resolved.
    pub async fn connect(endpoint: &FeedEndpoint) -> Result<Self, FeedError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|source| FeedError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Could not disable Nagle on feed socket: {}", e);
        }

        let gauge = ConnectionGauge::new();
        let guard = gauge.attach();
        log::info!("Connected to Beast feed at {}", endpoint);

        Ok(Self {
            endpoint: endpoint.clone(),
            gauge,
            stream: Some((stream, guard)),
            reader: None,
        })
    }

    /// Spawns the reader task that pumps bytes into `consumer`.
    ///
    /// The connection stays counted until the producer closes it, a read fails,
    /// or [`FeedClient::close`] is called.
    pub fn start<C>(&mut self, consumer: Arc<Mutex<C>>) -> Result<(), FeedError>
    where
        C: FeedConsumer + Send + 'static,
    {
        let (stream, guard) = self
            .stream
            .take()
            .ok_or_else(|| FeedError::NotConnected(self.endpoint.to_string()))?;

        let endpoint = self.endpoint.to_string();
        self.reader = Some(tokio::spawn(pump(stream, guard, consumer, endpoint)));
        Ok(())
    }

    /// A handle on the open-connection count.
    pub fn gauge(&self) -> ConnectionGauge {
        self.gauge.clone()
    }

    /// Number of open feed connections (0 or 1).
    pub fn connections(&self) -> usize {
        self.gauge.connections()
    }

    /// Closes the connection and waits until the reader task is gone, so the
    /// gauge reads zero on return.
    pub async fn shutdown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.stream = None;
    }

    /// Closes the connection without waiting. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.stream = None;
    }
}

impl fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedClient")
            .field("endpoint", &self.endpoint)
            .field("connections", &self.connections())
            .field("started", &self.reader.is_some())
            .finish()
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump<C>(mut stream: TcpStream, guard: ConnectionGuard, consumer: Arc<Mutex<C>>, endpoint: String)
where
    C: FeedConsumer,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                log::warn!("Beast feed at {} closed the connection", endpoint);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("Read error on Beast feed at {}: {}", endpoint, e);
                break;
            }
        };

        {
            let mut consumer = consumer.lock().unwrap_or_else(PoisonError::into_inner);
            consumer.consume(&buf[..n]);
        }
    }

    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Collect {
        bytes: Vec<u8>,
    }

    impl FeedConsumer for Collect {
        fn consume(&mut self, bytes: &[u8]) {
            self.bytes.extend_from_slice(bytes);
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_gauge_counts_guards() {
        let gauge = ConnectionGauge::new();
        assert!(!gauge.is_open());

        let first = gauge.attach();
        let second = gauge.clone().attach();
        assert_eq!(gauge.connections(), 2);

        drop(first);
        assert_eq!(gauge.connections(), 1);
        drop(second);
        assert_eq!(gauge.connections(), 0);
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Grab a free port, then release it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = FeedEndpoint {
            host: "127.0.0.1".into(),
            port,
        };
        let err = FeedClient::connect(&endpoint).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains(&format!("127.0.0.1:{}", port)), "{}", text);
        assert!(text.contains("is dump1090 running?"));
    }

    #[tokio::test]
    async fn test_pump_delivers_bytes_and_drops_count_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let producer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"\x1a\x31hello").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Dropping the socket closes the feed.
        });

        let endpoint = FeedEndpoint {
            host: "127.0.0.1".into(),
            port,
        };
        let mut client = FeedClient::connect(&endpoint).await.unwrap();
        assert_eq!(client.connections(), 1);

        let sink = Arc::new(Mutex::new(Collect::default()));
        client.start(Arc::clone(&sink)).unwrap();
        assert!(matches!(
            client.start(Arc::clone(&sink)),
            Err(FeedError::NotConnected(_))
        ));

        let gauge = client.gauge();
        wait_until(|| !gauge.is_open()).await;
        producer.await.unwrap();

        assert_eq!(sink.lock().unwrap().bytes, b"\x1a\x31hello");
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _producer = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let endpoint = FeedEndpoint {
            host: "127.0.0.1".into(),
            port,
        };
        let mut client = FeedClient::connect(&endpoint).await.unwrap();
        client.start(Arc::new(Mutex::new(Collect::default()))).unwrap();

        let gauge = client.gauge();
        client.close();
        client.close();
        wait_until(|| gauge.connections() == 0).await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _producer = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let endpoint = FeedEndpoint {
            host: "127.0.0.1".into(),
            port,
        };
        let mut client = FeedClient::connect(&endpoint).await.unwrap();
        client.start(Arc::new(Mutex::new(Collect::default()))).unwrap();

        client.shutdown().await;
        assert_eq!(client.connections(), 0);
    }
}
