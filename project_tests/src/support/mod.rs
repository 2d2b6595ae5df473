//! Local stand-ins for the Beast producer and the collection endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_famup::{Credentials, FeedEndpoint, RelaySettings};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the collector answers one connection.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Status(u16),
    /// Read the request and close without answering.
    Hangup,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn data(&self) -> Option<String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
    }
}

/// Scripted HTTP/1.1 collector. One reply per connection; 200 once the
/// script is used up.
pub struct MockCollector {
    port: u16,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockCollector {
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut script = script.into_iter();
            while let Ok((stream, _)) = listener.accept().await {
                let reply = script.next().unwrap_or(Reply::Status(200));
                answer(stream, reply, &recorded).await;
            }
        });

        Self { port, requests }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect()
    }
}

async fn answer(stream: TcpStream, reply: Reply, recorded: &Mutex<Vec<Recorded>>) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let method = request_line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }

    recorded.lock().unwrap().push(Recorded {
        method,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    if let Reply::Status(status) = reply {
        let response = format!(
            "HTTP/1.1 {} Scripted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status
        );
        let mut stream = reader.into_inner();
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

/// Encodes one Beast record, doubling any sync byte in the body.
pub fn beast_record(type_byte: u8, timestamp: u64, signal: u8, message: &[u8]) -> Vec<u8> {
    let mut body = timestamp.to_be_bytes()[2..].to_vec();
    body.push(signal);
    body.extend_from_slice(message);

    let mut out = vec![0x1a, type_byte];
    for b in body {
        out.push(b);
        if b == 0x1a {
            out.push(0x1a);
        }
    }
    out
}

/// A Beast producer that accepts one client, sends each batch after `gap`,
/// then holds the connection open for `hold` before closing it.
pub async fn beast_producer(
    batches: Vec<Vec<u8>>,
    gap: Duration,
    hold: Duration,
) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for batch in batches {
            tokio::time::sleep(gap).await;
            if socket.write_all(&batch).await.is_err() {
                return;
            }
        }
        tokio::time::sleep(hold).await;
    });

    (port, handle)
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Fast cadences so a test run takes well under a second per relay.
pub fn settings(feed_port: u16, collector_port: u16) -> RelaySettings {
    let endpoint = RelaySettings::endpoint_url("http://127.0.0.1", collector_port).unwrap();
    let credentials = Credentials::new(Some("station".into()), Some("s3cret".into())).unwrap();
    let feed = FeedEndpoint {
        host: "127.0.0.1".into(),
        port: feed_port,
    };

    let mut settings = RelaySettings::new(feed, endpoint, credentials);
    settings.tick_interval = Duration::from_millis(20);
    settings.flush_interval = Duration::from_millis(10);
    settings.delivery_timeout = Duration::from_secs(3);
    settings
}
