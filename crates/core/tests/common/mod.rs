#![allow(dead_code)]

use b2pilot_core::{B2Client, ClientConfig, Clock, RequestPolicy};
use chrono::{DateTime, Duration, TimeZone, Utc};
use httpmock::Method::GET;
use httpmock::{Mock, MockServer};
use serde_json::json;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const ACCOUNT_ID: &str = "000a1b2c3d4e";
pub const APPLICATION_KEY: &str = "K000applicationkey";
pub const AUTH_PATH: &str = "/b2api/v2/b2_authorize_account";

/// `Basic base64(ACCOUNT_ID:APPLICATION_KEY)`
pub const BASIC_AUTH: &str = "Basic MDAwYTFiMmMzZDRlOkswMDBhcHBsaWNhdGlvbmtleQ==";

pub fn can_bind_localhost() -> bool {
    StdTcpListener::bind("127.0.0.1:0").is_ok()
}

/// A clock the test moves by hand
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn fast_policy(max_retries: u32) -> RequestPolicy {
    RequestPolicy {
        timeout_ms: 2_000,
        max_retries,
        retry_delay_ms: 0,
        retry_non_idempotent: false,
    }
}

pub fn client_config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(ACCOUNT_ID, APPLICATION_KEY)
        .with_auth_url(server.url(AUTH_PATH))
        .with_request_policy(fast_policy(2))
}

pub fn client(server: &MockServer) -> B2Client {
    B2Client::new(client_config(server)).unwrap()
}

/// The authorize response pointing API and download calls back at `server`
pub fn authorize_body(server: &MockServer, token: &str) -> serde_json::Value {
    json!({
        "accountId": ACCOUNT_ID,
        "authorizationToken": token,
        "apiUrl": server.base_url(),
        "downloadUrl": server.base_url(),
        "recommendedPartSize": 100000000,
        "absoluteMinimumPartSize": 5000000,
        "s3ApiUrl": "https://s3.us-west-001.backblazeb2.com"
    })
}

pub async fn mock_authorize<'a>(server: &'a MockServer, token: &str) -> Mock<'a> {
    let body = authorize_body(server, token);
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(AUTH_PATH)
                .header("authorization", BASIC_AUTH);
            then.status(200).json_body(body);
        })
        .await
}

pub fn file_record(file_name: &str, content_sha1: &str, len: usize) -> serde_json::Value {
    json!({
        "accountId": ACCOUNT_ID,
        "action": "upload",
        "bucketId": "bucket-1",
        "contentLength": len,
        "contentMd5": null,
        "contentSha1": content_sha1,
        "contentType": "text/json",
        "fileId": "4_zbucket1_f100000000000001_d20240101_m000000_c001_v0001001_t0001",
        "fileInfo": {},
        "fileName": file_name,
        "fileRetention": { "isClientAuthorizedToRead": true, "value": null },
        "legalHold": { "isClientAuthorizedToRead": true, "value": null },
        "serverSideEncryption": { "algorithm": null, "mode": null },
        "uploadTimestamp": 1704067200000i64
    })
}

/// Plain HTTP server answering the n-th connection with the n-th scripted
/// response (the last one repeats), one request per connection
pub struct ScriptedServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        assert!(!responses.is_empty());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[index.min(responses.len() - 1)].clone();
                tokio::spawn(respond(stream, status, body));
            }
        });

        Self { addr, hits, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(mut stream: TcpStream, status: u16, body: String) {
    read_request(&mut stream).await;
    let response = format!(
        "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Consume request head and body so the client sees a clean exchange
async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
