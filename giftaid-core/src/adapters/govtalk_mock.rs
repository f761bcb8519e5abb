//! Mock GovTalk gateway for testing
//!
//! A small HTTP server that answers submission and poll requests the way the
//! Transaction Engine does, so the real `TransportClient` can be exercised
//! without network access:
//! - POST to a path containing `poll` returns the configured poll reply
//! - any other POST returns an acknowledgement (or the configured status)

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// What the mock answers to a poll request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReply {
    /// Still processing
    Acknowledgement,
    /// Claim accepted
    Response,
    /// Claim rejected on business rules
    BusinessError,
    /// Message-level failure
    FatalError,
}

/// Configuration for the mock gateway
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// HTTP status for submission requests
    pub submit_status: u16,
    /// Correlation id placed in every reply
    pub correlation_id: String,
    pub poll_reply: PollReply,
    /// Delay in milliseconds before responding
    pub delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            submit_status: 200,
            correlation_id: "B07B9ED3176E4B1A9E5B4E9A2F6C1D22".to_string(),
            poll_reply: PollReply::Response,
            delay_ms: 0,
        }
    }
}

/// A request as the mock received it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    /// Header lines, lower-cased
    pub headers: Vec<String>,
    pub body: String,
}

/// Mock GovTalk server for testing
pub struct MockGatewayServer {
    port: u16,
    running: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl MockGatewayServer {
    /// Start a new mock server on a random available port
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(Mutex::new(Vec::new()));

        // Non-blocking accept so the loop can notice shutdown
        listener.set_nonblocking(true)?;

        let running_clone = running.clone();
        let requests_clone = requests.clone();
        let thread_handle = thread::spawn(move || {
            while running_clone.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let cfg = config.clone();
                        let log = requests_clone.clone();
                        thread::spawn(move || handle_connection(stream, &cfg, &log));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            port,
            running,
            requests,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn submission_url(&self) -> String {
        format!("http://127.0.0.1:{}/submission", self.port)
    }

    pub fn poll_url(&self) -> String {
        format!("http://127.0.0.1:{}/poll", self.port)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockGatewayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(
    mut stream: TcpStream,
    config: &MockConfig,
    log: &Mutex<Vec<RecordedRequest>>,
) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let Some(request) = read_request(&mut stream) else {
        send_response(&mut stream, 400, "Bad Request", "");
        return;
    };

    if config.delay_ms > 0 {
        thread::sleep(Duration::from_millis(config.delay_ms));
    }

    let is_poll = request.path.contains("poll");
    if let Ok(mut requests) = log.lock() {
        requests.push(request);
    }

    if is_poll {
        let body = match config.poll_reply {
            PollReply::Acknowledgement => {
                govtalk_reply("acknowledgement", "poll", &config.correlation_id, None)
            }
            PollReply::Response => govtalk_reply("response", "submit", &config.correlation_id, None),
            PollReply::BusinessError => govtalk_reply(
                "error",
                "submit",
                &config.correlation_id,
                Some(("business", "The HMRC reference does not match the charity name")),
            ),
            PollReply::FatalError => govtalk_reply(
                "error",
                "submit",
                &config.correlation_id,
                Some(("fatal", "Authentication failure")),
            ),
        };
        send_response(&mut stream, 200, "OK", &body);
        return;
    }

    match config.submit_status {
        200 => {
            let body = govtalk_reply("acknowledgement", "submit", &config.correlation_id, None);
            send_response(&mut stream, 200, "OK", &body);
        }
        status => send_response(&mut stream, status, "Error", "<html>Gateway error</html>"),
    }
}

/// Read headers, then as much body as Content-Length announces
fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut raw = Vec::new();
    let mut buffer = [0; 4096];

    let header_end = loop {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&buffer[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.lines();
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let headers: Vec<String> = lines
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();

    let content_length = headers
        .iter()
        .find_map(|h| h.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buffer[..n]);
    }

    Some(RecordedRequest {
        path,
        headers,
        body: String::from_utf8_lossy(&raw[header_end..]).to_string(),
    })
}

fn govtalk_reply(
    qualifier: &str,
    function: &str,
    correlation_id: &str,
    error: Option<(&str, &str)>,
) -> String {
    let errors = match error {
        Some((kind, text)) => format!(
            "<GovTalkErrors><Error><RaisedBy>Department</RaisedBy><Number>7001</Number>\
             <Type>{}</Type><Text>{}</Text></Error></GovTalkErrors>",
            kind, text
        ),
        None => String::new(),
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <GovTalkMessage xmlns=\"http://www.govtalk.gov.uk/CM/envelope\">\
         <EnvelopeVersion>2.0</EnvelopeVersion>\
         <Header><MessageDetails><Class>HMRC-CHAR-CLM</Class>\
         <Qualifier>{}</Qualifier><Function>{}</Function>\
         <CorrelationID>{}</CorrelationID>\
         <GatewayTimestamp>2024-07-01T09:30:00.000</GatewayTimestamp>\
         </MessageDetails></Header>\
         <GovTalkDetails><Keys/>{}</GovTalkDetails><Body/></GovTalkMessage>",
        qualifier, function, correlation_id, errors
    )
}

fn send_response(stream: &mut TcpStream, status: u16, status_text: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::govtalk::{parse_reply, TransportClient};
    use crate::domain::{GatewayCredentials, GatewayMode, OutcomeKind};
    use crate::ports::GatewayTransport;

    fn client_for(server: &MockGatewayServer, timeout: Duration) -> TransportClient {
        TransportClient::with_endpoints(
            GatewayMode::LocalTestService,
            &server.submission_url(),
            &server.poll_url(),
            timeout,
        )
        .unwrap()
    }

    fn creds() -> GatewayCredentials {
        GatewayCredentials::new("323412300001", "testing1").unwrap()
    }

    #[test]
    fn test_submit_is_delivered_as_text_xml() {
        let server = MockGatewayServer::start(MockConfig::default()).unwrap();
        let client = client_for(&server, Duration::from_secs(5));

        let outcome = client.submit("<GovTalkMessage>hello</GovTalkMessage>");
        assert_eq!(outcome.kind, OutcomeKind::Delivered);
        assert!(outcome.success);
        assert_eq!(outcome.http_status, 200);
        assert_eq!(outcome.content_type.as_deref(), Some("text/xml"));
        assert_eq!(
            parse_reply(&outcome.body).qualifier.as_deref(),
            Some("acknowledgement")
        );

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/submission");
        assert_eq!(requests[0].body, "<GovTalkMessage>hello</GovTalkMessage>");
        assert!(requests[0]
            .headers
            .iter()
            .any(|h| h.starts_with("content-type: text/xml")));
        assert!(requests[0].headers.iter().any(|h| h.starts_with("accept:")));
    }

    #[test]
    fn test_http_error_keeps_status_and_body() {
        let server = MockGatewayServer::start(MockConfig {
            submit_status: 503,
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, Duration::from_secs(5));

        let outcome = client.submit("<x/>");
        assert_eq!(outcome.kind, OutcomeKind::HttpError);
        assert!(!outcome.success);
        assert_eq!(outcome.http_status, 503);
        assert!(outcome.body.contains("Gateway error"));
    }

    #[test]
    fn test_slow_gateway_times_out() {
        let server = MockGatewayServer::start(MockConfig {
            delay_ms: 1500,
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, Duration::from_millis(300));

        let outcome = client.submit("<x/>");
        assert_eq!(outcome.kind, OutcomeKind::Timeout);
        assert_eq!(outcome.http_status, 0);
        assert!(outcome.body.is_empty());
    }

    #[test]
    fn test_refused_connection_is_network_failure() {
        // Grab a free port, then close it so nothing is listening
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{}/submission", port);
        let client = TransportClient::with_endpoints(
            GatewayMode::LocalTestService,
            &url,
            &url,
            Duration::from_secs(2),
        )
        .unwrap();

        let outcome = client.submit("<x/>");
        assert_eq!(outcome.kind, OutcomeKind::Network);
        assert!(outcome.detail.is_some());
    }

    #[test]
    fn test_poll_posts_poll_envelope_to_poll_endpoint() {
        let server = MockGatewayServer::start(MockConfig {
            poll_reply: PollReply::BusinessError,
            ..Default::default()
        })
        .unwrap();
        let client = client_for(&server, Duration::from_secs(5));

        let outcome = client.poll("ABC123", &creds()).unwrap();
        assert!(outcome.success);
        let reply = parse_reply(&outcome.body);
        assert_eq!(reply.qualifier.as_deref(), Some("error"));
        assert_eq!(reply.error_type.as_deref(), Some("business"));

        let requests = server.requests();
        assert_eq!(requests[0].path, "/poll");
        assert!(requests[0].body.contains("<Qualifier>poll</Qualifier>"));
        assert!(requests[0].body.contains("<CorrelationID>ABC123</CorrelationID>"));
    }

    #[test]
    fn test_poll_without_correlation_id_is_refused() {
        let server = MockGatewayServer::start(MockConfig::default()).unwrap();
        let client = client_for(&server, Duration::from_secs(5));
        assert!(client.poll("", &creds()).is_err());
        assert!(server.requests().is_empty());
    }
}
