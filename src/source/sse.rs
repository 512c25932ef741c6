//! # Server-Sent Events transport.
//!
//! - [`SseDecoder`] incremental `text/event-stream` parser, safe across chunk boundaries
//! - [`SseConnector`] [`Connector`] over an HTTP GET with a streamed body (`reqwest`)
//!
//! ## Framing rules
//! ```text
//! line endings: LF, CRLF or CR
//! ": comment"        ignored
//! "data: x"          appended to the data buffer (joined with '\n')
//! "event: name"      message type
//! "id: 42"           last event id (kept across messages, ignored if it contains NUL)
//! "retry: 3000"      reconnect hint (recorded, not enforced)
//! ""                 dispatch; nothing is dispatched if the data buffer is empty
//! ```

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue};

use crate::error::SourceError;
use crate::source::connector::{Connector, Frame, MessageStream};
use crate::source::event::RawMessage;

const LAST_EVENT_ID: &str = "last-event-id";

/// Default bound on one line and on one message's data, in bytes.
pub const DEFAULT_MAX_MESSAGE: usize = 1 << 20;

/// Incremental parser for the `text/event-stream` format.
///
/// Lines and message data are bounded. A message that exceeds the bound is
/// discarded as a whole and reported as [`SourceError::Malformed`]; an
/// oversized comment line is simply ignored.
#[derive(Debug)]
pub struct SseDecoder {
    line: Vec<u8>,
    line_overflow: bool,
    skip_lf: bool,
    started: bool,
    data: String,
    oversized: bool,
    event: Option<String>,
    last_id: Option<String>,
    retry: Option<Duration>,
    max_len: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_MESSAGE)
    }
}

impl SseDecoder {
    /// Creates a decoder bounded by [`DEFAULT_MAX_MESSAGE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder that rejects lines and messages over `max_len` bytes.
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            line: Vec::new(),
            line_overflow: false,
            skip_lf: false,
            started: false,
            data: String::new(),
            oversized: false,
            event: None,
            last_id: None,
            retry: None,
            max_len: max_len.max(1),
        }
    }

    /// Feeds a chunk and returns every message completed by it.
    ///
    /// Oversized messages come back as `Err(SourceError::Malformed)` in their
    /// place; decoding continues with the next message.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<RawMessage, SourceError>> {
        let mut out = Vec::new();
        for &b in chunk {
            match b {
                b'\n' if self.skip_lf => self.skip_lf = false,
                b'\r' | b'\n' => {
                    self.skip_lf = b == b'\r';
                    let line = std::mem::take(&mut self.line);
                    let overflow = std::mem::take(&mut self.line_overflow);
                    if let Some(msg) = self.process_line(&line, overflow) {
                        out.push(msg);
                    }
                }
                _ => {
                    self.skip_lf = false;
                    if self.line.len() < self.max_len {
                        self.line.push(b);
                    } else {
                        self.line_overflow = true;
                    }
                }
            }
        }
        out
    }

    /// Last `id` seen on this stream.
    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Last `retry` hint seen on this stream.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    fn process_line(
        &mut self,
        raw: &[u8],
        overflow: bool,
    ) -> Option<Result<RawMessage, SourceError>> {
        let mut line = String::from_utf8_lossy(raw).into_owned();
        if !self.started {
            self.started = true;
            if let Some(rest) = line.strip_prefix('\u{feff}') {
                line = rest.to_string();
            }
        }

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if overflow {
            self.oversized = true;
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line.as_str(), ""),
        };
        match field {
            "data" if self.data.len() + value.len() + 1 > self.max_len => self.oversized = true,
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Result<RawMessage, SourceError>> {
        let event = self.event.take().filter(|e| !e.is_empty());
        if std::mem::take(&mut self.oversized) {
            self.data.clear();
            return Some(Err(SourceError::Malformed {
                reason: format!("message exceeds {} bytes", self.max_len),
            }));
        }
        if self.data.is_empty() {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        Some(Ok(RawMessage {
            event,
            id: self.last_id.clone(),
            data,
        }))
    }
}

/// Turns a streamed HTTP body into framed messages.
///
/// A chunk that completes no message (keepalive comment, partial message)
/// yields [`Frame::KeepAlive`]. A body error yields one `ConnectionLost` item
/// and ends the stream.
pub fn decode_body<S, E>(body: S) -> MessageStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (Box::pin(body), SseDecoder::new(), VecDeque::new(), false);
    stream::unfold(state, |(mut body, mut dec, mut pending, mut done)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (body, dec, pending, done)));
            }
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => {
                    let items = dec.feed(&chunk);
                    if items.is_empty() {
                        pending.push_back(Ok(Frame::KeepAlive));
                    }
                    pending.extend(items.into_iter().map(|r| r.map(Frame::Message)));
                }
                Some(Err(e)) => {
                    done = true;
                    pending.push_back(Err(SourceError::lost(e)));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

/// [`Connector`] for an SSE endpoint over HTTP(S).
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: reqwest::Client,
    url: reqwest::Url,
    headers: HeaderMap,
}

impl SseConnector {
    /// Creates a connector for `url`.
    ///
    /// Fails with [`SourceError::InvalidEndpoint`] unless `url` is an absolute
    /// `http` or `https` URL.
    pub fn new(url: &str) -> Result<Self, SourceError> {
        let url = reqwest::Url::parse(url).map_err(|e| SourceError::InvalidEndpoint {
            reason: format!("{url}: {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::InvalidEndpoint {
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            headers: HeaderMap::new(),
        })
    }

    /// Uses a preconfigured client (timeouts, proxies, TLS roots).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Adds a header sent with every connect (e.g. `authorization`).
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, SourceError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            SourceError::InvalidEndpoint {
                reason: format!("header name {name:?}: {e}"),
            }
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| SourceError::InvalidEndpoint {
            reason: format!("header value for {name}: {e}"),
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Endpoint this connector reads from.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn connect(&self, resume: Option<&str>) -> Result<MessageStream, SourceError> {
        let mut req = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = resume {
            req = req.header(LAST_EVENT_ID, id);
        }

        let resp = req.send().await.map_err(SourceError::connect)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::connect(format!("unexpected status {status}")));
        }
        Ok(decode_body(resp.bytes_stream()))
    }

    fn name(&self) -> &str {
        self.url.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn feed_all(chunks: &[&str]) -> Vec<RawMessage> {
        let mut dec = SseDecoder::new();
        chunks
            .iter()
            .flat_map(|c| dec.feed(c.as_bytes()))
            .map(|r| r.expect("well-formed"))
            .collect()
    }

    /// Serves one canned response per accepted connection and returns the
    /// lowercased request heads it saw.
    async fn serve(responses: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut heads = Vec::new();
            for resp in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = sock.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                heads.push(String::from_utf8_lossy(&head).to_lowercase());
                sock.write_all(resp.as_bytes()).await.unwrap();
                sock.shutdown().await.unwrap();
            }
            heads
        });
        (format!("http://{addr}/events"), server)
    }

    #[test]
    fn single_message() {
        let got = feed_all(&["data: {\"a\":1}\n\n"]);
        assert_eq!(got, vec![RawMessage::data("{\"a\":1}")]);
    }

    #[test]
    fn multiline_data_joined_with_newline() {
        let got = feed_all(&["data: one\ndata: two\n\n"]);
        assert_eq!(got[0].data, "one\ntwo");
    }

    #[test]
    fn split_across_chunks_and_crlf() {
        let got = feed_all(&["da", "ta: x\r", "\n", "\r\n", "data:y\r\r"]);
        assert_eq!(got, vec![RawMessage::data("x"), RawMessage::data("y")]);
    }

    #[test]
    fn comments_and_unknown_fields_ignored() {
        let got = feed_all(&[": keepalive\n\nfoo: bar\ndata: z\n\n"]);
        assert_eq!(got, vec![RawMessage::data("z")]);
    }

    #[test]
    fn event_and_id_attached_and_id_persists() {
        let got = feed_all(&["event: push\nid: 7\ndata: a\n\ndata: b\n\n"]);
        assert_eq!(got[0], RawMessage::data("a").with_event("push").with_id("7"));
        assert_eq!(got[1], RawMessage::data("b").with_id("7"));
    }

    #[test]
    fn empty_data_not_dispatched() {
        let got = feed_all(&["event: ping\n\n", "id: 3\n\n"]);
        assert!(got.is_empty());
    }

    #[test]
    fn retry_and_bom() {
        let mut dec = SseDecoder::new();
        let got = dec.feed("\u{feff}retry: 2500\ndata: q\n\n".as_bytes());
        assert_eq!(got, vec![Ok(RawMessage::data("q"))]);
        assert_eq!(dec.retry(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn id_with_nul_ignored() {
        let mut dec = SseDecoder::new();
        dec.feed(b"id: 1\nid: a\0b\n\n");
        assert_eq!(dec.last_id(), Some("1"));
    }

    #[test]
    fn oversized_messages_are_rejected_and_decoding_continues() {
        let mut dec = SseDecoder::with_limit(16);
        let long_line = format!("data: {}\n\n", "x".repeat(64));
        let got = dec.feed(long_line.as_bytes());
        assert!(matches!(got.as_slice(), [Err(SourceError::Malformed { .. })]));

        // Many short lines that add up past the bound.
        let got = dec.feed(b"data: 12345\ndata: 67890\ndata: abcde\n\n");
        assert!(matches!(got.as_slice(), [Err(SourceError::Malformed { .. })]));

        let comment = format!(": {}\n", "p".repeat(64));
        let mut got = dec.feed(comment.as_bytes());
        got.extend(dec.feed(b"data: ok\n\n"));
        assert_eq!(got, vec![Ok(RawMessage::data("ok"))]);
    }

    #[tokio::test]
    async fn body_error_ends_with_connection_lost() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: 1\n\ndata: 2")),
            Err("reset by peer".to_string()),
            Ok(Bytes::from_static(b"\n\n")),
        ];
        let items: Vec<_> = decode_body(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(Frame::Message(RawMessage::data("1"))));
        assert!(matches!(items[1], Err(SourceError::ConnectionLost { .. })));
    }

    #[tokio::test]
    async fn chunks_without_a_message_are_keepalives() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b": ping\n\n")),
            Ok(Bytes::from_static(b"data: ha")),
            Ok(Bytes::from_static(b"lf\n\n")),
        ];
        let items: Vec<_> = decode_body(stream::iter(chunks)).collect().await;
        assert_eq!(
            items,
            vec![
                Ok(Frame::KeepAlive),
                Ok(Frame::KeepAlive),
                Ok(Frame::Message(RawMessage::data("half"))),
            ]
        );
    }

    #[tokio::test]
    async fn connector_sends_sse_headers_and_resume_id() {
        let (url, server) = serve(vec![
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n\
             id: 7\ndata: {\"n\":1}\n\n",
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        ])
        .await;
        let conn = SseConnector::new(&url)
            .and_then(|c| c.with_header("authorization", "Bearer t"))
            .expect("valid connector");

        let body = conn.connect(None).await.expect("200 must connect");
        let messages: Vec<RawMessage> = body
            .filter_map(|item| async move {
                match item {
                    Ok(Frame::Message(m)) => Some(m),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(messages, vec![RawMessage::data("{\"n\":1}").with_id("7")]);

        match conn.connect(Some("7")).await {
            Err(e) => assert_eq!(e.as_label(), "source_connect"),
            Ok(_) => panic!("a 503 response must be rejected"),
        }

        let heads = server.await.unwrap();
        assert!(heads[0].starts_with("get /events "));
        assert!(heads[0].contains("accept: text/event-stream"));
        assert!(heads[0].contains("authorization: bearer t"));
        assert!(!heads[0].contains("last-event-id"));
        assert!(heads[1].contains("last-event-id: 7"));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(SseConnector::new("ftp://example.com/feed").is_err());
        assert!(SseConnector::new("not a url").is_err());
        let c = SseConnector::new("https://example.com/stream").expect("valid");
        assert_eq!(c.url().path(), "/stream");
    }

    #[test]
    fn header_validation() {
        let c = SseConnector::new("http://localhost/s").expect("valid");
        assert!(c.clone().with_header("authorization", "Bearer t").is_ok());
        assert!(c.with_header("bad header", "x").is_err());
    }
}
