use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::{StorageBackend, StoreError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Networked primary backend speaking RESP2 over a single TCP connection.
///
/// Only the commands the store needs are implemented (PING, SET [EX], GET,
/// DEL, EXISTS, KEYS, INCRBY, HSET, HGET, HGETALL). Structured values are
/// serialized to JSON text on the wire and re-parsed on read; plain strings
/// pass through untouched. A broken connection is dropped on error and
/// redialed on the next call.
pub struct RemoteBackend {
    addr: String,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl RemoteBackend {
    /// `addr` is a `host:port` pair.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn dial(&self) -> Result<BufStream<TcpStream>, StoreError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| StoreError::Connection(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| StoreError::Connection(format!("connect to {}: {e}", self.addr)))?;
        debug!(addr = %self.addr, "connected to primary store");
        Ok(BufStream::new(stream))
    }

    /// Send one command and read its reply, reconnecting lazily.
    async fn command(&self, parts: &[&str]) -> Result<Reply, StoreError> {
        let mut guard = self.conn.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.dial().await?,
        };

        let result = timeout(IO_TIMEOUT, async {
            stream.write_all(&encode_command(parts)).await?;
            stream.flush().await?;
            read_reply(&mut stream).await
        })
        .await
        .map_err(|_| StoreError::Io("request timed out".to_string()))
        .and_then(|r| r);

        match result {
            Ok(reply) => {
                // Connection still healthy, keep it for the next call.
                *guard = Some(stream);
                Ok(reply)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        self.command(&["PING"]).await?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &Value, expire: Option<u64>) -> Result<(), StoreError> {
        let encoded = encode_value(value);
        match expire {
            Some(secs) => {
                self.command(&["SET", key, &encoded, "EX", &secs.to_string()])
                    .await?
            }
            None => self.command(&["SET", key, &encoded]).await?,
        };
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.command(&["GET", key]).await? {
            Reply::Bulk(Some(raw)) => Ok(Some(decode_value(&raw))),
            Reply::Bulk(None) => Ok(None),
            other => Err(other.unexpected("GET")),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.command(&["DEL", key]).await?.integer("DEL")? > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.command(&["EXISTS", key]).await?.integer("EXISTS")? > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let items = self.command(&["KEYS", pattern]).await?.array("KEYS")?;
        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            if let Reply::Bulk(Some(key)) = item {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        self.command(&["INCRBY", key, &amount.to_string()])
            .await?
            .integer("INCRBY")
    }

    async fn set_hash(&self, key: &str, field: &str, value: &Value) -> Result<(), StoreError> {
        let encoded = encode_value(value);
        self.command(&["HSET", key, field, &encoded]).await?;
        Ok(())
    }

    async fn get_hash(&self, key: &str, field: &str) -> Result<Option<Value>, StoreError> {
        match self.command(&["HGET", key, field]).await? {
            Reply::Bulk(Some(raw)) => Ok(Some(decode_value(&raw))),
            Reply::Bulk(None) => Ok(None),
            other => Err(other.unexpected("HGET")),
        }
    }

    async fn get_all_hash(&self, key: &str) -> Result<Map<String, Value>, StoreError> {
        let items = self.command(&["HGETALL", key]).await?.array("HGETALL")?;
        let mut map = Map::new();
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            if let (Reply::Bulk(Some(field)), Reply::Bulk(Some(raw))) = (field, value) {
                map.insert(field, decode_value(&raw));
            }
        }
        Ok(map)
    }
}

// ============================================================================
// Wire encoding
// ============================================================================

/// One parsed RESP reply. Protocol-level `-ERR` lines surface as
/// [`StoreError::Protocol`] during parsing instead of a variant here.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Simple(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Vec<Reply>),
}

impl Reply {
    fn integer(self, cmd: &str) -> Result<i64, StoreError> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(other.unexpected(cmd)),
        }
    }

    fn array(self, cmd: &str) -> Result<Vec<Reply>, StoreError> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(other.unexpected(cmd)),
        }
    }

    fn unexpected(&self, cmd: &str) -> StoreError {
        StoreError::Protocol(format!("unexpected reply to {cmd}: {self:?}"))
    }
}

/// Encode a command as a RESP array of bulk strings.
fn encode_command(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_line<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<String, StoreError> {
    let mut line = String::new();
    let n = r.read_line(&mut line).await?;
    if n == 0 {
        return Err(StoreError::Io("connection closed".to_string()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

async fn read_reply<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<Reply, StoreError> {
    let line = read_line(r).await?;
    let Some(kind) = line.chars().next() else {
        return Err(StoreError::Protocol("empty reply line".to_string()));
    };
    let rest = line.get(1..).unwrap_or("");

    match kind {
        '+' => Ok(Reply::Simple(rest.to_string())),
        '-' => Err(StoreError::Protocol(rest.to_string())),
        ':' => rest
            .parse()
            .map(Reply::Integer)
            .map_err(|_| StoreError::Protocol(format!("bad integer reply: {rest}"))),
        '$' => read_bulk(r, rest).await,
        '*' => {
            let count: i64 = rest
                .parse()
                .map_err(|_| StoreError::Protocol(format!("bad array header: {rest}")))?;
            if count < 0 {
                return Ok(Reply::Array(Vec::new()));
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                // Replies we consume only ever nest scalars inside arrays.
                let line = read_line(r).await?;
                let item = match (line.chars().next(), line.get(1..).unwrap_or("")) {
                    (Some('$'), header) => read_bulk(r, header).await?,
                    (Some(':'), n) => Reply::Integer(n.parse().map_err(|_| {
                        StoreError::Protocol(format!("bad integer reply: {n}"))
                    })?),
                    (Some('+'), s) => Reply::Simple(s.to_string()),
                    _ => {
                        return Err(StoreError::Protocol(format!(
                            "unsupported array element: {line}"
                        )));
                    }
                };
                items.push(item);
            }
            Ok(Reply::Array(items))
        }
        other => Err(StoreError::Protocol(format!("unknown reply type: {other}"))),
    }
}

async fn read_bulk<R: AsyncBufRead + Unpin>(r: &mut R, header: &str) -> Result<Reply, StoreError> {
    let len: i64 = header
        .parse()
        .map_err(|_| StoreError::Protocol(format!("bad bulk header: {header}")))?;
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }

    let mut buf = vec![0u8; len as usize + 2];
    r.read_exact(&mut buf).await?;
    buf.truncate(len as usize);
    String::from_utf8(buf)
        .map(|s| Reply::Bulk(Some(s)))
        .map_err(|_| StoreError::Protocol("bulk string is not utf-8".to_string()))
}

/// Strings travel raw; everything else travels as JSON text.
fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Inverse of [`encode_value`]: try JSON first, fall back to a raw string.
fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_set_command() {
        let bytes = encode_command(&["SET", "k", "v"]);
        assert_eq!(bytes, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn parse_simple_reply() {
        let mut input = &b"+PONG\r\n"[..];
        assert_eq!(
            read_reply(&mut input).await.unwrap(),
            Reply::Simple("PONG".to_string())
        );
    }

    #[tokio::test]
    async fn parse_integer_reply() {
        let mut input = &b":42\r\n"[..];
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Integer(42));
    }

    #[tokio::test]
    async fn parse_bulk_and_null_bulk() {
        let mut input = &b"$5\r\nhello\r\n"[..];
        assert_eq!(
            read_reply(&mut input).await.unwrap(),
            Reply::Bulk(Some("hello".to_string()))
        );

        let mut input = &b"$-1\r\n"[..];
        assert_eq!(read_reply(&mut input).await.unwrap(), Reply::Bulk(None));
    }

    #[tokio::test]
    async fn parse_array_of_bulks() {
        let mut input = &b"*2\r\n$1\r\na\r\n$1\r\nb\r\n"[..];
        assert_eq!(
            read_reply(&mut input).await.unwrap(),
            Reply::Array(vec![
                Reply::Bulk(Some("a".to_string())),
                Reply::Bulk(Some("b".to_string())),
            ])
        );
    }

    #[tokio::test]
    async fn error_reply_surfaces_as_protocol_error() {
        let mut input = &b"-ERR unknown command\r\n"[..];
        match read_reply(&mut input).await {
            Err(StoreError::Protocol(msg)) => assert!(msg.contains("unknown command")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_reply_is_io_error() {
        let mut input = &b""[..];
        assert!(matches!(
            read_reply(&mut input).await,
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn value_encoding_roundtrip() {
        // Structured values travel as JSON and parse back.
        let value = json!({"a": [1, 2]});
        assert_eq!(decode_value(&encode_value(&value)), value);

        // Plain strings travel raw and stay strings.
        let value = json!("just text");
        assert_eq!(encode_value(&value), "just text");
        assert_eq!(decode_value("just text"), value);

        // Counter reads parse as numbers.
        assert_eq!(decode_value("7"), json!(7));
    }
}
