//! Minimal RESP2 codec: encode commands, read one reply.
//!
//! Commands always go out as arrays of bulk strings, which is what makes an
//! empty argument (`AUTH ""`) expressible on the wire: `$0\r\n\r\n`.

use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::ProtocolError;

/// Longest bulk payload accepted from a server; replies here are tiny.
const MAX_BULK_LEN: i64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string (`$-1`)
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Simple(s) if s == "OK")
    }

    /// Wire-like rendering for transcripts.
    pub fn render(&self) -> String {
        match self {
            Reply::Simple(s) => format!("+{}", s),
            Reply::Error(e) => format!("-{}", e),
            Reply::Integer(i) => format!(":{}", i),
            Reply::Bulk(None) => "(nil)".to_string(),
            Reply::Bulk(Some(b)) => format!("\"{}\"", String::from_utf8_lossy(b)),
            Reply::Array(None) => "(nil array)".to_string(),
            Reply::Array(Some(items)) => {
                let parts: Vec<String> = items.iter().map(Reply::render).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, ProtocolError> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(ProtocolError::Closed);
    }
    if !line.ends_with(b"\r\n") {
        return Err(ProtocolError::Malformed(format!(
            "line not terminated by CRLF: {:?}",
            String::from_utf8_lossy(&line)
        )));
    }
    line.truncate(line.len() - 2);
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn parse_len(s: &str) -> Result<i64, ProtocolError> {
    s.parse::<i64>().map_err(|_| ProtocolError::Malformed(format!("bad length '{}'", s)))
}

/// Read exactly one reply, nested arrays included.
pub fn read_reply<'a, R>(reader: &'a mut R) -> Pin<Box<dyn Future<Output = Result<Reply, ProtocolError>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let mut chars = line.chars();
        let kind = chars.next().ok_or_else(|| ProtocolError::Malformed("empty reply line".into()))?;
        let rest = chars.as_str();

        match kind {
            '+' => Ok(Reply::Simple(rest.to_string())),
            '-' => Ok(Reply::Error(rest.to_string())),
            ':' => rest
                .parse::<i64>()
                .map(Reply::Integer)
                .map_err(|_| ProtocolError::Malformed(format!("bad integer '{}'", rest))),
            '$' => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                if len > MAX_BULK_LEN {
                    return Err(ProtocolError::Malformed(format!("bulk length {} too large", len)));
                }
                let mut buf = vec![0u8; len as usize + 2];
                reader.read_exact(&mut buf).await?;
                if !buf.ends_with(b"\r\n") {
                    return Err(ProtocolError::Malformed("bulk string not terminated by CRLF".into()));
                }
                buf.truncate(len as usize);
                Ok(Reply::Bulk(Some(buf)))
            }
            '*' => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len.min(64) as usize);
                for _ in 0..len {
                    items.push(read_reply(&mut *reader).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => Err(ProtocolError::Malformed(format!("unexpected reply type '{}' in {:?}", other, line))),
        }
    })
}
