//! Encoding and decoding for the subset of the RESP grammar the client speaks
//!
//! A request is an array of bulk strings; a reply is one of a simple string,
//! an error, a signed integer, or a length-prefixed bulk payload where a
//! length of `-1` denotes an absent value. All lines terminate with CRLF.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::CacheError;

const CRLF: &[u8] = b"\r\n";

/// A single decoded reply
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(String),
    Null,
}

/// Encodes a command as an array of bulk strings
pub(crate) fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(CRLF);
    }
    buf
}

/// Writes one command and reads the single reply it produces
pub(crate) async fn roundtrip(
    conn: &mut BufReader<TcpStream>,
    args: &[&str],
) -> Result<Reply, CacheError> {
    conn.get_mut().write_all(&encode_command(args)).await?;
    read_reply(conn).await
}

async fn read_reply(conn: &mut BufReader<TcpStream>) -> Result<Reply, CacheError> {
    let mut tag = [0u8; 1];
    conn.read_exact(&mut tag).await?;

    match tag[0] {
        b'+' => Ok(Reply::Simple(read_line(conn).await?)),
        b'-' => Ok(Reply::Error(read_line(conn).await?)),
        b':' => {
            let line = read_line(conn).await?;
            line.parse()
                .map(Reply::Integer)
                .map_err(|_| CacheError::Protocol(format!("bad integer reply {line:?}")))
        }
        b'$' => {
            let line = read_line(conn).await?;
            let len: i64 = line
                .parse()
                .map_err(|_| CacheError::Protocol(format!("bad bulk length {line:?}")))?;
            if len == -1 {
                return Ok(Reply::Null);
            }
            let len = usize::try_from(len)
                .map_err(|_| CacheError::Protocol(format!("bad bulk length {len}")))?;

            let mut buf = vec![0u8; len + 2];
            conn.read_exact(&mut buf).await?;
            if &buf[len..] != CRLF {
                return Err(CacheError::Protocol(
                    "bulk payload missing CRLF terminator".into(),
                ));
            }
            buf.truncate(len);
            String::from_utf8(buf)
                .map(Reply::Bulk)
                .map_err(|_| CacheError::Protocol("bulk payload is not valid UTF-8".into()))
        }
        other => Err(CacheError::Protocol(format!(
            "unsupported reply tag {:?}",
            other as char
        ))),
    }
}

async fn read_line(conn: &mut BufReader<TcpStream>) -> Result<String, CacheError> {
    let mut line = Vec::new();
    let n = conn.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(CacheError::Protocol("connection closed mid-reply".into()));
    }
    if !line.ends_with(CRLF) {
        return Err(CacheError::Protocol(
            "reply line missing CRLF terminator".into(),
        ));
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line).map_err(|_| CacheError::Protocol("reply line is not valid UTF-8".into()))
}
