//! Text codec for endpoint dumps.
//!
//! A dump is `endpoint\n` repeated once per known endpoint, in registry order. There is no
//! length prefix and no framing other than line breaks.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Encodes endpoints as a newline-delimited dump.
pub fn encode<S: AsRef<str>>(endpoints: &[S]) -> Bytes {
    let len = endpoints.iter().map(|e| e.as_ref().len() + 1).sum();
    let mut buf = BytesMut::with_capacity(len);
    for endpoint in endpoints {
        buf.put_slice(endpoint.as_ref().as_bytes());
        buf.put_u8(b'\n');
    }
    buf.freeze()
}

/// Reads a dump to the end, trimming each line and dropping blank ones.
///
/// Any read error, including a line that is not valid UTF-8, is returned as is; the caller
/// cannot trust anything else coming from the same stream.
pub async fn decode<R>(reader: R) -> io::Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut endpoints = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let endpoint = line.trim();
        if !endpoint.is_empty() {
            endpoints.push(endpoint.to_string());
        }
    }
    Ok(endpoints)
}
