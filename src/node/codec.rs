//! Agent wire framing
//!
//! Every message, in both directions, is an HTTP-style header followed by a
//! JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Largest frame accepted from the agent; snapshots of big process trees can be large
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

fn eof_to_disconnect(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::AgentDisconnected
    } else {
        Error::Io(e)
    }
}

/// Read one frame from the stream
///
/// Parses the Content-Length header and reads the JSON body. A
/// [`Error::Protocol`] leaves the stream at the next frame; without a usable
/// Content-Length the frame boundary is lost and [`Error::FramingLost`] is
/// returned instead.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    read_frame(reader, MAX_FRAME_LEN).await
}

async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R, max_len: usize) -> Result<String, Error> {
    let mut content_length: Option<usize> = None;
    let mut bad_length: Option<String> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(eof_to_disconnect)?;

        if bytes_read == 0 {
            return Err(Error::AgentDisconnected);
        }

        // Empty line signals end of headers
        if line == "\r\n" || line == "\n" {
            break;
        }

        let line = line.trim();
        if let Some(value) = line.strip_prefix("Content-Length:") {
            match value.trim().parse() {
                Ok(len) => content_length = Some(len),
                Err(_) => bad_length = Some(value.trim().to_string()),
            }
        }
    }

    if let Some(value) = bad_length {
        return Err(Error::FramingLost(format!("invalid Content-Length: {}", value)));
    }
    let len = content_length
        .ok_or_else(|| Error::FramingLost("missing Content-Length header".to_string()))?;

    if len > max_len {
        let skipped = tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink())
            .await
            .map_err(eof_to_disconnect)?;
        if skipped < len as u64 {
            return Err(Error::AgentDisconnected);
        }
        return Err(Error::Protocol(format!("Frame too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_to_disconnect)?;

    String::from_utf8(body).map_err(|e| Error::Protocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one frame to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
