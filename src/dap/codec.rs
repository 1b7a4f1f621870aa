//! Content-Length framing for adapter traffic
//!
//! Every message is a header block terminated by a blank line, then exactly
//! `Content-Length` bytes of UTF-8 JSON:
//! ```text
//! Content-Length: 13\r\n
//! \r\n
//! {"seq":1,...}
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Largest body accepted from an adapter
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length:";

/// A closed pipe means the adapter is gone
fn closed_pipe(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => Error::AdapterCrashed,
        _ => Error::Io(e),
    }
}

/// Consume one header block and return the body length it announces
async fn read_frame_header<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<usize, Error> {
    let mut length = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await.map_err(closed_pipe)? == 0 {
            return Err(Error::AdapterCrashed);
        }

        let header = line.trim();
        if header.is_empty() {
            break;
        }
        // Other headers (Content-Type) carry nothing we use
        if let Some(raw) = header.strip_prefix(CONTENT_LENGTH) {
            let raw = raw.trim();
            let parsed = raw.parse::<usize>().map_err(|_| {
                Error::DapProtocol(format!("adapter sent a bad body length '{}'", raw))
            })?;
            length = Some(parsed);
        }
    }

    let length = length
        .ok_or_else(|| Error::DapProtocol("adapter frame has no body length".to_string()))?;
    if length > MAX_MESSAGE_SIZE {
        return Err(Error::DapProtocol(format!(
            "adapter frame of {} bytes exceeds the {} byte limit",
            length, MAX_MESSAGE_SIZE
        )));
    }
    Ok(length)
}

/// Read the next framed body from the adapter's stdout
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    let length = read_frame_header(reader).await?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(closed_pipe)?;

    String::from_utf8(body)
        .map_err(|e| Error::DapProtocol(format!("adapter frame is not UTF-8: {}", e)))
}

/// Frame `json` and flush it to the adapter's stdin
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    let frame = format!("{} {}\r\n\r\n{}", CONTENT_LENGTH, json.len(), json);
    writer.write_all(frame.as_bytes()).await.map_err(closed_pipe)?;
    writer.flush().await.map_err(closed_pipe)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn reader(data: &[u8]) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut input = reader(b"Content-Length: 9\r\n\r\n{\"seq\":1}Content-Length: 9\r\n\r\n{\"seq\":2}");

        assert_eq!(read_message(&mut input).await.unwrap(), "{\"seq\":1}");
        assert_eq!(read_message(&mut input).await.unwrap(), "{\"seq\":2}");
        assert!(matches!(
            read_message(&mut input).await,
            Err(Error::AdapterCrashed)
        ));
    }

    #[tokio::test]
    async fn test_content_type_header_is_skipped() {
        let mut input =
            reader(b"Content-Type: application/vscode-jsonrpc\r\nContent-Length: 2\r\n\r\n{}");
        assert_eq!(read_message(&mut input).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_frame_without_length_is_a_protocol_error() {
        let mut input = reader(b"Content-Type: application/json\r\n\r\n{}");
        assert!(matches!(
            read_message(&mut input).await,
            Err(Error::DapProtocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected_before_reading() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        let mut input = reader(header.as_bytes());
        match read_message(&mut input).await {
            Err(Error::DapProtocol(message)) => assert!(message.contains("exceeds")),
            other => panic!("expected a protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_means_the_adapter_died() {
        let mut input = reader(b"Content-Length: 40\r\n\r\n{\"seq\":");
        assert!(matches!(
            read_message(&mut input).await,
            Err(Error::AdapterCrashed)
        ));
    }

    #[tokio::test]
    async fn test_write_frames_by_byte_length() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"name\":\"é\"}").await.unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Content-Length: 13\r\n\r\n{\"name\":\"é\"}"
        );
    }
}
