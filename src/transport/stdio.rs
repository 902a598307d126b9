//! Line-oriented stream transport.
//!
//! One request per line in, one response line out, strictly in order.
//! Serving ends normally at end of input or when the context is cancelled.

use std::io;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::rpc::{Response, RpcError};
use crate::transport::error::TransportError;
use crate::transport::{HandlerTarget, TransportBinding};

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct StdioTransport {
    max_line_bytes: usize,
    io: Mutex<Option<(Reader, Writer)>>,
}

impl StdioTransport {
    /// Serve on the process's stdin/stdout.
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            io: Mutex::new(None),
        }
    }

    /// Serve on arbitrary streams.
    pub fn with_io<R, W>(reader: R, writer: W, max_line_bytes: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            max_line_bytes,
            io: Mutex::new(Some((Box::new(BufReader::new(reader)), Box::new(writer)))),
        }
    }
}

enum Line {
    Complete,
    TooLong,
    Eof,
}

/// Read one line into `buf` (without the `\n` or `\r\n` terminator).
///
/// At most `max + 2` bytes are buffered, enough for a `max`-byte payload
/// plus `\r\n`; a longer line is skipped up to the next newline.
async fn read_line<R>(reader: &mut R, max: usize, buf: &mut Vec<u8>) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    buf.clear();
    let limit = max as u64 + 2;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Line::Eof);
    }

    let terminated = buf.last() == Some(&b'\n');
    if !terminated && read as u64 == limit {
        skip_past_newline(reader).await?;
        return Ok(Line::TooLong);
    }

    // A final line may end at EOF without a terminator.
    if terminated {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(if buf.len() > max { Line::TooLong } else { Line::Complete })
}

async fn skip_past_newline<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|byte| *byte == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[async_trait]
impl TransportBinding for StdioTransport {
    async fn serve(&self, ctx: CancellationToken, target: HandlerTarget) -> Result<(), TransportError> {
        let mut io = self.io.lock().await;
        let (reader, writer) = io.get_or_insert_with(|| {
            let reader: Reader = Box::new(BufReader::new(tokio::io::stdin()));
            let writer: Writer = Box::new(tokio::io::stdout());
            (reader, writer)
        });

        let mut buf = Vec::new();
        let mut handled: u64 = 0;
        loop {
            let line = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    tracing::info!(handled, "Stdio transport cancelled");
                    break;
                }
                line = read_line(reader, self.max_line_bytes, &mut buf) => line?,
            };

            let reply = match line {
                Line::Eof => {
                    tracing::info!(handled, "Stdio input closed");
                    break;
                }
                Line::TooLong => {
                    tracing::warn!(max_line_bytes = self.max_line_bytes, "Request line too long");
                    let err = RpcError::InvalidRequest(format!(
                        "request line exceeds {} bytes",
                        self.max_line_bytes
                    ));
                    Some(Response::failure(Value::Null, &err).to_json())
                }
                Line::Complete => match std::str::from_utf8(&buf) {
                    Ok(text) if text.trim().is_empty() => continue,
                    Ok(text) => {
                        handled += 1;
                        target.handle(text).await
                    }
                    Err(e) => {
                        let err = RpcError::Parse(format!("request is not valid UTF-8: {e}"));
                        Some(Response::failure(Value::Null, &err).to_json())
                    }
                },
            };

            if let Some(reply) = reply {
                write_line(writer, &reply).await?;
            }
        }

        Ok(())
    }
}
