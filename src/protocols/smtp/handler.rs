//! SMTP stub connection handler for the Tokio runtime.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::machine::SessionState;
use crate::sink::{Sink, CONNECTED, DISCONNECTED};

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Handle one SMTP client connection until QUIT, EOF or an I/O error.
///
/// Every line read is appended to `sink` verbatim before it is dispatched.
/// I/O errors end the session the same way a disconnect does, so nothing is
/// returned. The disconnect notice is appended exactly once, before the
/// stream is shut down.
pub async fn handle_connection<S>(mut stream: S, sink: &dyn Sink)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sink.append(CONNECTED.as_bytes());

    let mut state = SessionState::default();
    if let Err(e) = run_session(&mut stream, sink, &mut state).await {
        debug!(error = %e, ?state, "Connection error");
    }
    state = state.close().next;
    trace!(?state, "Session finished");

    sink.append(DISCONNECTED.as_bytes());

    if let Err(e) = stream.shutdown().await {
        trace!(error = %e, "Shutdown failed");
    }
}

async fn run_session<S>(
    stream: &mut S,
    sink: &dyn Sink,
    state: &mut SessionState,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = state.greet();
    if let Some(reply) = greeting.reply {
        stream.write_all(reply.as_bytes()).await?;
    }
    *state = greeting.next;

    let mut lines = LineReader::new();

    while !state.is_closed() {
        let Some(line) = lines.next_line(stream).await? else {
            trace!("Connection closed by client");
            return Ok(());
        };

        sink.append(&line);

        let transition = state.on_line(&line);
        trace!(from = ?state, to = ?transition.next, reply = ?transition.reply, "Processed line");
        *state = transition.next;

        if let Some(reply) = transition.reply {
            stream.write_all(reply.as_bytes()).await?;
        }
    }

    Ok(())
}

/// Splits a byte stream into `\n`-terminated lines.
struct LineReader {
    buffer: BytesMut,
}

impl LineReader {
    fn new() -> Self {
        LineReader {
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Next line with its terminator, or `None` at EOF.
    ///
    /// Bytes left without a `\n` when the peer closes are returned as a
    /// final line.
    async fn next_line<R>(&mut self, reader: &mut R) -> std::io::Result<Option<Bytes>>
    where
        R: AsyncRead + Unpin,
    {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buffer[searched..].iter().position(|&b| b == b'\n') {
                return Ok(Some(self.buffer.split_to(searched + pos + 1).freeze()));
            }
            searched = self.buffer.len();

            if self.buffer.capacity() == self.buffer.len() {
                self.buffer.reserve(BUFFER_SIZE);
            }

            let n = reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.buffer.split().freeze()));
            }
        }
    }
}
