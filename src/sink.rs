//! Observation sink shared by every connection handler.
//!
//! Handlers report each raw client line and their connect/disconnect
//! lifecycle here. A single `append` call is never interleaved with
//! another one, so concurrent connections cannot tear each other's lines.

use std::io::{self, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tracing::{trace, warn};

/// Notice emitted when a client connection is accepted.
pub const CONNECTED: &str = "SERVER INFO: SMTP client connected!";

/// Notice emitted once when a client connection is closed.
pub const DISCONNECTED: &str = "SERVER INFO: SMTP client disconnected!";

/// Destination for observed lines.
///
/// Each call carries exactly one line, which implementations must keep
/// whole under concurrent callers.
pub trait Sink: Send + Sync {
    fn append(&self, line: &[u8]);
}

/// Sink writing lines to any `Write`, one whole line per lock.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink {
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl WriterSink<io::Stdout> {
    /// Sink on the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    /// Writes `line`, adding a newline only if it lacks one, then flushes.
    fn append(&self, line: &[u8]) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = write_line(&mut *writer, line) {
            warn!(error = %e, "Failed to write observed line");
        }
    }
}

/// Write `line` plus a newline if it has none, then flush.
fn write_line(out: &mut impl Write, line: &[u8]) -> io::Result<()> {
    out.write_all(line)?;
    if !line.ends_with(b"\n") {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Sink that hands lines to a dedicated writer thread.
///
/// `append` only enqueues, so a stalled inner sink (a full stdout pipe)
/// never blocks the caller. Lines reach the inner sink in enqueue order.
/// The writer thread exits once every clone of the sink is dropped.
#[derive(Debug, Clone)]
pub struct QueuedSink {
    queue: mpsc::Sender<Vec<u8>>,
}

impl QueuedSink {
    pub fn spawn(inner: Arc<dyn Sink>) -> io::Result<(Self, thread::JoinHandle<()>)> {
        let (queue, lines) = mpsc::channel::<Vec<u8>>();

        let writer = thread::Builder::new()
            .name("sink-writer".to_string())
            .spawn(move || {
                for line in lines {
                    inner.append(&line);
                }
                trace!("Sink writer finished");
            })?;

        Ok((QueuedSink { queue }, writer))
    }
}

impl Sink for QueuedSink {
    fn append(&self, line: &[u8]) {
        if self.queue.send(line.to_vec()).is_err() {
            warn!("Sink writer is gone, dropping observed line");
        }
    }
}

/// In-memory sink for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: std::sync::Mutex<Vec<Vec<u8>>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, as lossy UTF-8.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Number of appended lines equal to `text`.
    pub fn count(&self, text: &str) -> usize {
        self.lines().iter().filter(|line| *line == text).count()
    }
}

#[cfg(test)]
impl Sink for MemorySink {
    fn append(&self, line: &[u8]) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_preserves_bytes() {
        let sink = MemorySink::new();
        sink.append(b"HELO test\r\n");
        sink.append(CONNECTED.as_bytes());
        assert_eq!(sink.lines(), vec!["HELO test\r\n", CONNECTED]);
        assert_eq!(sink.count(CONNECTED), 1);
    }

    /// Split newline-terminated writer output into lines, without `\r\n`.
    fn whole_lines(output: &[u8]) -> Vec<String> {
        let text = String::from_utf8(output.to_vec()).unwrap();
        assert!(text.ends_with('\n'));
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_writer_sink_concurrent_appends_do_not_tear() {
        let sink = Arc::new(WriterSink::new(Vec::new()));
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for n in 0..200 {
                        if n % 2 == 0 {
                            sink.append(format!("worker {i} crlf line {n}\r\n").as_bytes());
                        } else {
                            sink.append(format!("worker {i} bare line {n}").as_bytes());
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let output = Arc::try_unwrap(sink).unwrap().into_inner();
        let lines = whole_lines(&output);
        assert_eq!(lines.len(), 1600);

        for i in 0..8 {
            for n in 0..200 {
                let expected = if n % 2 == 0 {
                    format!("worker {i} crlf line {n}")
                } else {
                    format!("worker {i} bare line {n}")
                };
                assert_eq!(lines.iter().filter(|line| **line == expected).count(), 1);
            }
        }

        // Lines from one worker keep their order.
        for i in 0..8 {
            let prefix = format!("worker {i} ");
            let numbers: Vec<usize> = lines
                .iter()
                .filter(|line| line.starts_with(&prefix))
                .map(|line| line.rsplit(' ').next().unwrap().parse().unwrap())
                .collect();
            assert_eq!(numbers, (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_queued_sink_preserves_order() {
        let memory = Arc::new(MemorySink::new());
        let (sink, writer) = QueuedSink::spawn(memory.clone()).unwrap();

        sink.append(CONNECTED.as_bytes());
        sink.append(b"HELO test\r\n");
        sink.append(DISCONNECTED.as_bytes());
        drop(sink);
        writer.join().unwrap();

        assert_eq!(memory.lines(), vec![CONNECTED, "HELO test\r\n", DISCONNECTED]);
    }

    /// Inner sink that holds every append until released.
    struct GatedSink {
        gate: Mutex<mpsc::Receiver<()>>,
        seen: MemorySink,
    }

    impl Sink for GatedSink {
        fn append(&self, line: &[u8]) {
            self.gate.lock().unwrap().recv().unwrap();
            self.seen.append(line);
        }
    }

    #[test]
    fn test_queued_sink_does_not_block_on_stalled_writer() {
        let (release, gate) = mpsc::channel();
        let inner = Arc::new(GatedSink {
            gate: Mutex::new(gate),
            seen: MemorySink::new(),
        });
        let (sink, writer) = QueuedSink::spawn(inner.clone()).unwrap();

        // Every append returns while the inner sink is stuck.
        for n in 0..100 {
            sink.append(format!("line {n}\r\n").as_bytes());
        }
        assert!(inner.seen.lines().is_empty());

        for _ in 0..100 {
            release.send(()).unwrap();
        }
        drop(sink);
        writer.join().unwrap();

        let expected: Vec<String> = (0..100).map(|n| format!("line {n}\r\n")).collect();
        assert_eq!(inner.seen.lines(), expected);
    }

    #[test]
    fn test_write_line_terminates_once() {
        let mut out = Vec::new();
        write_line(&mut out, b"QUIT\r\n").unwrap();
        write_line(&mut out, CONNECTED.as_bytes()).unwrap();
        write_line(&mut out, b"partial").unwrap();
        assert_eq!(
            out,
            b"QUIT\r\nSERVER INFO: SMTP client connected!\npartial\n".to_vec()
        );
    }
}
