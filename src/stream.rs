//! Command streaming over stdin/stdout
//!
//! One JSON [`Request`] per input line, one JSON [`Response`] per output line.
//! Blank lines and `#` comments are skipped. Unparseable lines get a failed
//! response instead of ending the stream.

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::time::Duration;
use tracing::{debug, error, info};

use crate::interface::ControlInterface;
use crate::messages::{Request, Response};
use crate::signal::ShutdownSignal;
use crate::Result;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct CommandStream<R, W> {
    interface: ControlInterface,
    lines: Lines<R>,
    writer: W,
    shutdown: ShutdownSignal,
    stats: StreamStats,
}

impl CommandStream<BufReader<Stdin>, Stdout> {
    pub fn stdio(interface: ControlInterface, shutdown: ShutdownSignal) -> Self {
        Self::new(interface, BufReader::new(io::stdin()), io::stdout(), shutdown)
    }
}

impl<R, W> CommandStream<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(interface: ControlInterface, reader: R, writer: W, shutdown: ShutdownSignal) -> Self {
        Self {
            interface,
            lines: reader.lines(),
            writer,
            shutdown,
            stats: StreamStats::default(),
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Process requests until end of input or shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!("Command stream active, one JSON request per line");
        let mut poll = tokio::time::interval(SHUTDOWN_POLL);

        // next_line is cancel-safe: a partial line survives the shutdown poll winning the race.
        loop {
            tokio::select! {
                read = self.lines.next_line() => {
                    match read {
                        Ok(None) => {
                            info!("End of input reached");
                            break;
                        }
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() || line.starts_with('#') {
                                continue;
                            }
                            let response = self.process_line(line).await;
                            self.write_response(&response).await?;
                        }
                        Err(e) => {
                            error!("Failed to read command input: {}", e);
                            return Err(e.into());
                        }
                    }
                }
                _ = poll.tick() => {
                    if self.shutdown.is_triggered() {
                        info!("Command stream interrupted by shutdown");
                        break;
                    }
                }
            }
        }
        debug!("Command stream stats: {:?}", self.stats);
        Ok(())
    }

    async fn process_line(&mut self, line: &str) -> Response {
        self.stats.received += 1;
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!("Received {} request", request.name());
                self.interface.handle(request).await
            }
            Err(e) => Response::failed("invalid", format!("Invalid request: {}", e)),
        };
        if response.success {
            self.stats.succeeded += 1;
        } else {
            self.stats.failed += 1;
        }
        response
    }

    async fn write_response(&mut self, response: &Response) -> Result<()> {
        let mut line = serde_json::to_string(response)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
