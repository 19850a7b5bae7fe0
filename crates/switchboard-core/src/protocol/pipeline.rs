//! Serial command pipeline
//!
//! The switch speaks an unframed text protocol: an instruction is a line of
//! text and the reply is whatever bytes arrive until the link goes quiet.
//! Because replies carry no correlation id, only one instruction may be
//! outstanding at a time. [`Pipeline`] owns the link through a worker task
//! that queues submissions in FIFO order, dispatches the head once the link
//! is free and matches every silence-delimited burst to the in-flight task.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::{Command, LinkError, LinkIo, ProtocolError};

/// Bytes appended to every instruction
pub const INSTRUCTION_DELIMITER: &[u8] = b"\r\n";

/// Time an in-flight command may wait for its reply
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(100);

/// Inter-byte quiet period that ends a reply burst
pub const SILENCE_PERIOD: Duration = Duration::from_millis(25);

/// Largest reply burst; a device that never goes quiet is cut off here
pub const MAX_BURST_LEN: usize = 4096;

const READ_BUFFER_SIZE: usize = 512;

/// Pipeline timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Per-command reply timeout, counted from dispatch
    pub command_timeout: Duration,
    /// Quiet period that delimits a reply
    pub silence_period: Duration,
    /// Bytes after which a burst ends even without a quiet period
    pub max_burst_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_timeout: COMMAND_TIMEOUT,
            silence_period: SILENCE_PERIOD,
            max_burst_len: MAX_BURST_LEN,
        }
    }
}

type Reply = oneshot::Sender<Result<Vec<u8>, ProtocolError>>;

/// One submitted instruction waiting for its reply
struct Task {
    instruction: Vec<u8>,
    reply: Reply,
}

impl Task {
    fn complete(self, result: Result<Vec<u8>, ProtocolError>) {
        // The submitter may have given up waiting
        let _ = self.reply.send(result);
    }
}

struct InFlight {
    task: Task,
    deadline: Instant,
}

/// Handle to a running pipeline.
///
/// Dropping the last handle stops the worker and fails every pending command.
#[derive(Debug)]
pub struct Pipeline {
    tasks: mpsc::UnboundedSender<Task>,
    shutdown: CancellationToken,
}

/// Receiving side of the link error channel
pub type LinkErrors = mpsc::UnboundedReceiver<LinkError>;

impl Pipeline {
    /// Start a pipeline over `link` with default timing
    pub fn spawn<L>(link: L) -> (Self, LinkErrors)
    where
        L: LinkIo + 'static,
    {
        Self::with_config(link, PipelineConfig::default())
    }

    /// Start a pipeline over `link`.
    ///
    /// Must be called from within a tokio runtime. Link failures are reported
    /// once on the returned channel.
    pub fn with_config<L>(link: L, config: PipelineConfig) -> (Self, LinkErrors)
    where
        L: LinkIo + 'static,
    {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let (reader, writer) = tokio::io::split(link);
        let worker = Worker {
            reader,
            writer,
            config,
            queue: VecDeque::new(),
            in_flight: None,
            burst: Vec::new(),
            burst_deadline: None,
            errors: error_tx,
            link_failed: false,
        };
        tokio::spawn(worker.run(task_rx, shutdown.clone()));

        (
            Self {
                tasks: task_tx,
                shutdown,
            },
            error_rx,
        )
    }

    /// Queue `command` and wait for its decoded reply.
    ///
    /// Commands complete strictly in submission order. Fails with
    /// [`ProtocolError::Timeout`] when no reply arrives in time and with
    /// [`ProtocolError::NotConnected`] once the pipeline is closed.
    pub async fn submit<R>(&self, command: Command<R>) -> Result<R, ProtocolError> {
        let mut instruction = command.instruction().as_bytes().to_vec();
        instruction.extend_from_slice(INSTRUCTION_DELIMITER);

        let (reply, response) = oneshot::channel();
        self.tasks
            .send(Task { instruction, reply })
            .map_err(|_| ProtocolError::NotConnected)?;

        let burst = response.await.map_err(|_| ProtocolError::NotConnected)??;
        command.decode(&burst)
    }

    /// Stop the worker, failing the in-flight and queued commands
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// True once [`close`](Self::close) was called or the worker stopped
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tasks.is_closed()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Worker<L> {
    reader: ReadHalf<L>,
    writer: WriteHalf<L>,
    config: PipelineConfig,
    queue: VecDeque<Task>,
    in_flight: Option<InFlight>,
    burst: Vec<u8>,
    burst_deadline: Option<Instant>,
    errors: mpsc::UnboundedSender<LinkError>,
    link_failed: bool,
}

impl<L: LinkIo> Worker<L> {
    async fn run(mut self, mut tasks: mpsc::UnboundedReceiver<Task>, shutdown: CancellationToken) {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let burst_deadline = self.burst_deadline;
            let reply_deadline = self.in_flight.as_ref().map(|f| f.deadline);

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                read = self.reader.read(&mut buf), if !self.link_failed => match read {
                    Ok(0) => self.fail_link(LinkError::Eof),
                    Ok(n) => {
                        trace!("pipeline: read {} bytes: {:02x?}", n, &buf[..n]);
                        self.burst.extend_from_slice(&buf[..n]);
                        if self.burst.len() >= self.config.max_burst_len {
                            warn!(
                                "pipeline: no quiet period within {} bytes, ending burst",
                                self.burst.len()
                            );
                            self.complete_burst();
                            self.drain().await;
                        } else {
                            self.burst_deadline =
                                Some(Instant::now() + self.config.silence_period);
                        }
                    }
                    Err(e) => self.fail_link(LinkError::Read(e.to_string())),
                },

                _ = sleep_until_some(burst_deadline), if burst_deadline.is_some() => {
                    self.complete_burst();
                    self.drain().await;
                }

                _ = sleep_until_some(reply_deadline), if reply_deadline.is_some() => {
                    self.expire();
                    self.drain().await;
                }

                task = tasks.recv() => match task {
                    Some(task) => {
                        self.queue.push_back(task);
                        self.drain().await;
                    }
                    None => break,
                },
            }
        }

        self.fail_pending();
    }

    /// Dispatch the head of the queue if nothing is in flight
    async fn drain(&mut self) {
        if self.in_flight.is_some() {
            return;
        }

        while let Some(task) = self.queue.pop_front() {
            if task.reply.is_closed() {
                trace!("pipeline: skipping abandoned command");
                continue;
            }

            debug!(
                "pipeline: sending {:?}",
                String::from_utf8_lossy(&task.instruction).trim_end()
            );

            if !self.link_failed {
                let written = match self.writer.write_all(&task.instruction).await {
                    Ok(()) => self.writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    self.fail_link(LinkError::Write(e.to_string()));
                }
            }

            // A failed write still waits out its timeout; link failures are
            // reported on the error channel, not through the command
            self.in_flight = Some(InFlight {
                task,
                deadline: Instant::now() + self.config.command_timeout,
            });
            return;
        }
    }

    fn complete_burst(&mut self) {
        self.burst_deadline = None;
        let burst = std::mem::take(&mut self.burst);

        match self.in_flight.take() {
            Some(in_flight) => {
                debug!(
                    "pipeline: received {:?}",
                    String::from_utf8_lossy(&burst).trim_end()
                );
                in_flight.task.complete(Ok(burst));
            }
            None => {
                warn!(
                    "pipeline: discarding unsolicited {} byte reception: {:?}",
                    burst.len(),
                    String::from_utf8_lossy(&burst)
                );
            }
        }
    }

    fn expire(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            warn!(
                "pipeline: {:?} timed out after {}ms",
                String::from_utf8_lossy(&in_flight.task.instruction).trim_end(),
                self.config.command_timeout.as_millis()
            );
            in_flight.task.complete(Err(ProtocolError::Timeout));
        }
    }

    fn fail_link(&mut self, err: LinkError) {
        if self.link_failed {
            return;
        }
        error!("pipeline: {}", err);
        self.link_failed = true;
        let _ = self.errors.send(err);
    }

    fn fail_pending(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.complete(Err(ProtocolError::NotConnected));
        }
        for task in self.queue.drain(..) {
            task.complete(Err(ProtocolError::NotConnected));
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
