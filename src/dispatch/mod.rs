//! Ordered command dispatch with reply correlation.
//!
//! All commands of a session go through one queue and one dispatch loop, so
//! lines hit the wire in submission order and at most one command waits for
//! its reply at any time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{Command, ResponseTag};
use crate::transport::Transport;

/// Default time to wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type Reply = oneshot::Sender<Result<Option<String>>>;

/// A command waiting for the dispatch loop.
pub(crate) struct Queued {
    command: Command,
    reply: Option<Reply>,
}

impl Queued {
    pub(crate) const fn command(&self) -> &Command {
        &self.command
    }
}

/// Submission side of a session's command queue.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Queued>,
}

impl CommandQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Queued>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a command without waiting for its outcome.
    ///
    /// A command with an expected keyword still holds the in-flight slot
    /// until its reply arrives or times out.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.tx
            .send(Queued {
                command,
                reply: None,
            })
            .map_err(|_| Error::NotConnected)
    }

    /// Queues a command and waits for the line carrying its keyword.
    ///
    /// # Errors
    ///
    /// `Device` when the firmware answers with an error line, `Timeout` when
    /// no reply arrives in time, a transport error when the link fails, and
    /// `NotConnected` when the session goes away first.
    pub async fn request(&self, command: Command) -> Result<String> {
        if command.expected_keyword().is_none() {
            return Err(Error::InvalidArgument {
                reason: format!("`{command}` has no reply keyword to wait for"),
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Queued {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|_| Error::NotConnected)?;

        let reply = reply_rx.await.map_err(|_| Error::NotConnected)??;
        reply.ok_or(Error::ChannelClosed)
    }
}

/// Drains a [`CommandQueue`] onto a transport.
pub(crate) struct Dispatcher<T> {
    transport: Arc<Mutex<T>>,
    events: EventDispatcher,
    timeout: Duration,
}

impl<T: Transport> Dispatcher<T> {
    pub(crate) const fn new(
        transport: Arc<Mutex<T>>,
        events: EventDispatcher,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            events,
            timeout,
        }
    }

    /// Runs until the queue closes or the link fails.
    ///
    /// # Errors
    ///
    /// Returns a transport error when writing fails or the link is lost
    /// while waiting for a reply.
    pub(crate) async fn run(self, mut rx: mpsc::UnboundedReceiver<Queued>) -> Result<()> {
        while let Some(Queued { command, reply }) = rx.recv().await {
            let result = self.send_and_wait(&command).await;

            let fatal = match &result {
                Err(e) if e.is_transport() => Some(e.to_string()),
                _ => None,
            };

            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        tracing::warn!("command `{}` failed: {}", command, e);
                    }
                }
            }

            if let Some(reason) = fatal {
                return Err(Error::Transport { reason });
            }
        }
        Ok(())
    }

    /// Sends one command and waits for its reply, if it has one.
    async fn send_and_wait(&self, command: &Command) -> Result<Option<String>> {
        // Subscribe before writing so a fast reply is not missed.
        let mut subscription = self.events.subscribe();

        if command.is_rtc_poll() {
            tracing::trace!("tx: {}", command);
        } else {
            tracing::debug!("tx: {}", command);
        }
        {
            let mut transport = self.transport.lock().await;
            transport.send_line(command.text().to_string()).await?;
        }
        self.events.dispatch(Event::CommandSent {
            text: command.text().to_string(),
        });

        if command.expected_keyword().is_none() {
            return Ok(None);
        }

        let timeout = self.timeout;
        tokio::select! {
            biased;
            result = async {
                while let Some(event) = subscription.recv().await {
                    match event {
                        Event::Line { tag: ResponseTag::Error, text } => {
                            return Err(Error::Device { message: text });
                        }
                        Event::Line { text, .. } if command.is_reply(&text) => {
                            return Ok(Some(text));
                        }
                        Event::Line { text, .. } => {
                            tracing::debug!("`{}` awaiting reply, skipping: {}", command, text);
                        }
                        Event::TransportLost { reason } => {
                            return Err(Error::Transport { reason });
                        }
                        _ => {}
                    }
                }
                Err(Error::ChannelClosed)
            } => result,
            () = tokio::time::sleep(timeout) => Err(Error::timeout(timeout)),
        }
    }
}
