//! Runs a [TransferSession] on its own task, so transport callbacks arriving on any thread
//! reach the session one at a time.
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::presentation::channel::{ChannelAck, Transport};
use crate::presentation::device::TransferSession;
use crate::presentation::disclosure::RequestItems;
use crate::presentation::status::{ConsentDecision, Event, TransferStatus};

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("the transfer session has stopped")]
    Stopped,
}

pub enum Command {
    Event {
        event: Event,
        ack: Option<oneshot::Sender<ChannelAck>>,
    },
    Status(oneshot::Sender<TransferStatus>),
    Shutdown,
}

/// Posts events into a session without waiting for them to be applied.
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
    pub(crate) fn new(sender: mpsc::UnboundedSender<Event>) -> Self {
        Self(sender)
    }

    pub fn post(&self, event: Event) -> Result<(), Error> {
        self.0.send(event).map_err(|_| Error::Stopped)
    }
}

/// Answers one request. Dropping it without answering leaves the session waiting for the
/// reader or an idle timeout.
#[derive(Debug)]
pub struct ConsentResponder {
    sender: EventSender,
    cycle: u64,
}

impl ConsentResponder {
    pub(crate) fn new(sender: EventSender, cycle: u64) -> Self {
        Self { sender, cycle }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// `items` narrows the response, keyed by document type; `None` returns every valid item.
    pub fn respond(self, accepted: bool, items: Option<RequestItems>) {
        let decision = ConsentDecision {
            accepted,
            items,
            cycle: self.cycle,
        };
        if self.sender.post(Event::Consent(decision)).is_err() {
            tracing::warn!("consent arrived after the session stopped");
        }
    }
}

/// Owner-side handle of a spawned session.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: EventSender,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn spawn<T: Transport + 'static>(session: TransferSession<T>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let events = session.event_sender();
        let task = tokio::spawn(run(session, receiver));
        Self {
            commands,
            events,
            task,
        }
    }

    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Queue `event` behind everything already posted.
    pub fn post(&self, event: Event) -> Result<(), Error> {
        self.commands
            .send(Command::Event { event, ack: None })
            .map_err(|_| Error::Stopped)
    }

    /// Apply `event` and wait for the answer to give the reader.
    pub async fn send(&self, event: Event) -> Result<ChannelAck, Error> {
        let (ack, response) = oneshot::channel();
        self.commands
            .send(Command::Event {
                event,
                ack: Some(ack),
            })
            .map_err(|_| Error::Stopped)?;
        response.await.map_err(|_| Error::Stopped)
    }

    pub async fn status(&self) -> Result<TransferStatus, Error> {
        let (sender, response) = oneshot::channel();
        self.commands
            .send(Command::Status(sender))
            .map_err(|_| Error::Stopped)?;
        response.await.map_err(|_| Error::Stopped)
    }

    /// Stop the task once the commands already queued have been applied.
    pub async fn shutdown(self) -> Result<(), Error> {
        let _ = self.commands.send(Command::Shutdown);
        self.task.await.map_err(|_| Error::Stopped)
    }
}

async fn run<T: Transport>(
    mut session: TransferSession<T>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let idle = session.config().idle_timeout();
    loop {
        let exchanging = session.status().is_exchanging();
        let command = tokio::select! {
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
            Some(event) = session.next_posted() => Command::Event { event, ack: None },
            _ = tokio::time::sleep(idle), if exchanging => {
                tracing::info!(session_id = %session.id(), "reader went idle");
                Command::Event { event: Event::IdleTimeout, ack: None }
            }
        };

        match command {
            Command::Event { event, ack } => {
                let result = session.handle(event).await;
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            Command::Status(sender) => {
                let _ = sender.send(session.status());
            }
            Command::Shutdown => break,
        }
    }
    tracing::debug!(session_id = %session.id(), "session task stopped");
}
