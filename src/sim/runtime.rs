//! Agent runtime: turns coordinator messages into entity calls and replies.
//!
//! [`AgentRuntime`] is transport-free. [`InlineLink`] runs it on the caller's
//! thread, [`ThreadedLink`] on a dedicated OS thread behind a pair of
//! channels.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, warn};

use crate::entities::{EntityKind, SmartGridEntity};
use crate::error::PlanningError;
use crate::protocol::{AgentId, AgentMessage, CoordinatorMessage, Envelope, MessageKind};

/// What an agent produced for one incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Reply(Envelope),
    /// The message needed no answer, or was malformed and dropped.
    Silent,
    /// `STOP` was received; the agent handles nothing more.
    Stopped,
}

/// Wraps an entity and applies the message protocol to it.
#[derive(Debug)]
pub struct AgentRuntime<E: SmartGridEntity> {
    entity: E,
    stopped: bool,
}

impl<E: SmartGridEntity> AgentRuntime<E> {
    pub fn new(entity: E) -> Self {
        Self {
            entity,
            stopped: false,
        }
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Handles one message.
    ///
    /// A real-time step answers with the entity's report and then advances
    /// its clock. A planning reply is sent only when the entity has one.
    ///
    /// # Errors
    ///
    /// Optimizer failures are returned to the caller. Malformed planning
    /// messages are logged and dropped.
    pub fn handle(&mut self, message: &CoordinatorMessage) -> Result<AgentOutput, PlanningError> {
        if self.stopped {
            return Ok(AgentOutput::Stopped);
        }
        let id = self.entity.id();
        let timestamp = self.entity.clock().now();
        match message {
            CoordinatorMessage::NewConnection => Ok(AgentOutput::Reply(Envelope {
                sender: id,
                kind: MessageKind::NewConnection,
                timestamp,
                data: AgentMessage::Registration {},
            })),
            CoordinatorMessage::NextSimuStep(payload) => {
                let report = self.entity.real_time_step(payload);
                self.entity.advance_time();
                Ok(AgentOutput::Reply(Envelope {
                    sender: id,
                    kind: MessageKind::NextSimuStep,
                    timestamp,
                    data: AgentMessage::RealTime(report),
                }))
            }
            CoordinatorMessage::PlanningSignal(payload) => {
                match self.entity.planning_step(payload) {
                    Ok(Some(reply)) => Ok(AgentOutput::Reply(Envelope {
                        sender: id,
                        kind: MessageKind::PlanningSignal,
                        timestamp,
                        data: AgentMessage::Planning(reply),
                    })),
                    Ok(None) => Ok(AgentOutput::Silent),
                    Err(PlanningError::MalformedMessage(reason)) => {
                        warn!(agent = id, %reason, "dropping malformed planning message");
                        Ok(AgentOutput::Silent)
                    }
                    Err(e) => Err(e),
                }
            }
            CoordinatorMessage::Stop => {
                debug!(agent = id, "stopping");
                self.stopped = true;
                Ok(AgentOutput::Stopped)
            }
        }
    }
}

/// The coordinator's handle on one agent.
pub trait AgentLink {
    fn id(&self) -> AgentId;

    fn kind(&self) -> EntityKind;

    /// Delivers a message and waits for the agent's output.
    ///
    /// # Errors
    ///
    /// Propagates the agent's planning failure, or
    /// [`PlanningError::AgentGone`] when the agent can no longer be reached.
    fn request(&mut self, message: CoordinatorMessage) -> Result<AgentOutput, PlanningError>;
}

/// Runs an agent on the caller's thread.
#[derive(Debug)]
pub struct InlineLink<E: SmartGridEntity> {
    runtime: AgentRuntime<E>,
}

impl<E: SmartGridEntity> InlineLink<E> {
    pub fn new(entity: E) -> Self {
        Self {
            runtime: AgentRuntime::new(entity),
        }
    }

    pub fn entity(&self) -> &E {
        self.runtime.entity()
    }
}

impl<E: SmartGridEntity> AgentLink for InlineLink<E> {
    fn id(&self) -> AgentId {
        self.runtime.entity().id()
    }

    fn kind(&self) -> EntityKind {
        self.runtime.entity().kind()
    }

    fn request(&mut self, message: CoordinatorMessage) -> Result<AgentOutput, PlanningError> {
        self.runtime.handle(&message)
    }
}

type AgentResult = Result<AgentOutput, PlanningError>;

/// Runs an agent on its own OS thread.
///
/// The thread owns the entity and lives until `STOP` is handled or the
/// link is dropped.
#[derive(Debug)]
pub struct ThreadedLink {
    id: AgentId,
    kind: EntityKind,
    requests: Option<Sender<CoordinatorMessage>>,
    replies: Receiver<AgentResult>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadedLink {
    pub fn spawn<E>(entity: E) -> Self
    where
        E: SmartGridEntity + Send + 'static,
    {
        let id = entity.id();
        let kind = entity.kind();
        let (request_tx, request_rx) = unbounded::<CoordinatorMessage>();
        let (reply_tx, reply_rx) = bounded::<AgentResult>(1);
        let handle = thread::Builder::new()
            .name(format!("{kind}-{id}"))
            .spawn(move || {
                let mut runtime = AgentRuntime::new(entity);
                for message in request_rx {
                    let output = runtime.handle(&message);
                    if reply_tx.send(output).is_err() || runtime.is_stopped() {
                        break;
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(agent = id, error = %e, "could not spawn agent thread");
                None
            }
        };
        Self {
            id,
            kind,
            requests: Some(request_tx),
            replies: reply_rx,
            handle,
        }
    }
}

impl AgentLink for ThreadedLink {
    fn id(&self) -> AgentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn request(&mut self, message: CoordinatorMessage) -> Result<AgentOutput, PlanningError> {
        let id = self.id;
        let gone = move || PlanningError::AgentGone(id);
        let requests = self.requests.as_ref().ok_or_else(gone)?;
        requests.send(message).map_err(|_| gone())?;
        self.replies.recv().map_err(|_| gone())?
    }
}

impl Drop for ThreadedLink {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(agent = self.id, "agent thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MicrogridManager;
    use crate::forecast::SECONDS_PER_DAY;
    use crate::protocol::{
        PlanningPayload, PlanningReply, PlanningSignal, RealTimePayload, RealTimeReport,
    };
    use crate::sim::clock::SimClock;

    fn manager() -> MicrogridManager {
        MicrogridManager::new(0, SimClock::new(0, 3600, SECONDS_PER_DAY), vec![0.1, 0.2])
    }

    /// Rejects every planning message.
    struct Grumpy(SimClock);

    impl SmartGridEntity for Grumpy {
        fn id(&self) -> AgentId {
            7
        }
        fn kind(&self) -> EntityKind {
            EntityKind::Building
        }
        fn clock(&self) -> &SimClock {
            &self.0
        }
        fn advance_time(&mut self) {
            self.0.tick();
        }
        fn real_time_step(&mut self, _payload: &RealTimePayload) -> RealTimeReport {
            RealTimeReport::default()
        }
        fn planning_step(
            &mut self,
            _payload: &PlanningPayload,
        ) -> Result<Option<PlanningReply>, PlanningError> {
            Err(PlanningError::MalformedMessage("no".into()))
        }
    }

    #[test]
    fn real_time_reply_is_stamped_before_the_clock_moves() {
        let mut runtime = AgentRuntime::new(manager());
        let out = runtime
            .handle(&CoordinatorMessage::NextSimuStep(RealTimePayload::default()))
            .unwrap();
        let AgentOutput::Reply(envelope) = out else {
            panic!("expected a reply, got {out:?}");
        };
        assert_eq!(envelope.timestamp, 0);
        assert_eq!(envelope.kind, MessageKind::NextSimuStep);
        assert_eq!(runtime.entity().clock().now(), 3600);
    }

    #[test]
    fn new_connection_registers() {
        let mut runtime = AgentRuntime::new(manager());
        let out = runtime.handle(&CoordinatorMessage::NewConnection).unwrap();
        assert!(matches!(
            out,
            AgentOutput::Reply(Envelope {
                sender: 0,
                kind: MessageKind::NewConnection,
                data: AgentMessage::Registration {},
                ..
            })
        ));
    }

    #[test]
    fn planning_without_reply_is_silent() {
        let mut runtime = AgentRuntime::new(manager());
        let out = runtime
            .handle(&CoordinatorMessage::PlanningSignal(PlanningPayload::new(
                PlanningSignal::End,
            )))
            .unwrap();
        assert_eq!(out, AgentOutput::Silent);
    }

    #[test]
    fn malformed_planning_is_dropped() {
        let mut runtime = AgentRuntime::new(Grumpy(SimClock::new(0, 60, 600)));
        let out = runtime
            .handle(&CoordinatorMessage::PlanningSignal(PlanningPayload::data()))
            .unwrap();
        assert_eq!(out, AgentOutput::Silent);
    }

    #[test]
    fn stop_ends_the_agent() {
        let mut runtime = AgentRuntime::new(manager());
        assert_eq!(runtime.handle(&CoordinatorMessage::Stop).unwrap(), AgentOutput::Stopped);
        assert!(runtime.is_stopped());
        assert_eq!(
            runtime.handle(&CoordinatorMessage::NewConnection).unwrap(),
            AgentOutput::Stopped
        );
    }

    #[test]
    fn threaded_link_answers_like_inline() {
        let mut inline = InlineLink::new(manager());
        let mut threaded = ThreadedLink::spawn(manager());
        for _ in 0..3 {
            let message = CoordinatorMessage::NextSimuStep(RealTimePayload::default());
            assert_eq!(
                inline.request(message.clone()).unwrap(),
                threaded.request(message).unwrap()
            );
        }
        assert_eq!(threaded.request(CoordinatorMessage::Stop).unwrap(), AgentOutput::Stopped);
        assert!(matches!(
            threaded.request(CoordinatorMessage::NewConnection),
            Err(PlanningError::AgentGone(0))
        ));
    }
}
