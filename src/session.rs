//! Sessions: progress reporting and shutdown sequencing for one connection.
//!
//! Workflows and operators registered on a session report progress events
//! when they are evaluated through [`Session::flush_workflows`]. A listener
//! receives events until the session is released; an evaluation error
//! arrives as a `state` string and does not end the stream.

use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, ObjectHandle, dpf_object};
use crate::operator::Operator;
use crate::progress::ProgressSink;
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, ObjectId, Reply, SessionCall};
use crate::workflow::Workflow;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Registration name of the workflow or operator.
    pub name: String,
    /// Percentage in `[0, 100]`, non-decreasing per name.
    pub percentage: Option<f64>,
    pub state: Option<String>,
}

impl ProgressEvent {
    pub fn progress(name: impl Into<String>, percentage: f64) -> Self {
        Self {
            name: name.into(),
            percentage: Some(percentage),
            state: None,
        }
    }

    pub fn state(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            percentage: None,
            state: Some(state.into()),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    handle: ObjectHandle,
}

dpf_object!(Session, EntityKind::Session);

impl Session {
    pub fn new(server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::Session(SessionCall::New))?,
        })
    }

    fn call(&self, call: SessionCall) -> Result<Reply, DpfError> {
        self.handle.call(Call::Session(call))
    }

    pub fn add_workflow(&self, name: &str, workflow: &Workflow) -> Result<(), DpfError> {
        self.handle.ensure_same_server(workflow.handle())?;
        self.call(SessionCall::AddWorkflow {
            obj: self.handle.id(),
            name: name.to_string(),
            workflow: workflow.object_id(),
        })?
        .into_unit()
    }

    /// Register output `pin` of `op` under `name`.
    pub fn add_operator(&self, name: &str, op: &Operator, pin: i32) -> Result<(), DpfError> {
        self.handle.ensure_same_server(op.handle())?;
        self.call(SessionCall::AddOperator {
            obj: self.handle.id(),
            name: name.to_string(),
            op: op.object_id(),
            pin,
        })?
        .into_unit()
    }

    pub fn add_event_handler(&self, kind: &str, properties: &[(&str, &str)]) -> Result<(), DpfError> {
        self.call(SessionCall::AddEventHandler {
            obj: self.handle.id(),
            kind: kind.to_string(),
            properties: owned_pairs(properties),
        })?
        .into_unit()
    }

    pub fn add_signal_emitter(&self, kind: &str, name: &str, properties: &[(&str, &str)]) -> Result<(), DpfError> {
        self.call(SessionCall::AddSignalEmitter {
            obj: self.handle.id(),
            kind: kind.to_string(),
            name: name.to_string(),
            properties: owned_pairs(properties),
        })?
        .into_unit()
    }

    /// Names of the registered workflows and operators.
    pub fn registered(&self) -> Result<Vec<String>, DpfError> {
        self.call(SessionCall::Registered { obj: self.handle.id() })?
            .into_strings()
    }

    /// Evaluate every registered workflow and operator, emitting progress.
    pub fn flush_workflows(&self) -> Result<(), DpfError> {
        self.call(SessionCall::FlushWorkflows { obj: self.handle.id() })?
            .into_unit()
    }

    /// Stop accepting new work on this session.
    pub fn prepare_shutdown(&self) -> Result<(), DpfError> {
        self.call(SessionCall::PrepareShutdown { obj: self.handle.id() })?
            .into_unit()
    }

    /// Close the event stream; listeners return once it drains.
    pub fn close(&self) -> Result<(), DpfError> {
        self.call(SessionCall::Release { obj: self.handle.id() })?
            .into_unit()
    }

    /// Close the session and release the handle.
    pub fn release(self) -> Result<(), DpfError> {
        self.close()?;
        self.handle.release()
    }

    /// Block delivering events to `on_event` until the session closes or
    /// the callback returns `false`.
    pub fn listen(&self, mut on_event: impl FnMut(ProgressEvent) -> bool) -> Result<(), DpfError> {
        self.handle.server().listen(self.handle.id(), &mut on_event)
    }

    /// Block feeding the percentages of `name` into `sink`.
    pub fn listen_progress(&self, name: &str, sink: &mut dyn ProgressSink) -> Result<(), DpfError> {
        sink.start(Some(100));
        let res = self.listen(|ev| {
            if ev.name == name {
                if let Some(p) = ev.percentage {
                    sink.update(p.clamp(0.0, 100.0) as usize);
                }
            }
            true
        });
        sink.finish();
        res
    }

    /// Listen on a background thread, forwarding events over a channel.
    pub fn start_listening(&self) -> ProgressListener {
        let server = self.handle.server().clone();
        let session = self.handle.id();
        let (tx, rx) = mpsc::channel();
        let join = thread::spawn(move || listen_into(&server, session, tx));
        ProgressListener { events: rx, join }
    }
}

fn listen_into(server: &Server, session: ObjectId, tx: mpsc::Sender<ProgressEvent>) -> Result<(), DpfError> {
    debug!("listening on session {session}");
    server.listen(session, &mut |ev| tx.send(ev).is_ok())
}

fn owned_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Background listener started by [`Session::start_listening`].
#[derive(Debug)]
pub struct ProgressListener {
    events: mpsc::Receiver<ProgressEvent>,
    join: JoinHandle<Result<(), DpfError>>,
}

impl ProgressListener {
    pub fn events(&self) -> &mpsc::Receiver<ProgressEvent> {
        &self.events
    }

    /// Wait for the stream to end and collect whatever was not yet received.
    pub fn join(self) -> Result<Vec<ProgressEvent>, DpfError> {
        let res = self
            .join
            .join()
            .map_err(|_| DpfError::InvariantViolation("listener thread panicked".into()))?;
        res?;
        Ok(self.events.try_iter().collect())
    }
}
