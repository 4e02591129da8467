//! Background rebuilds
//!
//! Each rebuild runs a session on its own thread and streams its events
//! back to the command loop.

use std::thread::{self, JoinHandle};

use pk_cad::{Engine, Model, RebuildEvent, RebuildOutcome, RebuildTarget};
use pk_core::SessionId;

use crate::error::AppError;

/// Message from a rebuild worker
#[derive(Debug)]
pub enum WorkerMessage {
    Event(SessionId, RebuildEvent),
    Finished(SessionId, RebuildOutcome),
}

/// Handle to a rebuild running on a worker thread
#[derive(Debug)]
pub struct RunningRebuild {
    session: SessionId,
    handle: JoinHandle<()>,
}

impl RunningRebuild {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker thread to exit
    pub fn join(self) -> Result<(), AppError> {
        self.handle.join().map_err(|_| AppError::WorkerPanicked)
    }
}

/// Start rebuilding `model` in a new session on a worker thread
pub fn spawn_rebuild<F>(
    engine: &Engine,
    model: Model,
    target: RebuildTarget,
    send: F,
) -> Result<RunningRebuild, AppError>
where
    F: Fn(WorkerMessage) + Send + 'static,
{
    let session = engine.begin_session();
    let id = session.id();

    let handle = thread::Builder::new()
        .name(format!("rebuild-{id}"))
        .spawn(move || {
            let outcome = model.rebuild(&session, target, &mut |event| {
                send(WorkerMessage::Event(id, event))
            });
            // Leave the cancellation registry before reporting
            drop(session);
            send(WorkerMessage::Finished(id, outcome));
        })?;

    Ok(RunningRebuild {
        session: id,
        handle,
    })
}
