//! Per-invocation state on the worker.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::proxy::VirtualFile;
use crate::registry::Registry;
use crate::signal::Completion;
use crate::staging::StagedOutput;
use crate::supervisor::ProcessInput;

/// Live sessions by ID.
pub type SessionTable = Registry<Uuid, Session>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    AwaitingArguments,
    Running,
    AwaitingOutputs,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::AwaitingArguments => "awaiting-arguments",
            Self::Running => "running",
            Self::AwaitingOutputs => "awaiting-outputs",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

pub struct Session {
    id: Uuid,
    inputs: Registry<Uuid, VirtualFile>,
    outputs: Registry<Uuid, StagedOutput>,
    standard_input: OnceCell<AsyncMutex<ProcessInput>>,
    exited: Completion<i32>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a session under a fresh ID and inserts it into `table`.
    ///
    /// Returns `None` on an ID collision. The returned guard owns teardown.
    pub fn open(table: &Arc<SessionTable>, shutdown: &CancellationToken) -> Option<SessionGuard> {
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            inputs: Registry::new(),
            outputs: Registry::new(),
            standard_input: OnceCell::new(),
            exited: Completion::new(),
            cancel: shutdown.child_token(),
            state: Mutex::new(SessionState::Created),
        });
        if !table.insert(session.id, Arc::clone(&session)) {
            return None;
        }
        debug!(session = %session.id, "session started");
        Some(SessionGuard {
            table: Arc::clone(table),
            session,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn inputs(&self) -> &Registry<Uuid, VirtualFile> {
        &self.inputs
    }

    pub fn outputs(&self) -> &Registry<Uuid, StagedOutput> {
        &self.outputs
    }

    /// Fires when the session is abandoned or the host shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The transcoder's exit code, once it has exited.
    pub fn exited(&self) -> &Completion<i32> {
        &self.exited
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transition(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(session = %self.id, from = %*state, to = %next, "session state changed");
            *state = next;
        }
    }

    /// Exposes the transcoder's standard input. Only the first call wins.
    pub fn attach_stdin(&self, stdin: ProcessInput) -> bool {
        self.standard_input.set(AsyncMutex::new(stdin)).is_ok()
    }

    /// Exclusive access to the transcoder's standard input, if it has
    /// started.
    pub async fn stdin(&self) -> Option<AsyncMutexGuard<'_, ProcessInput>> {
        Some(self.standard_input.get()?.lock().await)
    }

    fn terminate(&self) {
        self.transition(SessionState::Terminated);
        self.cancel.cancel();
        self.exited.cancel();
        for output in self.outputs.values() {
            output.delivered().cancel();
            output.remove();
        }
        debug!(session = %self.id, "session ended");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// Removes its session from the live table and deletes staged outputs when
/// dropped, whichever path the owning connection leaves by.
pub struct SessionGuard {
    table: Arc<SessionTable>,
    session: Arc<Session>,
}

impl SessionGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table.remove(&self.session.id);
        self.session.terminate();
    }
}
