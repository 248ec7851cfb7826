//! Tracker supervision
//!
//! A supervisor thread owns the registry of running trackers, keyed by job
//! id. Callers talk to it through a cloneable [`SupervisorHandle`] that sends
//! messages and waits for the reply. Each tracker runs on its own named
//! thread and reports back with a `Finished` message when it ends.
//!
//! At most one tracker runs per job id. Shutdown cancels every active
//! tracker, joins them, and returns their outcomes.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use instance_ops_model::JobId;

use crate::cancel::{CancelReason, CancelToken};
use crate::tracking::{OperationTracker, TrackRequest, TrackingOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Job {0} is already being tracked")]
    AlreadyTracking(JobId),

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error("Supervisor has stopped")]
    Stopped,

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

enum Message {
    Track {
        request: TrackRequest,
        reply: Sender<SupervisorResult<()>>,
    },
    Cancel {
        job_id: JobId,
        reply: Sender<bool>,
    },
    Wait {
        job_id: JobId,
        reply: Sender<Option<TrackingOutcome>>,
    },
    List {
        reply: Sender<Vec<JobId>>,
    },
    Accepting {
        reply: Sender<SupervisorResult<()>>,
    },
    Shutdown {
        reply: Sender<Vec<TrackingOutcome>>,
    },
    Finished {
        job_id: JobId,
        outcome: TrackingOutcome,
    },
}

struct Active {
    token: CancelToken,
    thread: JoinHandle<()>,
}

struct Registry {
    tracker: Arc<OperationTracker>,
    inbox: Sender<Message>,
    active: HashMap<JobId, Active>,
    /// Last outcome per finished job
    finished: HashMap<JobId, TrackingOutcome>,
    waiters: HashMap<JobId, Vec<Sender<Option<TrackingOutcome>>>>,
    shutdown: Option<ShutdownState>,
}

struct ShutdownState {
    reply: Sender<Vec<TrackingOutcome>>,
    outcomes: Vec<TrackingOutcome>,
}

impl Registry {
    fn spawn_tracker(&mut self, request: TrackRequest) -> SupervisorResult<()> {
        if self.shutdown.is_some() {
            return Err(SupervisorError::ShuttingDown);
        }
        if self.active.contains_key(&request.job_id) {
            return Err(SupervisorError::AlreadyTracking(request.job_id));
        }

        let job_id = request.job_id;
        let token = CancelToken::new();
        let tracker = Arc::clone(&self.tracker);
        let inbox = self.inbox.clone();
        let worker_token = token.clone();

        let thread = thread::Builder::new()
            .name(format!("track-{}", job_id))
            .spawn(move || {
                let run = panic::catch_unwind(AssertUnwindSafe(|| tracker.track(&request, &worker_token)));
                let outcome = match run {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(job_id = %job_id, panic = %message, "tracker panicked");
                        tracker.abort(&request, &format!("tracker panicked: {}", message))
                    }
                };
                // Supervisor gone means nobody is waiting
                let _ = inbox.send(Message::Finished { job_id, outcome });
            })?;

        self.finished.remove(&job_id);
        self.active.insert(job_id, Active { token, thread });
        tracing::info!(job_id = %job_id, active = self.active.len(), "tracker started");
        Ok(())
    }

    fn on_finished(&mut self, job_id: JobId, outcome: TrackingOutcome) {
        if let Some(active) = self.active.remove(&job_id) {
            if active.thread.join().is_err() {
                tracing::error!(job_id = %job_id, "tracker thread panicked");
            }
        }
        tracing::debug!(job_id = %job_id, state = ?outcome.state, "tracker finished");

        for waiter in self.waiters.remove(&job_id).unwrap_or_default() {
            let _ = waiter.send(Some(outcome.clone()));
        }
        if let Some(ref mut shutdown) = self.shutdown {
            shutdown.outcomes.push(outcome.clone());
        }
        self.finished.insert(job_id, outcome);
    }

    fn begin_shutdown(&mut self, reply: Sender<Vec<TrackingOutcome>>) {
        tracing::info!(active = self.active.len(), "supervisor shutting down");
        for active in self.active.values() {
            active.token.cancel(CancelReason::Shutdown);
        }
        self.shutdown = Some(ShutdownState {
            reply,
            outcomes: Vec::new(),
        });
    }

    /// Handle one message. Returns false once the loop should exit.
    fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Track { request, reply } => {
                let _ = reply.send(self.spawn_tracker(request));
            }
            Message::Cancel { job_id, reply } => {
                let found = match self.active.get(&job_id) {
                    Some(active) => {
                        active.token.cancel(CancelReason::Operator);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
            }
            Message::Wait { job_id, reply } => {
                if self.active.contains_key(&job_id) {
                    self.waiters.entry(job_id).or_default().push(reply);
                } else {
                    let _ = reply.send(self.finished.get(&job_id).cloned());
                }
            }
            Message::List { reply } => {
                let mut ids: Vec<JobId> = self.active.keys().copied().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
            Message::Accepting { reply } => {
                let accepting = match self.shutdown {
                    Some(_) => Err(SupervisorError::ShuttingDown),
                    None => Ok(()),
                };
                let _ = reply.send(accepting);
            }
            Message::Shutdown { reply } => {
                if self.shutdown.is_some() {
                    // Outcomes go to the first caller only
                    let _ = reply.send(Vec::new());
                } else {
                    self.begin_shutdown(reply);
                }
            }
            Message::Finished { job_id, outcome } => self.on_finished(job_id, outcome),
        }

        if self.active.is_empty() {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.reply.send(shutdown.outcomes);
                return false;
            }
        }
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_loop(mut registry: Registry, inbox: Receiver<Message>) {
    while let Ok(message) = inbox.recv() {
        if !registry.handle(message) {
            break;
        }
    }
    tracing::debug!("supervisor stopped");
}

/// Cloneable handle to a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: Sender<Message>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SupervisorHandle {
    /// Start the supervisor thread
    pub fn spawn(tracker: Arc<OperationTracker>) -> SupervisorResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let registry = Registry {
            tracker,
            inbox: sender.clone(),
            active: HashMap::new(),
            finished: HashMap::new(),
            waiters: HashMap::new(),
            shutdown: None,
        };

        let thread = thread::Builder::new()
            .name("supervisor".into())
            .spawn(move || run_loop(registry, receiver))?;

        Ok(Self {
            sender,
            thread: Arc::new(Mutex::new(Some(thread))),
        })
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Message) -> SupervisorResult<T> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(build(reply))
            .map_err(|_| SupervisorError::Stopped)?;
        response.recv().map_err(|_| SupervisorError::Stopped)
    }

    /// Start tracking a job on its own thread
    pub fn track(&self, request: TrackRequest) -> SupervisorResult<()> {
        self.request(|reply| Message::Track { request, reply })?
    }

    /// Cancel an active tracker. Returns false when the job is not active.
    pub fn cancel(&self, job_id: JobId) -> SupervisorResult<bool> {
        self.request(|reply| Message::Cancel { job_id, reply })
    }

    /// Block until the job's tracker finishes.
    ///
    /// Returns the last outcome for a job that already finished, or None for
    /// a job this supervisor never tracked.
    pub fn wait(&self, job_id: JobId) -> SupervisorResult<Option<TrackingOutcome>> {
        self.request(|reply| Message::Wait { job_id, reply })
    }

    /// Fails when new work would be refused
    pub fn ensure_accepting(&self) -> SupervisorResult<()> {
        self.request(|reply| Message::Accepting { reply })?
    }

    /// Ids of jobs currently being tracked
    pub fn active(&self) -> SupervisorResult<Vec<JobId>> {
        self.request(|reply| Message::List { reply })
    }

    /// Cancel every active tracker, wait for all of them, and stop.
    pub fn shutdown(&self) -> SupervisorResult<Vec<TrackingOutcome>> {
        let outcomes = self.request(|reply| Message::Shutdown { reply })?;

        let thread = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("supervisor thread panicked");
            }
        }
        Ok(outcomes)
    }
}
