//! Readiness controller: one actor task per resource
//!
//! The controller walks a resource through the provisioning states and keeps
//! every operation submitted before `Ready` in a FIFO queue. On entering
//! `Ready` the queue is handed to the dispatcher in submission order; from
//! then on operations go straight through.
//!
//! ```text
//!  handle.operate(op) ──► command channel ──► actor ──► queue (not ready)
//!                                               │
//!                                               └─────► dispatcher (ready)
//! ```

use crate::cache::{IndexCache, Provisioner, SchemaCache};
use crate::error::{ProvisionError, Step};
use crate::plan::{diff, ReadinessPlan};
use crate::state::{on_enter, transition, Action, Effect, Entry, ReadinessEvent, ReadinessState};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Executes operations once the resource is ready
///
/// `dispatch` is called from the controller task, once per operation, in
/// submission order. Implementations should hand the work off (e.g. spawn a
/// task) rather than block.
pub trait Dispatch<Op>: Send + Sync + 'static {
    fn dispatch(&self, op: Op);
}

impl<Op, F> Dispatch<Op> for F
where
    F: Fn(Op) + Send + Sync + 'static,
{
    fn dispatch(&self, op: Op) {
        self(op)
    }
}

/// Caches shared by every controller of one client
#[derive(Debug, Clone, Default)]
pub struct ProvisionCaches {
    pub schemas: Arc<SchemaCache>,
    pub indexes: Arc<IndexCache>,
}

impl ProvisionCaches {
    pub fn new(index_grace: std::time::Duration) -> Self {
        Self {
            schemas: Arc::new(SchemaCache::new()),
            indexes: Arc::new(IndexCache::new(index_grace)),
        }
    }
}

/// Snapshot published on every state change or surfaced failure
#[derive(Debug, Clone)]
pub struct Status {
    pub state: ReadinessState,
    pub last_error: Option<Arc<ProvisionError>>,
}

enum Command<Op> {
    Operate(Op),
    Retry,
}

/// Handle to a running readiness controller
pub struct ReadinessController<Op> {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command<Op>>,
    status: watch::Receiver<Status>,
}

impl<Op> Clone for ReadinessController<Op> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            commands: self.commands.clone(),
            status: self.status.clone(),
        }
    }
}

impl<Op: Send + 'static> ReadinessController<Op> {
    /// Spawn the controller task and start provisioning immediately.
    ///
    /// Must be called from inside a Tokio runtime. The task ends when every
    /// handle has been dropped.
    pub fn spawn<D>(
        name: impl Into<String>,
        plan: ReadinessPlan,
        provisioner: Arc<dyn Provisioner>,
        caches: ProvisionCaches,
        dispatcher: D,
    ) -> Self
    where
        D: Dispatch<Op>,
    {
        let name: Arc<str> = Arc::from(name.into());
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status {
            state: ReadinessState::CheckingSchema,
            last_error: None,
        });

        let actor = Actor {
            name: Arc::clone(&name),
            plan: Arc::new(plan),
            provisioner,
            caches,
            dispatcher,
            state: ReadinessState::CheckingSchema,
            queue: VecDeque::new(),
            status: status_tx,
        };
        tokio::spawn(actor.run(rx));

        Self {
            name,
            commands,
            status,
        }
    }
}

impl<Op> ReadinessController<Op> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit an operation: dispatched now if ready, queued otherwise
    pub fn operate(&self, op: Op) -> Result<(), ProvisionError> {
        self.commands
            .send(Command::Operate(op))
            .map_err(|_| ProvisionError::Stopped(self.name.to_string()))
    }

    /// Rerun the step that last failed; ignored when nothing has failed
    pub fn retry(&self) {
        let _ = self.commands.send(Command::Retry);
    }

    pub fn state(&self) -> ReadinessState {
        self.status.borrow().state
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Watch channel carrying every status change
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Resolve once ready, or with the first provisioning failure surfaced
    pub async fn wait_ready(&self) -> Result<(), Arc<ProvisionError>> {
        let mut status = self.status.clone();
        let outcome = status
            .wait_for(|s| s.state.is_ready() || s.last_error.is_some())
            .await
            .map(|s| s.clone());

        match outcome {
            Ok(Status {
                last_error: Some(err),
                ..
            }) => Err(err),
            Ok(_) => Ok(()),
            Err(_) => Err(Arc::new(ProvisionError::Stopped(self.name.to_string()))),
        }
    }
}

type StepFuture = BoxFuture<'static, Result<ReadinessEvent, ProvisionError>>;

struct Actor<Op, D> {
    name: Arc<str>,
    plan: Arc<ReadinessPlan>,
    provisioner: Arc<dyn Provisioner>,
    caches: ProvisionCaches,
    dispatcher: D,
    state: ReadinessState,
    queue: VecDeque<Op>,
    status: watch::Sender<Status>,
}

impl<Op: Send + 'static, D: Dispatch<Op>> Actor<Op, D> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<Op>>) {
        let mut step = self.enter(self.state);
        let mut failed = false;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Operate(op)) => self.operate(op),
                    Some(Command::Retry) if failed => {
                        failed = false;
                        step = self.apply(ReadinessEvent::Retry);
                    }
                    Some(Command::Retry) => {
                        debug!(bucket = %self.name, state = %self.state, "Nothing to retry");
                    }
                    None => break,
                },
                outcome = async {
                    match step.as_mut() {
                        Some(running) => running.await,
                        None => futures::future::pending().await,
                    }
                }, if step.is_some() => {
                    step = match outcome {
                        Ok(event) => self.apply(event),
                        Err(err) => {
                            failed = true;
                            self.fail(err)
                        }
                    };
                }
            }
        }

        if !self.queue.is_empty() {
            warn!(
                bucket = %self.name,
                dropped = self.queue.len(),
                "Controller stopped before ready, dropping queued operations"
            );
        }
    }

    fn operate(&mut self, op: Op) {
        if self.state.is_ready() {
            self.dispatcher.dispatch(op);
        } else {
            self.queue.push_back(op);
            debug!(
                bucket = %self.name,
                state = %self.state,
                queued = self.queue.len(),
                "Deferring operation until ready"
            );
        }
    }

    fn apply(&mut self, event: ReadinessEvent) -> Option<StepFuture> {
        match transition(self.state, event) {
            Some(Action::Advance(next)) => {
                debug!(bucket = %self.name, from = %self.state, to = %next, %event, "Transition");
                self.enter(next)
            }
            Some(Action::Reenter) => {
                self.status.send_modify(|s| s.last_error = None);
                self.enter(self.state)
            }
            Some(Action::Stall) => None,
            None => {
                debug!(bucket = %self.name, state = %self.state, %event, "Ignoring event");
                None
            }
        }
    }

    /// Enter `state`, following skips until a state runs an effect or is terminal
    fn enter(&mut self, mut state: ReadinessState) -> Option<StepFuture> {
        loop {
            self.state = state;
            self.status.send_modify(|s| {
                s.state = state;
                s.last_error = None;
            });

            match on_enter(&self.plan, state) {
                Entry::Skip(next) => {
                    debug!(bucket = %self.name, from = %state, to = %next, "Skipping step");
                    state = next;
                }
                Entry::Run(effect) => return Some(self.effect(effect)),
                Entry::Terminal => {
                    self.drain();
                    return None;
                }
            }
        }
    }

    fn drain(&mut self) {
        info!(
            bucket = %self.name,
            drained = self.queue.len(),
            "Bucket ready"
        );
        for op in self.queue.drain(..) {
            self.dispatcher.dispatch(op);
        }
    }

    fn fail(&mut self, err: ProvisionError) -> Option<StepFuture> {
        warn!(bucket = %self.name, state = %self.state, error = %err, "Provisioning step failed");
        let step = self.apply(ReadinessEvent::Failed);
        let err = Arc::new(err);
        self.status.send_modify(|s| s.last_error = Some(err));
        step
    }

    fn effect(&self, effect: Effect) -> StepFuture {
        let name = Arc::clone(&self.name);
        let provisioner = Arc::clone(&self.provisioner);

        match effect {
            Effect::AssertSchema { name: schema, path } => {
                let schemas = Arc::clone(&self.caches.schemas);
                async move {
                    debug!(bucket = %name, schema = %schema, "Checking for schema");
                    schemas
                        .create(provisioner.as_ref(), &schema, &path)
                        .await
                        .map_err(|e| ProvisionError::step(name.as_ref(), Step::Schema, e))?;
                    Ok(ReadinessEvent::SchemaAsserted)
                }
                .boxed()
            }
            Effect::AssertIndex { index, schema } => {
                let indexes = Arc::clone(&self.caches.indexes);
                async move {
                    let delay = indexes
                        .create(provisioner.as_ref(), &index, &schema)
                        .await
                        .map_err(|e| ProvisionError::step(name.as_ref(), Step::Index, e))?;
                    if !delay.is_zero() {
                        debug!(bucket = %name, index = %index, ?delay, "Waiting for new index");
                        tokio::time::sleep(delay).await;
                    }
                    Ok(ReadinessEvent::IndexAsserted)
                }
                .boxed()
            }
            Effect::AssertProperties => {
                let desired = self.plan.desired_properties();
                async move {
                    let current = provisioner
                        .read_properties(&name)
                        .await
                        .map_err(|e| ProvisionError::step(name.as_ref(), Step::Properties, e))?;
                    let changes = diff(&current, &desired);
                    if changes.is_empty() {
                        debug!(bucket = %name, "Bucket properties already match");
                    } else {
                        info!(bucket = %name, changed = changes.len(), "Updating bucket properties");
                        provisioner
                            .write_properties(&name, &changes)
                            .await
                            .map_err(|e| ProvisionError::step(name.as_ref(), Step::Properties, e))?;
                    }
                    Ok(ReadinessEvent::BucketAsserted)
                }
                .boxed()
            }
        }
    }
}
