//! Supervisor actor owning the promoter and worker replicas of one node.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use sentinel_db::Store;

use crate::config::RuntimeConfig;
use crate::context::QueueContext;
use crate::handler::JobHandlerRegistry;
use crate::messages::{SupervisorMessage, SupervisorStatus};
use crate::promoter::{Promoter, PromoterActor};
use crate::worker::{Worker, WorkerActor};

/// Supervisor startup arguments.
pub struct SupervisorArgs<S> {
    pub ctx: QueueContext<S>,
    pub handlers: JobHandlerRegistry,
    pub config: RuntimeConfig,
    /// Prefix for worker ids; defaults to `worker`.
    pub node_id: Option<String>,
}

impl<S: Store> SupervisorArgs<S> {
    pub fn new(ctx: QueueContext<S>, handlers: JobHandlerRegistry, config: RuntimeConfig) -> Self {
        Self {
            ctx,
            handlers,
            config,
            node_id: None,
        }
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// What a child does, kept so a failed child can be replaced in kind.
#[derive(Debug, Clone)]
enum ChildRole {
    Promoter,
    Worker(String),
}

/// State for the supervisor actor.
pub struct SupervisorState<S> {
    ctx: QueueContext<S>,
    handlers: Arc<JobHandlerRegistry>,
    config: RuntimeConfig,
    node_id: String,
    children: HashMap<ActorId, (ChildRole, ActorCell)>,
    restarts: u64,
    shutting_down: bool,
}

impl<S: Store> SupervisorState<S> {
    fn status(&self) -> SupervisorStatus {
        let promoters = self
            .children
            .values()
            .filter(|(role, _)| matches!(role, ChildRole::Promoter))
            .count();
        SupervisorStatus {
            promoters,
            workers: self.children.len() - promoters,
            restarts: self.restarts,
        }
    }

    async fn spawn_child(
        &mut self,
        supervisor: ActorCell,
        role: ChildRole,
    ) -> Result<(), ActorProcessingErr> {
        let cell = match &role {
            ChildRole::Promoter => {
                let promoter = Promoter::new(self.ctx.clone(), self.config.promoter.clone());
                let (actor, _handle) =
                    Actor::spawn_linked(None, PromoterActor::<S>::new(), promoter, supervisor)
                        .await
                        .map_err(|e| {
                            ActorProcessingErr::from(format!("Failed to spawn promoter: {}", e))
                        })?;
                actor.get_cell()
            }
            ChildRole::Worker(worker_id) => {
                let worker = Worker::new(
                    worker_id.clone(),
                    self.ctx.clone(),
                    self.handlers.clone(),
                    self.config.worker.clone(),
                );
                let (actor, _handle) =
                    Actor::spawn_linked(None, WorkerActor::<S>::new(), worker, supervisor)
                        .await
                        .map_err(|e| {
                            ActorProcessingErr::from(format!("Failed to spawn worker: {}", e))
                        })?;
                actor.get_cell()
            }
        };

        self.children.insert(cell.get_id(), (role, cell));
        Ok(())
    }

    fn stop_children(&mut self) {
        for (_, cell) in self.children.values() {
            cell.stop(Some("shutdown".to_string()));
        }
    }
}

/// Supervisor actor that spawns and restarts the node's replicas.
pub struct Supervisor<S>(PhantomData<fn() -> S>);

impl<S> Supervisor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for Supervisor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Actor for Supervisor<S> {
    type Msg = SupervisorMessage;
    type State = SupervisorState<S>;
    type Arguments = SupervisorArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            promoters = args.config.promoters,
            workers = args.config.workers,
            job_types = ?args.handlers.job_types(),
            "Starting job queue supervisor"
        );

        let node_id = args.node_id.unwrap_or_else(|| "worker".to_string());
        let mut state = SupervisorState {
            ctx: args.ctx,
            handlers: Arc::new(args.handlers),
            config: args.config,
            node_id,
            children: HashMap::new(),
            restarts: 0,
            shutting_down: false,
        };

        for _ in 0..state.config.promoters {
            state
                .spawn_child(myself.get_cell(), ChildRole::Promoter)
                .await?;
        }
        for n in 1..=state.config.workers {
            let worker_id = format!("{}-{}", state.node_id, n);
            state
                .spawn_child(myself.get_cell(), ChildRole::Worker(worker_id))
                .await?;
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Status { reply } => {
                let _ = reply.send(state.status());
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.shutting_down = true;
                state.stop_children();
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, reason) = match message {
            SupervisionEvent::ActorFailed(cell, error) => (cell, error.to_string()),
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                (cell, reason.unwrap_or_default())
            }
            _ => return Ok(()),
        };

        let Some((role, _)) = state.children.remove(&cell.get_id()) else {
            return Ok(());
        };
        if state.shutting_down {
            return Ok(());
        }

        tracing::warn!(role = ?role, reason = %reason, "Child actor stopped, restarting");
        state.spawn_child(myself.get_cell(), role).await?;
        state.restarts += 1;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.shutting_down = true;
        state.stop_children();
        Ok(())
    }
}

/// Start a supervisor with the given store context, handlers and replica
/// counts.
pub async fn start_supervisor<S: Store>(
    args: SupervisorArgs<S>,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor::<S>::new(), args).await
}
