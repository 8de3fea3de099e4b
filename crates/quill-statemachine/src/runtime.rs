use std::collections::HashSet;
use std::sync::Arc;

use quill_core::config::to_chrono;
use quill_core::{Clock, CoreError, EntityState, LeaseParams, StateMachineConfig, StatefulEntity, SystemClock};
use quill_store::{LeaseAction, StateEntityStore, StoreError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::processor::{EntityHandler, ProcessContext, ProcessOutcome};
use crate::wait::{ExponentialWait, WaitStrategy};

/// Counters for one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub leased: usize,
    pub transitioned: usize,
    pub pending: usize,
    pub retried: usize,
    pub escalated: usize,
    /// Handler tasks that panicked. Their leases are left to expire.
    pub panicked: usize,
    /// Outcomes that could not be saved because the lease was lost.
    pub conflicts: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.leased == 0
    }
}

enum Applied {
    Transitioned,
    Pending,
    Retried,
    Escalated,
}

/// Lease-coordinated runtime for one entity kind.
pub struct StateMachineRuntime<E: StatefulEntity> {
    name: String,
    leaser_id: String,
    store: Arc<dyn StateEntityStore<E>>,
    handlers: Vec<Arc<dyn EntityHandler<E>>>,
    config: StateMachineConfig,
    wait: Arc<dyn WaitStrategy>,
    clock: Arc<dyn Clock>,
}

pub struct StateMachineRuntimeBuilder<E: StatefulEntity> {
    name: String,
    leaser_id: Option<String>,
    store: Arc<dyn StateEntityStore<E>>,
    handlers: Vec<Arc<dyn EntityHandler<E>>>,
    config: StateMachineConfig,
    wait: Option<Arc<dyn WaitStrategy>>,
    clock: Arc<dyn Clock>,
}

impl<E: StatefulEntity> StateMachineRuntimeBuilder<E> {
    pub fn leaser_id(mut self, leaser_id: impl Into<String>) -> Self {
        self.leaser_id = Some(leaser_id.into());
        self
    }

    pub fn handler(mut self, handler: Arc<dyn EntityHandler<E>>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn config(mut self, config: StateMachineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn wait_strategy(mut self, wait: Arc<dyn WaitStrategy>) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<StateMachineRuntime<E>, CoreError> {
        self.config.validate()?;
        if self.handlers.is_empty() {
            return Err(CoreError::Configuration(format!(
                "state machine '{}' has no handlers",
                self.name
            )));
        }
        let mut claimed = HashSet::new();
        for handler in &self.handlers {
            for state in handler.states() {
                if !claimed.insert(state) {
                    return Err(CoreError::Configuration(format!(
                        "state {state} of {} is claimed by more than one handler",
                        <E::State as EntityState>::KIND
                    )));
                }
            }
        }
        let wait = self.wait.unwrap_or_else(|| {
            Arc::new(ExponentialWait::new(
                self.config.retry_base_delay(),
                self.config.retry_max_delay(),
            ))
        });
        let leaser_id = self
            .leaser_id
            .unwrap_or_else(|| format!("{}-{}", self.name, uuid::Uuid::now_v7()));
        Ok(StateMachineRuntime {
            name: self.name,
            leaser_id,
            store: self.store,
            handlers: self.handlers,
            config: self.config,
            wait,
            clock: self.clock,
        })
    }
}

impl<E: StatefulEntity> StateMachineRuntime<E> {
    pub fn builder(name: impl Into<String>, store: Arc<dyn StateEntityStore<E>>) -> StateMachineRuntimeBuilder<E> {
        StateMachineRuntimeBuilder {
            name: name.into(),
            leaser_id: None,
            store,
            handlers: Vec::new(),
            config: StateMachineConfig::default(),
            wait: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn leaser_id(&self) -> &str {
        &self.leaser_id
    }

    fn lease_params(&self) -> LeaseParams {
        LeaseParams::new(self.leaser_id.clone(), to_chrono(self.config.lease_duration()))
    }

    fn context(&self) -> ProcessContext<E> {
        ProcessContext::new(
            self.store.clone(),
            self.clock.clone(),
            self.leaser_id.clone(),
            self.config.lease_duration(),
        )
    }

    /// Run one scheduling pass over every handler.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for handler in &self.handlers {
            let states = handler.states();
            let batch = match self
                .store
                .next_not_leased(self.config.batch_size, &states, &self.lease_params())
            {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(runtime = %self.name, handler = handler.name(), error = %e, "failed to lease batch");
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }
            report.leased += batch.len();

            let mut tasks = JoinSet::new();
            for entity in batch {
                let handler = handler.clone();
                let ctx = self.context();
                let span = tracing::info_span!(
                    "process_entity",
                    runtime = %self.name,
                    handler = handler.name(),
                    entity_id = %entity.id(),
                    state = %entity.state(),
                    trace = ?entity.meta().trace_context,
                );
                tasks.spawn(async move { handler.handle(entity, &ctx).await }.instrument(span));
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => match self.apply(outcome) {
                        Ok(Applied::Transitioned) => report.transitioned += 1,
                        Ok(Applied::Pending) => report.pending += 1,
                        Ok(Applied::Retried) => report.retried += 1,
                        Ok(Applied::Escalated) => report.escalated += 1,
                        Err(StoreError::AlreadyLeased { id, .. }) => {
                            tracing::warn!(runtime = %self.name, entity_id = %id, "lease lost before outcome was saved");
                            report.conflicts += 1;
                        }
                        Err(e) => {
                            tracing::error!(runtime = %self.name, error = %e, "failed to persist outcome");
                            report.conflicts += 1;
                        }
                    },
                    Err(e) => {
                        tracing::error!(runtime = %self.name, error = %e, "handler task aborted; lease will expire");
                        report.panicked += 1;
                    }
                }
            }
        }
        report
    }

    fn apply(&self, outcome: ProcessOutcome<E>) -> Result<Applied, StoreError> {
        let now = self.clock.now();
        match outcome {
            ProcessOutcome::Transitioned(entity) => {
                self.store.save(&entity, &self.leaser_id, LeaseAction::Release)?;
                Ok(Applied::Transitioned)
            }
            ProcessOutcome::Pending { entity, recheck_after } => {
                let action = match recheck_after {
                    Some(after) => LeaseAction::HoldUntil(now + to_chrono(after)),
                    None => LeaseAction::Release,
                };
                self.store.save(&entity, &self.leaser_id, action)?;
                Ok(Applied::Pending)
            }
            ProcessOutcome::Failed { mut entity, error } => {
                if !error.is_retryable() {
                    tracing::warn!(
                        runtime = %self.name,
                        entity_id = %entity.id(),
                        state = %entity.state(),
                        error_kind = error.kind(),
                        error = %error,
                        "non-retryable failure"
                    );
                    return self.escalate(entity, error.to_string());
                }
                let attempts = entity.meta_mut().record_failure(error.to_string(), now);
                if attempts > self.config.retry_limit {
                    return self.escalate(
                        entity,
                        format!("retry limit of {} exceeded: {error}", self.config.retry_limit),
                    );
                }
                let wait = self.wait.wait_for(attempts);
                tracing::info!(
                    runtime = %self.name,
                    entity_id = %entity.id(),
                    state = %entity.state(),
                    attempt = attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %error,
                    "retrying after failure"
                );
                self.store
                    .save(&entity, &self.leaser_id, LeaseAction::HoldUntil(now + to_chrono(wait)))?;
                Ok(Applied::Retried)
            }
        }
    }

    fn escalate(&self, mut entity: E, detail: String) -> Result<Applied, StoreError> {
        if let Err(e) = entity.meta_mut().escalate(detail, self.clock.now()) {
            tracing::error!(runtime = %self.name, entity_id = %entity.id(), error = %e, "cannot escalate entity");
        }
        self.store.save(&entity, &self.leaser_id, LeaseAction::Release)?;
        Ok(Applied::Escalated)
    }

    /// Start ticking on a background task.
    pub fn start(self) -> RuntimeHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let runtime = Arc::new(self);
        let name = runtime.name.clone();
        let grace = runtime.config.shutdown_grace();
        let period = runtime.config.tick_interval();

        let join = tokio::spawn(async move {
            tracing::info!(runtime = %runtime.name, leaser_id = %runtime.leaser_id, "state machine started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        let tick = runtime.tick();
                        tokio::pin!(tick);
                        tokio::select! {
                            report = &mut tick => log_report(&runtime.name, &report),
                            _ = shutdown_rx.changed() => {
                                match tokio::time::timeout(grace, &mut tick).await {
                                    Ok(report) => log_report(&runtime.name, &report),
                                    Err(_) => tracing::warn!(
                                        runtime = %runtime.name,
                                        "in-flight tick abandoned after grace period; leases will expire"
                                    ),
                                }
                                break;
                            }
                        }
                    }
                }
            }
            tracing::info!(runtime = %runtime.name, "state machine stopped");
        });

        RuntimeHandle {
            name,
            shutdown: shutdown_tx,
            join,
        }
    }
}

fn log_report(name: &str, report: &TickReport) {
    if !report.is_idle() {
        tracing::debug!(runtime = %name, ?report, "tick complete");
    }
}

/// Handle to a started runtime.
pub struct RuntimeHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RuntimeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop scheduling and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(runtime = %self.name, error = %e, "state machine task failed");
        }
    }
}
