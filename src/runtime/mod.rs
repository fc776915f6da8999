//! The local, in-process runtime: agent registry, buffered per-agent
//! mailboxes, synchronous Call/CallParallel dispatch, and dependency-ordered
//! phased startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::Instrument;

use crate::agent::{Agent, AgentName};
use crate::config::RuntimeConfig;
use crate::error::CaxtonError;
use crate::graph::DependencyGraph;
use crate::message::Message;
use crate::observability::{Metrics, RuntimeKind, warn_on_channel_utilization};
use crate::session::SessionManager;

/// Default worker pool size for `call_parallel` when
/// `RuntimeConfig::max_concurrent_calls` is `0` (unbounded for plain
/// `Call`, but `CallParallel`'s own fan-out still needs a bound).
const DEFAULT_PARALLEL_WORKERS: usize = 8;

/// How often the phased-startup ready-poll loop checks agent readiness.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Mailbox {
    sender: mpsc::Sender<Message>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
    capacity: usize,
}

/// In-process host for a population of named agents.
pub struct Runtime {
    config: RuntimeConfig,
    agents: DashMap<AgentName, Arc<dyn Agent>>,
    mailboxes: DashMap<AgentName, Mailbox>,
    call_semaphore: Option<Arc<Semaphore>>,
    metrics: Arc<Metrics>,
    session_manager: tokio::sync::RwLock<Option<Arc<SessionManager>>>,
    started: AtomicBool,
}

/// The outcome of `Runtime::call_parallel`: per-target results and errors,
/// never aggregated into a single `Result`.
#[derive(Debug, Default)]
pub struct ParallelOutcome {
    /// Successful responses, keyed by target agent.
    pub results: HashMap<AgentName, Message>,
    /// Failures, keyed by target agent.
    pub errors: HashMap<AgentName, CaxtonError>,
}

impl Runtime {
    /// Builds a runtime over `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let call_semaphore = (config.max_concurrent_calls > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_calls)));

        Self {
            config,
            agents: DashMap::new(),
            mailboxes: DashMap::new(),
            call_semaphore,
            metrics: Arc::new(Metrics::new()),
            session_manager: tokio::sync::RwLock::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Read-only access to the counters backing the observability hooks.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Attaches a `SessionManager`, enabling `call_with_session`.
    pub async fn set_session_manager(&self, manager: Arc<SessionManager>) {
        *self.session_manager.write().await = Some(manager);
    }

    fn worker_pool_size(&self) -> usize {
        if self.config.max_concurrent_calls > 0 {
            self.config.max_concurrent_calls
        } else {
            DEFAULT_PARALLEL_WORKERS
        }
    }

    fn ensure_started(&self) -> Result<(), CaxtonError> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CaxtonError::NotStarted)
        }
    }

    /// Registers `agent`, opening a buffered mailbox for it.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Result<(), CaxtonError> {
        let name = agent.name().clone();
        if self.agents.contains_key(&name) {
            return Err(CaxtonError::AlreadyExists(name));
        }

        let (sender, receiver) = mpsc::channel(self.config.channel_buffer_size);
        self.mailboxes.insert(
            name.clone(),
            Mailbox {
                sender,
                receiver: Mutex::new(Some(receiver)),
                capacity: self.config.channel_buffer_size,
            },
        );
        self.agents.insert(name, agent);
        Ok(())
    }

    /// Removes a registered agent and its mailbox.
    pub fn unregister(&self, name: &AgentName) -> Result<(), CaxtonError> {
        self.agents
            .remove(name)
            .ok_or_else(|| CaxtonError::NotFound(name.to_string()))?;
        self.mailboxes.remove(name);
        Ok(())
    }

    /// Looks up a registered agent handle.
    pub fn get(&self, name: &AgentName) -> Result<Arc<dyn Agent>, CaxtonError> {
        self.agents
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CaxtonError::NotFound(name.to_string()))
    }

    /// Registered agent names, alphabetically ordered.
    #[must_use]
    pub fn list(&self) -> Vec<AgentName> {
        let mut names: Vec<AgentName> = self.agents.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Delivers `msg` to `target`'s mailbox, blocking up to
    /// `RuntimeConfig::send_timeout` if the mailbox is saturated.
    #[tracing::instrument(name = "runtime.send", skip(self, msg), fields(target = %target))]
    pub async fn send(&self, target: &AgentName, msg: Message) -> Result<(), CaxtonError> {
        let mailbox = self
            .mailboxes
            .get(target)
            .ok_or_else(|| CaxtonError::NotFound(target.to_string()))?;
        let sender = mailbox.sender.clone();
        let capacity = mailbox.capacity;
        drop(mailbox);

        tokio::time::timeout(self.config.send_timeout, sender.send(msg))
            .await
            .map_err(|_| CaxtonError::Timeout(format!("channel full for agent {target}")))?
            .map_err(|_| CaxtonError::NotFound(target.to_string()))?;

        if self.config.enable_metrics {
            self.metrics.record_message_sent();
            let in_flight = capacity.saturating_sub(sender.capacity());
            warn_on_channel_utilization(
                &target.to_string(),
                in_flight,
                capacity,
                self.config.channel_full_warning_threshold,
            );
        }
        Ok(())
    }

    /// Takes ownership of `source`'s mailbox receiver. Calling this twice
    /// for the same agent without the first receiver being dropped returns
    /// `NotFound`.
    pub async fn recv(&self, source: &AgentName) -> Result<mpsc::Receiver<Message>, CaxtonError> {
        let mailbox = self
            .mailboxes
            .get(source)
            .ok_or_else(|| CaxtonError::NotFound(source.to_string()))?;
        let mut guard = mailbox.receiver.lock().await;
        guard
            .take()
            .ok_or_else(|| CaxtonError::NotFound(format!("{source}: mailbox already draining")))
    }

    /// Sends `msg` to every registered agent. Keeps sending to the rest even
    /// after a failure, but returns the first error encountered, if any.
    pub async fn broadcast(&self, msg: Message) -> Result<(), CaxtonError> {
        let mut first_error = None;
        for name in self.list() {
            if let Err(err) = self.send(&name, msg.clone()).await {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Synchronously invokes `target`'s `execute`, bounded by the
    /// configured call semaphore (if any).
    #[tracing::instrument(name = "runtime.call", skip(self, msg), fields(agent = %target))]
    pub async fn call(&self, target: &AgentName, msg: Message) -> Result<Message, CaxtonError> {
        self.ensure_started()?;

        let _permit = match &self.call_semaphore {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("call semaphore is never closed"),
            ),
            None => None,
        };

        let agent = self.get(target)?;
        if !agent.ready() {
            return Err(CaxtonError::NotReady(target.clone()));
        }

        if self.config.enable_metrics {
            self.metrics.record_call_started();
        }

        let result = if self.config.enable_tracing {
            let span = tracing::info_span!(
                "runtime.call.dispatch",
                agent.name = %target,
                agent.role = agent.role(),
                runtime.kind = RuntimeKind::Local.as_str(),
                execution.duration_ms = tracing::field::Empty,
                execution.success = tracing::field::Empty,
            );
            let started = std::time::Instant::now();
            let result = agent.execute(msg).instrument(span.clone()).await;
            if self.config.enable_metrics {
                span.record("execution.duration_ms", started.elapsed().as_millis() as u64);
                span.record("execution.success", result.is_ok());
            }
            result
        } else {
            agent.execute(msg).await
        };

        if self.config.enable_metrics {
            self.metrics.record_call_finished(result.is_ok());
        }
        result
    }

    /// Invokes every target concurrently, bounded by the worker pool size,
    /// returning per-target results and errors without aggregating them.
    #[tracing::instrument(
        name = "runtime.call_parallel",
        skip(self, msg, targets),
        fields(
            count = targets.len(),
            max_workers = self.worker_pool_size(),
            success_count = tracing::field::Empty,
            error_count = tracing::field::Empty,
        )
    )]
    pub async fn call_parallel(&self, targets: &[AgentName], msg: Message) -> ParallelOutcome {
        let worker_count = self.worker_pool_size();

        let dispatched = stream::iter(targets.iter().cloned())
            .map(|target| {
                let msg = msg.clone();
                async move {
                    let result = self.call(&target, msg).await;
                    (target, result)
                }
            })
            .buffer_unordered(worker_count)
            .collect::<Vec<_>>()
            .await;

        let mut outcome = ParallelOutcome::default();
        for (target, result) in dispatched {
            match result {
                Ok(response) => {
                    outcome.results.insert(target, response);
                }
                Err(err) => {
                    outcome.errors.insert(target, err);
                }
            }
        }

        if self.config.enable_metrics {
            let span = tracing::Span::current();
            span.record("success_count", outcome.results.len());
            span.record("error_count", outcome.errors.len());
        }
        outcome
    }

    /// Marks the runtime started and starts every currently registered
    /// agent concurrently. Does not wait for readiness; use
    /// `start_agents_phased` when dependency order matters.
    pub async fn start(&self) -> Result<(), CaxtonError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(CaxtonError::AlreadyStarted);
        }

        let agents: Vec<Arc<dyn Agent>> = self.agents.iter().map(|e| e.value().clone()).collect();
        let results = futures::future::join_all(agents.iter().map(|a| a.start())).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Stops every registered agent concurrently, draining best-effort,
    /// within `RuntimeConfig::stop_timeout`. Returns the first encountered
    /// agent failure, if any, or a timeout error if the deadline elapses
    /// before every agent's `stop()` returns (a partial drain).
    pub async fn stop(&self) -> Result<(), CaxtonError> {
        self.ensure_started()?;
        self.started.store(false, Ordering::Release);

        let agents: Vec<Arc<dyn Agent>> = self.agents.iter().map(|e| e.value().clone()).collect();
        let total = agents.len();
        let drain = futures::future::join_all(agents.iter().map(|a| a.stop()));

        let results = match tokio::time::timeout(self.config.stop_timeout, drain).await {
            Ok(results) => results,
            Err(_) => {
                self.mailboxes.clear();
                return Err(CaxtonError::Timeout(format!(
                    "stop: {total} agents did not finish draining within {:?}",
                    self.config.stop_timeout
                )));
            }
        };

        self.mailboxes.clear();

        let mut first_error = None;
        for result in results {
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Starts registered agents in dependency order: agents in a level are
    /// started concurrently; the next level begins only once every agent in
    /// the current one reports `ready()`, within `AgentStartTimeout`.
    pub async fn start_agents_phased(
        &self,
        dependencies: &HashMap<AgentName, Vec<AgentName>>,
    ) -> Result<(), CaxtonError> {
        self.started.store(true, Ordering::Release);

        let mut graph = DependencyGraph::new();
        for (name, deps) in dependencies {
            graph.add(
                name.to_string(),
                deps.iter().map(ToString::to_string).collect(),
            );
        }
        graph.validate()?;
        let levels = graph.topological_levels()?;

        for level in levels {
            let agents_in_level: Vec<Arc<dyn Agent>> = level
                .iter()
                .map(|name| {
                    let agent_name = AgentName::try_new(name.clone())
                        .map_err(|_| CaxtonError::UnknownDependency(name.clone()))?;
                    self.get(&agent_name)
                })
                .collect::<Result<_, _>>()?;

            let start_failure: Arc<tokio::sync::Mutex<Option<CaxtonError>>> =
                Arc::new(tokio::sync::Mutex::new(None));
            for agent in &agents_in_level {
                let agent = agent.clone();
                let start_failure = start_failure.clone();
                tokio::spawn(async move {
                    if let Err(err) = agent.start().await {
                        *start_failure.lock().await = Some(err);
                    }
                });
            }

            let deadline = tokio::time::Instant::now() + self.config.agent_start_timeout;
            loop {
                if let Some(err) = start_failure.lock().await.take() {
                    return Err(err);
                }
                if agents_in_level.iter().all(|a| a.ready()) {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(CaxtonError::Timeout(format!(
                        "phase timed out waiting for agents to become ready: {level:?}"
                    )));
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }
        Ok(())
    }

    /// Appends `input` to `session_id`'s log, dispatches to `target` (using
    /// its session-aware capability if it implements one), appends the
    /// result, and returns it.
    pub async fn call_with_session(
        &self,
        target: &AgentName,
        input: Message,
        session_id: &str,
    ) -> Result<Message, CaxtonError> {
        let manager = self
            .session_manager
            .read()
            .await
            .clone()
            .ok_or(CaxtonError::NotConfigured)?;

        let agent = self.get(target)?;
        let session = manager.get(target, session_id).await?;
        session.append_message(input.clone()).await?;

        let result = match agent.as_session_aware() {
            Some(session_aware) => session_aware.execute_with_session(input, &session).await,
            None => self.call(target, input).await,
        }?;

        session.append_message(result.clone()).await?;
        Ok(result)
    }
}
