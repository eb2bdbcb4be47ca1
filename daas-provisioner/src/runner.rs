//! Per-database orchestration of one-shot T-SQL jobs.
//!
//! A [`SqlRunner`] owns every execution against one (server, database) pair.
//! It provisions the credentials Secret, script ConfigMap, and Job of a run,
//! polls the job until it finishes, and reports the outcome to its owner.
//! At most one job is in flight at a time; requests arriving in the meantime
//! are deferred and replayed in arrival order.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::ResourceExt;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{Instrument, error, info, info_span, warn};

use crate::k8s::{ClusterError, ResourceOps};
use crate::model::DatabaseServer;
use crate::resources;
use crate::workers::base::{Worker, WorkerHandle, WorkerWaitError};

/// How often a submitted job is polled for completion.
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long a job may run before it is deleted and reported as timed out.
const JOB_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// Bounded depth of the execution request mailbox.
const REQUEST_QUEUE_DEPTH: usize = 16;

/// Timings driving the polling loop, overridable in tests.
#[derive(Debug, Clone, Copy)]
pub struct SqlRunnerTimings {
    pub poll_interval: Duration,
    pub completion_timeout: Duration,
}

impl Default for SqlRunnerTimings {
    fn default() -> Self {
        Self {
            poll_interval: JOB_POLL_INTERVAL,
            completion_timeout: JOB_COMPLETION_TIMEOUT,
        }
    }
}

/// Request to run a T-SQL script against the runner's database.
#[derive(Debug, Clone)]
pub struct ExecuteSql {
    /// The T-SQL to run.
    pub sql: String,
    /// Caller-chosen suffix making the job name unique per logical request.
    pub job_name_suffix: String,
}

/// Terminal outcome of a single execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlExecutionResult {
    /// The job completed successfully.
    Success,
    /// The job reported a failure condition.
    Failed,
    /// The job disappeared from the cluster before it completed.
    JobDeleted,
    /// The job did not complete within the allowed time and was deleted.
    JobTimeout,
}

/// Notification sent to the owner when an execution request concludes.
#[derive(Debug, Clone)]
pub struct SqlExecuted {
    pub job_name: String,
    pub server_id: String,
    pub database_name: String,
    pub result: SqlExecutionResult,
    pub output: String,
}

/// Events a [`SqlRunner`] reports to its owner.
#[derive(Debug, Clone)]
pub enum SqlRunnerEvent {
    /// An execution request reached a terminal outcome.
    Executed(SqlExecuted),
    /// A request could not even be submitted; the runner has terminated.
    StartFailed {
        server_id: String,
        database_name: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum SqlRunnerError {
    /// No Service is exposing the target server, so there is nothing to
    /// connect to.
    #[error("No service found for server '{server_id}'")]
    ServiceNotFound { server_id: String },

    /// The server Service exists but exposes no ports.
    #[error("The service '{service_name}' for server '{server_id}' exposes no ports")]
    ServiceWithoutPorts {
        service_name: String,
        server_id: String,
    },

    /// An error raised by the cluster client.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The runner task is gone and can no longer accept requests.
    #[error("The sql runner is no longer running")]
    Terminated,
}

/// Cluster operations a runner needs, over every resource kind it manages.
pub trait SqlJobCluster:
    ResourceOps<Service> + ResourceOps<Secret> + ResourceOps<ConfigMap> + ResourceOps<Job>
{
}

impl<C> SqlJobCluster for C where
    C: ResourceOps<Service> + ResourceOps<Secret> + ResourceOps<ConfigMap> + ResourceOps<Job>
{
}

/// Orchestrator of T-SQL executions for one (server, database) pair.
pub struct SqlRunner<C> {
    server: Arc<DatabaseServer>,
    database_name: String,
    exec_sql_image: String,
    cluster: C,
    owner: mpsc::Sender<SqlRunnerEvent>,
    timings: SqlRunnerTimings,
}

impl<C> SqlRunner<C> {
    pub fn new(
        server: Arc<DatabaseServer>,
        database_name: impl Into<String>,
        exec_sql_image: impl Into<String>,
        cluster: C,
        owner: mpsc::Sender<SqlRunnerEvent>,
    ) -> Self {
        Self {
            server,
            database_name: database_name.into(),
            exec_sql_image: exec_sql_image.into(),
            cluster,
            owner,
            timings: SqlRunnerTimings::default(),
        }
    }

    /// Overrides the polling timings, mainly useful in tests.
    pub fn with_timings(mut self, timings: SqlRunnerTimings) -> Self {
        self.timings = timings;
        self
    }
}

impl<C> Worker<SqlRunnerHandle, ()> for SqlRunner<C>
where
    C: SqlJobCluster + 'static,
{
    type Error = SqlRunnerError;

    async fn start(self) -> Result<SqlRunnerHandle, Self::Error> {
        let span = info_span!(
            "sql_runner",
            server_id = %self.server.id,
            database = %self.database_name,
        );

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);

        let task = RunnerTask {
            server: self.server,
            database_name: self.database_name,
            exec_sql_image: self.exec_sql_image,
            cluster: self.cluster,
            owner: self.owner,
            timings: self.timings,
            requests_rx,
            requests_closed: false,
            deferred: VecDeque::new(),
            state: RunnerState::Ready,
            poll: None,
            timeout: None,
        };

        let handle = tokio::spawn(task.run().instrument(span));

        Ok(SqlRunnerHandle {
            requests: requests_tx,
            handle: Some(handle),
        })
    }
}

/// Handle used to submit execution requests to a running [`SqlRunner`].
#[derive(Debug)]
pub struct SqlRunnerHandle {
    requests: mpsc::Sender<ExecuteSql>,
    handle: Option<JoinHandle<Result<(), SqlRunnerError>>>,
}

impl SqlRunnerHandle {
    /// Submits an execution request.
    ///
    /// Returns [`SqlRunnerError::Terminated`] if the runner task has stopped.
    pub async fn execute(&self, request: ExecuteSql) -> Result<(), SqlRunnerError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| SqlRunnerError::Terminated)
    }
}

impl WorkerHandle<()> for SqlRunnerHandle {
    fn state(&self) {}

    async fn wait(self) -> Result<(), WorkerWaitError> {
        let Self { requests, handle } = self;
        // Closing the request channel lets the runner drain its deferred
        // queue and finish.
        drop(requests);

        if let Some(handle) = handle {
            handle.await??;
        }

        Ok(())
    }
}

enum RunnerState {
    /// No job in flight; the next request is executed immediately.
    Ready,
    /// A job submitted by this runner is being polled for completion.
    ExecutingJob {
        request: ExecuteSql,
        job_name: String,
    },
    /// A job with the same name, not submitted in this run, is still active.
    /// The pending request is executed once it clears.
    WaitingForExistingJob {
        request: ExecuteSql,
        job_name: String,
    },
}

struct RunnerTask<C> {
    server: Arc<DatabaseServer>,
    database_name: String,
    exec_sql_image: String,
    cluster: C,
    owner: mpsc::Sender<SqlRunnerEvent>,
    timings: SqlRunnerTimings,
    requests_rx: mpsc::Receiver<ExecuteSql>,
    requests_closed: bool,
    deferred: VecDeque<ExecuteSql>,
    state: RunnerState,
    poll: Option<Interval>,
    timeout: Option<Pin<Box<Sleep>>>,
}

/// Resolves on the next poll tick, or never if polling is inactive.
async fn poll_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves when the completion timeout fires, or never if it is unarmed.
async fn timeout_fired(timeout: &mut Option<Pin<Box<Sleep>>>) {
    match timeout {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl<C: SqlJobCluster> RunnerTask<C> {
    async fn run(mut self) -> Result<(), SqlRunnerError> {
        loop {
            if matches!(self.state, RunnerState::Ready) {
                if let Some(request) = self.deferred.pop_front() {
                    self.try_execute(request).await?;
                    continue;
                }

                if self.requests_closed {
                    info!("all requests processed, stopping sql runner");
                    return Ok(());
                }
            }

            tokio::select! {
                biased;

                request = self.requests_rx.recv(), if !self.requests_closed => {
                    match request {
                        Some(request) => self.handle_request(request).await?,
                        None => self.requests_closed = true,
                    }
                }

                _ = poll_tick(&mut self.poll) => {
                    self.handle_poll().await?;
                }

                _ = timeout_fired(&mut self.timeout) => {
                    self.handle_timeout().await?;
                }
            }
        }
    }

    async fn handle_request(&mut self, request: ExecuteSql) -> Result<(), SqlRunnerError> {
        match &self.state {
            RunnerState::Ready => self.try_execute(request).await,
            RunnerState::ExecutingJob { job_name, .. }
            | RunnerState::WaitingForExistingJob { job_name, .. } => {
                info!(job = %job_name, "busy with another job, deferring request");
                self.deferred.push_back(request);

                Ok(())
            }
        }
    }

    /// Runs [`Self::execute`] and notifies the owner before bailing out when
    /// the request could not even be submitted.
    async fn try_execute(&mut self, request: ExecuteSql) -> Result<(), SqlRunnerError> {
        if let Err(err) = self.execute(request).await {
            let event = SqlRunnerEvent::StartFailed {
                server_id: self.server.id.clone(),
                database_name: self.database_name.clone(),
                reason: err.to_string(),
            };
            if self.owner.send(event).await.is_err() {
                warn!("the runner owner is gone, dropping start failure notification");
            }

            return Err(err);
        }

        Ok(())
    }

    async fn execute(&mut self, request: ExecuteSql) -> Result<(), SqlRunnerError> {
        // Without a reachable server there is nothing to wait for or submit,
        // so the endpoint is resolved before anything else.
        let endpoint = self.resolve_endpoint().await?;

        let job_name = resources::job_name(
            &self.server.id,
            &self.database_name,
            &request.job_name_suffix,
        );

        if let Some(job) = ResourceOps::<Job>::get(&self.cluster, &job_name).await? {
            if resources::active_pods(&job) > 0 {
                info!(job = %job_name, "a job with the same name is still active, waiting for it to clear");
                self.state = RunnerState::WaitingForExistingJob { request, job_name };
                self.start_polling();

                return Ok(());
            }

            info!(job = %job_name, "deleting finished job with the same name before resubmitting");
            ResourceOps::<Job>::delete(&self.cluster, &job_name).await?;
        }

        self.submit_job(request, job_name, endpoint).await
    }

    /// Finds the Service exposing the target server and derives the sqlcmd
    /// endpoint from it.
    async fn resolve_endpoint(&self) -> Result<String, SqlRunnerError> {
        let selector = resources::server_label_selector(&self.server.id);
        let services = ResourceOps::<Service>::list(&self.cluster, &selector).await?;
        let Some(service) = services.into_iter().next_back() else {
            error!("no service found for the target server");

            return Err(SqlRunnerError::ServiceNotFound {
                server_id: self.server.id.clone(),
            });
        };

        let Some(endpoint) = resources::service_endpoint(&service) else {
            return Err(SqlRunnerError::ServiceWithoutPorts {
                service_name: service.name_any(),
                server_id: self.server.id.clone(),
            });
        };

        Ok(endpoint)
    }

    async fn submit_job(
        &mut self,
        request: ExecuteSql,
        job_name: String,
        endpoint: String,
    ) -> Result<(), SqlRunnerError> {
        self.ensure_secret_present(&job_name).await?;
        self.ensure_config_map_present(&job_name, &endpoint, &request.sql)
            .await?;

        let job = resources::exec_sql_job(
            &job_name,
            &self.server.id,
            &self.database_name,
            &self.exec_sql_image,
            &job_name,
            &job_name,
        );
        match ResourceOps::<Job>::create(&self.cluster, &job).await {
            Ok(_) => {
                info!(job = %job_name, "submitted job");
                self.state = RunnerState::ExecutingJob { request, job_name };
                self.start_polling();

                Ok(())
            }
            Err(err) => {
                error!(job = %job_name, "failed to create job: {err}");

                Err(err.into())
            }
        }
    }

    /// Creates the credentials Secret unless one with the run's name exists.
    async fn ensure_secret_present(&self, name: &str) -> Result<(), SqlRunnerError> {
        if ResourceOps::<Secret>::get(&self.cluster, name)
            .await?
            .is_some()
        {
            info!(secret = name, "credentials secret already exists");

            return Ok(());
        }

        let secret = resources::sqlcmd_secret(name, &self.server, &self.database_name);
        match ResourceOps::<Secret>::create(&self.cluster, &secret).await {
            Ok(_) => {
                info!(secret = name, "created credentials secret");

                Ok(())
            }
            Err(err) => {
                error!(secret = name, "failed to create credentials secret: {err}");

                Err(err.into())
            }
        }
    }

    /// Creates the script ConfigMap unless one with the run's name exists.
    async fn ensure_config_map_present(
        &self,
        name: &str,
        endpoint: &str,
        sql: &str,
    ) -> Result<(), SqlRunnerError> {
        if ResourceOps::<ConfigMap>::get(&self.cluster, name)
            .await?
            .is_some()
        {
            info!(config_map = name, "script config map already exists");

            return Ok(());
        }

        let config_map = resources::sqlcmd_config_map(
            name,
            &self.server.id,
            &self.database_name,
            endpoint,
            sql,
        );
        match ResourceOps::<ConfigMap>::create(&self.cluster, &config_map).await {
            Ok(_) => {
                info!(config_map = name, "created script config map");

                Ok(())
            }
            Err(err) => {
                error!(config_map = name, "failed to create script config map: {err}");

                Err(err.into())
            }
        }
    }

    async fn handle_poll(&mut self) -> Result<(), SqlRunnerError> {
        match &self.state {
            RunnerState::Ready => Ok(()),
            RunnerState::ExecutingJob { .. } => self.poll_current_job().await,
            RunnerState::WaitingForExistingJob { .. } => self.poll_existing_job().await,
        }
    }

    async fn poll_current_job(&mut self) -> Result<(), SqlRunnerError> {
        let RunnerState::ExecutingJob { job_name, .. } = &self.state else {
            return Ok(());
        };
        let job_name = job_name.clone();

        let Some(job) = ResourceOps::<Job>::get(&self.cluster, &job_name).await? else {
            warn!(job = %job_name, "the job disappeared before completing");
            self.report(
                job_name,
                SqlExecutionResult::JobDeleted,
                "The T-SQL job was deleted before it completed.".to_owned(),
            )
            .await;
            self.become_ready();

            return Ok(());
        };

        if resources::active_pods(&job) > 0 {
            return Ok(());
        }

        // A job can briefly report no active pods and no conditions while
        // the platform updates its status; keep polling until a condition
        // shows up.
        let Some(condition) = resources::terminal_condition(&job) else {
            return Ok(());
        };

        if condition.type_ == "Complete" && condition.status == "True" {
            info!(job = %job_name, "job completed successfully");
            self.report(
                job_name,
                SqlExecutionResult::Success,
                "T-SQL executed successfully.".to_owned(),
            )
            .await;
        } else {
            let reason = condition.reason.clone().unwrap_or_default();
            let message = condition.message.clone().unwrap_or_default();
            error!(job = %job_name, %reason, "job failed: {message}");
            self.report(
                job_name.clone(),
                SqlExecutionResult::Failed,
                format!("Job {job_name} failed ({reason}): {message}"),
            )
            .await;
        }

        self.become_ready();

        Ok(())
    }

    async fn poll_existing_job(&mut self) -> Result<(), SqlRunnerError> {
        let RunnerState::WaitingForExistingJob { job_name, .. } = &self.state else {
            return Ok(());
        };
        let job_name = job_name.clone();

        let still_active = ResourceOps::<Job>::get(&self.cluster, &job_name)
            .await?
            .map(|job| resources::active_pods(&job) > 0)
            .unwrap_or(false);
        if still_active {
            return Ok(());
        }

        info!(job = %job_name, "the existing job cleared, submitting the pending request");
        let RunnerState::WaitingForExistingJob { request, .. } =
            std::mem::replace(&mut self.state, RunnerState::Ready)
        else {
            return Ok(());
        };
        self.stop_polling();

        self.try_execute(request).await
    }

    async fn handle_timeout(&mut self) -> Result<(), SqlRunnerError> {
        self.timeout = None;

        match std::mem::replace(&mut self.state, RunnerState::Ready) {
            RunnerState::Ready => Ok(()),
            RunnerState::ExecutingJob { job_name, .. } => {
                warn!(job = %job_name, "timed out waiting for the job to complete, deleting it");
                ResourceOps::<Job>::delete(&self.cluster, &job_name).await?;
                self.report(
                    job_name,
                    SqlExecutionResult::JobTimeout,
                    "Timed out waiting for the T-SQL job to complete.".to_owned(),
                )
                .await;
                self.become_ready();

                Ok(())
            }
            RunnerState::WaitingForExistingJob { request, job_name } => {
                warn!(
                    job = %job_name,
                    "timed out waiting for an existing job to clear, deleting it and proceeding",
                );
                ResourceOps::<Job>::delete(&self.cluster, &job_name).await?;
                self.stop_polling();

                self.try_execute(request).await
            }
        }
    }

    async fn report(&mut self, job_name: String, result: SqlExecutionResult, output: String) {
        let event = SqlRunnerEvent::Executed(SqlExecuted {
            job_name,
            server_id: self.server.id.clone(),
            database_name: self.database_name.clone(),
            result,
            output,
        });

        if self.owner.send(event).await.is_err() {
            warn!("the runner owner is gone, dropping execution result");
        }
    }

    fn start_polling(&mut self) {
        if self.poll.is_some() {
            warn!("polling is already active");
            return;
        }

        let mut interval = tokio::time::interval_at(
            Instant::now() + self.timings.poll_interval,
            self.timings.poll_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.poll = Some(interval);
        self.timeout = Some(Box::pin(tokio::time::sleep(self.timings.completion_timeout)));
    }

    fn stop_polling(&mut self) {
        self.poll = None;
        self.timeout = None;
    }

    fn become_ready(&mut self) {
        self.stop_polling();
        self.state = RunnerState::Ready;
    }
}
