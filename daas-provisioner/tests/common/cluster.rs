//! In-memory cluster used to drive the orchestration actors in tests.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use daas_provisioner::k8s::{
    ClusterError, ResourceChange, ResourceEvent, ResourceEventStream, ResourceOps,
};

/// What happens to a job as soon as it is created.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The job immediately reports a `Complete` condition.
    Complete,
    /// The job immediately reports a `Failed` condition.
    Failed { reason: String, message: String },
    /// The job stays active and never reaches a terminal condition.
    Active,
}

#[derive(Default)]
struct State {
    services: BTreeMap<String, Service>,
    secrets: BTreeMap<String, Secret>,
    config_maps: BTreeMap<String, ConfigMap>,
    jobs: BTreeMap<String, Job>,
    secret_creates: usize,
    config_map_creates: usize,
    job_creates: usize,
    job_outcome: Option<JobOutcome>,
    service_watchers: Vec<mpsc::UnboundedSender<Result<ResourceEvent<Service>, ClusterError>>>,
}

/// Scriptable [`ResourceOps`] implementation backed by in-memory maps.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Registers a Service exposing a server under the standard label.
    pub fn add_service(&self, name: &str, server_id: &str, port: i32) {
        let service = service(name, server_id, port);
        self.state().services.insert(name.to_owned(), service);
    }

    /// Scripts the status every subsequently created job starts with.
    pub fn set_job_outcome(&self, outcome: JobOutcome) {
        self.state().job_outcome = Some(outcome);
    }

    /// Inserts a job as if something else had created it.
    pub fn insert_job(&self, name: &str, active: i32) {
        let job = Job {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            status: Some(JobStatus {
                active: Some(active),
                ..JobStatus::default()
            }),
            ..Job::default()
        };
        self.state().jobs.insert(name.to_owned(), job);
    }

    /// Marks an existing job as no longer having active pods.
    pub fn deactivate_job(&self, name: &str) {
        if let Some(job) = self.state().jobs.get_mut(name) {
            job.status.get_or_insert_with(JobStatus::default).active = Some(0);
        }
    }

    /// Removes a job as if something else had deleted it.
    pub fn remove_job(&self, name: &str) {
        self.state().jobs.remove(name);
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.state().jobs.contains_key(name)
    }

    pub fn has_secret(&self, name: &str) -> bool {
        self.state().secrets.contains_key(name)
    }

    pub fn has_config_map(&self, name: &str) -> bool {
        self.state().config_maps.contains_key(name)
    }

    /// Pre-creates a credentials secret under the given name.
    pub fn insert_secret(&self, name: &str) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        };
        self.state().secrets.insert(name.to_owned(), secret);
    }

    /// Pre-creates a script config map under the given name.
    pub fn insert_config_map(&self, name: &str) {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        };
        self.state().config_maps.insert(name.to_owned(), config_map);
    }

    pub fn secret_creates(&self) -> usize {
        self.state().secret_creates
    }

    pub fn config_map_creates(&self) -> usize {
        self.state().config_map_creates
    }

    pub fn job_creates(&self) -> usize {
        self.state().job_creates
    }

    /// Emits a Service change event on every open watch stream.
    pub fn publish_service_event(&self, change: ResourceChange, service: Service) {
        let event = ResourceEvent {
            change,
            resource: service,
        };
        self.state()
            .service_watchers
            .retain(|watcher| watcher.send(Ok(event.clone())).is_ok());
    }
}

/// Builds a Service exposing a server under the standard label.
pub fn service(name: &str, server_id: &str, port: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("default".to_owned()),
            labels: Some(BTreeMap::from([(
                "server-id".to_owned(),
                server_id.to_owned(),
            )])),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

fn labels_match(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    selector.split(',').all(|pair| match pair.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => false,
    })
}

fn name_of(metadata: &ObjectMeta) -> String {
    metadata.name.clone().unwrap_or_default()
}

fn scripted_status(outcome: &Option<JobOutcome>) -> Option<JobStatus> {
    let outcome = outcome.as_ref()?;

    let status = match outcome {
        JobOutcome::Complete => JobStatus {
            active: Some(0),
            succeeded: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_owned(),
                status: "True".to_owned(),
                ..JobCondition::default()
            }]),
            ..JobStatus::default()
        },
        JobOutcome::Failed { reason, message } => JobStatus {
            active: Some(0),
            failed: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_owned(),
                status: "True".to_owned(),
                reason: Some(reason.clone()),
                message: Some(message.clone()),
                ..JobCondition::default()
            }]),
            ..JobStatus::default()
        },
        JobOutcome::Active => JobStatus {
            active: Some(1),
            ..JobStatus::default()
        },
    };

    Some(status)
}

#[async_trait]
impl ResourceOps<Service> for FakeCluster {
    async fn list(&self, label_selector: &str) -> Result<Vec<Service>, ClusterError> {
        let services = self
            .state()
            .services
            .values()
            .filter(|service| labels_match(label_selector, service.metadata.labels.as_ref()))
            .cloned()
            .collect();

        Ok(services)
    }

    async fn get(&self, name: &str) -> Result<Option<Service>, ClusterError> {
        Ok(self.state().services.get(name).cloned())
    }

    async fn create(&self, resource: &Service) -> Result<Service, ClusterError> {
        self.state()
            .services
            .insert(name_of(&resource.metadata), resource.clone());

        Ok(resource.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        self.state().services.remove(name);

        Ok(())
    }

    async fn watch_all(&self) -> Result<ResourceEventStream<Service>, ClusterError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().service_watchers.push(tx);

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[async_trait]
impl ResourceOps<Secret> for FakeCluster {
    async fn list(&self, label_selector: &str) -> Result<Vec<Secret>, ClusterError> {
        let secrets = self
            .state()
            .secrets
            .values()
            .filter(|secret| labels_match(label_selector, secret.metadata.labels.as_ref()))
            .cloned()
            .collect();

        Ok(secrets)
    }

    async fn get(&self, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.state().secrets.get(name).cloned())
    }

    async fn create(&self, resource: &Secret) -> Result<Secret, ClusterError> {
        let mut state = self.state();
        state.secret_creates += 1;
        state
            .secrets
            .insert(name_of(&resource.metadata), resource.clone());

        Ok(resource.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        self.state().secrets.remove(name);

        Ok(())
    }

    async fn watch_all(&self) -> Result<ResourceEventStream<Secret>, ClusterError> {
        Ok(stream::pending().boxed())
    }
}

#[async_trait]
impl ResourceOps<ConfigMap> for FakeCluster {
    async fn list(&self, label_selector: &str) -> Result<Vec<ConfigMap>, ClusterError> {
        let config_maps = self
            .state()
            .config_maps
            .values()
            .filter(|config_map| labels_match(label_selector, config_map.metadata.labels.as_ref()))
            .cloned()
            .collect();

        Ok(config_maps)
    }

    async fn get(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        Ok(self.state().config_maps.get(name).cloned())
    }

    async fn create(&self, resource: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        let mut state = self.state();
        state.config_map_creates += 1;
        state
            .config_maps
            .insert(name_of(&resource.metadata), resource.clone());

        Ok(resource.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        self.state().config_maps.remove(name);

        Ok(())
    }

    async fn watch_all(&self) -> Result<ResourceEventStream<ConfigMap>, ClusterError> {
        Ok(stream::pending().boxed())
    }
}

#[async_trait]
impl ResourceOps<Job> for FakeCluster {
    async fn list(&self, label_selector: &str) -> Result<Vec<Job>, ClusterError> {
        let jobs = self
            .state()
            .jobs
            .values()
            .filter(|job| labels_match(label_selector, job.metadata.labels.as_ref()))
            .cloned()
            .collect();

        Ok(jobs)
    }

    async fn get(&self, name: &str) -> Result<Option<Job>, ClusterError> {
        Ok(self.state().jobs.get(name).cloned())
    }

    async fn create(&self, resource: &Job) -> Result<Job, ClusterError> {
        let mut state = self.state();
        state.job_creates += 1;

        let mut job = resource.clone();
        job.status = scripted_status(&state.job_outcome);
        state.jobs.insert(name_of(&job.metadata), job.clone());

        Ok(job)
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        self.state().jobs.remove(name);

        Ok(())
    }

    async fn watch_all(&self) -> Result<ResourceEventStream<Job>, ClusterError> {
        Ok(stream::pending().boxed())
    }
}
