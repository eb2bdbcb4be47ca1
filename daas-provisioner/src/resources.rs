//! Deterministic names and desired-state specs for the sqlcmd job trio.
//!
//! All functions here are pure: the same (server, database, suffix) triple
//! always maps to the same Secret, ConfigMap, and Job names, which is what
//! makes re-submission idempotent and "find existing" checks safe.

use k8s_openapi::ByteString;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, Secret,
    SecretVolumeSource, Service, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::model::DatabaseServer;

/// Label carrying the id of the server a resource belongs to.
pub const SERVER_ID_LABEL: &str = "server-id";

/// Label carrying the name of the database a resource targets.
pub const DATABASE_LABEL: &str = "database";

/// Label tagging resources created for one-shot T-SQL execution.
pub const ACTION_LABEL: &str = "action";

/// Value of [`ACTION_LABEL`] for the sqlcmd job trio.
pub const EXEC_SQL_ACTION: &str = "exec-sql";

/// Login used for administrative T-SQL execution.
const DATABASE_USER: &str = "sa";

/// Mount path of the script ConfigMap inside the job container.
const SCRIPT_MOUNT_PATH: &str = "/sql-scripts";

/// Mount path of the credentials Secret inside the job container.
const SECRETS_MOUNT_PATH: &str = "/sql-secrets";

/// Computes the deterministic name shared by the Secret, ConfigMap, and Job
/// of one run identity.
pub fn job_name(server_id: &str, database_name: &str, suffix: &str) -> String {
    format!("sqlcmd-{server_id}-{database_name}-{suffix}")
}

/// Label selector matching the Service of a specific server.
pub fn server_label_selector(server_id: &str) -> String {
    format!("{SERVER_ID_LABEL}={server_id}")
}

/// Labels applied to every resource of the sqlcmd job trio.
pub fn exec_sql_labels(server_id: &str, database_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVER_ID_LABEL.to_owned(), server_id.to_owned()),
        (DATABASE_LABEL.to_owned(), database_name.to_owned()),
        (ACTION_LABEL.to_owned(), EXEC_SQL_ACTION.to_owned()),
    ])
}

/// Resolves a Service into the `host,port` endpoint consumed by sqlcmd.
///
/// Returns [`None`] if the Service has no name or exposes no ports.
pub fn service_endpoint(service: &Service) -> Option<String> {
    let name = service.metadata.name.as_deref()?;
    let namespace = service.metadata.namespace.as_deref().unwrap_or("default");
    let port = service.spec.as_ref()?.ports.as_ref()?.first()?.port;

    Some(format!("{name}.{namespace}.svc.cluster.local,{port}"))
}

/// Number of pods a job currently has running.
pub fn active_pods(job: &Job) -> i32 {
    job.status
        .as_ref()
        .and_then(|status| status.active)
        .unwrap_or(0)
}

/// Selects the most specific terminal condition of a finished job.
///
/// The platform can report multiple conditions; a `Complete` condition with
/// status `True` wins over `Failed`, which wins over whatever was reported
/// first. Returns [`None`] when no condition has been reported yet.
pub fn terminal_condition(job: &Job) -> Option<&JobCondition> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;

    conditions
        .iter()
        .find(|condition| condition.type_ == "Complete" && condition.status == "True")
        .or_else(|| {
            conditions
                .iter()
                .find(|condition| condition.type_ == "Failed" && condition.status == "True")
        })
        .or_else(|| conditions.first())
}

/// Builds the credentials Secret for one run identity.
///
/// Carries the administrative login as discrete keys plus the `secrets.sql`
/// sqlcmd preamble that binds them to script variables.
pub fn sqlcmd_secret(name: &str, server: &DatabaseServer, database_name: &str) -> Secret {
    let admin_password = server.admin_password.expose();
    let setvars = format!(
        ":setvar DatabaseName '{database_name}'\n\
         :setvar DatabaseUser '{DATABASE_USER}'\n\
         :setvar DatabasePassword '{admin_password}'\n"
    );

    let data = BTreeMap::from([
        (
            "database-user".to_owned(),
            ByteString(DATABASE_USER.as_bytes().to_vec()),
        ),
        (
            "database-password".to_owned(),
            ByteString(admin_password.as_bytes().to_vec()),
        ),
        ("secrets.sql".to_owned(), ByteString(setvars.into_bytes())),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(exec_sql_labels(&server.id, database_name)),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_owned()),
        data: Some(data),
        ..Secret::default()
    }
}

/// Builds the script ConfigMap for one run identity.
pub fn sqlcmd_config_map(
    name: &str,
    server_id: &str,
    database_name: &str,
    endpoint: &str,
    sql: &str,
) -> ConfigMap {
    let data = BTreeMap::from([
        ("database-server".to_owned(), endpoint.to_owned()),
        ("database-name".to_owned(), database_name.to_owned()),
        ("script.sql".to_owned(), sql.to_owned()),
    ]);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(exec_sql_labels(server_id, database_name)),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..ConfigMap::default()
    }
}

/// Builds the one-shot Job that runs sqlcmd against the target database.
///
/// The job mounts the credentials Secret and script ConfigMap created for
/// the same run identity and reads connection details from the mounted
/// files, so the spec itself carries no secrets.
pub fn exec_sql_job(
    name: &str,
    server_id: &str,
    database_name: &str,
    image: &str,
    secret_name: &str,
    config_map_name: &str,
) -> Job {
    let labels = exec_sql_labels(server_id, database_name);

    let run_sqlcmd = format!(
        "sqlcmd -b \
         -S \"$(cat {SCRIPT_MOUNT_PATH}/database-server)\" \
         -U \"$(cat {SECRETS_MOUNT_PATH}/database-user)\" \
         -P \"$(cat {SECRETS_MOUNT_PATH}/database-password)\" \
         -d \"$(cat {SCRIPT_MOUNT_PATH}/database-name)\" \
         -i {SECRETS_MOUNT_PATH}/secrets.sql,{SCRIPT_MOUNT_PATH}/script.sql"
    );

    let container = Container {
        name: "sqlcmd".to_owned(),
        image: Some(image.to_owned()),
        command: Some(vec!["/bin/sh".to_owned(), "-c".to_owned()]),
        args: Some(vec![run_sqlcmd]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "sql-scripts".to_owned(),
                mount_path: SCRIPT_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..VolumeMount::default()
            },
            VolumeMount {
                name: "sql-secrets".to_owned(),
                mount_path: SECRETS_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..VolumeMount::default()
            },
        ]),
        ..Container::default()
    };

    let pod_spec = PodSpec {
        restart_policy: Some("Never".to_owned()),
        containers: vec![container],
        volumes: Some(vec![
            Volume {
                name: "sql-scripts".to_owned(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(config_map_name.to_owned()),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            },
            Volume {
                name: "sql-secrets".to_owned(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.to_owned()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            },
        ]),
        ..PodSpec::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            completions: Some(1),
            parallelism: Some(1),
            // A failed pod should fail the job immediately instead of being
            // retried with a stale script.
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(pod_spec),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}
