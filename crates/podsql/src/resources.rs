//! Kubernetes Resource Builders
//!
//! This module generates the Pod, Secret and ConfigMap manifests for one
//! workload from a [`DbCommander`]. The Secret and ConfigMap carry a
//! controller owner reference to the created Pod, so deleting the Pod
//! removes them too.

use crate::commander::{DbCommander, PASSWORD_KEY, SCRIPT_DIR, SCRIPT_KEY, USERNAME_KEY};
use crate::error::{PodsqlError, Result};
use crate::naming::WorkloadName;
use chrono_tz::Tz;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, Pod, PodSpec, Secret,
    SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

/// Label marking every object this tool creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label carrying the engine tag
pub const ENGINE_LABEL: &str = "podsql.io/engine";

/// Name of the script volume inside the pod
pub const SCRIPT_VOLUME: &str = "query-volume";

/// Secret type holding a user name and password
pub const BASIC_AUTH_TYPE: &str = "kubernetes.io/basic-auth";

/// Keeps an exec pod alive until the session attaches and finishes
const KEEP_ALIVE_COMMAND: &str = "tail -f /dev/null";

/// Builder for the objects of one workload
pub struct ResourceBuilder<'a> {
    commander: &'a dyn DbCommander,
    name: &'a WorkloadName,
    namespace: String,
    timezone: Tz,
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder
    pub fn new(
        commander: &'a dyn DbCommander,
        name: &'a WorkloadName,
        namespace: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            commander,
            name,
            namespace: namespace.into(),
            timezone,
        }
    }

    /// Container name, equal to the engine tag
    pub fn container_name(&self) -> &'static str {
        self.commander.engine().tag()
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), "podsql".to_string()),
            (ENGINE_LABEL.to_string(), self.commander.engine().tag().to_string()),
        ])
    }

    fn metadata(&self, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    /// Get the owner reference pointing at the created pod
    fn owner_reference(&self, owner: &Pod) -> Result<OwnerReference> {
        let uid = owner.metadata.uid.clone().ok_or_else(|| {
            PodsqlError::Resource(format!("pod {} has no uid", self.name))
        })?;

        Ok(OwnerReference {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            name: owner
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| self.name.to_string()),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }

    fn env(&self) -> Vec<EnvVar> {
        let secret_name = self.name.secret_name();

        // Secret references, sorted by variable name
        let mut env: Vec<EnvVar> = self
            .commander
            .secret_env()
            .into_iter()
            .map(|(var, key)| EnvVar {
                name: var.to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret_name.clone(),
                        key: key.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        env.push(EnvVar {
            name: "TZ".to_string(),
            value: Some(self.timezone.name().to_string()),
            ..Default::default()
        });
        env
    }

    fn build_container(
        &self,
        command: String,
        volume_mounts: Option<Vec<VolumeMount>>,
    ) -> Container {
        Container {
            name: self.container_name().to_string(),
            image: Some(self.commander.container_image().to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command]),
            env: Some(self.env()),
            volume_mounts,
            ..Default::default()
        }
    }

    fn build_pod(&self, container: Container, volumes: Option<Vec<Volume>>) -> Pod {
        Pod {
            metadata: self.metadata(self.name.to_string()),
            spec: Some(PodSpec {
                containers: vec![container],
                volumes,
                restart_policy: Some("Never".to_string()),
                automount_service_account_token: Some(false),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Build the idle pod an interactive session attaches to
    pub fn build_exec_pod(&self) -> Pod {
        let container = self.build_container(KEEP_ALIVE_COMMAND.to_string(), None);
        self.build_pod(container, None)
    }

    /// Build the pod that runs the batch command to completion
    pub fn build_run_pod(&self) -> Pod {
        let mounts = vec![VolumeMount {
            name: SCRIPT_VOLUME.to_string(),
            mount_path: SCRIPT_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        }];
        let volumes = vec![Volume {
            name: SCRIPT_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.name.config_map_name(),
                ..Default::default()
            }),
            ..Default::default()
        }];

        let container = self.build_container(self.commander.command(), Some(mounts));
        self.build_pod(container, Some(volumes))
    }

    /// Build the credential Secret owned by `owner`
    pub fn build_secret(&self, owner: &Pod) -> Result<Secret> {
        let info = self.commander.connect_info();
        let mut metadata = self.metadata(self.name.secret_name());
        metadata.owner_references = Some(vec![self.owner_reference(owner)?]);

        Ok(Secret {
            metadata,
            type_: Some(BASIC_AUTH_TYPE.to_string()),
            string_data: Some(BTreeMap::from([
                (USERNAME_KEY.to_string(), info.user_or_empty().to_string()),
                (PASSWORD_KEY.to_string(), info.password_or_empty().to_string()),
            ])),
            ..Default::default()
        })
    }

    /// Build the script ConfigMap owned by `owner`
    pub fn build_config_map(&self, owner: &Pod) -> Result<ConfigMap> {
        let mut metadata = self.metadata(self.name.config_map_name());
        metadata.owner_references = Some(vec![self.owner_reference(owner)?]);

        Ok(ConfigMap {
            metadata,
            data: Some(BTreeMap::from([(
                SCRIPT_KEY.to_string(),
                self.commander.query(),
            )])),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commander::Engine;

    fn commander(engine: Engine, args: &[&str]) -> Box<dyn DbCommander> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        engine.parse_args(&args).unwrap()
    }

    fn created(pod: Pod) -> Pod {
        let mut pod = pod;
        pod.metadata.uid = Some("uid-123".to_string());
        pod
    }

    #[test]
    fn test_exec_pod_shape() {
        let commander = commander(Engine::MySql, &["-h", "db", "-u", "app", "-p", "pw"]);
        let name = WorkloadName::from_pod_name("podsql-mysql-test");
        let builder =
            ResourceBuilder::new(commander.as_ref(), &name, "team-a", chrono_tz::Europe::Berlin);
        let pod = builder.build_exec_pod();

        assert_eq!(pod.metadata.name.as_deref(), Some("podsql-mysql-test"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("team-a"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(ENGINE_LABEL).map(String::as_str), Some("mysql"));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert!(spec.volumes.is_none());

        let container = &spec.containers[0];
        assert_eq!(container.name, "mysql");
        assert_eq!(container.image.as_deref(), Some("mysql:8.0"));
        assert_eq!(
            container.command.as_ref().unwrap(),
            &vec!["/bin/sh".to_string(), "-c".to_string(), "tail -f /dev/null".to_string()]
        );

        let env = container.env.as_ref().unwrap();
        let names: Vec<_> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["MYSQL_PWD", "SECRET_DB_USER", "TZ"]);
        assert_eq!(env[2].value.as_deref(), Some("Europe/Berlin"));

        let secret_ref = env[0]
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret_ref.name, "podsql-mysql-test-secret");
        assert_eq!(secret_ref.key, "password");
    }

    #[test]
    fn test_run_pod_mounts_script() {
        let commander = commander(Engine::Postgres, &["-h", "db", "-c", "SELECT 1;"]);
        let name = WorkloadName::from_pod_name("podsql-postgres-test");
        let builder = ResourceBuilder::new(commander.as_ref(), &name, "default", chrono_tz::UTC);
        let spec = builder.build_run_pod().spec.unwrap();

        let container = &spec.containers[0];
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[2], commander.command());

        let mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, SCRIPT_VOLUME);
        assert_eq!(mount.mount_path, "/sql");
        assert_eq!(mount.read_only, Some(true));

        let volume = &spec.volumes.as_ref().unwrap()[0];
        let source = volume.config_map.as_ref().unwrap();
        assert_eq!(source.name, "podsql-postgres-test-cm");
    }

    #[test]
    fn test_attachments_are_owned_by_pod() {
        let commander = commander(
            Engine::SqlCmd,
            &["-S", "db", "-U", "sa", "-P", "pw", "-Q", "SELECT 1"],
        );
        let name = WorkloadName::from_pod_name("podsql-sqlcmd-test");
        let builder = ResourceBuilder::new(commander.as_ref(), &name, "default", chrono_tz::UTC);
        let pod = created(builder.build_run_pod());

        let secret = builder.build_secret(&pod).unwrap();
        assert_eq!(secret.type_.as_deref(), Some(BASIC_AUTH_TYPE));
        let data = secret.string_data.as_ref().unwrap();
        assert_eq!(data.get("username").map(String::as_str), Some("sa"));
        assert_eq!(data.get("password").map(String::as_str), Some("pw"));

        let owner = &secret.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Pod");
        assert_eq!(owner.uid, "uid-123");
        assert_eq!(owner.controller, Some(true));

        let cm = builder.build_config_map(&pod).unwrap();
        assert_eq!(cm.metadata.name.as_deref(), Some("podsql-sqlcmd-test-cm"));
        assert_eq!(
            cm.data.as_ref().unwrap().get("query.sql").map(String::as_str),
            Some("SELECT 1")
        );
    }

    #[test]
    fn test_owner_without_uid_is_rejected() {
        let commander = commander(Engine::MySql, &["-e", "SELECT 1"]);
        let name = WorkloadName::from_pod_name("podsql-mysql-test");
        let builder = ResourceBuilder::new(commander.as_ref(), &name, "default", chrono_tz::UTC);
        let err = builder.build_secret(&builder.build_exec_pod()).unwrap_err();
        assert!(matches!(err, PodsqlError::Resource(_)));
    }
}
