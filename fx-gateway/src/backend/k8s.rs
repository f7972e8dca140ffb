use async_trait::async_trait;
use fx_pb::{
    CreateFunctionRequest, Function, FunctionResources, FunctionTrigger,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, Pod, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Client;
use kube::api::{
    Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{BackendResult, DeployOptions, FunctionBackend, validate_spec};
use crate::error::BackendError;

const SERVICE_LABEL: &str = "fx_service";
const RUNTIME_ANNOTATION: &str = "fx-gateway/runtime";
const TRIGGER_NAME_ANNOTATION: &str = "fx-gateway/trigger-name";
const TRIGGER_TOPIC_ANNOTATION: &str = "fx-gateway/trigger-topic";
const TRIGGER_TIME_ANNOTATION: &str = "fx-gateway/trigger-time";
const GPU_RESOURCE: &str = "nvidia.com/gpu";
const LOG_TAIL_LINES: i64 = 500;

/// Functions as a Deployment plus a ClusterIP Service of the same name, so
/// the sidecar resolves as `{name}.{namespace}`.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    opts: DeployOptions,
}

impl KubeBackend {
    pub fn new(client: Client, opts: DeployOptions) -> Self {
        Self { client, opts }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.opts.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.opts.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.opts.namespace)
    }
}

/// Maps a kube error, replacing the server message with the function name
/// for the not-found and conflict cases.
fn for_name(name: &str) -> impl Fn(kube::Error) -> BackendError + '_ {
    move |e| match BackendError::from(e) {
        BackendError::NotFound(_) => BackendError::NotFound(name.to_string()),
        BackendError::AlreadyExists(_) => {
            BackendError::AlreadyExists(name.to_string())
        }
        other => other,
    }
}

pub(crate) fn selector(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(SERVICE_LABEL.to_string(), name.to_string())])
}

fn quantities(res: &FunctionResources) -> Option<BTreeMap<String, Quantity>> {
    let mut map = BTreeMap::new();
    if !res.memory.is_empty() {
        map.insert("memory".to_string(), Quantity(res.memory.clone()));
    }
    if !res.cpu.is_empty() {
        map.insert("cpu".to_string(), Quantity(res.cpu.clone()));
    }
    if !res.gpu.is_empty() {
        map.insert(GPU_RESOURCE.to_string(), Quantity(res.gpu.clone()));
    }
    if map.is_empty() { None } else { Some(map) }
}

fn resources_from(
    map: Option<&BTreeMap<String, Quantity>>,
) -> Option<FunctionResources> {
    let map = map?;
    let get = |k: &str| map.get(k).map(|q| q.0.clone()).unwrap_or_default();
    Some(FunctionResources {
        memory: get("memory"),
        cpu: get("cpu"),
        gpu: get(GPU_RESOURCE),
    })
}

/// `key=value` constraints become node selector terms.
fn node_selector(constraints: &[String]) -> Option<BTreeMap<String, String>> {
    let map: BTreeMap<String, String> = constraints
        .iter()
        .filter_map(|c| c.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect();
    if map.is_empty() { None } else { Some(map) }
}

fn probe(opts: &DeployOptions) -> Probe {
    let port = IntOrString::Int(opts.fxwatcher_port as i32);
    let mut probe = Probe {
        initial_delay_seconds: Some(2),
        period_seconds: Some(5),
        timeout_seconds: Some(1),
        ..Default::default()
    };
    if opts.enable_http_probe {
        probe.http_get = Some(HTTPGetAction {
            path: Some("/_/health".to_string()),
            port,
            ..Default::default()
        });
    } else {
        probe.tcp_socket = Some(TCPSocketAction { port, host: None });
    }
    probe
}

pub(crate) fn render_deployment(
    spec: &CreateFunctionRequest,
    replicas: i32,
    opts: &DeployOptions,
) -> Deployment {
    let name = spec.service.clone();
    let mut labels: BTreeMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.extend(selector(&name));

    let mut annotations: BTreeMap<String, String> = spec
        .annotations
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !spec.runtime.is_empty() {
        annotations.insert(RUNTIME_ANNOTATION.into(), spec.runtime.clone());
    }
    if let Some(t) = &spec.trigger {
        annotations.insert(TRIGGER_NAME_ANNOTATION.into(), t.name.clone());
        annotations.insert(TRIGGER_TOPIC_ANNOTATION.into(), t.topic.clone());
        annotations.insert(TRIGGER_TIME_ANNOTATION.into(), t.time.clone());
    }

    let mut env: Vec<EnvVar> = spec
        .env_vars
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();
    env.sort_by(|a, b| a.name.cmp(&b.name));

    let (volumes, mounts): (Vec<Volume>, Vec<VolumeMount>) = spec
        .secrets
        .iter()
        .map(|secret| {
            let volume = Volume {
                name: format!("{}-secret", secret),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let mount = VolumeMount {
                name: format!("{}-secret", secret),
                mount_path: format!(
                    "{}/{}",
                    opts.secret_mount_path.trim_end_matches('/'),
                    secret
                ),
                read_only: Some(true),
                ..Default::default()
            };
            (volume, mount)
        })
        .unzip();

    let container = Container {
        name: name.clone(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(opts.image_pull_policy.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        ports: Some(vec![ContainerPort {
            name: Some("grpc".to_string()),
            container_port: opts.fxwatcher_port as i32,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            limits: spec.limits.as_ref().and_then(quantities),
            requests: spec.requests.as_ref().and_then(quantities),
            ..Default::default()
        }),
        liveness_probe: Some(probe(opts)),
        readiness_probe: Some(probe(opts)),
        volume_mounts: if mounts.is_empty() { None } else { Some(mounts) },
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(opts.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(annotations.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector(&name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name.clone()),
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: if volumes.is_empty() {
                        None
                    } else {
                        Some(volumes)
                    },
                    node_selector: node_selector(&spec.constraints),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn render_service(name: &str, opts: &DeployOptions) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(opts.namespace.clone()),
            labels: Some(selector(name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector(name)),
            ports: Some(vec![ServicePort {
                name: Some("grpc".to_string()),
                port: opts.fxwatcher_port as i32,
                target_port: Some(IntOrString::Int(
                    opts.fxwatcher_port as i32,
                )),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn function_from_deployment(dep: &Deployment) -> Function {
    let meta = &dep.metadata;
    let mut annotations = meta.annotations.clone().unwrap_or_default();
    let runtime = annotations.remove(RUNTIME_ANNOTATION).unwrap_or_default();
    let trigger_name = annotations.remove(TRIGGER_NAME_ANNOTATION);
    let trigger_topic = annotations.remove(TRIGGER_TOPIC_ANNOTATION);
    let trigger_time = annotations.remove(TRIGGER_TIME_ANNOTATION);
    let trigger = if trigger_name.is_some()
        || trigger_topic.is_some()
        || trigger_time.is_some()
    {
        Some(FunctionTrigger {
            name: trigger_name.unwrap_or_default(),
            topic: trigger_topic.unwrap_or_default(),
            time: trigger_time.unwrap_or_default(),
        })
    } else {
        None
    };

    let container = dep
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first());
    let resources = container.and_then(|c| c.resources.as_ref());

    Function {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        image: container.and_then(|c| c.image.clone()).unwrap_or_default(),
        runtime,
        limits: resources_from(resources.and_then(|r| r.limits.as_ref())),
        requests: resources_from(resources.and_then(|r| r.requests.as_ref())),
        trigger,
        replicas: dep
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or_default()
            .max(0) as u64,
        available_replicas: dep
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or_default()
            .max(0) as u64,
        labels: meta
            .labels
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect(),
        annotations: annotations.into_iter().collect(),
        ..Default::default()
    }
}

#[async_trait]
impl FunctionBackend for KubeBackend {
    async fn create(&self, spec: &CreateFunctionRequest) -> BackendResult<()> {
        validate_spec(spec)?;
        let name = spec.service.as_str();
        let api = self.deployments();
        if api.get_opt(name).await.map_err(for_name(name))?.is_some() {
            return Err(BackendError::AlreadyExists(name.to_string()));
        }
        let dep = render_deployment(spec, 1, &self.opts);
        api.create(&PostParams::default(), &dep)
            .await
            .map_err(for_name(name))?;
        debug!(name, "created deployment");

        let svc = render_service(name, &self.opts);
        match self.services().create(&PostParams::default(), &svc).await {
            Ok(_) => {}
            Err(e) => match for_name(name)(e) {
                BackendError::AlreadyExists(_) => {
                    debug!(name, "service already present")
                }
                other => return Err(other),
            },
        }
        info!(name, namespace = %self.opts.namespace, "function deployed");
        Ok(())
    }

    async fn get(&self, name: &str) -> BackendResult<Function> {
        let dep = self.deployments().get(name).await.map_err(for_name(name))?;
        Ok(function_from_deployment(&dep))
    }

    async fn list(&self) -> BackendResult<Vec<Function>> {
        let lp = ListParams::default().labels(SERVICE_LABEL);
        let deps = self.deployments().list(&lp).await?;
        Ok(deps.items.iter().map(function_from_deployment).collect())
    }

    async fn update(&self, spec: &CreateFunctionRequest) -> BackendResult<()> {
        validate_spec(spec)?;
        let name = spec.service.as_str();
        let api = self.deployments();
        let existing = api.get(name).await.map_err(for_name(name))?;
        let replicas = existing
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let mut dep = render_deployment(spec, replicas, &self.opts);
        dep.metadata.resource_version = existing.metadata.resource_version;
        api.replace(name, &PostParams::default(), &dep)
            .await
            .map_err(for_name(name))?;
        info!(name, "function updated");
        Ok(())
    }

    async fn delete(&self, name: &str) -> BackendResult<()> {
        self.deployments()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(for_name(name))?;
        if let Err(e) =
            self.services().delete(name, &DeleteParams::default()).await
        {
            warn!(name, error = %e, "failed to delete function service");
        }
        info!(name, "function deleted");
        Ok(())
    }

    async fn scale(&self, name: &str, replicas: u64) -> BackendResult<()> {
        let replicas = i32::try_from(replicas).map_err(|_| {
            BackendError::Invalid(format!("replicas {} out of range", replicas))
        })?;
        let patch = json!({"spec": {"replicas": replicas}});
        self.deployments()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(for_name(name))?;
        info!(name, replicas, "function scaled");
        Ok(())
    }

    async fn logs(&self, name: &str) -> BackendResult<String> {
        // Fail with not-found for unknown functions rather than empty text.
        self.deployments().get(name).await.map_err(for_name(name))?;
        let label = format!("{}={}", SERVICE_LABEL, name);
        let pods =
            self.pods().list(&ListParams::default().labels(&label)).await?;
        let lp = LogParams {
            tail_lines: Some(LOG_TAIL_LINES),
            ..Default::default()
        };
        let mut out = String::new();
        for pod in pods.items {
            let Some(pod_name) = pod.metadata.name else {
                continue;
            };
            let text = self.pods().logs(&pod_name, &lp).await?;
            out.push_str(&text);
        }
        Ok(out)
    }

    async fn version(&self) -> BackendResult<String> {
        let info = self.client.apiserver_version().await?;
        Ok(format!("kubernetes {} ({})", info.git_version, info.platform))
    }
}
