//! Executor for a live cluster
//!
//! Objects are applied with Server-Side Apply through dynamic APIs resolved
//! by discovery, so no compile-time type knowledge is needed. Deletion uses
//! background propagation and treats a missing object as already deleted.

use async_trait::async_trait;
use charter_core::{Object, ObjectStream, Settings};
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use semver::Version;
use std::sync::Arc;

use super::{ClusterExecutor, ExecOptions, ExecScope, LabelSelector, selector_string};
use crate::error::{KubeError, Result};
use crate::progress::ProgressNode;

/// Executor applying objects to a Kubernetes cluster
#[derive(Clone)]
pub struct KubeExecutor {
    client: Client,
    discovery: Arc<Discovery>,
    scope: ExecScope,
}

impl KubeExecutor {
    /// Connect using the default kubeconfig or in-cluster configuration
    pub async fn connect(
        settings: Arc<Settings>,
        namespace: &str,
        progress: ProgressNode,
    ) -> Result<Self> {
        let client = Client::try_default().await?;
        Self::with_client(client, settings, namespace, progress).await
    }

    /// Create from an existing client, running discovery once
    pub async fn with_client(
        client: Client,
        settings: Arc<Settings>,
        namespace: &str,
        progress: ProgressNode,
    ) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        tracing::debug!(groups = discovery.groups().count(), "cluster discovery complete");
        Ok(Self {
            client,
            discovery: Arc::new(discovery),
            scope: ExecScope::root(settings, namespace, progress),
        })
    }

    /// Resolve a full object type
    fn resolve_object(&self, object: &Object) -> Result<(ApiResource, ApiCapabilities)> {
        let gvk = gvk_from_api_version(&object.api_version, &object.kind);
        self.discovery.resolve_gvk(&gvk).ok_or_else(|| {
            KubeError::executor(
                format!("apply {} '{}'", object.kind, object.name()),
                format!("unknown resource type {}/{}", object.api_version, object.kind),
            )
        })
    }

    /// Resolve a bare kind name (case-insensitive) using preferred versions
    fn resolve_kind(&self, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        self.discovery
            .groups()
            .flat_map(|group| group.recommended_resources())
            .find(|(resource, _)| resource.kind.eq_ignore_ascii_case(kind))
            .ok_or_else(|| KubeError::executor(format!("resolve {kind}"), "unknown resource kind"))
    }

    fn api(
        &self,
        resource: &ApiResource,
        capabilities: &ApiCapabilities,
        namespace: &str,
    ) -> Api<DynamicObject> {
        if capabilities.scope == Scope::Namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, resource)
        } else {
            Api::all_with(self.client.clone(), resource)
        }
    }

    async fn apply_one(&self, object: &Object, opts: &ExecOptions) -> Result<()> {
        let (resource, capabilities) = self.resolve_object(object)?;
        let api = self.api(&resource, &capabilities, object.namespace());
        let dynamic = to_dynamic(object)?;

        let mut params = PatchParams::apply(&self.scope.settings.field_manager);
        params.force = true;

        opts.call_context()
            .run(async {
                api.patch(object.name(), &params, &Patch::Apply(&dynamic))
                    .await
                    .map_err(|e| classify(e, &object.kind, object.name()))
            })
            .await?;
        tracing::debug!(kind = %object.kind, name = %object.name(), "applied");
        Ok(())
    }

    async fn delete_one(&self, object: &Object, opts: &ExecOptions) -> Result<()> {
        let (resource, capabilities) = self.resolve_object(object)?;
        let api = self.api(&resource, &capabilities, object.namespace());

        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };

        let result = opts
            .call_context()
            .run(async {
                api.delete(object.name(), &params)
                    .await
                    .map_err(|e| classify(e, &object.kind, object.name()))
            })
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(kind = %object.kind, name = %object.name(), "deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(kind = %object.kind, name = %object.name(), "already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ClusterExecutor for KubeExecutor {
    fn namespace(&self) -> &str {
        &self.scope.namespace
    }

    async fn apply(&self, stream: ObjectStream, opts: &ExecOptions) -> Result<()> {
        let objects = self.scope.prepare(stream, false).collect_objects()?;
        let total = objects.len();
        for (index, object) in objects.iter().enumerate() {
            self.apply_one(object, opts).await?;
            self.scope.progress.report_matches(index + 1, total);
        }
        Ok(())
    }

    async fn delete(&self, stream: ObjectStream, opts: &ExecOptions) -> Result<()> {
        let objects = self.scope.prepare(stream, true).collect_objects()?;
        let total = objects.len();
        for (index, object) in objects.iter().enumerate() {
            self.delete_one(object, opts).await?;
            self.scope.progress.report_matches(index + 1, total);
        }
        Ok(())
    }

    async fn get(&self, kind: &str, name: &str, opts: &ExecOptions) -> Result<Object> {
        let (resource, capabilities) = self.resolve_kind(kind)?;
        let api = self.api(
            &resource,
            &capabilities,
            &self.scope.target_namespace(kind, opts),
        );
        let dynamic = opts
            .call_context()
            .run(async { api.get(name).await.map_err(|e| classify(e, kind, name)) })
            .await?;
        from_dynamic(&dynamic)
    }

    async fn list(
        &self,
        kind: &str,
        opts: &ExecOptions,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>> {
        let (resource, capabilities) = self.resolve_kind(kind)?;
        let api = self.api(
            &resource,
            &capabilities,
            &self.scope.target_namespace(kind, opts),
        );
        let params = ListParams::default().labels(&selector_string(selector));
        let list = opts
            .call_context()
            .run(async { api.list(&params).await.map_err(KubeError::from) })
            .await?;
        list.items.iter().map(from_dynamic).collect()
    }

    async fn replace(&self, mut object: Object, opts: &ExecOptions) -> Result<Object> {
        object.set_default_namespace(self.scope.call_namespace(opts));
        let (resource, capabilities) = self.resolve_object(&object)?;
        let api = self.api(&resource, &capabilities, object.namespace());
        let dynamic = to_dynamic(&object)?;

        let replaced = opts
            .call_context()
            .run(async {
                api.replace(object.name(), &PostParams::default(), &dynamic)
                    .await
                    .map_err(|e| classify(e, &object.kind, object.name()))
            })
            .await?;
        from_dynamic(&replaced)
    }

    fn for_sub_chart(
        &self,
        namespace: &str,
        app: &str,
        version: &Version,
        child_count: usize,
    ) -> Arc<dyn ClusterExecutor> {
        Arc::new(Self {
            client: self.client.clone(),
            discovery: Arc::clone(&self.discovery),
            scope: self.scope.child(namespace, app, version, child_count),
        })
    }

    fn progress(&self, percent: u8) {
        self.scope.progress.report_local(percent);
    }
}

/// Map API status codes onto the engine's error taxonomy
fn classify(err: kube::Error, kind: &str, name: &str) -> KubeError {
    let code = match &err {
        kube::Error::Api(resp) => resp.code,
        _ => 0,
    };
    match code {
        404 => KubeError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        409 => KubeError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => KubeError::Api(err),
    }
}

fn to_dynamic(object: &Object) -> Result<DynamicObject> {
    Ok(serde_json::from_value(object.to_json()?)?)
}

fn from_dynamic(dynamic: &DynamicObject) -> Result<Object> {
    Ok(Object::from_json(serde_json::to_value(dynamic)?)?)
}

/// Split an apiVersion into group and version
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}
