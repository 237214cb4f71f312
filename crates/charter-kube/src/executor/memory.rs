//! In-memory executor
//!
//! Simulates a cluster with a shared object store. Scoped executors created
//! through `for_sub_chart` see the same store, so a whole chart tree can be
//! applied and inspected without a cluster.

use async_trait::async_trait;
use charter_core::{Object, ObjectStream, Settings};
use semver::Version;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ClusterExecutor, ExecOptions, ExecScope, LabelSelector, matches_selector};
use crate::error::{KubeError, Result};
use crate::progress::ProgressNode;

/// Store key: namespace (empty for cluster-scoped), kind, name
type ObjectKey = (String, String, String);

/// Mutation recorded by the executor, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Applied { kind: String, name: String },
    Deleted { kind: String, name: String },
    Replaced { kind: String, name: String },
}

impl Operation {
    pub fn kind(&self) -> &str {
        match self {
            Operation::Applied { kind, .. }
            | Operation::Deleted { kind, .. }
            | Operation::Replaced { kind, .. } => kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Operation::Applied { name, .. }
            | Operation::Deleted { name, .. }
            | Operation::Replaced { name, .. } => name,
        }
    }
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub applies: usize,
    pub deletes: usize,
    pub replaces: usize,
}

impl OperationCounts {
    /// Number of calls that changed the store
    pub fn mutations(&self) -> usize {
        self.applies + self.deletes + self.replaces
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Apply,
    Delete,
}

#[derive(Debug, Default)]
struct Store {
    objects: BTreeMap<ObjectKey, Object>,
    next_version: u64,
    log: Vec<Operation>,
    counts: OperationCounts,
    failures: Vec<(Action, String, String)>,
}

impl Store {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn injected_failure(&self, action: Action, kind: &str) -> Option<String> {
        self.failures
            .iter()
            .find(|(a, k, _)| *a == action && k.eq_ignore_ascii_case(kind))
            .map(|(_, _, message)| message.clone())
    }
}

/// Executor backed by an in-memory object store
#[derive(Clone)]
pub struct InMemoryExecutor {
    store: Arc<RwLock<Store>>,
    scope: ExecScope,
}

impl InMemoryExecutor {
    /// Create a root executor with an empty store
    pub fn new(settings: Arc<Settings>, namespace: &str) -> Self {
        Self::with_progress(settings, namespace, ProgressNode::default())
    }

    /// Create a root executor reporting into `progress`
    pub fn with_progress(settings: Arc<Settings>, namespace: &str, progress: ProgressNode) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            scope: ExecScope::root(settings, namespace, progress),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-populate the store, assigning a resource version
    pub fn insert(&self, mut object: Object) {
        let mut store = self.write();
        let version = store.bump_version();
        object.set_resource_version(version);
        store.objects.insert(key_of(&object), object);
    }

    /// Make every apply of `kind` fail with `message`
    pub fn fail_on_apply(&self, kind: &str, message: &str) {
        self.write()
            .failures
            .push((Action::Apply, kind.to_string(), message.to_string()));
    }

    /// Make every delete of `kind` fail with `message`
    pub fn fail_on_delete(&self, kind: &str, message: &str) {
        self.write()
            .failures
            .push((Action::Delete, kind.to_string(), message.to_string()));
    }

    /// Look up a stored object by namespace, kind and name
    pub fn object(&self, namespace: &str, kind: &str, name: &str) -> Option<Object> {
        self.read()
            .objects
            .get(&(namespace.to_string(), kind.to_string(), name.to_string()))
            .cloned()
    }

    /// All stored objects
    pub fn objects(&self) -> Vec<Object> {
        self.read().objects.values().cloned().collect()
    }

    /// Count stored objects
    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    /// Mutations in call order
    pub fn operations(&self) -> Vec<Operation> {
        self.read().log.clone()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.read().counts.clone()
    }

    /// Reset operation log and counts
    pub fn reset_counts(&self) {
        let mut store = self.write();
        store.counts = OperationCounts::default();
        store.log.clear();
    }

    fn key_for(&self, kind: &str, name: &str, opts: &ExecOptions) -> ObjectKey {
        (
            self.scope.target_namespace(kind, opts),
            kind.to_string(),
            name.to_string(),
        )
    }
}

fn key_of(object: &Object) -> ObjectKey {
    let namespace = if object.is_namespaced() {
        object.namespace().to_string()
    } else {
        String::new()
    };
    (namespace, object.kind.clone(), object.name().to_string())
}

#[async_trait]
impl ClusterExecutor for InMemoryExecutor {
    fn namespace(&self) -> &str {
        &self.scope.namespace
    }

    async fn apply(&self, stream: ObjectStream, opts: &ExecOptions) -> Result<()> {
        let objects = self.scope.prepare(stream, false).collect_objects()?;
        let total = objects.len();

        for (index, mut object) in objects.into_iter().enumerate() {
            opts.context.check()?;
            {
                let mut store = self.write();
                store.counts.applies += 1;
                if let Some(message) = store.injected_failure(Action::Apply, &object.kind) {
                    return Err(KubeError::executor(
                        format!("apply {} '{}'", object.kind, object.name()),
                        message,
                    ));
                }
                let version = store.bump_version();
                object.set_resource_version(version);
                store.log.push(Operation::Applied {
                    kind: object.kind.clone(),
                    name: object.name().to_string(),
                });
                store.objects.insert(key_of(&object), object);
            }
            self.scope.progress.report_matches(index + 1, total);
        }
        Ok(())
    }

    async fn delete(&self, stream: ObjectStream, opts: &ExecOptions) -> Result<()> {
        let objects = self.scope.prepare(stream, true).collect_objects()?;
        let total = objects.len();

        for (index, object) in objects.into_iter().enumerate() {
            opts.context.check()?;
            {
                let mut store = self.write();
                store.counts.deletes += 1;
                if let Some(message) = store.injected_failure(Action::Delete, &object.kind) {
                    return Err(KubeError::executor(
                        format!("delete {} '{}'", object.kind, object.name()),
                        message,
                    ));
                }
                if store.objects.remove(&key_of(&object)).is_some() {
                    store.log.push(Operation::Deleted {
                        kind: object.kind.clone(),
                        name: object.name().to_string(),
                    });
                }
            }
            self.scope.progress.report_matches(index + 1, total);
        }
        Ok(())
    }

    async fn get(&self, kind: &str, name: &str, opts: &ExecOptions) -> Result<Object> {
        opts.context.check()?;
        let key = self.key_for(kind, name, opts);
        let mut store = self.write();
        store.counts.gets += 1;
        store
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| KubeError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }

    async fn list(
        &self,
        kind: &str,
        opts: &ExecOptions,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>> {
        opts.context.check()?;
        let namespace = self.scope.target_namespace(kind, opts);
        let mut store = self.write();
        store.counts.lists += 1;
        Ok(store
            .objects
            .iter()
            .filter(|((ns, k, _), obj)| {
                *ns == namespace && k.eq_ignore_ascii_case(kind) && matches_selector(obj, selector)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn replace(&self, mut object: Object, opts: &ExecOptions) -> Result<Object> {
        opts.context.check()?;
        object.set_default_namespace(self.scope.call_namespace(opts));
        let key = key_of(&object);

        let mut store = self.write();
        store.counts.replaces += 1;
        let current = store
            .objects
            .get(&key)
            .ok_or_else(|| KubeError::NotFound {
                kind: object.kind.clone(),
                name: object.name().to_string(),
            })?;

        if let Some(expected) = object.resource_version() {
            if current.resource_version() != Some(expected) {
                return Err(KubeError::Conflict {
                    kind: object.kind.clone(),
                    name: object.name().to_string(),
                });
            }
        }

        let version = store.bump_version();
        object.set_resource_version(version);
        store.log.push(Operation::Replaced {
            kind: object.kind.clone(),
            name: object.name().to_string(),
        });
        store.objects.insert(key, object.clone());
        Ok(object)
    }

    fn for_sub_chart(
        &self,
        namespace: &str,
        app: &str,
        version: &Version,
        child_count: usize,
    ) -> Arc<dyn ClusterExecutor> {
        Arc::new(Self {
            store: Arc::clone(&self.store),
            scope: self.scope.child(namespace, app, version, child_count),
        })
    }

    fn progress(&self, percent: u8) {
        self.scope.progress.report_local(percent);
    }
}

impl std::fmt::Debug for InMemoryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryExecutor")
            .field("namespace", &self.scope.namespace)
            .field("objects", &self.read().objects.len())
            .finish()
    }
}
