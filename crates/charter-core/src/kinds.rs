//! Install ordering of resource kinds
//!
//! Objects are applied in ascending rank and deleted in descending rank, so
//! namespaces and policies exist before anything that lives in them, and
//! workloads disappear before the secrets and volumes they mount.

use std::cmp::Ordering;

use crate::object::Object;

/// Rank given to kinds missing from the table
pub const UNKNOWN_KIND_ORDINAL: u32 = 1000;

/// Ranked kinds, grouped by tier
const KIND_TABLE: &[(&str, u32)] = &[
    // Namespace and policy scoping
    ("Namespace", 1),
    ("NetworkPolicy", 2),
    ("ResourceQuota", 3),
    ("LimitRange", 4),
    ("PodSecurityPolicy", 5),
    ("PodDisruptionBudget", 6),
    // Secrets and configuration
    ("Secret", 7),
    ("ConfigMap", 8),
    // Storage
    ("StorageClass", 9),
    ("PersistentVolume", 10),
    ("PersistentVolumeClaim", 11),
    // RBAC
    ("ServiceAccount", 12),
    ("CustomResourceDefinition", 13),
    ("ClusterRole", 14),
    ("ClusterRoleList", 15),
    ("ClusterRoleBinding", 16),
    ("ClusterRoleBindingList", 17),
    ("Role", 18),
    ("RoleList", 19),
    ("RoleBinding", 20),
    ("RoleBindingList", 21),
    // Workloads
    ("Service", 22),
    ("DaemonSet", 23),
    ("Pod", 24),
    ("ReplicationController", 25),
    ("ReplicaSet", 26),
    ("Deployment", 27),
    // Autoscaling, jobs and ingress
    ("HorizontalPodAutoscaler", 28),
    ("StatefulSet", 29),
    ("Job", 30),
    ("CronJob", 31),
    ("Ingress", 32),
    ("APIService", 33),
];

/// Rank of a kind in install order
pub fn kind_ordinal(kind: &str) -> u32 {
    KIND_TABLE
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, ordinal)| *ordinal)
        .unwrap_or(UNKNOWN_KIND_ORDINAL)
}

/// Install order of two objects: kind rank first, then name
pub fn compare_objects(a: &Object, b: &Object) -> Ordering {
    kind_ordinal(&a.kind)
        .cmp(&kind_ordinal(&b.kind))
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
}
