//! Charter Kube - chart-tree deployment
//!
//! This crate applies and deletes chart trees against a cluster:
//! - `ClusterExecutor`: kind-ordered apply/delete, in memory or via server-side apply
//! - `Chart`: the tree walk, vault handling and packaged-chart records
//! - `Dependency`: shared charts with version constraints and user tracking
//! - `Vault`: lazily materialized secrets with pluggable backends
//! - `ProgressNode`: weighted progress across nested charts
//! - `OperationContext`: cancellation and deadlines

pub mod cancel;
pub mod chart;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod packaged;
pub mod progress;
pub mod vault;

pub use cancel::OperationContext;
pub use chart::{Chart, ChartContext, ChartOptions, Property, owner_id};
pub use dependency::{ChartRepository, Dependency};
pub use error::{KubeError, Phase, Result};
pub use executor::{
    ClusterExecutor, ExecOptions, InMemoryExecutor, KubeExecutor, LabelSelector, Operation,
    OperationCounts, is_not_exist,
};
pub use packaged::PackagedChart;
pub use progress::{FnProgress, LogProgress, NullProgress, ProgressNode, ProgressSubscriber};
pub use vault::{
    NoPrompter, PromptRequest, Prompter, StaticPrompter, Vault, VaultBackend, VaultData,
    VaultState,
};
