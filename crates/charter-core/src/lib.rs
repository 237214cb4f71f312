//! Charter Core - Core types for the chart-tree deployment engine
//!
//! This crate provides the foundational types used throughout charter:
//! - `Object`: a cluster object with lossless pass-through of unknown fields
//! - `ObjectStream`: lazy object pipelines with kind-ordered sorting
//! - `Values`: chart property values with deep merge support
//! - `LoadedChart`: a chart directory and its `Chart.yaml`
//! - `Settings`: immutable configuration injected into every component

pub mod archive;
pub mod chart;
pub mod error;
pub mod genus;
pub mod kinds;
pub mod object;
pub mod settings;
pub mod stream;
pub mod values;

pub use chart::{
    BackendSpec, BindingSpec, CertificateSpec, ChartManifest, CredentialSpec, DependencySpec,
    LoadedChart, PromptSpec, SubChartSpec, VaultSpec,
};
pub use error::{CoreError, Result};
pub use genus::GenusAndVersion;
pub use kinds::{compare_objects, kind_ordinal};
pub use object::{Metadata, Object};
pub use settings::Settings;
pub use stream::{GroupedObjects, ObjectStream};
pub use values::{Values, parse_set_values};
