//! Charter Engine - template rendering for charts
//!
//! This crate provides the render collaborator of the deployment engine:
//! - `Renderer`: the seam the engine renders through
//! - `TemplateRenderer`: MiniJinja over a chart's `templates/` directory
//! - manifest-oriented filters (toyaml, b64encode, nindent, ...)

pub mod error;
pub mod filters;
pub mod renderer;

pub use error::{EngineError, Result};
pub use renderer::{ChartInfo, RenderContext, Renderer, TemplateRenderer};
