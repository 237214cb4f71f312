//! Process exit codes
//!
//! These follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Chart error - invalid Chart.yaml, values or --set arguments
pub const CHART_ERROR: i32 = 2;

/// Template error - rendering failed
pub const TEMPLATE_ERROR: i32 = 3;

/// Deployment error - the cluster or a vault backend refused an operation
pub const DEPLOY_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Dependency error - ambiguous shared chart or unsatisfied constraint
pub const DEPENDENCY_ERROR: i32 = 6;

/// Source error - a chart URL could not be fetched
pub const SOURCE_ERROR: i32 = 7;

/// Interrupted by Ctrl-C or a deadline (128 + SIGINT)
pub const CANCELLED: i32 = 130;
