pub mod executor;
pub mod interpolate;
pub mod onfail;
pub mod types;

pub use executor::RequestPipeline;
pub use interpolate::interpolate_request;
pub use onfail::{SanitizedError, run_on_fail};
pub use types::{Phase, RunError, RunErrorKind, RunResult, RunnerOptions, TimelineEntry};
