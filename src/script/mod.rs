pub mod require;
pub mod runtime;
pub mod sandbox;
pub mod shims;

pub use require::ModuleRegistry;
pub use runtime::{
    ConsoleSink, ItemPathResolver, QuickJsProvider, RunScriptParams, RuntimeProvider,
    ScriptExecutionResult, ScriptRuntime, TestOutcome, TestStatus, tracing_console_sink,
};
pub use sandbox::{Sandbox, SandboxOptions};
pub use shims::{CapabilitySet, ConsoleEvent};
