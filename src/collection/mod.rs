pub mod merger;
pub mod types;

pub use merger::{ContextMerger, RequestContext};
pub use types::{
    AssertionEntry, AuthConfig, Collection, CollectionNode, HeaderEntry, NodeConfig, NodeKind,
    ParamEntry, ParamKind, RequestBody, RequestDefinition, ScriptFlow, VarAssignment,
};
