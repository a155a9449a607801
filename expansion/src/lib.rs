pub mod engine;
pub mod error;
pub mod fetch;
pub mod metadata;

pub use engine::{CollapseOutcome, ExpandOutcome, ExpandSource, ExpansionEngine};
pub use error::EngineError;
pub use fetch::{
    ExpansionRequest, FetchClient, FetchError, HttpFetchClient, ScriptedFetchClient, SourceResponse,
};
pub use metadata::{ExpansionAction, SourceMetadata};
