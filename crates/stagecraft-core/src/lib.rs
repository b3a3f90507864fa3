pub mod config;
pub mod error;
pub mod schema;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{
    FailureKind, GraphError, PipelineError, Result, SchemaError, StageError, StagecraftError,
    StructuralError,
};
pub use schema::{Field, FieldType, Schema, TypedValue};
pub use state::{StateContainer, StateUpdate};
pub use types::*;
