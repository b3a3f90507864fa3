use thiserror::Error;

/// Broad classification of a structured invocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The service produced no usable output (transport error, timeout, empty body).
    Transport,
    /// The service answered, but the output could not be coerced into the schema.
    Parse,
}

/// Failure of a schema-constrained call to the external generative service.
#[derive(Debug, Clone, Error)]
pub enum StructuralError {
    #[error("LLM transport failed: {0}")]
    Transport(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM output is not a JSON object: {0}")]
    Malformed(String),

    #[error("LLM output does not match schema '{schema}': {}", .issues.join("; "))]
    SchemaMismatch { schema: String, issues: Vec<String> },
}

impl StructuralError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) | Self::EmptyResponse => FailureKind::Transport,
            Self::Malformed(_) | Self::SchemaMismatch { .. } => FailureKind::Parse,
        }
    }
}

/// Programmer errors raised while building a schema descriptor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("Unsupported field type '{ty}' for field '{field}'")]
    UnsupportedType { field: String, ty: String },

    #[error("Schema '{0}' references itself")]
    SelfReferential(String),

    #[error("Duplicate field '{field}' in schema '{schema}'")]
    DuplicateField { schema: String, field: String },

    #[error("Unresolved schema reference: {0}")]
    UnresolvedRef(String),

    #[error("Schema root must be an object: {0}")]
    NotAnObject(String),
}

/// Failure raised by a stage before the engine has attached a node name to it.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("Missing input key: {0}")]
    MissingInput(String),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("Extension field '{0}' collides with a declared schema field")]
    ExtensionConflict(String),
}

/// Graph assembly misuse. Raised only at build time.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Graph has no entry point")]
    NoEntryPoint,

    #[error("Cycle detected through node: {0}")]
    CycleDetected(String),
}

/// A pipeline run that halted. The partially merged state is never returned.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Stage '{stage}' is missing input key '{key}'")]
    MissingInput { stage: String, key: String },

    #[error("Stage '{stage}' failed: {cause}")]
    StageFailure {
        stage: String,
        #[source]
        cause: StructuralError,
    },

    #[error("Stage '{stage}' attached extension field '{field}' over a declared field")]
    ExtensionConflict { stage: String, field: String },

    #[error("Stage '{stage}' wrote undeclared key '{key}'")]
    UndeclaredOutput { stage: String, key: String },
}

impl PipelineError {
    /// Attach the failing node's name to a stage-local error.
    pub fn from_stage(stage: &str, err: StageError) -> Self {
        let stage = stage.to_string();
        match err {
            StageError::MissingInput(key) => Self::MissingInput { stage, key },
            StageError::Structural(cause) => Self::StageFailure { stage, cause },
            StageError::ExtensionConflict(field) => Self::ExtensionConflict { stage, field },
        }
    }

    /// Name of the stage that halted the run.
    pub fn stage(&self) -> &str {
        match self {
            Self::MissingInput { stage, .. }
            | Self::StageFailure { stage, .. }
            | Self::ExtensionConflict { stage, .. }
            | Self::UndeclaredOutput { stage, .. } => stage,
        }
    }
}

#[derive(Debug, Error)]
pub enum StagecraftError {
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StagecraftError>;
