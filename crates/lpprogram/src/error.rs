//! Error types for compiling and persisting program cells.

/// Failures surfaced by [`crate::program::LpProgram`].
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("notebook title is empty, no module name can be derived")]
    EmptyTitle,

    #[error("no execution channel attached")]
    NoExecutionChannel,

    #[error("execution channel rejected the request: {0}")]
    Channel(#[from] ChannelError),
}

/// Failures reported by an execution channel when submitting a request.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("kernel connection is closed")]
    Closed,
}

/// Failures reading a persisted cell or notebook record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("expected cell_type \"lpprogram\", found {found:?}")]
    WrongCellType { found: String },

    #[error("notebook has neither worksheets nor cells")]
    MissingCells,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
