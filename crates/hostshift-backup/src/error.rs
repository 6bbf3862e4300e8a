use thiserror::Error;

/// A broken invariant in the orchestration code, such as enabling an item twice
/// or pushing the same item onto the ledger again. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("program logic error: {0}")]
pub struct ProgramLogicError(pub String);

impl ProgramLogicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub fn is_program_logic_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ProgramLogicError>().is_some())
}
