use thiserror::Error;

/// Fatal errors that end a turn. The caller keeps its prior history.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Transport or model-call failure, after retries.
    #[error("model call failed: {0}")]
    Model(String),
    /// The model finished without content and no tool ran successfully.
    #[error("the model returned an empty response")]
    EmptyResponse,
    #[error("no final answer after {0} iterations")]
    MaxIterations(u32),
    /// Cancelled while waiting on the model.
    #[error("cancelled")]
    Cancelled,
}
