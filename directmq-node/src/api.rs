//! Local application API.
pub mod diagnostics;
pub mod native;

pub use diagnostics::Diagnostics;
pub use native::Native;

/// Error returned to the application.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid topic pattern `{0}`")]
    InvalidTopic(String),
    #[error("publication payload must not be empty")]
    EmptyPayload,
    #[error("no subscription id available")]
    IdsExhausted,
}
