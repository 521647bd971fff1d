use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown animation: {name}")]
    UnknownAnimation { name: String },

    #[error("unknown bone: {name}")]
    UnknownBone { name: String },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[error("animation state handle is stale or was never issued")]
    InvalidHandle,

    #[cfg(feature = "json")]
    #[error("failed to parse animation config JSON: {message}")]
    JsonParse { message: String },
}
