//! Error types for Audivis core.

use thiserror::Error;

use crate::state::{DeviceState, Transition};

/// Core error type, raised on malformed caller input before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Audio frame must be exactly {expected} bytes, got {actual}")]
    InvalidFrameLength { expected: usize, actual: usize },

    #[error("Endpoint list cannot be empty")]
    EmptyEndpointList,

    #[error("Endpoint type list cannot be empty")]
    EmptyEndpointTypeList,

    #[error("Too many entries: {count} (limit {limit})")]
    TooManyEntries { count: usize, limit: usize },

    #[error("Endpoint type count {types} does not match configured endpoint count {endpoints}")]
    EndpointTypeMismatch { endpoints: usize, types: usize },

    #[error("Cannot {transition} while device is {state}")]
    InvalidTransition { state: DeviceState, transition: Transition },
}

/// Result type alias for Audivis core operations.
pub type Result<T> = std::result::Result<T, Error>;
