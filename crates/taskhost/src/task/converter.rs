//! Argument and result converters
//!
//! Converters are strategy objects registered next to a task type. They turn
//! a message body into the task's argument and the task's result into the
//! body published on the response queue.

use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error converting between message bodies and task values
///
/// A body that fails to convert is unprocessable input and is handled by the
/// poison-message policy, never retried as a transient failure.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Body does not have the expected shape
    #[error("malformed message: {0}")]
    Malformed(String),

    /// JSON (de)serialization failed
    #[error("json conversion failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConversionError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Converts a message body into a task argument
pub trait ArgumentConverter<A>: Send + Sync + 'static {
    fn convert_to_argument(&self, body: &str) -> Result<A, ConversionError>;
}

/// Converts a task result into a message body
pub trait ResultConverter<R>: Send + Sync + 'static {
    fn convert_to_result(&self, result: &R) -> Result<String, ConversionError>;
}

/// Passes message bodies through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl ArgumentConverter<String> for StringConverter {
    fn convert_to_argument(&self, body: &str) -> Result<String, ConversionError> {
        Ok(body.to_string())
    }
}

impl ResultConverter<String> for StringConverter {
    fn convert_to_result(&self, result: &String) -> Result<String, ConversionError> {
        Ok(result.clone())
    }
}

/// Parses arguments with [`FromStr`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FromStrConverter;

impl<A> ArgumentConverter<A> for FromStrConverter
where
    A: FromStr,
    A::Err: Display,
{
    fn convert_to_argument(&self, body: &str) -> Result<A, ConversionError> {
        body.parse()
            .map_err(|e: A::Err| ConversionError::Malformed(e.to_string()))
    }
}

/// Renders results with [`Display`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayConverter;

impl<R: Display> ResultConverter<R> for DisplayConverter {
    fn convert_to_result(&self, result: &R) -> Result<String, ConversionError> {
        Ok(result.to_string())
    }
}

/// JSON converter for any serde type
pub struct JsonConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonConverter")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned + 'static> ArgumentConverter<T> for JsonConverter<T> {
    fn convert_to_argument(&self, body: &str) -> Result<T, ConversionError> {
        Ok(serde_json::from_str(body)?)
    }
}

impl<T: Serialize + 'static> ResultConverter<T> for JsonConverter<T> {
    fn convert_to_result(&self, result: &T) -> Result<String, ConversionError> {
        Ok(serde_json::to_string(result)?)
    }
}

/// Result converter for tasks that produce nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResult;

impl ResultConverter<()> for NoResult {
    fn convert_to_result(&self, _result: &()) -> Result<String, ConversionError> {
        Ok(String::new())
    }
}
