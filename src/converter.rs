//! Payload conversion between typed values and the string payloads stored in history.
//!
//! The converter is configuration: it is handed to the test environment, workers and
//! clients explicitly. There is no process-wide default registration.

use crate::errors::DataConversionError;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;

/// Converts JSON values to payload strings and back.
pub trait DataConverter: Send + Sync {
    fn to_payload(&self, value: Value) -> Result<String, DataConversionError>;
    fn from_payload(&self, payload: &str) -> Result<Value, DataConversionError>;
}

/// Default converter: plain `serde_json` text, with the empty payload meaning `null`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDataConverter;

impl DataConverter for JsonDataConverter {
    fn to_payload(&self, value: Value) -> Result<String, DataConversionError> {
        serde_json::to_string(&value).map_err(|e| DataConversionError::Encode(e.to_string()))
    }

    fn from_payload(&self, payload: &str) -> Result<Value, DataConversionError> {
        if payload.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(payload).map_err(|e| DataConversionError::Decode(e.to_string()))
    }
}

pub fn default_converter() -> Arc<dyn DataConverter> {
    Arc::new(JsonDataConverter)
}

pub fn encode<T: Serialize + ?Sized>(conv: &dyn DataConverter, value: &T) -> Result<String, DataConversionError> {
    let v = serde_json::to_value(value).map_err(|e| DataConversionError::Encode(e.to_string()))?;
    conv.to_payload(v)
}

pub fn decode<T: DeserializeOwned>(conv: &dyn DataConverter, payload: &str) -> Result<T, DataConversionError> {
    let v = conv.from_payload(payload)?;
    serde_json::from_value(v).map_err(|e| DataConversionError::Decode(e.to_string()))
}
