use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

const SAMPLE_LEN: usize = 6;

/// One accelerometer reading in raw sensor units.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[display("x={x} y={y} z={z}")]
pub struct AccelerationSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Errors returned while decoding sensor payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SampleDecodeError {
    #[error("sensor payload was empty")]
    EmptyPayload,
    #[error("sensor payload has {len} bytes; an acceleration sample needs 6")]
    TooShort { len: usize },
}

/// Decodes accelerometer payloads published by the sensor.
pub struct SampleDecoder;

impl SampleDecoder {
    /// Reads the x, y, z axes as little-endian `i16` values from the first six bytes.
    ///
    /// Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is shorter than one sample.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode(payload: &[u8]) -> Result<AccelerationSample, SampleDecodeError> {
        if payload.is_empty() {
            return Err(SampleDecodeError::EmptyPayload);
        }
        let Some(sample) = payload.get(..SAMPLE_LEN) else {
            return Err(SampleDecodeError::TooShort { len: payload.len() });
        };

        let axis = |offset: usize| i16::from_le_bytes([sample[offset], sample[offset + 1]]);
        Ok(AccelerationSample {
            x: axis(0),
            y: axis(2),
            z: axis(4),
        })
    }
}
