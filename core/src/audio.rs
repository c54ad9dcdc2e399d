//! Audio device abstraction.
//!
//! The engine only ever sees an [`AudioBackend`]: it enumerates devices and
//! opens one full-duplex, mono, 16-bit stream that calls back into a
//! [`StreamHandler`] with fixed-size chunks. [`loopback::LoopbackBackend`]
//! is an in-process backend driven by hand; the `cpal` feature adds
//! [`cpal_backend::CpalBackend`] for real sound cards.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{ModemError, Result};

#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod loopback;

/// Index of a device in its backend's enumeration order.
pub type DeviceId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
}

impl DeviceInfo {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub input_device: DeviceId,
    pub output_device: DeviceId,
    pub sample_rate: u32,
    pub chunk_size: usize,
}

/// Real-time side of a duplex stream.
///
/// Both methods run on the audio thread with chunks of exactly
/// `chunk_size` samples. Implementations must not block or log.
pub trait StreamHandler: Send + Sync + 'static {
    fn capture(&self, input: &[i16]);

    fn render(&self, output: &mut [i16]);
}

/// A running stream. Dropping it without `stop` must also stop it.
pub trait AudioStream: Send {
    fn stop(&mut self) -> Result<()>;
}

pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    fn default_input_device(&self) -> Option<DeviceId>;

    fn default_output_device(&self) -> Option<DeviceId>;

    fn open_duplex(
        &self,
        params: &StreamParams,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Box<dyn AudioStream>>;

    fn device_info(&self, id: DeviceId) -> Result<DeviceInfo> {
        self.devices()?
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| ModemError::DeviceUnavailable(format!("no device with id {id}")))
    }
}

/// Pick the concrete devices for a stream: explicit choices win, otherwise
/// the backend defaults. Both must exist and face the right direction.
pub fn resolve_devices(
    backend: &dyn AudioBackend,
    input: Option<DeviceId>,
    output: Option<DeviceId>,
) -> Result<(DeviceId, DeviceId)> {
    let input = input
        .or_else(|| backend.default_input_device())
        .ok_or_else(|| ModemError::DeviceUnavailable("no input device".into()))?;
    let output = output
        .or_else(|| backend.default_output_device())
        .ok_or_else(|| ModemError::DeviceUnavailable("no output device".into()))?;

    let info = backend.device_info(input)?;
    if !info.is_input() {
        return Err(ModemError::DeviceUnavailable(format!(
            "'{}' has no input channels",
            info.name
        )));
    }
    let info = backend.device_info(output)?;
    if !info.is_output() {
        return Err(ModemError::DeviceUnavailable(format!(
            "'{}' has no output channels",
            info.name
        )));
    }
    Ok((input, output))
}

#[cfg(test)]
mod tests {
    use super::loopback::LoopbackBackend;
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let backend = LoopbackBackend::new();
        let (input, output) = resolve_devices(&backend, None, None).unwrap();
        assert!(backend.device_info(input).unwrap().is_input());
        assert!(backend.device_info(output).unwrap().is_output());
    }

    #[test]
    fn test_resolve_rejects_wrong_direction() {
        let backend = LoopbackBackend::new();
        let speaker = backend
            .devices()
            .unwrap()
            .into_iter()
            .find(|d| !d.is_input())
            .unwrap();
        let err = resolve_devices(&backend, Some(speaker.id), None).unwrap_err();
        assert!(matches!(err, ModemError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_resolve_unknown_device() {
        let backend = LoopbackBackend::new();
        let err = resolve_devices(&backend, None, Some(99)).unwrap_err();
        assert!(matches!(err, ModemError::DeviceUnavailable(_)));
    }
}
