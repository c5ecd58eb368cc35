//! Capture device seams and device enumeration

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DeviceError;
use crate::media::frame::CapturedFrame;
use crate::protocol::{DeviceInfo, MediaKind};

/// Delivery callback armed on a capture device. Invoked on the device's
/// own thread, once per frame.
pub type FrameCallback = Arc<dyn Fn(CapturedFrame) + Send + Sync>;

/// Invoked at most once per start, on the device's own thread, when the
/// hardware goes away and delivery has ended
pub type LossCallback = Arc<dyn Fn(DeviceError) + Send + Sync>;

/// An opened OS capture device. Dropping it releases the device.
pub trait CaptureDevice: Send {
    fn info(&self) -> &DeviceInfo;

    /// Begin delivering frames to `deliver`. A device lost mid-stream
    /// reports through `lost` and delivers nothing further.
    fn start(&mut self, deliver: FrameCallback, lost: LossCallback) -> Result<(), DeviceError>;

    /// Stop delivery. No callback fires after this returns.
    fn stop(&mut self);
}

/// Source of capture devices for one or more media kinds
pub trait CaptureDeviceProvider: Send + Sync {
    fn devices(&self, kind: MediaKind) -> Vec<DeviceInfo>;

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn CaptureDevice>, DeviceError>;
}

/// Routes each media kind to the provider registered for it
#[derive(Default, Clone)]
pub struct DeviceHub {
    providers: HashMap<MediaKind, Arc<dyn CaptureDeviceProvider>>,
}

impl DeviceHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: MediaKind, provider: Arc<dyn CaptureDeviceProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn register(&mut self, kind: MediaKind, provider: Arc<dyn CaptureDeviceProvider>) {
        self.providers.insert(kind, provider);
    }
}

impl CaptureDeviceProvider for DeviceHub {
    fn devices(&self, kind: MediaKind) -> Vec<DeviceInfo> {
        self.providers
            .get(&kind)
            .map(|p| p.devices(kind))
            .unwrap_or_default()
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        self.providers
            .get(&device.kind)
            .ok_or(DeviceError::Unavailable(device.kind))?
            .open(device)
    }
}

#[cfg(feature = "cpal-devices")]
pub use self::cpal_devices::*;

#[cfg(feature = "cpal-devices")]
mod cpal_devices {
    use cpal::traits::{DeviceTrait, HostTrait};

    use super::*;
    use crate::config::CaptureConfig;
    use crate::media::capture::CpalMicrophone;

    /// Wrapper around cpal device
    pub struct AudioDevice {
        inner: cpal::Device,
        pub name: String,
        pub is_input: bool,
    }

    impl AudioDevice {
        pub fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            Self {
                inner: device,
                name,
                is_input,
            }
        }

        pub fn into_inner(self) -> cpal::Device {
            self.inner
        }

        pub fn default_input_config(&self) -> Result<cpal::SupportedStreamConfig, DeviceError> {
            self.inner
                .default_input_config()
                .map_err(|e| DeviceError::NotFound(e.to_string()))
        }
    }

    /// List microphones known to the default host
    pub fn list_input_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        if let Ok(inputs) = host.input_devices() {
            for device in inputs {
                if let Ok(name) = device.name() {
                    let mut info =
                        DeviceInfo::new(format!("input:{}", name), name.clone(), MediaKind::Microphone);
                    info.is_default = default_name.as_ref() == Some(&name);
                    devices.push(info);
                }
            }
        }
        devices
    }

    /// Names of output devices known to the default host
    pub fn list_output_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    /// Get a device by its ID (`input:<name>` or `output:<name>`)
    pub fn get_device_by_id(id: &str) -> Result<AudioDevice, DeviceError> {
        let host = cpal::default_host();

        let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
            (true, name)
        } else if let Some(name) = id.strip_prefix("output:") {
            (false, name)
        } else {
            (true, id)
        };

        let devices = if is_input {
            host.input_devices()
        } else {
            host.output_devices()
        };
        let devices = devices.map_err(|e| DeviceError::Backend(e.to_string()))?;

        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(AudioDevice::from_cpal(device, is_input));
            }
        }

        Err(DeviceError::NotFound(id.to_string()))
    }

    /// Get default output device
    pub fn get_default_output_device() -> Result<AudioDevice, DeviceError> {
        cpal::default_host()
            .default_output_device()
            .map(|d| AudioDevice::from_cpal(d, false))
            .ok_or_else(|| DeviceError::NotFound("No default output device".to_string()))
    }

    /// Microphone provider backed by the default cpal host
    pub struct CpalDeviceProvider {
        config: CaptureConfig,
    }

    impl CpalDeviceProvider {
        pub fn new(config: CaptureConfig) -> Self {
            Self { config }
        }
    }

    impl CaptureDeviceProvider for CpalDeviceProvider {
        fn devices(&self, kind: MediaKind) -> Vec<DeviceInfo> {
            match kind {
                MediaKind::Microphone => list_input_devices(),
                _ => Vec::new(),
            }
        }

        fn open(&self, device: &DeviceInfo) -> Result<Box<dyn CaptureDevice>, DeviceError> {
            if device.kind != MediaKind::Microphone {
                return Err(DeviceError::Unavailable(device.kind));
            }
            let capture = CpalMicrophone::new(
                device.clone(),
                Some(self.config.audio_sample_rate),
                Some(self.config.audio_channels),
            )?;
            Ok(Box::new(capture))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl CaptureDeviceProvider for Empty {
        fn devices(&self, _kind: MediaKind) -> Vec<DeviceInfo> {
            vec![DeviceInfo::new("x", "X", MediaKind::Camera)]
        }

        fn open(&self, device: &DeviceInfo) -> Result<Box<dyn CaptureDevice>, DeviceError> {
            Err(DeviceError::Busy(device.id.clone()))
        }
    }

    #[test]
    fn test_hub_routes_by_kind() {
        let hub = DeviceHub::new().with(MediaKind::Camera, Arc::new(Empty));

        assert_eq!(hub.devices(MediaKind::Camera).len(), 1);
        assert!(hub.devices(MediaKind::Screen).is_empty());

        let screen = DeviceInfo::new("s", "S", MediaKind::Screen);
        assert_eq!(
            hub.open(&screen).err(),
            Some(DeviceError::Unavailable(MediaKind::Screen))
        );
        let cam = DeviceInfo::new("x", "X", MediaKind::Camera);
        assert_eq!(hub.open(&cam).err(), Some(DeviceError::Busy("x".into())));
    }
}
