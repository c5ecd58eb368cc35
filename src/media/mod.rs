//! OS-side media: frames, devices, outputs

pub mod buffer;
#[cfg(feature = "cpal-devices")]
pub mod capture;
pub mod device;
pub mod frame;
pub mod output;
pub mod screen;
pub mod synthetic;

pub use buffer::{SampleRing, SharedSampleRing};
pub use device::{CaptureDevice, CaptureDeviceProvider, DeviceHub, FrameCallback, LossCallback};
pub use frame::{
    AudioFrame, CapturedFrame, DisplayFrame, PcmBuffer, PixelFormat, RawAudioFrame,
    RawVideoFrame, SampleFormat, VideoFrame,
};
pub use output::{AudioOutput, AudioOutputFactory, RenderTarget};
pub use screen::{ScreenCapture, ScreenCaptureProvider, ScreenGrabber, ScreenGrabberFactory};
