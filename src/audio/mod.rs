pub mod capture;
pub mod permission;
pub mod resampler;
pub mod source;
pub mod wav;

pub use capture::{AudioCapture, CaptureFormat, RecordingState, CAPTURE_FORMAT};
#[cfg(feature = "audio-io")]
pub use permission::DevicePermission;
pub use permission::{MicrophonePermission, PermissionStatus, StaticPermission};
pub use resampler::StreamResampler;
#[cfg(feature = "audio-io")]
pub use source::CpalSource;
pub use source::{AudioSource, BufferSource};
pub use wav::{encode_wav, read_wav, read_wav_mono};
