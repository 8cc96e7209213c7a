//! Microphone access checks

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

/// Grants or refuses access to the microphone.
#[async_trait]
pub trait MicrophonePermission: Send + Sync {
    async fn request(&self) -> PermissionStatus;
}

/// Grants access when the host exposes a usable default input device.
#[cfg(feature = "audio-io")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DevicePermission;

#[cfg(feature = "audio-io")]
#[async_trait]
impl MicrophonePermission for DevicePermission {
    async fn request(&self) -> PermissionStatus {
        use cpal::traits::{DeviceTrait, HostTrait};

        // Device enumeration can block on some hosts
        let probe = tokio::task::spawn_blocking(|| {
            cpal::default_host()
                .default_input_device()
                .map(|device| device.default_input_config().is_ok())
                .unwrap_or(false)
        })
        .await;

        match probe {
            Ok(true) => PermissionStatus::Granted,
            Ok(false) => {
                tracing::warn!("No usable input device, microphone access denied");
                PermissionStatus::Denied
            }
            Err(e) => {
                tracing::error!("Input device probe panicked: {}", e);
                PermissionStatus::Denied
            }
        }
    }
}

/// Fixed answer, for headless runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub PermissionStatus);

impl StaticPermission {
    pub fn granted() -> Self {
        Self(PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self(PermissionStatus::Denied)
    }
}

#[async_trait]
impl MicrophonePermission for StaticPermission {
    async fn request(&self) -> PermissionStatus {
        self.0
    }
}
