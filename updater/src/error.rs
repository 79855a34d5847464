// Licensed under the Apache-2.0 license

use crate::transport::TransportError;
use crate::update::UpdatePhase;
use core::fmt::{Display, Formatter};
use patch_image::ImageError;

/// Errors surfaced by a patch download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The register transport failed.
    Transport(TransportError),
    /// The firmware image is malformed or is not a patch.
    Image(ImageError),
    /// The device did not report ready within the poll budget.
    DeviceTimeout(UpdatePhase),
    /// A staged memory commit did not complete within the poll budget.
    DeviceBusy,
}

impl From<TransportError> for UpdateError {
    fn from(err: TransportError) -> Self {
        UpdateError::Transport(err)
    }
}

impl From<ImageError> for UpdateError {
    fn from(err: ImageError) -> Self {
        UpdateError::Image(err)
    }
}

impl Display for UpdateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            UpdateError::Transport(err) => write!(f, "register transport failed: {}", err),
            UpdateError::Image(err) => write!(f, "invalid firmware image: {}", err),
            UpdateError::DeviceTimeout(phase) => {
                write!(f, "device not ready after {}", phase)
            }
            UpdateError::DeviceBusy => write!(f, "memory update stayed pending"),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::Transport(err) => Some(err),
            UpdateError::Image(err) => Some(err),
            _ => None,
        }
    }
}
