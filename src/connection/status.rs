// Device availability shared between the session, the tick thread and stream callbacks

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Not initialized, or closed
    Unavailable = 0,
    Opening = 1,
    Ready = 2,
    /// Initialization or the running stream failed; re-initialize to recover
    Failed = 3,
}

impl DeviceStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, DeviceStatus::Ready)
    }
}

impl From<u8> for DeviceStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => DeviceStatus::Opening,
            2 => DeviceStatus::Ready,
            3 => DeviceStatus::Failed,
            _ => DeviceStatus::Unavailable,
        }
    }
}

/// Atomic wrapper to share the status between threads
#[derive(Clone, Debug)]
pub struct AtomicDeviceStatus {
    inner: Arc<AtomicU8>,
}

impl AtomicDeviceStatus {
    pub fn new(status: DeviceStatus) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(status as u8)),
        }
    }

    pub fn get(&self) -> DeviceStatus {
        DeviceStatus::from(self.inner.load(Ordering::Relaxed))
    }

    pub fn set(&self, status: DeviceStatus) {
        self.inner.store(status as u8, Ordering::Relaxed);
    }
}

impl Default for AtomicDeviceStatus {
    fn default() -> Self {
        Self::new(DeviceStatus::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_through_u8() {
        for status in [
            DeviceStatus::Unavailable,
            DeviceStatus::Opening,
            DeviceStatus::Ready,
            DeviceStatus::Failed,
        ] {
            assert_eq!(DeviceStatus::from(status as u8), status);
        }
        assert_eq!(DeviceStatus::from(42), DeviceStatus::Unavailable);
    }

    #[test]
    fn test_shared_status() {
        let status = AtomicDeviceStatus::default();
        let clone = status.clone();
        clone.set(DeviceStatus::Ready);
        assert_eq!(status.get(), DeviceStatus::Ready);
        assert!(status.get().is_ready());
    }
}
