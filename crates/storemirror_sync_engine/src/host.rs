//! Callbacks into the filesystem host.

use parking_lot::Mutex;
use storemirror_store::Domain;

/// The OS-level filesystem host that presents mirrored items to users.
///
/// The engine calls back when a container's contents changed outside a
/// host-initiated enumeration, so the host can re-enumerate it.
pub trait FilesystemHost: Send + Sync + 'static {
    /// Asks the host to re-enumerate `container_id` in `domain`.
    fn signal_changed(&self, domain: &Domain, container_id: &str);
}

/// A host that ignores every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHost;

impl FilesystemHost for NoopHost {
    fn signal_changed(&self, _domain: &Domain, _container_id: &str) {}
}

/// A host that records signals for later inspection.
#[derive(Debug, Default)]
pub struct RecordingHost {
    signals: Mutex<Vec<(String, String)>>,
}

impl RecordingHost {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals received so far as `(domain identifier, container id)`.
    pub fn signals(&self) -> Vec<(String, String)> {
        self.signals.lock().clone()
    }

    /// Forgets recorded signals.
    pub fn clear(&self) {
        self.signals.lock().clear();
    }
}

impl FilesystemHost for RecordingHost {
    fn signal_changed(&self, domain: &Domain, container_id: &str) {
        self.signals
            .lock()
            .push((domain.identifier.clone(), container_id.to_string()));
    }
}
