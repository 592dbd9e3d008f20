//! Platform audio-session notifications
//!
//! The host platform owns category/routing configuration and reports
//! interruptions and output route changes. The engine only reacts to them.

use std::sync::Weak;

/// Receives audio-session notifications from the platform.
pub trait SessionEventListener: Send + Sync {
    /// Another app or the system took over audio output.
    fn on_interruption(&self);

    /// The output route changed (headphones unplugged, Bluetooth connected...).
    fn on_route_change(&self);
}

/// Platform collaborator that delivers session notifications.
///
/// Listeners are held weakly so a registered engine can still be dropped.
pub trait PlatformAudioSession {
    fn register(&self, listener: Weak<dyn SessionEventListener>);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Session that fans notifications out to registered listeners.
    #[derive(Default)]
    pub struct RecordingSession {
        listeners: Mutex<Vec<Weak<dyn SessionEventListener>>>,
    }

    impl RecordingSession {
        pub fn interrupt(&self) {
            for listener in self.live() {
                listener.on_interruption();
            }
        }

        pub fn change_route(&self) {
            for listener in self.live() {
                listener.on_route_change();
            }
        }

        pub fn listener_count(&self) -> usize {
            self.listeners.lock().unwrap().len()
        }

        fn live(&self) -> Vec<std::sync::Arc<dyn SessionEventListener>> {
            self.listeners
                .lock()
                .unwrap()
                .iter()
                .filter_map(Weak::upgrade)
                .collect()
        }
    }

    impl PlatformAudioSession for RecordingSession {
        fn register(&self, listener: Weak<dyn SessionEventListener>) {
            self.listeners.lock().unwrap().push(listener);
        }
    }
}
