//! Single-fire notifications between watcher tasks.

use tokio::sync::oneshot;

/// Create a connected trigger and signal.
pub fn signal<T>() -> (Trigger<T>, Signal<T>) {
    let (tx, rx) = oneshot::channel();
    (Trigger(tx), Signal(rx))
}

/// Sending half. Fires at most once: [`Trigger::fire`] consumes it.
#[derive(Debug)]
pub struct Trigger<T>(oneshot::Sender<T>);

impl<T> Trigger<T> {
    /// Deliver `value`. Returns false if nobody waits for it anymore.
    pub fn fire(self, value: T) -> bool {
        self.0.send(value).is_ok()
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct Signal<T>(oneshot::Receiver<T>);

impl<T> Signal<T> {
    /// Wait for the trigger. `None` means it was dropped without firing.
    pub async fn wait(self) -> Option<T> {
        self.0.await.ok()
    }

    /// A signal whose trigger is already gone.
    pub fn closed() -> Self {
        let (_, signal) = signal();
        signal
    }
}
