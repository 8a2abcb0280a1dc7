//! Single-slot broadcast cell for notification parameters.

use tokio::sync::watch;

use tunbridge_core::NotificationParams;

/// Last-value-wins holder for the notification parameters pushed by the
/// foreground. Readers always see the most recent value; intermediate values
/// may be skipped.
#[derive(Debug, Clone)]
pub struct NotificationCell {
    tx: watch::Sender<Option<NotificationParams>>,
}

impl NotificationCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current value.
    pub fn publish(&self, params: NotificationParams) {
        self.tx.send_replace(Some(params));
    }

    /// Latest value, if the foreground has pushed one.
    pub fn latest(&self) -> Option<NotificationParams> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NotificationParams>> {
        self.tx.subscribe()
    }
}

impl Default for NotificationCell {
    fn default() -> Self {
        Self::new()
    }
}
