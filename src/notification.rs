use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};

/// How long a notification stays visible.
pub const NOTIFICATION_TTL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Error,
}

/// A transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
}

/// Single-slot notification holder.
///
/// Each new message replaces the previous one and cancels its clear timer, so
/// only the latest message's timer ever clears the slot. Showing a message
/// spawns a task and must happen inside a Tokio runtime.
pub struct Notifier {
    inner: Arc<Inner>,
    ttl: Duration,
}

struct Inner {
    tx: watch::Sender<Option<Notification>>,
    timer: Mutex<TimerSlot>,
}

#[derive(Default)]
struct TimerSlot {
    seq: u64,
    handle: Option<JoinHandle<()>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(NOTIFICATION_TTL)
    }
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                tx,
                timer: Mutex::new(TimerSlot::default()),
            }),
            ttl,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Notification>> {
        self.inner.tx.subscribe()
    }

    pub fn current(&self) -> Option<Notification> {
        self.inner.tx.borrow().clone()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.show(message, NotificationKind::Info);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(message, NotificationKind::Error);
    }

    pub fn show(&self, message: impl Into<String>, kind: NotificationKind) {
        let notification = Notification {
            message: message.into(),
            kind,
        };

        let mut slot = self.inner.timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        slot.seq = slot.seq.wrapping_add(1);
        let seq = slot.seq;
        self.inner.tx.send_replace(Some(notification));

        let inner = Arc::clone(&self.inner);
        let ttl = self.ttl;
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            // The slot lock orders this check against a concurrent `show`.
            let mut slot = inner.timer.lock().unwrap_or_else(|p| p.into_inner());
            if slot.seq == seq {
                slot.handle = None;
                inner.tx.send_replace(None);
            }
        }));
    }

    /// Clear the current message immediately.
    pub fn dismiss(&self) {
        let mut slot = self.inner.timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.seq = slot.seq.wrapping_add(1);
        self.inner.tx.send_replace(None);
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.inner.timer.lock() {
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
        }
    }
}
