//! Short-lived keyed handoff slot: set once, read once, delete after use.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

struct Slot<V> {
    value: V,
    expires_at: Instant,
}

pub struct Mailbox<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
    notify: Notify,
}

impl<V: Clone> Default for Mailbox<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Mailbox<V> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.slots.lock().insert(
            key.to_string(),
            Slot {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        debug!(key, ttl_ms = ttl.as_millis() as u64, "mailbox set");
        self.notify.notify_waiters();
    }

    /// Live value for `key`; expired entries are dropped on read.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Some(slot.value.clone()),
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn delete(&self, key: &str) -> Option<V> {
        self.slots.lock().remove(key).map(|s| s.value)
    }

    /// Removes and returns a live value.
    pub fn take(&self, key: &str) -> Option<V> {
        let slot = self.slots.lock().remove(key)?;
        (slot.expires_at > Instant::now()).then_some(slot.value)
    }

    /// Waits up to `timeout` for `key` and takes it. `None` on timeout.
    pub async fn wait_take(&self, key: &str, timeout: Duration) -> Option<V> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.take(key) {
                return Some(value);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(key, "mailbox wait timed out");
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn value_expires_after_ttl() {
        let mb = Mailbox::new();
        mb.set("k", 1, Duration::from_secs(1));
        assert_eq!(mb.get("k"), Some(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mb.get("k"), None);
    }

    #[tokio::test]
    async fn take_is_read_once() {
        let mb = Mailbox::new();
        mb.set("k", "order", Duration::from_secs(30));
        assert_eq!(mb.take("k"), Some("order"));
        assert_eq!(mb.take("k"), None);
        assert_eq!(mb.delete("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_take_sees_late_set() {
        let mb = Arc::new(Mailbox::new());
        let writer = mb.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            writer.set("k", 7, Duration::from_secs(30));
        });

        assert_eq!(mb.wait_take("k", Duration::from_secs(30)).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_take_returns_none_on_timeout() {
        let mb: Mailbox<u32> = Mailbox::new();
        let started = Instant::now();

        assert_eq!(mb.wait_take("k", Duration::from_secs(30)).await, None);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }
}
