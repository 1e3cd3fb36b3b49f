use tokio::sync::watch;

use caramel_core::joints::HEAD_JOINT;

/// The device joint names the host most recently asked for.
///
/// Cloning shares the same set. Starts as `["head_joint"]` until the host
/// sends its first update.
#[derive(Clone, Debug)]
pub struct RequestedSet {
    tx: watch::Sender<Vec<String>>,
}

impl Default for RequestedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestedSet {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(vec![HEAD_JOINT.to_string()]);
        Self { tx }
    }

    pub fn names(&self) -> Vec<String> {
        self.tx.borrow().clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tx.borrow().iter().any(|n| n == name)
    }

    /// Replace the set. Duplicates are dropped, first occurrence wins.
    pub fn replace(&self, names: Vec<String>) {
        let mut deduped: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !deduped.contains(&name) {
                deduped.push(name);
            }
        }
        self.tx.send_if_modified(|current| {
            if *current == deduped {
                false
            } else {
                *current = deduped;
                true
            }
        });
    }

    /// Back to the head-only default.
    pub fn reset(&self) {
        self.replace(vec![HEAD_JOINT.to_string()]);
    }

    /// Receiver that wakes on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.tx.subscribe()
    }
}
