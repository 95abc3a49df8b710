// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concurrent append-only store for validated records awaiting export.

use crate::message::LabMessage;
use parking_lot::Mutex;

/// Append-only collection of validated messages.
///
/// `add` never fails; `drain_snapshot` atomically captures and removes the
/// current contents, so a message added concurrently with a drain lands
/// either entirely before or entirely after the snapshot. Only the export
/// engine removes entries.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Mutex<Vec<LabMessage>>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validated message.
    pub fn add(&self, message: LabMessage) {
        self.messages.lock().push(message);
    }

    /// Atomically capture and remove all currently held messages.
    pub fn drain_snapshot(&self) -> Vec<LabMessage> {
        std::mem::take(&mut *self.messages.lock())
    }

    /// Number of messages awaiting export.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// True when no messages are pending.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(id: &str) -> LabMessage {
        LabMessage::parse(&format!("{}|GLUCOSE|95.5|mg/dL", id)).unwrap()
    }

    #[test]
    fn test_add_and_len() {
        let store = MessageStore::new();
        assert!(store.is_empty());

        store.add(sample("PATIENT001"));
        store.add(sample("PATIENT002"));

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_drain_snapshot_empties_store() {
        let store = MessageStore::new();
        store.add(sample("PATIENT001"));

        let snapshot = store.drain_snapshot();

        assert_eq!(snapshot.len(), 1);
        assert!(store.is_empty());
        assert!(store.drain_snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_adds_never_lost() {
        let store = Arc::new(MessageStore::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.add(sample("PATIENT001"));
                    }
                })
            })
            .collect();

        let drainer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let mut drained = 0;
                for _ in 0..50 {
                    drained += store.drain_snapshot().len();
                    std::thread::yield_now();
                }
                drained
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        let drained = drainer.join().unwrap();

        // Every add shows up in exactly one snapshot.
        assert_eq!(drained + store.len(), 1000);
    }
}
