//! Composite read/write action over a set of data items.
//!
//! A [`DataGroup`] batches the read side of its items into one multi-read
//! transaction per tick and issues one write transaction per staged item.
//! Reads and writes are partitioned by each item's [`AccessMode`]: items
//! declared write-only are never read, read-only items are never written.
//!
//! The group holds shared handles to items it does not own — items are
//! declared by their callers and may also be bound to external consumers
//! that stage pending values between ticks.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::events::{EventBus, LinkEvent};
use crate::item::{AccessMode, SharedItem};
use crate::registry::PlcAction;
use crate::transport::{ReadRequest, SharedTransport};

/// An ordered, duplicate-free set of data items exchanged together.
pub struct DataGroup {
    name: String,
    transport: SharedTransport,
    events: EventBus,
    items: StdMutex<Vec<SharedItem>>,
}

impl DataGroup {
    /// Creates an empty group exchanging through `transport`.
    pub fn new(name: impl Into<String>, transport: SharedTransport, events: EventBus) -> Self {
        Self {
            name: name.into(),
            transport,
            events,
            items: StdMutex::new(Vec::new()),
        }
    }

    /// Returns the group's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an item handle; a handle already present is not added again.
    pub fn push(&self, item: SharedItem) {
        let mut items = self.lock_items();
        if items.iter().any(|existing| std::sync::Arc::ptr_eq(existing, &item)) {
            return;
        }
        items.push(item);
    }

    /// Returns the number of items in the group.
    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    /// Returns whether the group has no items.
    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, Vec<SharedItem>> {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Reads all readable items in one batched transaction and refreshes
    /// their caches.
    ///
    /// Items with [`AccessMode::WriteOnly`] are skipped; if nothing is
    /// readable, no transaction is issued. A conversion failure on one
    /// item leaves its cache untouched and does not affect the others.
    pub async fn read_all(&self) -> Result<()> {
        let targets: Vec<(SharedItem, ReadRequest)> = self
            .lock_items()
            .iter()
            .filter(|item| lock_item(item).mode() != AccessMode::WriteOnly)
            .map(|item| (item.clone(), lock_item(item).read_request()))
            .collect();

        if targets.is_empty() {
            return Ok(());
        }

        let requests: Vec<ReadRequest> = targets.iter().map(|(_, request)| *request).collect();
        let buffers = {
            let mut transport = self.transport.lock().await;
            transport.read_multiple(&requests).await?
        };

        for ((item, _), raw) in targets.iter().zip(buffers.iter()) {
            let mut guard = lock_item(item);
            match guard.refresh_from_bytes(raw) {
                Ok(true) => {
                    let event = LinkEvent::ValueChanged {
                        item: guard.name().to_string(),
                        value: guard.value().clone(),
                    };
                    drop(guard);
                    self.events.emit(event);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(group = %self.name, item = guard.name(), error = %err, "conversion failed, cache unchanged");
                }
            }
        }
        Ok(())
    }

    /// Writes every writable item that has a staged value, one transaction
    /// per item.
    ///
    /// Items with [`AccessMode::ReadOnly`] are skipped; if nothing is
    /// writable, no transaction is issued. An encoding failure skips that
    /// item; a transport failure aborts the remaining writes of this tick.
    pub async fn write_all(&self) -> Result<()> {
        let targets: Vec<SharedItem> = self
            .lock_items()
            .iter()
            .filter(|item| lock_item(item).mode() != AccessMode::ReadOnly)
            .cloned()
            .collect();

        for item in targets {
            let prepared = {
                let mut guard = lock_item(&item);
                match guard.prepare_for_write() {
                    Ok(Some(bytes)) => {
                        Some((guard.area(), guard.block(), guard.start_byte(), bytes))
                    }
                    Ok(None) => None,
                    Err(err) => {
                        warn!(group = %self.name, item = guard.name(), error = %err, "encoding failed, item skipped");
                        None
                    }
                }
            };

            let Some((area, block, start, bytes)) = prepared else {
                continue;
            };

            {
                let mut transport = self.transport.lock().await;
                transport.write_bytes(area, block, start, &bytes).await?;
            }

            let mut guard = lock_item(&item);
            if guard.complete_write() {
                let event = LinkEvent::ValueChanged {
                    item: guard.name().to_string(),
                    value: guard.value().clone(),
                };
                drop(guard);
                self.events.emit(event);
            }
        }
        Ok(())
    }
}

fn lock_item(item: &SharedItem) -> std::sync::MutexGuard<'_, crate::item::DataItem> {
    item.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl PlcAction for DataGroup {
    fn name(&self) -> &str {
        &self.name
    }

    /// Runs one exchange cycle: read all, then write all. Failures are
    /// reported and do not propagate past the group.
    async fn execute(&self) -> Result<()> {
        let result = async {
            self.read_all().await?;
            self.write_all().await
        }
        .await;

        if let Err(err) = result {
            warn!(group = %self.name, error = %err, "exchange cycle failed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGroup")
            .field("name", &self.name)
            .field("items", &self.len())
            .finish()
    }
}
