//! Typed, addressable data items.
//!
//! A [`DataItem`] describes one variable in controller memory: where it
//! lives, what wire type it has, and in which direction it is exchanged,
//! together with its cached program-side value and an optional pending
//! value staged for the next write cycle.
//!
//! # Example
//!
//! ```
//! use s7_link::{AccessMode, DataItem, MemoryArea, PlcValue, VarType};
//!
//! let mut level = DataItem::new("tank_level", MemoryArea::DataBlock, 0, VarType::Real)
//!     .with_block(1)
//!     .with_mode(AccessMode::ReadWrite);
//!
//! // A read cycle delivers raw bytes from the controller:
//! level.refresh_from_bytes(&[0x41, 0x20, 0x00, 0x00]).unwrap();
//! assert_eq!(*level.value(), PlcValue::Real(10.0));
//!
//! // An external binding stages a value for the next write cycle:
//! level.set_pending(PlcValue::Real(12.5)).unwrap();
//! assert!(level.prepare_for_write().unwrap().is_some());
//! ```

use std::sync::{Arc, Mutex};

use crate::convert;
use crate::error::{LinkError, Result};
use crate::memory::MemoryArea;
use crate::transport::ReadRequest;
use crate::value::{PlcValue, VarType};

/// Exchange direction of a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessMode {
    /// The item is only read from the controller.
    #[default]
    ReadOnly,
    /// The item is only written to the controller.
    WriteOnly,
    /// The item is read and written.
    ReadWrite,
}

/// Shared handle to a data item, as held by groups and external bindings.
pub type SharedItem = Arc<Mutex<DataItem>>;

/// A typed variable in controller memory with a cached value.
#[derive(Debug)]
pub struct DataItem {
    name: String,
    area: MemoryArea,
    block: u16,
    start_byte: usize,
    bit: u8,
    var_type: VarType,
    count: usize,
    mode: AccessMode,
    value: PlcValue,
    pending: Option<PlcValue>,
}

impl DataItem {
    /// Creates a new data item with count 1, read-only access, and the
    /// wire type's default value cached.
    pub fn new(
        name: impl Into<String>,
        area: MemoryArea,
        start_byte: usize,
        var_type: VarType,
    ) -> Self {
        Self {
            name: name.into(),
            area,
            block: 0,
            start_byte,
            bit: 0,
            var_type,
            count: 1,
            mode: AccessMode::ReadOnly,
            value: var_type.default_value(),
            pending: None,
        }
    }

    /// Sets the data-block number (meaningful only for
    /// [`MemoryArea::DataBlock`]).
    pub fn with_block(mut self, block: u16) -> Self {
        self.block = block;
        self
    }

    /// Sets the bit address within the start byte (meaningful only for
    /// [`VarType::Bit`]).
    pub fn with_bit(mut self, bit: u8) -> Self {
        self.bit = bit % 8;
        self
    }

    /// Sets the element count (character capacity for strings).
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    /// Sets the exchange direction.
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the item's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the memory area this item addresses.
    pub fn area(&self) -> MemoryArea {
        self.area
    }

    /// Returns the data-block number.
    pub fn block(&self) -> u16 {
        self.block
    }

    /// Returns the address of the first byte.
    pub fn start_byte(&self) -> usize {
        self.start_byte
    }

    /// Returns the bit address within the start byte.
    pub fn bit(&self) -> u8 {
        self.bit
    }

    /// Returns the wire type.
    pub fn var_type(&self) -> VarType {
        self.var_type
    }

    /// Returns the exchange direction.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Returns the cached value. The tag always matches the item's wire
    /// type.
    pub fn value(&self) -> &PlcValue {
        &self.value
    }

    /// Returns the number of bytes this item occupies on the wire.
    pub fn byte_len(&self) -> usize {
        self.var_type.byte_len(self.count)
    }

    /// Returns the read descriptor covering this item's byte range.
    pub fn read_request(&self) -> ReadRequest {
        ReadRequest::new(self.area, self.block, self.start_byte, self.byte_len())
    }

    /// Decodes `raw` and stores the result into the cache.
    ///
    /// Returns whether the cached value changed. On a conversion error the
    /// cache keeps its prior value.
    pub fn refresh_from_bytes(&mut self, raw: &[u8]) -> Result<bool> {
        let decoded = convert::decode(raw, self.var_type, self.bit)?;
        if decoded == self.value {
            return Ok(false);
        }
        self.value = decoded;
        Ok(true)
    }

    /// Stages a value for the next write cycle.
    ///
    /// # Errors
    ///
    /// Rejects values whose tag does not match the item's wire type; the
    /// previously staged value (if any) is kept.
    pub fn set_pending(&mut self, value: PlcValue) -> Result<()> {
        if value.var_type() != self.var_type {
            return Err(LinkError::type_mismatch(
                self.var_type.to_string(),
                value.var_type().to_string(),
            ));
        }
        self.pending = Some(value);
        Ok(())
    }

    /// Returns the currently staged value, if any.
    pub fn pending(&self) -> Option<&PlcValue> {
        self.pending.as_ref()
    }

    /// Encodes the staged value into the outgoing raw buffer.
    ///
    /// Returns `Ok(None)` when nothing is staged. The staged value stays
    /// in place until [`DataItem::complete_write`] promotes it.
    pub fn prepare_for_write(&mut self) -> Result<Option<Vec<u8>>> {
        match &self.pending {
            Some(value) => Ok(Some(convert::encode(value, self.var_type, self.count)?)),
            None => Ok(None),
        }
    }

    /// Promotes the staged value into the cache after a successful write.
    ///
    /// Returns whether the cached value changed.
    pub fn complete_write(&mut self) -> bool {
        match self.pending.take() {
            Some(value) if value != self.value => {
                self.value = value;
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    /// Wraps this item into the shared handle used by groups and external
    /// bindings.
    pub fn into_shared(self) -> SharedItem {
        Arc::new(Mutex::new(self))
    }
}
