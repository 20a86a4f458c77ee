//! Directory of configured controllers.
//!
//! A [`PlcDirectory`] holds the named [`PlcConfig`] entries an application
//! has declared, generates unique names for new entries, and validates
//! updates before applying them: addresses must be well-formed IPv4 and
//! unique across the directory. Every mutation is published as a
//! directory event.

use tracing::info;

use crate::connection::{validate_ip, CpuVariant, PlcConfig};
use crate::error::{LinkError, Result};
use crate::events::{EventBus, LinkEvent};

const BASE_NAME: &str = "Plc";

/// Named collection of controller configurations.
#[derive(Debug)]
pub struct PlcDirectory {
    plcs: Vec<PlcConfig>,
    events: EventBus,
}

impl PlcDirectory {
    /// Creates an empty directory publishing on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            plcs: Vec::new(),
            events,
        }
    }

    /// Creates a new entry with a generated unique name and default
    /// addressing, and returns a copy of it.
    pub fn create(&mut self) -> PlcConfig {
        let name = self.unique_name(BASE_NAME);
        let config = PlcConfig::unconfigured(name.clone());
        self.plcs.push(config.clone());
        info!(name = %name, "controller added");
        self.events.emit(LinkEvent::PlcAdded { name });
        config
    }

    /// Removes the entry with the given name. Returns whether an entry was
    /// removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.plcs.len();
        self.plcs.retain(|plc| plc.name != name);
        if self.plcs.len() < before {
            self.events.emit(LinkEvent::PlcRemoved {
                name: name.to_string(),
            });
            true
        } else {
            false
        }
    }

    /// Renames an entry. If the requested name is taken by another entry,
    /// a uniquified variant is used instead. Returns the name actually
    /// assigned.
    pub fn rename(&mut self, name: &str, new_name: &str) -> Option<String> {
        let index = self.index_of(name)?;
        let taken = self
            .plcs
            .iter()
            .enumerate()
            .any(|(i, plc)| i != index && plc.name == new_name);
        let assigned = if taken {
            self.unique_name_excluding(new_name, index)
        } else {
            new_name.to_string()
        };
        self.plcs[index].name = assigned.clone();
        self.emit_updated(&assigned, "name");
        Some(assigned)
    }

    /// Updates an entry's address.
    ///
    /// # Errors
    ///
    /// Rejects malformed addresses and addresses already configured on
    /// another entry.
    pub fn update_address(&mut self, name: &str, address: &str) -> Result<()> {
        if !validate_ip(address) {
            return Err(LinkError::config(format!(
                "invalid IP address '{}'",
                address
            )));
        }
        if self
            .plcs
            .iter()
            .any(|plc| plc.name != name && plc.address == address)
        {
            return Err(LinkError::config(format!(
                "duplicate address {} among configured controllers",
                address
            )));
        }
        let index = self
            .index_of(name)
            .ok_or_else(|| LinkError::config(format!("no controller named '{}'", name)))?;
        self.plcs[index].address = address.to_string();
        self.emit_updated(name, "address");
        Ok(())
    }

    /// Updates an entry's rack number.
    pub fn update_rack(&mut self, name: &str, rack: u16) -> Result<()> {
        let index = self
            .index_of(name)
            .ok_or_else(|| LinkError::config(format!("no controller named '{}'", name)))?;
        self.plcs[index].rack = rack;
        self.emit_updated(name, "rack");
        Ok(())
    }

    /// Updates an entry's slot number.
    pub fn update_slot(&mut self, name: &str, slot: u16) -> Result<()> {
        let index = self
            .index_of(name)
            .ok_or_else(|| LinkError::config(format!("no controller named '{}'", name)))?;
        self.plcs[index].slot = slot;
        self.emit_updated(name, "slot");
        Ok(())
    }

    /// Updates an entry's CPU variant.
    pub fn update_cpu(&mut self, name: &str, cpu: CpuVariant) -> Result<()> {
        let index = self
            .index_of(name)
            .ok_or_else(|| LinkError::config(format!("no controller named '{}'", name)))?;
        self.plcs[index].cpu = cpu;
        self.emit_updated(name, "cpu");
        Ok(())
    }

    /// Returns the entry with the given name.
    pub fn get(&self, name: &str) -> Option<&PlcConfig> {
        self.plcs.iter().find(|plc| plc.name == name)
    }

    /// Returns an iterator over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PlcConfig> {
        self.plcs.iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.plcs.len()
    }

    /// Returns whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.plcs.is_empty()
    }

    /// Removes all entries without emitting events.
    pub fn clear(&mut self) {
        self.plcs.clear();
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.plcs.iter().position(|plc| plc.name == name)
    }

    fn name_exists(&self, name: &str) -> bool {
        self.plcs.iter().any(|plc| plc.name == name)
    }

    /// Appends a counter starting from 1 until the name is free.
    fn unique_name(&self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut counter = 1;
        while self.name_exists(&candidate) {
            candidate = format!("{} {}", base, counter);
            counter += 1;
        }
        candidate
    }

    /// Like [`PlcDirectory::unique_name`] but ignores the entry at
    /// `except`, so renaming an entry never collides with itself.
    fn unique_name_excluding(&self, base: &str, except: usize) -> String {
        let mut candidate = base.to_string();
        let mut counter = 1;
        while self
            .plcs
            .iter()
            .enumerate()
            .any(|(i, plc)| i != except && plc.name == candidate)
        {
            candidate = format!("{} {}", base, counter);
            counter += 1;
        }
        candidate
    }

    fn emit_updated(&self, name: &str, field: &'static str) {
        self.events.emit(LinkEvent::PlcUpdated {
            name: name.to_string(),
            field,
        });
    }
}
