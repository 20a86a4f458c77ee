//! Discrete 32-channel I/O banks.
//!
//! An input bank reads one 4-byte block of the Input process image per
//! cycle and unpacks it into 32 boolean channels; an output bank packs its
//! 32 channels and writes one 4-byte block of the Output image. Channel
//! `i` maps to bit `i % 8` of byte `i / 8`, counted from the bank's start
//! byte.
//!
//! Both banks implement [`PlcAction`] and are registered with the
//! connection's action registry to run on every monitoring tick.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::memory::MemoryArea;
use crate::registry::PlcAction;
use crate::transport::SharedTransport;
use crate::utils::{pack_bits, unpack_bits};

/// Number of channels in a discrete bank.
pub const BANK_CHANNELS: usize = 32;

const BLOCK_SIZE: usize = 4;

fn lock_channels(
    channels: &StdMutex<[bool; BANK_CHANNELS]>,
) -> std::sync::MutexGuard<'_, [bool; BANK_CHANNELS]> {
    channels
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// 32 digital inputs read from the Input process image.
pub struct DiscreteInputBank {
    name: String,
    start_byte: usize,
    transport: SharedTransport,
    channels: StdMutex<[bool; BANK_CHANNELS]>,
}

impl DiscreteInputBank {
    /// Creates a bank covering bytes `start_byte..start_byte + 4` of the
    /// Input area.
    pub fn new(name: impl Into<String>, start_byte: usize, transport: SharedTransport) -> Self {
        Self {
            name: name.into(),
            start_byte,
            transport,
            channels: StdMutex::new([false; BANK_CHANNELS]),
        }
    }

    /// Returns the state of one channel; `None` if the index is out of
    /// range.
    pub fn channel(&self, index: usize) -> Option<bool> {
        lock_channels(&self.channels).get(index).copied()
    }

    /// Returns a snapshot of all 32 channels.
    pub fn channels(&self) -> [bool; BANK_CHANNELS] {
        *lock_channels(&self.channels)
    }
}

#[async_trait]
impl PlcAction for DiscreteInputBank {
    fn name(&self) -> &str {
        &self.name
    }

    /// Reads the 4-byte block in a single operation and maps it onto the
    /// channels.
    async fn execute(&self) -> Result<()> {
        let buffer = {
            let mut transport = self.transport.lock().await;
            transport
                .read_bytes(MemoryArea::Input, 0, self.start_byte, BLOCK_SIZE)
                .await?
        };
        let bits = unpack_bits(&buffer, BANK_CHANNELS);
        let mut channels = lock_channels(&self.channels);
        channels.copy_from_slice(&bits);
        Ok(())
    }
}

/// 32 digital outputs written to the Output process image.
pub struct DiscreteOutputBank {
    name: String,
    start_byte: usize,
    transport: SharedTransport,
    channels: StdMutex<[bool; BANK_CHANNELS]>,
}

impl DiscreteOutputBank {
    /// Creates a bank covering bytes `start_byte..start_byte + 4` of the
    /// Output area.
    pub fn new(name: impl Into<String>, start_byte: usize, transport: SharedTransport) -> Self {
        Self {
            name: name.into(),
            start_byte,
            transport,
            channels: StdMutex::new([false; BANK_CHANNELS]),
        }
    }

    /// Sets one channel. Returns whether the index was in range.
    pub fn set_channel(&self, index: usize, state: bool) -> bool {
        let mut channels = lock_channels(&self.channels);
        match channels.get_mut(index) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    /// Replaces all 32 channels at once.
    pub fn set_channels(&self, states: [bool; BANK_CHANNELS]) {
        *lock_channels(&self.channels) = states;
    }

    /// Returns a snapshot of all 32 channels.
    pub fn channels(&self) -> [bool; BANK_CHANNELS] {
        *lock_channels(&self.channels)
    }
}

#[async_trait]
impl PlcAction for DiscreteOutputBank {
    fn name(&self) -> &str {
        &self.name
    }

    /// Packs the channels and writes the 4-byte block in a single
    /// operation.
    async fn execute(&self) -> Result<()> {
        let bytes = pack_bits(&*lock_channels(&self.channels));
        let mut transport = self.transport.lock().await;
        transport
            .write_bytes(MemoryArea::Output, 0, self.start_byte, &bytes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::shared_transport;
    use crate::transport::test_support::FakeTransport;

    #[tokio::test]
    async fn test_input_bank_unpacks_block() {
        let (transport, state) = FakeTransport::new();
        state
            .lock()
            .unwrap()
            .set_image(MemoryArea::Input, 0, vec![0x00, 0x00, 0x55, 0x55, 0x55, 0x55]);

        let bank = DiscreteInputBank::new("di0", 2, shared_transport(transport));
        bank.execute().await.unwrap();

        // Every even channel is ON
        for i in 0..BANK_CHANNELS {
            assert_eq!(bank.channel(i), Some(i % 2 == 0), "channel {}", i);
        }
        assert_eq!(bank.channel(BANK_CHANNELS), None);
    }

    #[tokio::test]
    async fn test_input_bank_single_bit() {
        let (transport, state) = FakeTransport::new();
        // Bit 3 of byte 1 → channel 11
        state
            .lock()
            .unwrap()
            .set_image(MemoryArea::Input, 0, vec![0x00, 0x08, 0x00, 0x00]);

        let bank = DiscreteInputBank::new("di0", 0, shared_transport(transport));
        bank.execute().await.unwrap();

        let channels = bank.channels();
        for (i, on) in channels.iter().enumerate() {
            assert_eq!(*on, i == 11, "channel {}", i);
        }
    }

    #[tokio::test]
    async fn test_input_bank_read_failure_leaves_channels() {
        // No Input image configured: the read fails
        let (transport, _) = FakeTransport::new();
        let bank = DiscreteInputBank::new("di0", 0, shared_transport(transport));
        assert!(bank.execute().await.is_err());
        assert_eq!(bank.channels(), [false; BANK_CHANNELS]);
    }

    #[tokio::test]
    async fn test_output_bank_packs_block() {
        let (transport, state) = FakeTransport::new();
        let bank = DiscreteOutputBank::new("dq0", 4, shared_transport(transport));

        let states: [bool; BANK_CHANNELS] = std::array::from_fn(|i| i % 2 == 0);
        bank.set_channels(states);
        bank.execute().await.unwrap();

        let s = state.lock().unwrap();
        assert_eq!(s.writes.len(), 1);
        assert_eq!(
            s.writes[0],
            (MemoryArea::Output, 0, 4, vec![0x55, 0x55, 0x55, 0x55])
        );
    }

    #[tokio::test]
    async fn test_output_bank_set_channel() {
        let (transport, state) = FakeTransport::new();
        let bank = DiscreteOutputBank::new("dq0", 0, shared_transport(transport));

        assert!(bank.set_channel(8, true));
        assert!(!bank.set_channel(BANK_CHANNELS, true));
        bank.execute().await.unwrap();

        let s = state.lock().unwrap();
        assert_eq!(s.writes[0].3, vec![0x00, 0x01, 0x00, 0x00]);
    }
}
