//! Transport capability for the underlying protocol client.
//!
//! This crate does not implement the wire protocol. It drives an external
//! protocol client through the [`Transport`] trait, which only knows about
//! memory addresses and bytes — framing, PDU negotiation, and socket
//! handling live behind the implementation.
//!
//! A transport is exclusively owned by one connection; the connection
//! manager and its data groups share it through a [`SharedTransport`]
//! handle, which serializes access.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::memory::MemoryArea;

/// One batched-read descriptor: a contiguous byte range in one memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Memory area to read from.
    pub area: MemoryArea,
    /// Data-block number; ignored unless `area` is [`MemoryArea::DataBlock`].
    pub block: u16,
    /// Address of the first byte to read.
    pub start: usize,
    /// Number of bytes to read.
    pub len: usize,
}

impl ReadRequest {
    /// Creates a new read descriptor.
    pub fn new(area: MemoryArea, block: u16, start: usize, len: usize) -> Self {
        Self {
            area,
            block,
            start,
            len,
        }
    }
}

/// Capability offered by the external protocol client.
///
/// All methods that reach the controller are asynchronous and fallible;
/// `is_connected` only reports the client's last known link state and
/// never performs I/O.
#[async_trait]
pub trait Transport: Send {
    /// Opens the connection to the controller.
    async fn open(&mut self) -> Result<()>;

    /// Closes the connection.
    async fn close(&mut self) -> Result<()>;

    /// Returns whether the client currently reports an open connection.
    fn is_connected(&self) -> bool;

    /// Reads `len` bytes starting at `start` from the given area.
    async fn read_bytes(
        &mut self,
        area: MemoryArea,
        block: u16,
        start: usize,
        len: usize,
    ) -> Result<Vec<u8>>;

    /// Writes `data` starting at `start` into the given area.
    async fn write_bytes(
        &mut self,
        area: MemoryArea,
        block: u16,
        start: usize,
        data: &[u8],
    ) -> Result<()>;

    /// Reads several byte ranges in one transaction, returning one buffer
    /// per request in request order.
    ///
    /// The default implementation falls back to sequential single reads
    /// for clients without a multi-read command.
    async fn read_multiple(&mut self, requests: &[ReadRequest]) -> Result<Vec<Vec<u8>>> {
        let mut buffers = Vec::with_capacity(requests.len());
        for request in requests {
            buffers.push(
                self.read_bytes(request.area, request.block, request.start, request.len)
                    .await?,
            );
        }
        Ok(buffers)
    }
}

/// Shared handle to the transport exclusively owned by one connection.
pub type SharedTransport = Arc<Mutex<dyn Transport>>;

/// Wraps a transport implementation into a [`SharedTransport`] handle.
pub fn shared_transport<T: Transport + 'static>(transport: T) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scriptable in-memory transport for tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;
    use crate::error::LinkError;

    /// Shared, inspectable state behind a [`FakeTransport`].
    #[derive(Default)]
    pub(crate) struct FakeState {
        /// Byte image per (area, block).
        pub images: HashMap<(MemoryArea, u16), Vec<u8>>,
        pub connected: bool,
        /// Number of upcoming `open` calls that should fail.
        pub fail_opens: u32,
        /// Number of upcoming `close` calls that should fail.
        pub fail_closes: u32,
        /// Bytes to truncate from every returned read buffer.
        pub truncate_reads: usize,
        pub opens: u32,
        pub closes: u32,
        pub reads: u32,
        pub multi_reads: u32,
        pub writes: Vec<(MemoryArea, u16, usize, Vec<u8>)>,
    }

    impl FakeState {
        pub fn set_image(&mut self, area: MemoryArea, block: u16, bytes: Vec<u8>) {
            self.images.insert((area, block), bytes);
        }

        fn slice(&self, area: MemoryArea, block: u16, start: usize, len: usize) -> Result<Vec<u8>> {
            let image = self
                .images
                .get(&(area, block))
                .ok_or_else(|| LinkError::transport(format!("no image for area {}", area)))?;
            if start + len > image.len() {
                return Err(LinkError::transport(format!(
                    "read past end of {} image: {}..{}",
                    area,
                    start,
                    start + len
                )));
            }
            let mut bytes = image[start..start + len].to_vec();
            bytes.truncate(len.saturating_sub(self.truncate_reads));
            Ok(bytes)
        }
    }

    /// In-memory [`Transport`] whose behavior is scripted through a shared
    /// [`FakeState`].
    pub(crate) struct FakeTransport {
        state: Arc<StdMutex<FakeState>>,
    }

    impl FakeTransport {
        /// Creates a transport plus the state handle tests keep.
        pub fn new() -> (Self, Arc<StdMutex<FakeState>>) {
            let state = Arc::new(StdMutex::new(FakeState::default()));
            (
                Self {
                    state: state.clone(),
                },
                state,
            )
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
            self.state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn open(&mut self) -> Result<()> {
            let mut state = self.lock();
            if state.fail_opens > 0 {
                state.fail_opens -= 1;
                return Err(LinkError::transport("connection refused"));
            }
            state.opens += 1;
            state.connected = true;
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            let mut state = self.lock();
            if state.fail_closes > 0 {
                state.fail_closes -= 1;
                return Err(LinkError::transport("close refused"));
            }
            state.closes += 1;
            state.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.lock().connected
        }

        async fn read_bytes(
            &mut self,
            area: MemoryArea,
            block: u16,
            start: usize,
            len: usize,
        ) -> Result<Vec<u8>> {
            let mut state = self.lock();
            state.reads += 1;
            state.slice(area, block, start, len)
        }

        async fn write_bytes(
            &mut self,
            area: MemoryArea,
            block: u16,
            start: usize,
            data: &[u8],
        ) -> Result<()> {
            let mut state = self.lock();
            state.writes.push((area, block, start, data.to_vec()));
            let image = state.images.entry((area, block)).or_default();
            if image.len() < start + data.len() {
                image.resize(start + data.len(), 0);
            }
            image[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        async fn read_multiple(&mut self, requests: &[ReadRequest]) -> Result<Vec<Vec<u8>>> {
            let mut state = self.lock();
            state.multi_reads += 1;
            requests
                .iter()
                .map(|r| state.slice(r.area, r.block, r.start, r.len))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeTransport;
    use super::*;

    #[tokio::test]
    async fn test_fake_transport_images() {
        let (mut transport, state) = FakeTransport::new();
        state
            .lock()
            .unwrap()
            .set_image(MemoryArea::Input, 0, vec![0x00, 0x00, 0x08, 0x00]);

        let bytes = transport
            .read_bytes(MemoryArea::Input, 0, 2, 1)
            .await
            .unwrap();
        assert_eq!(bytes, vec![0x08]);
    }

    #[tokio::test]
    async fn test_fake_transport_multi_read_counts_one_transaction() {
        let (mut transport, state) = FakeTransport::new();
        {
            let mut s = state.lock().unwrap();
            s.set_image(MemoryArea::Input, 0, vec![0xAA, 0xBB]);
            s.set_image(MemoryArea::DataBlock, 1, vec![0x41, 0x20, 0x00, 0x00]);
        }

        let requests = [
            ReadRequest::new(MemoryArea::Input, 0, 0, 2),
            ReadRequest::new(MemoryArea::DataBlock, 1, 0, 4),
        ];
        let buffers = transport.read_multiple(&requests).await.unwrap();
        assert_eq!(buffers[0], vec![0xAA, 0xBB]);
        assert_eq!(buffers[1], vec![0x41, 0x20, 0x00, 0x00]);
        assert_eq!(state.lock().unwrap().multi_reads, 1);
        assert_eq!(state.lock().unwrap().reads, 0);
    }

    #[tokio::test]
    async fn test_fake_transport_write_updates_image() {
        let (mut transport, state) = FakeTransport::new();
        transport
            .write_bytes(MemoryArea::Output, 0, 2, &[0x55, 0x55])
            .await
            .unwrap();

        let s = state.lock().unwrap();
        assert_eq!(s.writes.len(), 1);
        assert_eq!(s.images[&(MemoryArea::Output, 0)], vec![0, 0, 0x55, 0x55]);
    }

    #[tokio::test]
    async fn test_fake_transport_open_close() {
        let (mut transport, state) = FakeTransport::new();
        assert!(!transport.is_connected());
        transport.open().await.unwrap();
        assert!(transport.is_connected());
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert_eq!(state.lock().unwrap().opens, 1);
        assert_eq!(state.lock().unwrap().closes, 1);
    }

    #[tokio::test]
    async fn test_fake_transport_scripted_open_failure() {
        let (mut transport, state) = FakeTransport::new();
        state.lock().unwrap().fail_opens = 1;
        assert!(transport.open().await.is_err());
        assert!(!transport.is_connected());
        assert!(transport.open().await.is_ok());
    }
}
