//! Ping-pong event payload
//!
//! Layout inside the event buffer:
//! - `[0..4)`: sequence number, little-endian u32
//! - `[4..254)`: opaque test data
//!
//! Events are allocated with `EVENT_SIZE` (256) bytes, the natural size of
//! the record once padded to its 4-byte alignment.

use crate::runtime::Event;
use crate::utils::RuntimeError;

/// Size of the opaque data area in bytes
pub const DATA_SIZE: usize = 250;

const SEQ_SIZE: usize = 4;

/// Allocation size of one payload event
pub const EVENT_SIZE: usize = 256;

const _: () = assert!(SEQ_SIZE + DATA_SIZE <= EVENT_SIZE);

/// Mutable typed view over an event's payload bytes
pub struct PerfEvent<'a> {
    bytes: &'a mut [u8],
}

impl<'a> PerfEvent<'a> {
    /// View the payload of `event`
    pub fn view(event: &'a mut Event) -> Result<Self, RuntimeError> {
        Self::from_bytes(event.payload_mut())
    }

    pub fn from_bytes(bytes: &'a mut [u8]) -> Result<Self, RuntimeError> {
        let needed = SEQ_SIZE + DATA_SIZE;
        if bytes.len() < needed {
            return Err(RuntimeError::PayloadTooSmall {
                size: bytes.len(),
                needed,
            });
        }
        Ok(Self { bytes })
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        let mut raw = [0u8; SEQ_SIZE];
        raw.copy_from_slice(&self.bytes[..SEQ_SIZE]);
        u32::from_le_bytes(raw)
    }

    #[inline]
    pub fn set_seq(&mut self, seq: u32) {
        self.bytes[..SEQ_SIZE].copy_from_slice(&seq.to_le_bytes());
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[SEQ_SIZE..SEQ_SIZE + DATA_SIZE]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[SEQ_SIZE..SEQ_SIZE + DATA_SIZE]
    }

    /// Copy the first half of the data area over the second half
    #[inline]
    pub fn copy_half(&mut self) {
        let half = DATA_SIZE / 2;
        self.data_mut().copy_within(..half, half);
    }
}
