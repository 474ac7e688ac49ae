//! Per-transfer bookkeeping shared by the three engines.
//!
//! A [`Transfer`] tracks how much of the caller's transmit and receive buffers has been moved.
//! The [`Context`] owns the transfer while an asynchronous engine runs, together with the
//! pending header, the completion callback and the DMA legs in flight. The caller keeps the
//! buffers themselves in a [`Transaction`] until the transfer has completed.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use embedded_dma::{ReadBuffer, WriteBuffer};

use crate::dma::Channel;

use super::header::{Header, HeaderFrame};
use super::{Callback, Endianness, Spi, FIFO_DEPTH};

/// Which engine owns the controller
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub(super) enum Engine {
    Idle = 0,
    /// Parameters are being changed
    Configuring = 1,
    Polling = 2,
    InterruptTx = 3,
    InterruptRx = 4,
    InterruptTxRx = 5,
    Dma = 6,
    /// DMA transfer waited on by the caller
    DmaSync = 7,
    /// Shut down by `deinit`, never claimed again
    Off = 8,
}

impl Engine {
    pub(super) fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Engine::Configuring,
            2 => Engine::Polling,
            3 => Engine::InterruptTx,
            4 => Engine::InterruptRx,
            5 => Engine::InterruptTxRx,
            6 => Engine::Dma,
            7 => Engine::DmaSync,
            8 => Engine::Off,
            _ => Engine::Idle,
        }
    }

    pub(super) fn is_interrupt(self) -> bool {
        matches!(
            self,
            Engine::InterruptTx | Engine::InterruptRx | Engine::InterruptTxRx
        )
    }
}

/// Cursor over the buffers of one transfer. An empty buffer means that direction is unused.
pub(super) struct Transfer<'a> {
    tx: &'a [u8],
    tx_idx: usize,
    rx: &'a mut [u8],
    rx_idx: usize,
}

impl<'a> Transfer<'a> {
    pub(super) fn new(tx: &'a [u8], rx: &'a mut [u8]) -> Self {
        Transfer {
            tx,
            tx_idx: 0,
            rx,
            rx_idx: 0,
        }
    }

    #[inline(always)]
    pub(super) fn tx_len(&self) -> usize {
        self.tx.len()
    }

    #[inline(always)]
    pub(super) fn rx_len(&self) -> usize {
        self.rx.len()
    }

    #[inline(always)]
    pub(super) fn tx_idx(&self) -> usize {
        self.tx_idx
    }

    #[inline(always)]
    pub(super) fn rx_idx(&self) -> usize {
        self.rx_idx
    }

    /// Bytes left to send before index `end`
    #[inline(always)]
    pub(super) fn tx_remaining(&self, end: usize) -> usize {
        end.min(self.tx.len()).saturating_sub(self.tx_idx)
    }

    /// Bytes left to receive before index `end`
    #[inline(always)]
    pub(super) fn rx_remaining(&self, end: usize) -> usize {
        end.min(self.rx.len()).saturating_sub(self.rx_idx)
    }

    #[inline(always)]
    pub(super) fn is_complete(&self) -> bool {
        self.tx_idx >= self.tx.len() && self.rx_idx >= self.rx.len()
    }

    #[inline(always)]
    pub(super) fn write_buf(&self) -> &[u8] {
        &self.tx[self.tx_idx..]
    }

    #[inline(always)]
    pub(super) fn read_buf(&mut self) -> &mut [u8] {
        &mut self.rx[self.rx_idx..]
    }

    #[inline(always)]
    pub(super) fn advance_write_idx(&mut self, count: usize) {
        self.tx_idx = (self.tx_idx + count).min(self.tx.len());
    }

    #[inline(always)]
    pub(super) fn advance_read_idx(&mut self, count: usize) {
        self.rx_idx = (self.rx_idx + count).min(self.rx.len());
    }

    /// Address of the next byte to send
    pub(super) fn write_addr(&self) -> usize {
        self.write_buf().as_ptr() as usize
    }

    /// Address of the next byte to receive into
    pub(super) fn read_addr(&mut self) -> usize {
        self.read_buf().as_mut_ptr() as usize
    }
}

/// View of a transmit buffer for the lifetime of an asynchronous transfer.
///
/// # Safety
///
/// `buffer` must not be dropped or written to before the transfer using the view completes.
pub(super) unsafe fn lend_tx<B: ReadBuffer<Word = u8>>(buffer: &B) -> &'static [u8] {
    let (ptr, len) = buffer.read_buffer();
    core::slice::from_raw_parts(ptr, len)
}

/// View of a receive buffer for the lifetime of an asynchronous transfer.
///
/// # Safety
///
/// `buffer` must not be dropped or accessed before the transfer using the view completes.
pub(super) unsafe fn lend_rx<B: WriteBuffer<Word = u8>>(buffer: &mut B) -> &'static mut [u8] {
    let (ptr, len) = buffer.write_buffer();
    core::slice::from_raw_parts_mut(ptr, len)
}

/// Buffers lent to an interrupt or DMA transfer
///
/// Returned by the asynchronous transfer operations. [`Transaction::free`] hands the buffers
/// back once the transfer has completed, whatever its result. Dropping an unfinished
/// transaction leaks the buffers, since the controller may still be using them.
pub struct Transaction<'a, REGS, SYS, B> {
    spi: &'a Spi<REGS, SYS>,
    sequence: u32,
    buffers: Option<B>,
}

impl<'a, REGS, SYS, B> Transaction<'a, REGS, SYS, B> {
    pub(super) fn new(spi: &'a Spi<REGS, SYS>, sequence: u32, buffers: B) -> Self {
        Transaction {
            spi,
            sequence,
            buffers: Some(buffers),
        }
    }

    /// Whether the transfer has completed and its callback has been invoked or is running
    pub fn is_done(&self) -> bool {
        let finished = self.spi.finished.load(Ordering::Acquire);
        finished.wrapping_sub(self.sequence) as i32 >= 0
    }

    /// Take the buffers back, or get the transaction back while the transfer still runs.
    pub fn free(mut self) -> Result<B, Self> {
        if self.is_done() {
            if let Some(buffers) = self.buffers.take() {
                return Ok(buffers);
            }
        }
        Err(self)
    }
}

impl<REGS, SYS, B> Drop for Transaction<'_, REGS, SYS, B> {
    fn drop(&mut self) {
        if !self.is_done() {
            if let Some(buffers) = self.buffers.take() {
                core::mem::forget(buffers);
            }
        }
    }
}

impl<REGS, SYS, B> fmt::Debug for Transaction<'_, REGS, SYS, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("sequence", &self.sequence)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// Sizes of one start-to-idle round of the controller
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct Round {
    /// Payload bytes pushed after the header
    pub tx: usize,
    /// Bytes clocked, header included
    pub clocked: usize,
    /// Receive channel enabled
    pub rx_on: bool,
}

impl Round {
    /// Plan the next round. `header_len` is the unpadded length of a header still to be sent,
    /// or zero.
    ///
    /// With both directions active the payload chunk is the lesser of the two remainders, so
    /// every clocked payload byte is also a received byte. A receive-only round clocks filler
    /// bytes and is bounded by the receive FIFO.
    pub(super) fn plan(tx_remaining: usize, rx_remaining: usize, header_len: usize) -> Option<Self> {
        let free = FIFO_DEPTH - header_len;
        let (tx, payload) = match (tx_remaining, rx_remaining) {
            (0, 0) => (0, 0),
            (tx, 0) => {
                let chunk = tx.min(free);
                (chunk, chunk)
            }
            (0, rx) => (0, rx.min(FIFO_DEPTH)),
            (tx, rx) => {
                let chunk = tx.min(rx).min(free);
                (chunk, chunk)
            }
        };

        if header_len + payload == 0 {
            return None;
        }
        Some(Round {
            tx,
            clocked: header_len + payload,
            rx_on: rx_remaining > 0,
        })
    }
}

/// DMA channel programmed for one direction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct DmaLeg {
    pub channel: Channel,
    /// Bytes requested from the channel
    pub len: usize,
}

/// DMA legs of the transfer in flight
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(super) struct DmaLegs {
    pub tx: Option<DmaLeg>,
    pub rx: Option<DmaLeg>,
}

impl DmaLegs {
    /// Join bits of the armed legs
    pub(super) fn join_bits(&self) -> u8 {
        let tx = self.tx.map_or(0, |_| DmaJoin::TX);
        let rx = self.rx.map_or(0, |_| DmaJoin::RX);
        tx | rx
    }
}

/// Completion join of an asynchronous DMA transfer
///
/// One bit per armed leg, cleared by its completion, plus [`DmaJoin::LAUNCH`], cleared by the
/// task once the controller has been started. Whoever clears the last bit finishes the transfer.
pub(super) struct DmaJoin(AtomicU8);

impl DmaJoin {
    pub(super) const TX: u8 = 1 << 0;
    pub(super) const RX: u8 = 1 << 1;
    pub(super) const LAUNCH: u8 = 1 << 2;

    pub(super) const fn new() -> Self {
        DmaJoin(AtomicU8::new(0))
    }

    pub(super) fn arm(&self, bits: u8) {
        self.0.store(bits, Ordering::Release);
    }

    pub(super) fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Clear `bit`. Returns true when it was set and no other bit is left.
    pub(super) fn clear(&self, bit: u8) -> bool {
        let previous = self.0.fetch_and(!bit, Ordering::AcqRel);
        previous & bit != 0 && previous & !bit == 0
    }
}

/// State guarded by the engine tag
pub(super) struct Context {
    pub header: Option<Header>,
    pub endianness: Endianness,
    pub callback: Option<(Callback, usize)>,
    pub transfer: Option<Transfer<'static>>,
    pub dma: DmaLegs,
    /// Number of the latest asynchronous transfer
    pub sequence: u32,
}

impl Context {
    pub(super) const fn new(endianness: Endianness) -> Self {
        Context {
            header: None,
            endianness,
            callback: None,
            transfer: None,
            dma: DmaLegs { tx: None, rx: None },
            sequence: 0,
        }
    }

    /// Number the asynchronous transfer being started
    pub(super) fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Serialize and consume the pending header
    pub(super) fn take_frame(&mut self) -> Result<Option<HeaderFrame>, super::Error> {
        match self.header.take() {
            Some(header) if !header.is_empty() => header.build(self.endianness).map(Some),
            _ => Ok(None),
        }
    }
}
