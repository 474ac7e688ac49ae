//! DMA controller access
//!
//! The W80x DMA controller has 8 channels. Each channel moves data between a source and a
//! destination address under the control of a hardware request line, one [`DataUnit`] at a
//! time. The SPI driver uses one channel per direction:
//!
//! - transmit: memory to the SPI tx FIFO, source incremented, destination fixed
//! - receive: the SPI rx FIFO to memory, source fixed, destination incremented
//!
//! The controller itself belongs to the board. The driver reaches it through the
//! [`DmaController`] trait and describes each transfer with a [`DmaConfig`]. When a channel with
//! a registered callback completes, the board's DMA interrupt dispatcher is expected to call
//! [`Spi::on_dma_complete`](crate::spi::Spi::on_dma_complete) with that channel.
//!
//! ```
//! use w80x_spim_hal::dma::{Channel, DmaConfig, Request};
//!
//! let source = [0u8; 64];
//! let config = DmaConfig::memory_to_peripheral(Channel::new(0), Request::SpiTx)
//!     .source(source.as_ptr() as usize)
//!     .destination(0x4000_1420)
//!     .len(source.len());
//! assert_eq!(config.units(), 16);
//! ```

pub mod config;

pub use config::{AddressingMode, DataUnit, DmaConfig, Request, TransferDirection};

/// Number of channels on the controller
pub const CHANNELS: u8 = 8;

/// Largest transfer one descriptor can describe, in bytes
pub const MAX_TRANSFER_LEN: usize = 0xFFFF;

/// A DMA channel number
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel(u8);

impl Channel {
    pub const fn new(number: u8) -> Self {
        Channel(number)
    }

    pub const fn number(&self) -> u8 {
        self.0
    }

    /// Whether the controller has this channel
    pub const fn is_valid(&self) -> bool {
        self.0 < CHANNELS
    }
}

/// DMA error
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The channel does not exist
    InvalidChannel,
    /// The channel is in use by another transfer
    Busy,
    /// The descriptor cannot be programmed (length, alignment, address)
    Config,
}

/// Channel state as reported by [`DmaController::status`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Not started, or stopped
    Idle,
    /// Moving data
    Running,
    /// Finished its descriptor
    Done,
}

/// Snapshot of a channel
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub state: State,
    /// Bytes moved so far
    pub transferred: usize,
}

/// DMA controller operations used by the SPI driver
pub trait DmaController {
    /// Program the channel named in `config`. The channel must be stopped.
    fn configure(&self, config: &DmaConfig) -> Result<(), Error>;

    /// Start a configured channel.
    fn start(&self, channel: Channel) -> Result<(), Error>;

    /// Stop a channel. Stopping an idle channel is not an error.
    fn stop(&self, channel: Channel) -> Result<(), Error>;

    /// State and byte count of a channel.
    fn status(&self, channel: Channel) -> Result<Status, Error>;

    /// Deliver completion of `channel` to the SPI driver.
    fn register_callback(&self, channel: Channel) -> Result<(), Error>;

    /// Stop delivering completion of `channel`.
    fn unregister_callback(&self, channel: Channel) -> Result<(), Error>;
}
