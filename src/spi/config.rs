use crate::dma::Channel;
use crate::irq::Irq;
use crate::time::{Hertz, MicroSeconds};

use super::Mode;

/// The order in which FIFO words are shifted out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Endianness {
    /// Lane 0 of each word first. This is the reset default.
    #[default]
    LittleEndian,
    /// Lane 3 of each word first
    BigEndian,
}

/// Logic level of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub(super) fn bit(self) -> u32 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }

    pub(super) fn inverse(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    pub(super) fn from_bit(bit: u32) -> Self {
        if bit == 0 {
            Level::Low
        } else {
            Level::High
        }
    }
}

/// Frame format of the serial interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameFormat {
    /// Motorola SPI, the default
    #[default]
    Motorola,
    /// TI synchronous serial
    Ti,
    /// National Microwire
    Microwire,
}

impl FrameFormat {
    pub(super) fn bits(self) -> u32 {
        match self {
            FrameFormat::Motorola => 0,
            FrameFormat::Ti => 1,
            FrameFormat::Microwire => 2,
        }
    }
}

/// Default bus clock
pub const DEFAULT_FREQUENCY: Hertz = Hertz::from_raw(2_000_000);
/// Highest supported bus clock
pub const MAX_FREQUENCY: Hertz = Hertz::from_raw(20_000_000);
/// Lowest supported bus clock
pub const MIN_FREQUENCY: Hertz = Hertz::from_raw(10_000);

/// A structure for specifying SPI configuration.
///
/// This structure uses builder semantics to generate the configuration.
///
/// `Example`
/// ```
/// use w80x_spim_hal::prelude::*;
/// use w80x_spim_hal::spi::{Config, Level, MODE_0};
///
/// let config = Config::new(MODE_0)
///     .frequency(10.MHz())
///     .cs_active_level(Level::Low)
///     .cs_software_control(true);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub(super) mode: Mode,
    pub(super) frequency: Hertz,
    pub(super) cs_active_level: Level,
    pub(super) cs_software_control: bool,
    pub(super) endianness: Endianness,
    pub(super) frame_format: FrameFormat,
    pub(super) idle_timeout: MicroSeconds,
    pub(super) isr_idle_timeout: MicroSeconds,
}

impl Config {
    /// Create a default configuration for the SPI interface.
    ///
    /// Arguments:
    /// * `mode` - The SPI mode to configure.
    pub fn new(mode: Mode) -> Self {
        Config {
            mode,
            frequency: DEFAULT_FREQUENCY,
            cs_active_level: Level::Low,
            cs_software_control: false,
            endianness: Endianness::LittleEndian,
            frame_format: FrameFormat::Motorola,
            idle_timeout: MicroSeconds::from_ticks(500_000),
            isr_idle_timeout: MicroSeconds::from_ticks(50_000),
        }
    }

    /// Bus clock. Must lie between [`MIN_FREQUENCY`] and [`MAX_FREQUENCY`].
    #[must_use]
    pub fn frequency(mut self, frequency: Hertz) -> Self {
        self.frequency = frequency;
        self
    }

    /// Level of the chip select line while a transfer is running.
    #[must_use]
    pub fn cs_active_level(mut self, level: Level) -> Self {
        self.cs_active_level = level;
        self
    }

    /// Drive chip select from the `cs_out` bit instead of the transfer engine.
    #[must_use]
    pub fn cs_software_control(mut self, enable: bool) -> Self {
        self.cs_software_control = enable;
        self
    }

    /// Select the word order of the FIFO.
    #[must_use]
    pub fn endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    #[must_use]
    pub fn frame_format(mut self, frame_format: FrameFormat) -> Self {
        self.frame_format = frame_format;
        self
    }

    /// Longest wait for the controller to go idle from task context.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: MicroSeconds) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Longest wait for the controller to go idle inside the interrupt and DMA completion
    /// handlers.
    ///
    /// Note:
    /// * This wait runs with interrupts of equal priority blocked, so it should stay short.
    #[must_use]
    pub fn isr_idle_timeout(mut self, timeout: MicroSeconds) -> Self {
        self.isr_idle_timeout = timeout;
        self
    }
}

impl From<Mode> for Config {
    fn from(mode: Mode) -> Self {
        Self::new(mode)
    }
}

/// Interrupt line and DMA channels assigned to the controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Resources {
    pub(super) irq: Irq,
    pub(super) tx_dma: Option<Channel>,
    pub(super) rx_dma: Option<Channel>,
}

impl Resources {
    pub fn new(irq: Irq) -> Self {
        Resources {
            irq,
            tx_dma: None,
            rx_dma: None,
        }
    }

    /// Channels used by the DMA engine. Without them the DMA operations fail with
    /// [`Error::InvalidParam`](super::Error::InvalidParam).
    #[must_use]
    pub fn with_dma(mut self, tx: Channel, rx: Channel) -> Self {
        self.tx_dma = Some(tx);
        self.rx_dma = Some(rx);
        self
    }

    pub fn irq(&self) -> Irq {
        self.irq
    }
}
