//! Clock frequencies
//!
//! The SPI driver needs two frequencies: the CPU clock, which paces the tick counter used for
//! bounded waits, and the APB clock, which feeds the SPI clock divider.
//!
//! On the W80x both are derived from the 480 MHz PLL. Board code that already knows the clock
//! tree can freeze the values in [`CoreClocks`]. Anything else can implement [`ClockConfig`]
//! directly.
//!
//! ```rust
//! use w80x_spim_hal::prelude::*;
//! use w80x_spim_hal::rcc::{ClockConfig, ClockDomain, CoreClocks};
//!
//! let clocks = CoreClocks::new(240.MHz(), 40.MHz());
//! assert_eq!(clocks.clock_mhz(ClockDomain::Apb), 40);
//! ```

use crate::time::Hertz;

/// Clock domains the driver asks about
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockDomain {
    /// CPU core clock, also the rate of the tick counter
    Cpu,
    /// Peripheral bus clock feeding the SPI controller
    Apb,
}

/// Source of clock frequencies
pub trait ClockConfig {
    /// Current frequency of `domain` in whole MHz.
    fn clock_mhz(&self, domain: ClockDomain) -> u32;
}

/// Frozen core clock frequencies
///
/// The existence of this value indicates that the core clock
/// configuration can no longer be changed
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoreClocks {
    cpu_ck: Hertz,
    pclk: Hertz,
}

impl CoreClocks {
    pub const fn new(cpu_ck: Hertz, pclk: Hertz) -> Self {
        CoreClocks { cpu_ck, pclk }
    }

    /// Returns the frequency of the CPU core
    pub fn cpu_ck(&self) -> Hertz {
        self.cpu_ck
    }

    /// Returns the frequency of the APB
    pub fn pclk(&self) -> Hertz {
        self.pclk
    }
}

impl ClockConfig for CoreClocks {
    fn clock_mhz(&self, domain: ClockDomain) -> u32 {
        match domain {
            ClockDomain::Cpu => self.cpu_ck.to_MHz(),
            ClockDomain::Apb => self.pclk.to_MHz(),
        }
    }
}
