//! SPI master driver for the low-speed SPI controller (LSPI) of the WinnerMicro W80x family.
//!
//! The crate does not own a peripheral access crate. The SPI register block, the CPU tick
//! counter, the interrupt controller and the DMA controller are reached through the
//! [`spi::Registers`], [`time::TickCounter`], [`irq::Interrupt`] and [`dma::DmaController`]
//! traits, so the same engine runs on the chip and against a host-side simulator.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod macros;

pub mod prelude;

pub mod dma;
pub mod irq;
pub mod rcc;
pub mod spi;
pub mod time;
