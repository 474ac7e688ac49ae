//! Interrupt controller access
//!
//! The driver enables and disables its own interrupt line around polled transfers and attaches
//! itself at init. The interrupt vector itself stays with the board: its handler calls
//! [`Spi::on_interrupt`](crate::spi::Spi::on_interrupt).

/// Interrupt line number as known to the interrupt controller
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Irq(pub u8);

/// Interrupt controller error
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The line does not exist on this device
    InvalidLine,
    /// Another handler already owns the line
    AlreadyAttached,
}

/// Interrupt controller operations used by the SPI driver
pub trait Interrupt {
    /// Unmask `irq` at the interrupt controller.
    fn enable(&self, irq: Irq);

    /// Mask `irq` at the interrupt controller.
    fn disable(&self, irq: Irq);

    /// Route `irq` to the SPI driver's handler.
    fn attach(&self, irq: Irq) -> Result<(), Error>;

    /// Release `irq`.
    fn detach(&self, irq: Irq);
}
