//! LSPI register block
//!
//! The driver never touches memory directly: every access goes through [`Registers`], and the
//! field level accessors of the driver are generated from the bit layout below.

use core::ptr;

use super::Inner;

/// Registers of the SPI master block, by offset
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum Reg {
    /// Channel configuration: start, chip select, transfer length, channel enables
    ChCfg = 0x00,
    /// Frame configuration: mode, role, endianness, timing
    Cfg = 0x04,
    /// Clock divider
    ClkCfg = 0x08,
    /// DMA enables and FIFO trigger levels
    ModeCfg = 0x0C,
    /// Interrupt mask, a set bit disables the source
    IntMask = 0x10,
    /// Interrupt status, write 1 to clear
    IntStatus = 0x14,
    /// FIFO levels and busy flag
    Status = 0x18,
    TimeoutCfg = 0x1C,
    /// Transmit FIFO, 32 bit writes
    TxData = 0x20,
    TransMode = 0x24,
    SlvXmitLen = 0x28,
    /// Receive FIFO, 32 bit reads
    RxData = 0x30,
}

impl Reg {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

/// Raw access to the SPI register block
pub trait Registers {
    fn read(&self, reg: Reg) -> u32;

    fn write(&self, reg: Reg, value: u32);

    /// Bus address of `reg`, as programmed into DMA descriptors.
    fn address(&self, reg: Reg) -> usize;
}

/// Volatile access to a memory mapped register block
#[derive(Debug)]
pub struct MmioRegisters {
    base: usize,
}

/// Base address of the LSPI block on W80x devices
pub const LSPI_BASE: usize = 0x4000_1400;

impl MmioRegisters {
    /// # Safety
    ///
    /// `base` must be the address of an LSPI register block, and no other owner may access it
    /// while the returned value is alive.
    pub const unsafe fn new(base: usize) -> Self {
        MmioRegisters { base }
    }
}

impl Registers for MmioRegisters {
    #[inline(always)]
    fn read(&self, reg: Reg) -> u32 {
        // NOTE(unsafe) address validity is the contract of `MmioRegisters::new`
        unsafe { ptr::read_volatile((self.base + reg.offset()) as *const u32) }
    }

    #[inline(always)]
    fn write(&self, reg: Reg, value: u32) {
        // NOTE(unsafe) address validity is the contract of `MmioRegisters::new`
        unsafe { ptr::write_volatile((self.base + reg.offset()) as *mut u32, value) }
    }

    fn address(&self, reg: Reg) -> usize {
        self.base + reg.offset()
    }
}

/// Interrupt sources, shared by `IntMask` and `IntStatus`
pub mod int {
    pub const TX_FIFO_RDY: u32 = 1 << 0;
    pub const RX_FIFO_RDY: u32 = 1 << 1;
    pub const TX_UNDERRUN: u32 = 1 << 2;
    pub const TX_OVERRUN: u32 = 1 << 3;
    pub const RX_UNDERRUN: u32 = 1 << 4;
    pub const RX_OVERRUN: u32 = 1 << 5;
    pub const DONE: u32 = 1 << 6;
    pub const TIMEOUT: u32 = 1 << 7;
    pub const ALL: u32 = 0xFF;
}

/// Bit positions of the `ChCfg` trigger bits, which read back as zero
pub mod ch_cfg {
    pub const START: u32 = 1 << 0;
    pub const CLEAR_FIFO: u32 = 1 << 22;
}

#[inline(always)]
const fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Generates `reg_field()` getters and `set_reg_field()` read-modify-write setters
macro_rules! fields {
    ($($reg:ident { $($field:ident: $offset:expr, $width:expr;)+ })+) => {
        paste::paste! {
            impl<R: Registers> Inner<R> {
                $($(
                    #[inline(always)]
                    #[allow(dead_code)]
                    pub(super) fn [<$reg:snake _ $field>](&self) -> u32 {
                        (self.regs.read(Reg::$reg) >> $offset) & mask($width)
                    }

                    #[inline(always)]
                    #[allow(dead_code)]
                    pub(super) fn [<set_ $reg:snake _ $field>](&self, value: u32) {
                        let m = mask($width) << $offset;
                        let current = self.regs.read(Reg::$reg);
                        self.regs.write(Reg::$reg, (current & !m) | ((value << $offset) & m));
                    }
                )+)+
            }
        }
    };
}

fields! {
    ChCfg {
        cs_out: 1, 1;
        chip_sel: 2, 1;
        tx_rx_len: 3, 16;
        tx_ch_on: 19, 1;
        rx_ch_on: 20, 1;
        continue_mode: 21, 1;
        rx_invalid_bit: 23, 8;
    }
    Cfg {
        cpol: 0, 1;
        cpha: 1, 1;
        role: 2, 1;
        big_endian: 3, 1;
        frame_delay: 4, 3;
        out_delay: 7, 2;
        cs_setup: 9, 3;
        cs_hold: 12, 3;
        tx_driven: 16, 1;
        frame_format: 17, 2;
    }
    ClkCfg {
        divider: 0, 16;
    }
    ModeCfg {
        tx_dma_on: 0, 1;
        rx_dma_on: 1, 1;
        tx_trig_level: 2, 3;
        rx_trig_level: 6, 3;
    }
    Status {
        tx_level: 0, 6;
        rx_level: 6, 6;
        busy: 12, 1;
    }
}

impl<R: Registers> Inner<R> {
    /// Trigger the programmed transfer
    #[inline]
    pub(super) fn start(&self) {
        let current = self.regs.read(Reg::ChCfg);
        self.regs.write(Reg::ChCfg, current | ch_cfg::START);
    }

    /// Flush both FIFOs
    #[inline]
    pub(super) fn clear_fifo(&self) {
        let current = self.regs.read(Reg::ChCfg);
        self.regs.write(Reg::ChCfg, current | ch_cfg::CLEAR_FIFO);
    }

    #[inline]
    pub(super) fn is_busy(&self) -> bool {
        self.status_busy() != 0
    }

    #[inline]
    pub(super) fn mask_interrupts(&self, sources: u32) {
        let current = self.regs.read(Reg::IntMask);
        self.regs.write(Reg::IntMask, current | sources);
    }

    #[inline]
    pub(super) fn unmask_interrupts(&self, sources: u32) {
        let current = self.regs.read(Reg::IntMask);
        self.regs.write(Reg::IntMask, current & !sources & int::ALL);
    }

    /// Clear latched interrupt sources
    #[inline]
    pub(super) fn clear_interrupts(&self, sources: u32) {
        self.regs.write(Reg::IntStatus, sources);
    }

    /// Latched sources that are not masked
    #[inline]
    pub(super) fn pending_interrupts(&self) -> u32 {
        self.regs.read(Reg::IntStatus) & !self.regs.read(Reg::IntMask) & int::ALL
    }

    #[inline(always)]
    pub(super) fn write_tx_word(&self, word: u32) {
        self.regs.write(Reg::TxData, word);
    }

    #[inline(always)]
    pub(super) fn read_rx_word(&self) -> u32 {
        self.regs.read(Reg::RxData)
    }

    /// Turn both channels off and leave DMA requests disarmed
    pub(super) fn channels_off(&self) {
        self.set_ch_cfg_tx_ch_on(0);
        self.set_ch_cfg_rx_ch_on(0);
        self.set_mode_cfg_tx_dma_on(0);
        self.set_mode_cfg_rx_dma_on(0);
    }
}
