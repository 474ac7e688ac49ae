//! Serial Peripheral Interface (SPI) master
//!
//! This module drives the LSPI controller as a bus master. The controller shifts bytes through
//! a 32 byte transmit FIFO and a 32 byte receive FIFO, both accessed one 32 bit word at a time,
//! and can prepend a command/address/dummy [`Header`] to a transfer whose bytes are not stored
//! on the receive side.
//!
//! Three engines move the caller's buffers through the FIFOs:
//!
//! - **Polling** ([`Spi::tx_polling`], [`Spi::rx_polling`], [`Spi::tx_rx_polling`]): the
//!   calling task fills and drains the FIFO one round at a time until done, bounded by a
//!   caller supplied timeout.
//! - **Interrupt** ([`Spi::tx_interrupt`], [`Spi::rx_interrupt`], [`Spi::tx_rx_interrupt`]): the
//!   first round is started by the caller, every following round by [`Spi::on_interrupt`].
//! - **DMA** ([`Spi::tx_dma`], [`Spi::rx_dma`], [`Spi::tx_rx_dma`], [`Spi::tx_rx_dma_sync`]):
//!   the word aligned bulk of the buffers is moved by two DMA channels, the unaligned head and
//!   the tail through the FIFO.
//!
//! Interrupt and DMA transfers report through the callback set with
//! [`Spi::register_callback`], exactly once per transfer, from interrupt context. They take
//! their buffers by value as [`embedded_dma`] buffers and lend them back through the returned
//! [`Transaction`] once the transfer is done.
//!
//! Chip select stays asserted from the first round of a transfer to the last, so a header and
//! the payload after it form a single bus transaction.
//!
//! # Usage
//!
//! ```
//! use w80x_spim_hal::prelude::*;
//! use w80x_spim_hal::irq::Irq;
//! use w80x_spim_hal::spi::{self, Config, Header, Param, Resources, Spi};
//!
//! # fn demo<R: spi::Registers, P: spi::Platform>(regs: R, platform: P) -> Result<(), spi::Error> {
//! let spi = Spi::new(
//!     regs,
//!     platform,
//!     Config::new(spi::MODE_0).frequency(10.MHz()),
//!     Resources::new(Irq(25)),
//! )?;
//!
//! // Read 16 bytes of flash from address 0x10
//! spi.set_param(Param::Header(Header::new().command(0x03, 1).address(0x10, 3)))?;
//! let mut data = [0u8; 16];
//! spi.rx_polling(&mut data, 100.millis())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! All operations take `&self`. Ownership of the controller is tracked by an atomic engine tag:
//! every operation claims it from idle and returns [`Error::AlreadyBusy`] when another transfer
//! or a parameter change owns it. The interrupt and DMA handlers only act while their engine
//! owns the tag, and release it before the completion callback runs, so the callback may start
//! the next transfer.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

pub use embedded_hal::spi::{
    Mode, Phase, Polarity, MODE_0, MODE_1, MODE_2, MODE_3,
};

use crate::dma::{self as dma_ctrl, DmaController};
use crate::irq::{self, Interrupt};
use crate::rcc::{ClockConfig, ClockDomain};
use crate::time::{Deadline, Hertz, MicroSeconds, MilliSeconds, TickCounter};

mod config;
mod dma;
mod fifo;
mod hal;
pub mod header;
mod nonblocking;
mod polling;
mod regs;
mod transaction;

pub use config::{
    Config, Endianness, FrameFormat, Level, Resources, DEFAULT_FREQUENCY,
    MAX_FREQUENCY, MIN_FREQUENCY,
};
pub use fifo::{pack_word, unpack_word};
pub use header::{Header, HeaderFrame};
pub use regs::{int, MmioRegisters, Reg, Registers, LSPI_BASE};

pub use transaction::Transaction;

use transaction::{Context, DmaJoin, DmaLegs, Engine, Round, Transfer};

/// Depth of each FIFO in bytes
pub const FIFO_DEPTH: usize = 32;

/// Longest buffer accepted by a single DMA request, bounded by the bit count of `tx_rx_len`
pub const MAX_TXRX_LEN: usize = 8191;

/// Buffers shorter than this are always moved through the FIFO
pub const DMA_MIN_LEN: usize = 4;

/// Budget for the FIFO rounds that finish a DMA transfer
pub const RESIDUE_TIMEOUT: MilliSeconds = MilliSeconds::from_ticks(5_000);

/// SPI error
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// An argument is out of range, or a required resource is not configured
    InvalidParam,
    /// The controller did not go idle, or the transfer did not finish, in time
    Timeout,
    /// A collaborator (DMA or interrupt controller) refused a request
    Failed,
    /// Another transfer or a parameter change owns the controller
    AlreadyBusy,
}

impl From<dma_ctrl::Error> for Error {
    fn from(error: dma_ctrl::Error) -> Self {
        spim_error!("dma request failed: {:?}", error);
        Error::Failed
    }
}

impl From<irq::Error> for Error {
    fn from(error: irq::Error) -> Self {
        spim_error!("interrupt request failed: {:?}", error);
        Error::Failed
    }
}

/// Completion callback of interrupt and DMA transfers: `(user_arg, result)`
pub type Callback = fn(usize, Result<(), Error>);

/// Everything the driver needs from the rest of the system
pub trait Platform: ClockConfig + TickCounter + Interrupt + DmaController {}

impl<T> Platform for T where T: ClockConfig + TickCounter + Interrupt + DmaController {}

/// Settable parameters
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Param {
    /// Header for the next transfer
    Header(Header),
    Endianness(Endianness),
    /// Chip select level during a transfer
    CsActiveLevel(Level),
    /// Drive chip select from software
    CsSoftwareControl(bool),
    /// Raw clock divider, `Fsck = Fapb / (2 * (divider + 1))`
    ClockDivider(u16),
    /// Clock divider computed from the APB clock
    Frequency(Hertz),
    Mode(Mode),
    FrameFormat(FrameFormat),
    /// Bits the receiver discards at the start of the next round
    RxInvalidBits(u8),
    /// Data output delay relative to SCK, 0 to 3 APB cycles
    DataOutDelay(u8),
    /// Gap between frames, 0 to 7 SPI cycles
    FrameInterval(u8),
}

/// Readable parameters, see [`Spi::param`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamKind {
    /// 0 little endian, 1 big endian
    Endianness,
    /// 0 active low, 1 active high
    CsActiveLevel,
    CsSoftwareControl,
    ClockDivider,
    /// SPI mode number, 0 to 3
    Mode,
    /// 0 Motorola, 1 TI, 2 Microwire
    FrameFormat,
    RxInvalidBits,
    DataOutDelay,
    FrameInterval,
}

fn calc_divider(apb_hz: u32, frequency: Hertz) -> Result<u16, Error> {
    let frequency = frequency.raw();
    if frequency < MIN_FREQUENCY.raw() || frequency > MAX_FREQUENCY.raw() {
        return Err(Error::InvalidParam);
    }
    let divider = (apb_hz / (2 * frequency)).saturating_sub(1);
    u16::try_from(divider).map_err(|_| Error::InvalidParam)
}

const fn mode_number(mode: Mode) -> u32 {
    let cpol = matches!(mode.polarity, Polarity::IdleHigh) as u32;
    let cpha = matches!(mode.phase, Phase::CaptureOnSecondTransition) as u32;
    cpol << 1 | cpha
}

/// Register level view of the controller
struct Inner<REGS> {
    regs: REGS,
}

impl<REGS: Registers> Inner<REGS> {
    fn new(regs: REGS) -> Self {
        Inner { regs }
    }

    fn set_mode(&self, mode: Mode) {
        let number = mode_number(mode);
        self.set_cfg_cpol(number >> 1);
        self.set_cfg_cpha(number & 1);
    }

    /// Mask and clear every source, flush the FIFOs and hold chip select across rounds
    fn prepare(&self) {
        self.mask_interrupts(int::ALL);
        self.clear_interrupts(int::ALL);
        self.clear_fifo();
        self.set_ch_cfg_continue_mode(1);
    }

    /// Mask every source, turn both channels and DMA requests off, forget the header bits and
    /// release chip select
    fn quiesce(&self) {
        self.mask_interrupts(int::ALL);
        self.channels_off();
        self.set_ch_cfg_rx_invalid_bit(0);
        self.set_ch_cfg_continue_mode(0);
        self.clear_interrupts(int::ALL);
    }
}

/// SPI master
pub struct Spi<REGS, SYS> {
    inner: Inner<REGS>,
    sys: SYS,
    config: Config,
    resources: Resources,
    engine: AtomicU8,
    /// Sequence number of the last asynchronous transfer that completed
    finished: AtomicU32,
    dma_join: DmaJoin,
    context: UnsafeCell<Context>,
}

// NOTE(unsafe) the context is only accessed by the holder of the engine tag
unsafe impl<REGS: Send, SYS: Send> Sync for Spi<REGS, SYS> {}

impl<REGS: Registers, SYS: Platform> Spi<REGS, SYS> {
    /// Bring up the controller as a bus master.
    ///
    /// Programs frame format, mode, clock divider and chip select behaviour from `config`,
    /// then attaches and enables the interrupt line from `resources`.
    pub fn new(
        regs: REGS,
        sys: SYS,
        config: Config,
        resources: Resources,
    ) -> Result<Self, Error> {
        let spi = Spi {
            inner: Inner::new(regs),
            sys,
            config,
            resources,
            engine: AtomicU8::new(Engine::Idle as u8),
            finished: AtomicU32::new(0),
            dma_join: DmaJoin::new(),
            context: UnsafeCell::new(Context::new(config.endianness)),
        };
        spi.init()?;
        Ok(spi)
    }

    fn init(&self) -> Result<(), Error> {
        let apb_hz = self.sys.clock_mhz(ClockDomain::Apb) * 1_000_000;
        let divider = calc_divider(apb_hz, self.config.frequency)?;

        let inner = &self.inner;
        inner.clear_fifo();
        inner.mask_interrupts(int::ALL);
        inner.clear_interrupts(int::ALL);

        inner.set_cfg_big_endian((self.config.endianness == Endianness::BigEndian) as u32);
        inner.set_ch_cfg_chip_sel(self.config.cs_active_level.inverse().bit());
        inner.set_ch_cfg_cs_out(self.config.cs_software_control as u32);

        inner.set_mode_cfg_tx_trig_level(0);
        inner.set_mode_cfg_rx_trig_level(0);
        inner.set_ch_cfg_tx_ch_on(1);
        inner.set_ch_cfg_rx_ch_on(1);

        inner.set_cfg_cs_setup(1);
        inner.set_cfg_cs_hold(1);
        inner.set_cfg_out_delay(1);
        inner.set_cfg_role(1);
        inner.set_cfg_frame_format(self.config.frame_format.bits());
        inner.set_mode(self.config.mode);
        inner.set_clk_cfg_divider(divider as u32);

        self.sys.attach(self.resources.irq)?;
        self.sys.enable(self.resources.irq);

        spim_debug!(
            "spi master up, divider {}, apb {} MHz",
            divider,
            apb_hz / 1_000_000
        );
        Ok(())
    }

    /// Shut the controller down: FIFOs cleared, interrupt line disabled and detached.
    ///
    /// Every later operation fails with [`Error::InvalidParam`].
    pub fn deinit(&self) -> Result<(), Error> {
        self.claim(Engine::Configuring)?;
        self.inner.clear_fifo();
        self.inner.quiesce();
        self.sys.disable(self.resources.irq);
        self.sys.detach(self.resources.irq);
        self.engine.store(Engine::Off as u8, Ordering::Release);
        spim_debug!("spi master down");
        Ok(())
    }

    /// Releases the register block and the platform
    pub fn free(self) -> (REGS, SYS) {
        (self.inner.regs, self.sys)
    }

    pub fn platform(&self) -> &SYS {
        &self.sys
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Set the callback for interrupt and DMA transfers.
    pub fn register_callback(&self, callback: Callback, user_arg: usize) -> Result<(), Error> {
        self.claim(Engine::Configuring)?;
        // NOTE(unsafe) the engine tag is held
        let ctx = unsafe { self.context() };
        ctx.callback = Some((callback, user_arg));
        self.release();
        Ok(())
    }

    /// Set the header for the next transfer. Equivalent to `set_param(Param::Header(..))`.
    pub fn set_header(&self, header: Header) -> Result<(), Error> {
        self.set_param(Param::Header(header))
    }

    /// Change a parameter. Fails with [`Error::AlreadyBusy`] while a transfer runs.
    pub fn set_param(&self, param: Param) -> Result<(), Error> {
        self.claim(Engine::Configuring)?;
        let result = self.apply_param(param);
        self.release();
        result
    }

    fn apply_param(&self, param: Param) -> Result<(), Error> {
        let inner = &self.inner;
        match param {
            Param::Header(header) => {
                header.validate()?;
                // NOTE(unsafe) the engine tag is held by `set_param`
                let ctx = unsafe { self.context() };
                ctx.header = (!header.is_empty()).then_some(header);
            }
            Param::Endianness(endianness) => {
                // NOTE(unsafe) the engine tag is held by `set_param`
                let ctx = unsafe { self.context() };
                ctx.endianness = endianness;
                inner.set_cfg_big_endian((endianness == Endianness::BigEndian) as u32);
            }
            Param::CsActiveLevel(level) => inner.set_ch_cfg_chip_sel(level.inverse().bit()),
            Param::CsSoftwareControl(enable) => inner.set_ch_cfg_cs_out(enable as u32),
            Param::ClockDivider(divider) => inner.set_clk_cfg_divider(divider as u32),
            Param::Frequency(frequency) => {
                let apb_hz = self.sys.clock_mhz(ClockDomain::Apb) * 1_000_000;
                inner.set_clk_cfg_divider(calc_divider(apb_hz, frequency)? as u32);
            }
            Param::Mode(mode) => inner.set_mode(mode),
            Param::FrameFormat(format) => inner.set_cfg_frame_format(format.bits()),
            Param::RxInvalidBits(bits) => inner.set_ch_cfg_rx_invalid_bit(bits as u32),
            Param::DataOutDelay(delay) if delay <= 3 => inner.set_cfg_out_delay(delay as u32),
            Param::FrameInterval(interval) if interval <= 7 => {
                inner.set_cfg_frame_delay(interval as u32)
            }
            Param::DataOutDelay(_) | Param::FrameInterval(_) => return Err(Error::InvalidParam),
        }
        Ok(())
    }

    /// Read back a parameter from the controller.
    pub fn param(&self, kind: ParamKind) -> u32 {
        let inner = &self.inner;
        match kind {
            ParamKind::Endianness => inner.cfg_big_endian(),
            ParamKind::CsActiveLevel => {
                Level::from_bit(inner.ch_cfg_chip_sel()).inverse().bit()
            }
            ParamKind::CsSoftwareControl => inner.ch_cfg_cs_out(),
            ParamKind::ClockDivider => inner.clk_cfg_divider(),
            ParamKind::Mode => inner.cfg_cpol() << 1 | inner.cfg_cpha(),
            ParamKind::FrameFormat => inner.cfg_frame_format(),
            ParamKind::RxInvalidBits => inner.ch_cfg_rx_invalid_bit(),
            ParamKind::DataOutDelay => inner.cfg_out_delay(),
            ParamKind::FrameInterval => inner.cfg_frame_delay(),
        }
    }

    /// Whether a transfer or parameter change owns the controller
    pub fn is_busy(&self) -> bool {
        !matches!(self.engine(), Engine::Idle | Engine::Off)
    }
}

// Engine ownership and shared round helpers
impl<REGS: Registers, SYS: Platform> Spi<REGS, SYS> {
    #[inline]
    fn engine(&self) -> Engine {
        Engine::from_bits(self.engine.load(Ordering::Acquire))
    }

    #[inline]
    fn claim(&self, engine: Engine) -> Result<(), Error> {
        self.engine
            .compare_exchange(
                Engine::Idle as u8,
                engine as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| match Engine::from_bits(current) {
                Engine::Off => Error::InvalidParam,
                _ => Error::AlreadyBusy,
            })
    }

    #[inline]
    fn release(&self) {
        self.engine.store(Engine::Idle as u8, Ordering::Release);
    }

    /// # Safety
    ///
    /// The caller must hold the engine tag, and must not keep another reference obtained
    /// from this method alive.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    unsafe fn context(&self) -> &mut Context {
        &mut *self.context.get()
    }

    fn cpu_mhz(&self) -> u32 {
        self.sys.clock_mhz(ClockDomain::Cpu)
    }

    fn deadline(&self, budget: MicroSeconds) -> Deadline<'_, SYS> {
        Deadline::start(&self.sys, self.cpu_mhz(), budget)
    }

    /// Wait for the controller to finish the running round, for at most `budget`.
    fn wait_idle(&self, budget: MicroSeconds) -> Result<(), Error> {
        let mut deadline = self.deadline(budget);
        self.wait_idle_until(&mut deadline)
    }

    fn wait_idle_until(&self, deadline: &mut Deadline<'_, SYS>) -> Result<(), Error> {
        while self.inner.is_busy() {
            if deadline.expired() {
                spim_warn!("spi still busy, budget {:?}", deadline.budget());
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Queue the header (if any) and the next payload chunk, then start the round.
    ///
    /// Returns false when nothing is left to clock before `tx_end` / `rx_end`.
    fn start_round(
        &self,
        transfer: &mut Transfer<'_>,
        frame: &mut Option<HeaderFrame>,
        endianness: Endianness,
        tx_end: usize,
        rx_end: usize,
    ) -> bool {
        let header_len = frame.as_ref().map_or(0, |frame| frame.len());
        let Some(round) = Round::plan(
            transfer.tx_remaining(tx_end),
            transfer.rx_remaining(rx_end),
            header_len,
        ) else {
            return false;
        };

        let mut staging = [0u8; FIFO_DEPTH];
        let staged = match frame.take() {
            Some(header) => {
                self.inner.set_ch_cfg_rx_invalid_bit(header.invalid_bits() as u32);
                if round.tx == 0 {
                    // Nothing to append, the 0xFF padding doubles as filler
                    let padded = header.padded();
                    staging[..padded.len()].copy_from_slice(padded);
                    padded.len()
                } else {
                    staging[..header_len].copy_from_slice(header.bytes());
                    staging[header_len..header_len + round.tx]
                        .copy_from_slice(&transfer.write_buf()[..round.tx]);
                    header_len + round.tx
                }
            }
            None => {
                staging[..round.tx].copy_from_slice(&transfer.write_buf()[..round.tx]);
                round.tx
            }
        };

        // The FIFO is cleared before every round, so the staged bytes always fit
        let queued = self.inner.fill_tx_fifo(&staging[..staged], endianness);
        debug_assert_eq!(queued, staged);
        transfer.advance_write_idx(round.tx);

        self.inner.set_ch_cfg_tx_ch_on(1);
        self.inner.set_ch_cfg_rx_ch_on(round.rx_on as u32);
        self.inner.set_ch_cfg_tx_rx_len((round.clocked * 8) as u32);
        self.inner.start();
        true
    }

    /// Collect what the finished round received and reset the FIFOs for the next one.
    fn finish_round(&self, transfer: &mut Transfer<'_>, endianness: Endianness, rx_end: usize) {
        let wanted = transfer.rx_remaining(rx_end);
        if wanted > 0 {
            let read = self
                .inner
                .drain_rx_fifo(&mut transfer.read_buf()[..wanted], endianness);
            transfer.advance_read_idx(read);
        }
        if self.inner.ch_cfg_rx_invalid_bit() != 0 {
            self.inner.set_ch_cfg_rx_invalid_bit(0);
        }
        // Drops the zero lanes of a partial tail word
        self.inner.clear_fifo();
    }

    /// Run rounds from task context until everything before `tx_end` / `rx_end` is moved.
    fn run_rounds(
        &self,
        transfer: &mut Transfer<'_>,
        frame: &mut Option<HeaderFrame>,
        endianness: Endianness,
        (tx_end, rx_end): (usize, usize),
        deadline: &mut Deadline<'_, SYS>,
    ) -> Result<(), Error> {
        while self.start_round(transfer, frame, endianness, tx_end, rx_end) {
            self.wait_idle_until(deadline)?;
            self.finish_round(transfer, endianness, rx_end);
        }
        Ok(())
    }

    /// End an asynchronous transfer: quiesce, release the engine tag, then report.
    fn complete(&self, ctx: &mut Context, result: Result<(), Error>) {
        if let Err(error) = result {
            spim_warn!("spi transfer aborted: {:?}", error);
            self.inner.clear_fifo();
        }
        self.inner.quiesce();

        ctx.transfer = None;
        ctx.dma = DmaLegs::default();
        self.dma_join.reset();
        let callback = ctx.callback;

        self.finished.store(ctx.sequence, Ordering::Release);
        self.release();
        if let Some((callback, user_arg)) = callback {
            callback(user_arg, result);
        }
    }
}
