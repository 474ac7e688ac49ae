//! DMA engine
//!
//! A transfer is split in three parts:
//!
//! 1. head: the header and the bytes before the first word aligned address go through the
//!    FIFO from the caller's task,
//! 2. bulk: the largest whole-word region after the head is moved by one DMA channel per
//!    direction, transmit memory to FIFO and receive FIFO to memory,
//! 3. residue: after both channels report completion, whatever the channels did not move
//!    (the 1 to 3 byte tail, the longer buffer's excess, a receive channel that stopped
//!    short) goes through the FIFO again.
//!
//! Buffers shorter than [`DMA_MIN_LEN`], and duplex buffers whose addresses differ in word
//! alignment, are moved through the FIFO entirely. Asynchronous transfers still report through
//! the completion callback in that case.

use embedded_dma::{ReadBuffer, WriteBuffer};

use crate::dma::{Channel, DmaConfig, Request, State};
use crate::time::{MicroSeconds, MilliSeconds};

use super::polling::millis_to_micros;
use super::transaction::{lend_rx, lend_tx, DmaJoin, DmaLeg, DmaLegs, Engine, Transaction};
use super::{
    Context, Endianness, Error, Platform, Reg, Registers, Spi, Transfer, DMA_MIN_LEN,
    MAX_TXRX_LEN, RESIDUE_TIMEOUT,
};

/// How a transfer is divided between FIFO and DMA
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum DmaPlan {
    /// Everything through the FIFO
    Fifo,
    /// `head` bytes through the FIFO, then `len` bytes by DMA
    Dma { head: usize, len: usize },
}

impl DmaPlan {
    /// Plan from the address and length of each direction. A zero length marks an unused
    /// direction.
    pub(super) fn new(tx: (usize, usize), rx: (usize, usize)) -> Self {
        let active = [tx, rx].into_iter().filter(|&(_, len)| len > 0);
        let mut head = None;
        let mut common = usize::MAX;

        for (addr, len) in active {
            if len < DMA_MIN_LEN {
                return DmaPlan::Fifo;
            }
            let phase = (4 - addr % 4) % 4;
            match head {
                Some(head) if head != phase => return DmaPlan::Fifo,
                _ => head = Some(phase),
            }
            common = common.min(len);
        }

        let Some(head) = head else {
            return DmaPlan::Fifo;
        };
        let len = common.saturating_sub(head) / 4 * 4;
        if len == 0 {
            DmaPlan::Fifo
        } else {
            DmaPlan::Dma { head, len }
        }
    }
}

/// Outcome of the synchronous part of a DMA request
enum Setup {
    /// Channels programmed, waiting for [`Spi::launch`]
    Armed(DmaLegs),
    /// Moved entirely through the FIFO
    Finished(Result<(), Error>),
}

impl<REGS: Registers, SYS: Platform> Spi<REGS, SYS> {
    /// Send `tx` in the background using the transmit DMA channel.
    pub fn tx_dma<TX>(&self, tx: TX) -> Result<Transaction<'_, REGS, SYS, TX>, Error>
    where
        TX: ReadBuffer<Word = u8>,
    {
        // NOTE(unsafe) `tx` moves into the transaction, which holds it until completion
        let view = unsafe { lend_tx(&tx) };
        let sequence = self.start_dma(view, Default::default())?;
        Ok(Transaction::new(self, sequence, tx))
    }

    /// Fill `rx` in the background using the receive DMA channel.
    pub fn rx_dma<RX>(&self, mut rx: RX) -> Result<Transaction<'_, REGS, SYS, RX>, Error>
    where
        RX: WriteBuffer<Word = u8>,
    {
        // NOTE(unsafe) `rx` moves into the transaction, which holds it until completion
        let view = unsafe { lend_rx(&mut rx) };
        let sequence = self.start_dma(&[], view)?;
        Ok(Transaction::new(self, sequence, rx))
    }

    /// Send `tx` and fill `rx` in the background using both DMA channels.
    pub fn tx_rx_dma<TX, RX>(
        &self,
        tx: TX,
        mut rx: RX,
    ) -> Result<Transaction<'_, REGS, SYS, (TX, RX)>, Error>
    where
        TX: ReadBuffer<Word = u8>,
        RX: WriteBuffer<Word = u8>,
    {
        // NOTE(unsafe) both buffers move into the transaction, which holds them until completion
        let (tx_view, rx_view) = unsafe { (lend_tx(&tx), lend_rx(&mut rx)) };
        let sequence = self.start_dma(tx_view, rx_view)?;
        Ok(Transaction::new(self, sequence, (tx, rx)))
    }

    /// Send `tx` and fill `rx` using both DMA channels, waiting for the result.
    ///
    /// No callback is invoked.
    pub fn tx_rx_dma_sync(
        &self,
        tx: &[u8],
        rx: &mut [u8],
        timeout: MilliSeconds,
    ) -> Result<(), Error> {
        if timeout.ticks() == 0 {
            return Err(Error::InvalidParam);
        }
        self.check_dma_request(tx.len(), rx.len())?;
        self.claim(Engine::DmaSync)?;

        // NOTE(unsafe) the engine tag was just claimed
        let ctx = unsafe { self.context() };
        let mut transfer = Transfer::new(tx, rx);
        let result = self.dma_sync(ctx, &mut transfer, millis_to_micros(timeout));
        if result.is_err() {
            self.inner.clear_fifo();
        }
        self.inner.quiesce();

        self.release();
        result
    }

    /// DMA completion handler. Call it from the DMA interrupt dispatcher for every channel
    /// registered by this driver.
    pub fn on_dma_complete(&self, channel: Channel) {
        if self.engine() != Engine::Dma {
            spim_debug!("dma channel {} done with no dma transfer", channel.number());
            return;
        }
        let bit = if Some(channel) == self.resources.tx_dma {
            DmaJoin::TX
        } else if Some(channel) == self.resources.rx_dma {
            DmaJoin::RX
        } else {
            return;
        };
        if self.dma_join.clear(bit) {
            self.finish_async_dma();
        }
    }

    /// Runs on whichever side clears the last join bit
    fn finish_async_dma(&self) {
        // NOTE(unsafe) the DMA engine holds the tag, and the join gives the context to exactly
        // one finisher
        let ctx = unsafe { self.context() };
        let Some(mut transfer) = ctx.transfer.take() else {
            return;
        };

        let legs = ctx.dma;
        let result = self.finish_dma(
            &mut transfer,
            &legs,
            ctx.endianness,
            self.config.isr_idle_timeout,
        );
        self.complete(ctx, result);
    }

    fn check_dma_request(&self, tx_len: usize, rx_len: usize) -> Result<(), Error> {
        if (tx_len == 0 && rx_len == 0) || tx_len > MAX_TXRX_LEN || rx_len > MAX_TXRX_LEN {
            return Err(Error::InvalidParam);
        }
        if (tx_len > 0 && self.resources.tx_dma.is_none())
            || (rx_len > 0 && self.resources.rx_dma.is_none())
        {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }

    fn start_dma(&self, tx: &'static [u8], rx: &'static mut [u8]) -> Result<u32, Error> {
        self.check_dma_request(tx.len(), rx.len())?;
        self.claim(Engine::Dma)?;

        // NOTE(unsafe) the engine tag was just claimed
        let ctx = unsafe { self.context() };
        let sequence = ctx.next_sequence();
        let mut transfer = Transfer::new(tx, rx);

        let legs = match self.setup_dma(ctx, &mut transfer, true) {
            Ok(Setup::Armed(legs)) => legs,
            Ok(Setup::Finished(result)) => {
                self.complete(ctx, result);
                return Ok(sequence);
            }
            Err(error) => {
                self.inner.clear_fifo();
                self.inner.quiesce();
                self.release();
                return Err(error);
            }
        };

        // Everything the completion handler reads is in place before a channel can finish
        ctx.dma = legs;
        ctx.transfer = Some(transfer);
        self.dma_join.arm(legs.join_bits() | DmaJoin::LAUNCH);

        if let Err(error) = self.launch(&legs) {
            self.dma_join.reset();
            ctx.transfer = None;
            ctx.dma = DmaLegs::default();
            self.inner.clear_fifo();
            self.inner.quiesce();
            self.release();
            return Err(error);
        }
        self.inner.start();

        if self.dma_join.clear(DmaJoin::LAUNCH) {
            // Every leg reported before the controller was started
            self.finish_async_dma();
        }
        Ok(sequence)
    }

    fn dma_sync(
        &self,
        ctx: &mut Context,
        transfer: &mut Transfer<'_>,
        budget: MicroSeconds,
    ) -> Result<(), Error> {
        let legs = match self.setup_dma(ctx, transfer, false)? {
            Setup::Armed(legs) => legs,
            Setup::Finished(result) => return result,
        };

        let mut deadline = self.deadline(budget);
        self.launch(&legs)?;
        self.inner.start();
        while self.legs_running(&legs)? {
            if deadline.expired() {
                let _ = self.disarm(&legs);
                return Err(Error::Timeout);
            }
        }

        let remaining = deadline.remaining();
        self.finish_dma(transfer, &legs, ctx.endianness, remaining)
    }

    /// Head phase and channel programming. Leaves the legs ready for [`Spi::launch`].
    fn setup_dma(
        &self,
        ctx: &mut Context,
        transfer: &mut Transfer<'_>,
        notify: bool,
    ) -> Result<Setup, Error> {
        self.wait_idle(self.config.idle_timeout)?;
        self.inner.prepare();

        let endianness = ctx.endianness;
        let mut frame = ctx.take_frame()?;

        let plan = DmaPlan::new(
            (transfer.write_addr(), transfer.tx_len()),
            (transfer.read_addr(), transfer.rx_len()),
        );
        let (head, len) = match plan {
            DmaPlan::Fifo => {
                spim_debug!(
                    "dma request tx {} rx {} moved through the fifo",
                    transfer.tx_len(),
                    transfer.rx_len()
                );
                let mut deadline = self.deadline(millis_to_micros(RESIDUE_TIMEOUT));
                let result = self.run_rounds(
                    transfer,
                    &mut frame,
                    endianness,
                    (usize::MAX, usize::MAX),
                    &mut deadline,
                );
                return Ok(Setup::Finished(result));
            }
            DmaPlan::Dma { head, len } => (head, len),
        };

        if head > 0 || frame.is_some() {
            let mut deadline = self.deadline(self.config.idle_timeout);
            self.run_rounds(transfer, &mut frame, endianness, (head, head), &mut deadline)?;
        }

        let legs = self.arm(transfer, len, notify)?;
        self.inner.set_ch_cfg_tx_ch_on(1);
        self.inner.set_ch_cfg_rx_ch_on(legs.rx.is_some() as u32);
        self.inner.set_ch_cfg_tx_rx_len((len * 8) as u32);
        Ok(Setup::Armed(legs))
    }

    /// Program one channel per active direction for `len` bytes.
    fn arm(&self, transfer: &mut Transfer<'_>, len: usize, notify: bool) -> Result<DmaLegs, Error> {
        let mut legs = DmaLegs::default();

        if transfer.tx_len() > 0 {
            let channel = self.resources.tx_dma.ok_or(Error::InvalidParam)?;
            let config = DmaConfig::memory_to_peripheral(channel, Request::SpiTx)
                .source(transfer.write_addr())
                .destination(self.inner.regs.address(Reg::TxData))
                .len(len)
                .interrupt(notify);
            self.arm_leg(&config)?;
            legs.tx = Some(DmaLeg { channel, len });
        }

        if transfer.rx_len() > 0 {
            let armed = self.resources.rx_dma.ok_or(Error::InvalidParam).and_then(|channel| {
                let config = DmaConfig::peripheral_to_memory(channel, Request::SpiRx)
                    .source(self.inner.regs.address(Reg::RxData))
                    .destination(transfer.read_addr())
                    .len(len)
                    .interrupt(notify);
                self.arm_leg(&config).map(|()| channel)
            });
            match armed {
                Ok(channel) => legs.rx = Some(DmaLeg { channel, len }),
                Err(error) => {
                    let _ = self.disarm(&legs);
                    return Err(error);
                }
            }
        }
        Ok(legs)
    }

    /// Enable the controller's DMA requests and start the programmed channels.
    fn launch(&self, legs: &DmaLegs) -> Result<(), Error> {
        self.inner.set_mode_cfg_tx_trig_level(0);
        self.inner.set_mode_cfg_rx_trig_level(0);
        self.inner.set_mode_cfg_rx_dma_on(legs.rx.is_some() as u32);
        self.inner.set_mode_cfg_tx_dma_on(legs.tx.is_some() as u32);

        // Receive first, so no byte is clocked in before its channel runs
        let started = legs
            .rx
            .iter()
            .chain(legs.tx.iter())
            .try_for_each(|leg| self.sys.start(leg.channel));
        if let Err(error) = started {
            let _ = self.disarm(legs);
            return Err(error.into());
        }
        Ok(())
    }

    fn arm_leg(&self, config: &DmaConfig) -> Result<(), Error> {
        config.validate()?;
        self.sys.configure(config)?;
        if config.interrupt_enabled() {
            self.sys.register_callback(config.channel())?;
        }
        Ok(())
    }

    /// Stop the channels and return how many bytes each moved.
    fn disarm(&self, legs: &DmaLegs) -> Result<(usize, usize), Error> {
        self.inner.set_mode_cfg_tx_dma_on(0);
        self.inner.set_mode_cfg_rx_dma_on(0);

        let mut moved = [0usize; 2];
        let mut result = Ok(());
        for (slot, leg) in [legs.tx, legs.rx].iter().enumerate() {
            let Some(leg) = leg else {
                continue;
            };
            if let Err(error) = self.sys.stop(leg.channel) {
                spim_warn!("dma channel {} stop failed: {:?}", leg.channel.number(), error);
            }
            // Not registered on the synchronous path, which is fine to report
            let _ = self.sys.unregister_callback(leg.channel);
            match self.sys.status(leg.channel) {
                Ok(status) => moved[slot] = status.transferred.min(leg.len),
                Err(error) => result = Err(error.into()),
            }
        }
        result.map(|()| (moved[0], moved[1]))
    }

    fn legs_running(&self, legs: &DmaLegs) -> Result<bool, Error> {
        for leg in [legs.tx, legs.rx].iter().flatten() {
            if self.sys.status(leg.channel)?.state == State::Running {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Account for what the channels moved, then move the residue through the FIFO.
    fn finish_dma(
        &self,
        transfer: &mut Transfer<'_>,
        legs: &DmaLegs,
        endianness: Endianness,
        idle_budget: MicroSeconds,
    ) -> Result<(), Error> {
        let idle = self.wait_idle(idle_budget);
        let (tx_moved, rx_moved) = self.disarm(legs)?;
        idle?;

        if legs.tx.is_some() {
            transfer.advance_write_idx(tx_moved);
        }
        if let Some(leg) = legs.rx {
            transfer.advance_read_idx(rx_moved);
            // Bytes the receive channel left behind are still in the FIFO
            let shortfall = leg.len - rx_moved;
            if shortfall > 0 {
                spim_debug!("dma rx stopped {} bytes short", shortfall);
                let read = self
                    .inner
                    .drain_rx_fifo(&mut transfer.read_buf()[..shortfall], endianness);
                transfer.advance_read_idx(read);
            }
        }
        self.inner.clear_fifo();

        if !transfer.is_complete() {
            spim_debug!(
                "dma residue tx {} rx {}",
                transfer.tx_remaining(usize::MAX),
                transfer.rx_remaining(usize::MAX)
            );
            let mut deadline = self.deadline(millis_to_micros(RESIDUE_TIMEOUT));
            self.run_rounds(
                transfer,
                &mut None,
                endianness,
                (usize::MAX, usize::MAX),
                &mut deadline,
            )?;
        }
        Ok(())
    }
}
