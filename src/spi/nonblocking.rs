//! Interrupt engine
//!
//! The caller's task starts the first round. Each time the round finishes the controller
//! raises an interrupt and [`Spi::on_interrupt`] runs exactly one step: wait for idle, drain
//! what was received, then either start the next round or complete the transfer.

use embedded_dma::{ReadBuffer, WriteBuffer};

use super::transaction::{lend_rx, lend_tx, Engine, Transaction};
use super::{int, Error, Platform, Reg, Registers, Spi, Transfer};

impl<REGS: Registers, SYS: Platform> Spi<REGS, SYS> {
    /// Send `tx` in the background, discarding received bytes.
    pub fn tx_interrupt<TX>(&self, tx: TX) -> Result<Transaction<'_, REGS, SYS, TX>, Error>
    where
        TX: ReadBuffer<Word = u8>,
    {
        // NOTE(unsafe) `tx` moves into the transaction, which holds it until completion
        let view = unsafe { lend_tx(&tx) };
        let sequence = self.start_interrupt(Engine::InterruptTx, view, Default::default())?;
        Ok(Transaction::new(self, sequence, tx))
    }

    /// Fill `rx` in the background.
    pub fn rx_interrupt<RX>(&self, mut rx: RX) -> Result<Transaction<'_, REGS, SYS, RX>, Error>
    where
        RX: WriteBuffer<Word = u8>,
    {
        // NOTE(unsafe) `rx` moves into the transaction, which holds it until completion
        let view = unsafe { lend_rx(&mut rx) };
        let sequence = self.start_interrupt(Engine::InterruptRx, &[], view)?;
        Ok(Transaction::new(self, sequence, rx))
    }

    /// Send `tx` and fill `rx` in the background.
    pub fn tx_rx_interrupt<TX, RX>(
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
        let sequence = self.start_interrupt(Engine::InterruptTxRx, tx_view, rx_view)?;
        Ok(Transaction::new(self, sequence, (tx, rx)))
    }

    fn start_interrupt(
        &self,
        engine: Engine,
        tx: &'static [u8],
        rx: &'static mut [u8],
    ) -> Result<u32, Error> {
        if tx.is_empty() && rx.is_empty() {
            return Err(Error::InvalidParam);
        }
        self.claim(engine)?;

        // NOTE(unsafe) the engine tag was just claimed
        let ctx = unsafe { self.context() };
        let endianness = ctx.endianness;
        let started = self.wait_idle(self.config.idle_timeout).and_then(|()| {
            let mut frame = ctx.take_frame()?;
            self.inner.prepare();

            let mut transfer = Transfer::new(tx, rx);
            self.start_round(&mut transfer, &mut frame, endianness, usize::MAX, usize::MAX);
            Ok(transfer)
        });

        match started {
            Ok(transfer) => {
                ctx.transfer = Some(transfer);
                let sequence = ctx.next_sequence();
                self.inner.unmask_interrupts(interrupt_sources(engine));
                Ok(sequence)
            }
            Err(error) => {
                self.inner.clear_fifo();
                self.inner.quiesce();
                self.release();
                Err(error)
            }
        }
    }

    /// Interrupt handler of the controller. Call it from the SPI interrupt vector.
    pub fn on_interrupt(&self) {
        let pending = self.inner.pending_interrupts();
        self.inner.clear_interrupts(pending);
        interrupt_clear_clock_sync_delay!(self.inner.regs, Reg::IntStatus);

        if pending & int::TIMEOUT != 0 {
            spim_warn!("spi timeout interrupt");
        }

        let engine = self.engine();
        if !engine.is_interrupt() {
            if pending != 0 {
                spim_debug!("spi interrupt {:#x} with no interrupt transfer", pending);
            }
            return;
        }
        if pending & interrupt_sources(engine) == 0 {
            return;
        }
        self.step();
    }

    fn step(&self) {
        // NOTE(unsafe) an interrupt engine holds the tag, and only this handler advances it
        let ctx = unsafe { self.context() };
        let Some(mut transfer) = ctx.transfer.take() else {
            return;
        };
        let endianness = ctx.endianness;

        let next = self.wait_idle(self.config.isr_idle_timeout).map(|()| {
            self.finish_round(&mut transfer, endianness, usize::MAX);
            self.start_round(&mut transfer, &mut None, endianness, usize::MAX, usize::MAX)
        });

        match next {
            Ok(true) => ctx.transfer = Some(transfer),
            Ok(false) => self.complete(ctx, Ok(())),
            Err(error) => self.complete(ctx, Err(error)),
        }
    }
}

/// Sources that advance `engine`
fn interrupt_sources(engine: Engine) -> u32 {
    let fifo = match engine {
        Engine::InterruptTx => int::TX_FIFO_RDY,
        Engine::InterruptRx => int::RX_FIFO_RDY,
        _ => int::TX_FIFO_RDY | int::RX_FIFO_RDY,
    };
    fifo | int::DONE
}
