//! Polling engine
//!
//! The calling task runs every round itself: fill the transmit FIFO, start, wait for idle,
//! drain the receive FIFO. The controller's interrupt line is disabled for the duration.

use crate::time::{MicroSeconds, MilliSeconds};

use super::{Error, Platform, Registers, Spi, Transfer};
use super::transaction::Engine;

impl<REGS: Registers, SYS: Platform> Spi<REGS, SYS> {
    /// Send `tx`, discarding the received bytes.
    pub fn tx_polling(&self, tx: &[u8], timeout: MilliSeconds) -> Result<(), Error> {
        self.polling(tx, &mut [], millis_to_micros(timeout))
    }

    /// Fill `rx`, clocking out `0xFF` filler.
    pub fn rx_polling(&self, rx: &mut [u8], timeout: MilliSeconds) -> Result<(), Error> {
        self.polling(&[], rx, millis_to_micros(timeout))
    }

    /// Send `tx` and fill `rx` at the same time.
    ///
    /// The buffers may differ in length. The shorter direction stops first: extra transmit
    /// bytes are sent with the receiver off, extra receive bytes are clocked with filler.
    pub fn tx_rx_polling(
        &self,
        tx: &[u8],
        rx: &mut [u8],
        timeout: MilliSeconds,
    ) -> Result<(), Error> {
        self.polling(tx, rx, millis_to_micros(timeout))
    }

    pub(super) fn polling(
        &self,
        tx: &[u8],
        rx: &mut [u8],
        budget: MicroSeconds,
    ) -> Result<(), Error> {
        if budget.ticks() == 0 {
            return Err(Error::InvalidParam);
        }
        self.claim(Engine::Polling)?;

        self.sys.disable(self.resources.irq);
        let mut transfer = Transfer::new(tx, rx);
        let result = self.polling_transfer(&mut transfer, budget);
        if result.is_err() {
            self.inner.clear_fifo();
        }
        self.inner.quiesce();
        self.sys.enable(self.resources.irq);

        self.release();
        result
    }

    fn polling_transfer(
        &self,
        transfer: &mut Transfer<'_>,
        budget: MicroSeconds,
    ) -> Result<(), Error> {
        let mut deadline = self.deadline(budget);
        self.wait_idle_until(&mut deadline)?;
        self.inner.prepare();

        // NOTE(unsafe) the engine tag is held by `polling`
        let ctx = unsafe { self.context() };
        let endianness = ctx.endianness;
        // Consumed only after the idle wait, a timeout there leaves it pending
        let mut frame = ctx.take_frame()?;

        self.run_rounds(
            transfer,
            &mut frame,
            endianness,
            (usize::MAX, usize::MAX),
            &mut deadline,
        )
    }
}

pub(super) fn millis_to_micros(timeout: MilliSeconds) -> MicroSeconds {
    MicroSeconds::from_ticks(timeout.ticks().saturating_mul(1_000))
}
