use embedded_hal::spi::{Error as HalError, ErrorKind, ErrorType, SpiBus};

use super::{Error, Platform, Registers, Spi, FIFO_DEPTH};

impl HalError for Error {
    fn kind(&self) -> ErrorKind {
        // None of the failures map to a bus level fault
        ErrorKind::Other
    }
}

impl<REGS, SYS> ErrorType for Spi<REGS, SYS> {
    type Error = Error;
}

/// Blocking bus access through the polling engine. Each call is bounded by the configured idle
/// timeout.
impl<REGS: Registers, SYS: Platform> SpiBus<u8> for Spi<REGS, SYS> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.polling(&[], words, self.config.idle_timeout)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.polling(words, &mut [], self.config.idle_timeout)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.polling(write, read, self.config.idle_timeout)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        // The controller needs separate buffers, so stage the outgoing bytes a FIFO at a time
        let mut out = [0u8; FIFO_DEPTH];
        for chunk in words.chunks_mut(FIFO_DEPTH) {
            let out = &mut out[..chunk.len()];
            out.copy_from_slice(chunk);
            self.polling(out, chunk, self.config.idle_timeout)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        // Every call above returns with the controller idle
        Ok(())
    }
}
