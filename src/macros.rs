//! Crate internal helper macros

/// Read `$reg` twice after clearing interrupt status, so the write has reached the peripheral
/// clock domain before the handler returns and the line is not seen pending again.
///
/// `$reg` must be side effect free to read.
macro_rules! interrupt_clear_clock_sync_delay {
    ($regs:expr, $reg:expr) => {
        let _ = $regs.read($reg);
        let _ = $regs.read($reg);
    };
}

macro_rules! spim_log {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::$level!($($arg)*);
        #[cfg(feature = "defmt")]
        defmt::$level!($($arg)*);
        #[cfg(not(any(feature = "log", feature = "defmt")))]
        {
            let _ = core::format_args!($($arg)*);
        }
    }};
}

macro_rules! spim_debug {
    ($($arg:tt)*) => { spim_log!(debug, $($arg)*) };
}

macro_rules! spim_warn {
    ($($arg:tt)*) => { spim_log!(warn, $($arg)*) };
}

macro_rules! spim_error {
    ($($arg:tt)*) => { spim_log!(error, $($arg)*) };
}
