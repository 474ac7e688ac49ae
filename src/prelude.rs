//! Prelude

pub use crate::spi::Platform as _w80x_spim_hal_spi_Platform;

pub use fugit::{ExtU32 as _, RateExtU32 as _};
