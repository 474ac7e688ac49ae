//! Time units and tick-counter based deadlines
//!
//! Bounded waits are measured against a free-running down-counter (the CPU SysTick on the chip).
//! Two strategies are used, chosen from the budget and the counter period:
//!
//! - [`Budget::Direct`]: the budget fits in one counter period, so the elapsed time is the
//!   wrap-aware distance between the first sample and the current one.
//! - [`Budget::Accumulated`]: the budget spans several periods, so every sample adds the
//!   wrap-aware distance from the previous sample into a 64-bit accumulator. This stays exact
//!   as long as the counter is sampled at least once per period.

pub use fugit::{
    HertzU32 as Hertz, KilohertzU32 as KiloHertz, MegahertzU32 as MegaHertz,
    MicrosDurationU32 as MicroSeconds, MillisDurationU32 as MilliSeconds,
};

/// A free-running counter that counts down from [`TickCounter::reload`] to zero and then
/// reloads, advancing once per CPU clock cycle.
pub trait TickCounter {
    /// Value loaded into the counter after it reaches zero.
    fn reload(&self) -> u32;

    /// Current counter value.
    fn now(&self) -> u32;
}

#[cfg(target_arch = "arm")]
impl TickCounter for cortex_m::peripheral::SYST {
    fn reload(&self) -> u32 {
        cortex_m::peripheral::SYST::get_reload()
    }

    fn now(&self) -> u32 {
        cortex_m::peripheral::SYST::get_current()
    }
}

/// Ticks elapsed between two samples of a down-counter with the given reload value.
#[inline]
pub(crate) fn ticks_between(earlier: u32, later: u32, reload: u32) -> u32 {
    if earlier >= later {
        earlier - later
    } else {
        // The counter passed zero and restarted from `reload`
        let period = reload as u64 + 1;
        (earlier as u64 + period - later as u64) as u32
    }
}

/// How a wait budget is measured
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Budget {
    /// Budget shorter than one counter period, measured from the first sample
    Direct { ticks: u32 },
    /// Budget of one counter period or more, measured by summing sample-to-sample distances
    Accumulated { ticks: u64 },
}

impl Budget {
    /// Select the strategy for a budget of `us` microseconds on a counter with period
    /// `reload` ticks running at `clock_mhz`.
    pub fn new(us: u32, reload: u32, clock_mhz: u32) -> Self {
        let clock_mhz = clock_mhz.max(1);
        let max_direct_us = reload / clock_mhz;

        if us < max_direct_us {
            Budget::Direct {
                ticks: us * clock_mhz,
            }
        } else {
            Budget::Accumulated {
                ticks: us as u64 * clock_mhz as u64,
            }
        }
    }

    fn ticks(&self) -> u64 {
        match *self {
            Budget::Direct { ticks } => ticks as u64,
            Budget::Accumulated { ticks } => ticks,
        }
    }
}

/// A deadline running against a [`TickCounter`]
pub struct Deadline<'a, T: TickCounter> {
    counter: &'a T,
    reload: u32,
    clock_mhz: u32,
    budget: Budget,
    start: u32,
    last: u32,
    elapsed: u64,
}

impl<'a, T: TickCounter> Deadline<'a, T> {
    /// Start a deadline of `budget` from now.
    pub fn start(counter: &'a T, clock_mhz: u32, budget: MicroSeconds) -> Self {
        let reload = counter.reload();
        let clock_mhz = clock_mhz.max(1);
        let start = counter.now();
        Deadline {
            counter,
            reload,
            clock_mhz,
            budget: Budget::new(budget.to_micros(), reload, clock_mhz),
            start,
            last: start,
            elapsed: 0,
        }
    }

    /// The strategy this deadline measures with
    pub fn budget(&self) -> Budget {
        self.budget
    }

    /// Sample the counter and return the ticks elapsed since the deadline started.
    pub fn elapsed_ticks(&mut self) -> u64 {
        let now = self.counter.now();
        match self.budget {
            Budget::Direct { .. } => {
                self.elapsed = ticks_between(self.start, now, self.reload) as u64;
            }
            Budget::Accumulated { .. } => {
                self.elapsed += ticks_between(self.last, now, self.reload) as u64;
            }
        }
        self.last = now;
        self.elapsed
    }

    /// Sample the counter and report whether the budget is used up.
    pub fn expired(&mut self) -> bool {
        self.elapsed_ticks() >= self.budget.ticks()
    }

    /// Budget left as of the last sample, rounded down to whole microseconds.
    pub fn remaining(&self) -> MicroSeconds {
        let left = self.budget.ticks().saturating_sub(self.elapsed);
        MicroSeconds::from_ticks((left / self.clock_mhz as u64).min(u32::MAX as u64) as u32)
    }
}
