//! Behavioural model of the LSPI controller, the SysTick counter, the interrupt controller and
//! the DMA controller, with a slave device on the other end of the wire.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Mutex;

use w80x_spim_hal::dma::{self, Channel, DmaConfig, DmaController, State, Status};
use w80x_spim_hal::irq::{self, Interrupt, Irq};
use w80x_spim_hal::rcc::{ClockConfig, ClockDomain};
use w80x_spim_hal::spi::{self, Config, Reg, Registers, Resources, Spi};
use w80x_spim_hal::time::TickCounter;

pub const BASE: usize = 0x4000_1400;
pub const IRQ: Irq = Irq(10);
pub const TX_CHANNEL: Channel = Channel::new(2);
pub const RX_CHANNEL: Channel = Channel::new(3);

const START: u32 = 1 << 0;
const CONTINUE: u32 = 1 << 21;
const CLEAR_FIFO: u32 = 1 << 22;

/// What the slave puts on MISO
pub enum Slave {
    /// MISO mirrors MOSI
    Loopback,
    /// MISO byte `n` of the session is `script[n]`, zero past the end
    Script(Vec<u8>),
}

/// One start of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub clocked: usize,
    pub invalid_bits: u32,
    pub tx_on: bool,
    pub rx_on: bool,
    pub dma: bool,
}

struct SimChannel {
    config: DmaConfig,
    state: State,
    transferred: usize,
    notify: bool,
}

pub struct Hw {
    ch_cfg: u32,
    cfg: u32,
    clk_cfg: u32,
    mode_cfg: u32,
    int_mask: u32,
    int_status: u32,
    timeout_cfg: u32,
    tx_fifo: VecDeque<u8>,
    rx_fifo: VecDeque<u8>,
    busy_reads: u32,

    /// Chip select asserted
    cs_active: bool,
    /// Times chip select went active
    pub cs_sessions: usize,

    /// Status reads that report busy after each start
    pub busy_after_start: u32,
    /// Never go idle
    pub stuck_busy: bool,

    reload: u32,
    tick: u32,
    /// Ticks per sample of the counter
    pub tick_step: u32,
    pub ticks_elapsed: u64,
    pub cpu_mhz: u32,
    pub apb_mhz: u32,

    pub irq_enabled: bool,
    pub irq_attached: bool,
    pub attach_fails: bool,

    channels: [Option<SimChannel>; dma::CHANNELS as usize],
    dma_events: VecDeque<Channel>,
    /// Receive channel stops accepting bytes after this many
    pub rx_dma_limit: Option<usize>,
    pub dma_configs: Vec<DmaConfig>,
    /// A transmit channel whose descriptor fits the FIFO drains into it as soon as it starts
    /// and reports through this hook from inside `start`, like a DMA interrupt taken before
    /// the controller is started
    pub preempt: Option<fn(Channel)>,

    pub slave: Slave,
    pub mosi: Vec<u8>,
    pub miso: Vec<u8>,
    pub rounds: Vec<Round>,
}

impl Hw {
    fn new() -> Self {
        Hw {
            ch_cfg: 0,
            cfg: 0,
            clk_cfg: 0,
            mode_cfg: 0,
            int_mask: 0xFF,
            int_status: 0,
            timeout_cfg: 0,
            tx_fifo: VecDeque::new(),
            rx_fifo: VecDeque::new(),
            busy_reads: 0,
            cs_active: false,
            cs_sessions: 0,
            busy_after_start: 2,
            stuck_busy: false,
            // 2 ms period at 240 MHz
            reload: 479_999,
            tick: 479_999,
            tick_step: 240,
            ticks_elapsed: 0,
            cpu_mhz: 240,
            apb_mhz: 40,
            irq_enabled: false,
            irq_attached: false,
            attach_fails: false,
            channels: Default::default(),
            dma_events: VecDeque::new(),
            rx_dma_limit: None,
            dma_configs: Vec::new(),
            preempt: None,
            slave: Slave::Loopback,
            mosi: Vec::new(),
            miso: Vec::new(),
            rounds: Vec::new(),
        }
    }

    fn big_endian(&self) -> bool {
        self.cfg & (1 << 3) != 0
    }

    fn running(&mut self, request: dma::Request) -> Option<&mut SimChannel> {
        self.channels
            .iter_mut()
            .flatten()
            .find(|ch| ch.state == State::Running && ch.config.request() == request)
    }

    fn push_tx_word(&mut self, word: u32) {
        assert!(self.tx_fifo.len() + 4 <= spi::FIFO_DEPTH, "tx fifo overflow");
        for i in 0..4 {
            let shift = if self.big_endian() { (3 - i) * 8 } else { i * 8 };
            self.tx_fifo.push_back((word >> shift) as u8);
        }
    }

    fn pop_rx_word(&mut self) -> u32 {
        let mut word = 0;
        for i in 0..4 {
            let Some(byte) = self.rx_fifo.pop_front() else {
                break;
            };
            let shift = if self.big_endian() { (3 - i) * 8 } else { i * 8 };
            word |= (byte as u32) << shift;
        }
        word
    }

    fn respond(&self, index: usize, mosi: u8) -> u8 {
        match &self.slave {
            Slave::Loopback => mosi,
            Slave::Script(script) => script.get(index).copied().unwrap_or(0),
        }
    }

    /// Clock `tx_rx_len` bits through the wire
    fn run(&mut self) {
        let clocked = ((self.ch_cfg >> 3) & 0xFFFF) as usize / 8;
        let tx_on = self.ch_cfg & (1 << 19) != 0;
        let rx_on = self.ch_cfg & (1 << 20) != 0;
        let invalid_bits = (self.ch_cfg >> 23) & 0xFF;
        let skip = (invalid_bits as usize).div_ceil(8);
        let tx_dma = self.mode_cfg & 1 != 0;
        let rx_dma = self.mode_cfg & 2 != 0;
        let rx_limit = self.rx_dma_limit.unwrap_or(usize::MAX);

        if !self.cs_active {
            self.cs_active = true;
            self.cs_sessions += 1;
        }
        self.rounds.push(Round {
            clocked,
            invalid_bits,
            tx_on,
            rx_on,
            dma: tx_dma || rx_dma,
        });

        for i in 0..clocked {
            let mut mosi = 0xFF;
            if tx_on {
                if let Some(byte) = self.tx_fifo.pop_front() {
                    mosi = byte;
                } else if tx_dma {
                    if let Some(ch) = self.running(dma::Request::SpiTx) {
                        if ch.transferred < ch.config.byte_len() {
                            let addr = ch.config.source_address() + ch.transferred;
                            // NOTE(unsafe) test buffers outlive the transfer
                            mosi = unsafe { *(addr as *const u8) };
                            ch.transferred += 1;
                        }
                    }
                }
            }

            let index = self.miso.len();
            let miso = self.respond(index, mosi);
            self.mosi.push(mosi);
            self.miso.push(miso);

            if rx_on && i >= skip {
                let mut stored = false;
                if rx_dma {
                    if let Some(ch) = self.running(dma::Request::SpiRx) {
                        if ch.transferred < ch.config.byte_len() && ch.transferred < rx_limit {
                            let addr = ch.config.destination_address() + ch.transferred;
                            // NOTE(unsafe) test buffers outlive the transfer
                            unsafe { *(addr as *mut u8) = miso };
                            ch.transferred += 1;
                            stored = true;
                        }
                    }
                }
                if !stored {
                    assert!(self.rx_fifo.len() < spi::FIFO_DEPTH, "rx fifo overrun");
                    self.rx_fifo.push_back(miso);
                }
            }
        }

        if tx_dma || rx_dma {
            for (number, slot) in self.channels.iter_mut().enumerate() {
                if let Some(ch) = slot {
                    if ch.state == State::Running {
                        ch.state = State::Done;
                        if ch.notify {
                            self.dma_events.push_back(Channel::new(number as u8));
                        }
                    }
                }
            }
        }

        self.int_status |= spi::int::DONE;
        if tx_on {
            self.int_status |= spi::int::TX_FIFO_RDY;
        }
        if !self.rx_fifo.is_empty() {
            self.int_status |= spi::int::RX_FIFO_RDY;
        }
        self.busy_reads = self.busy_after_start;
        if self.ch_cfg & CONTINUE == 0 {
            self.cs_active = false;
        }
    }

    fn channel(&mut self, channel: Channel) -> Result<&mut SimChannel, dma::Error> {
        self.channels
            .get_mut(channel.number() as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(dma::Error::InvalidChannel)
    }
}

/// Shared handle to the simulated hardware. Serves as both register block and platform.
#[derive(Clone)]
pub struct Sim(Rc<RefCell<Hw>>);

impl Sim {
    pub fn new() -> Self {
        Sim(Rc::new(RefCell::new(Hw::new())))
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut Hw) -> T) -> T {
        f(&mut self.0.borrow_mut())
    }

    pub fn set_slave(&self, slave: Slave) {
        self.with(|hw| hw.slave = slave);
    }

    pub fn mosi(&self) -> Vec<u8> {
        self.with(|hw| hw.mosi.clone())
    }

    pub fn rounds(&self) -> Vec<Round> {
        self.with(|hw| hw.rounds.clone())
    }

    pub fn starts(&self) -> usize {
        self.with(|hw| hw.rounds.len())
    }

    pub fn fifo_levels(&self) -> (usize, usize) {
        self.with(|hw| (hw.tx_fifo.len(), hw.rx_fifo.len()))
    }

    /// Transmit and receive channel enables
    pub fn channels_on(&self) -> (bool, bool) {
        self.with(|hw| (hw.ch_cfg & (1 << 19) != 0, hw.ch_cfg & (1 << 20) != 0))
    }

    pub fn irq_pending(&self) -> bool {
        self.with(|hw| hw.irq_enabled && hw.int_status & !hw.int_mask & 0xFF != 0)
    }

    /// Latch `bits` in the interrupt status and unmask everything
    pub fn raise(&self, bits: u32) {
        self.with(|hw| {
            hw.int_status |= bits;
            hw.int_mask = 0;
        });
    }

    pub fn next_dma_event(&self) -> Option<Channel> {
        self.with(|hw| hw.dma_events.pop_front())
    }

    /// Bus transactions, counted by chip select assertions
    pub fn cs_sessions(&self) -> usize {
        self.with(|hw| hw.cs_sessions)
    }

    pub fn ticks_elapsed(&self) -> u64 {
        self.with(|hw| hw.ticks_elapsed)
    }

    pub fn reg(&self, reg: Reg) -> u32 {
        self.with(|hw| match reg {
            Reg::ChCfg => hw.ch_cfg,
            Reg::Cfg => hw.cfg,
            Reg::ClkCfg => hw.clk_cfg,
            Reg::ModeCfg => hw.mode_cfg,
            Reg::IntMask => hw.int_mask,
            Reg::IntStatus => hw.int_status,
            _ => 0,
        })
    }

    pub fn clear_wire(&self) {
        self.with(|hw| {
            hw.mosi.clear();
            hw.miso.clear();
            hw.rounds.clear();
        });
    }
}

impl Registers for Sim {
    fn read(&self, reg: Reg) -> u32 {
        self.with(|hw| match reg {
            Reg::ChCfg => hw.ch_cfg,
            Reg::Cfg => hw.cfg,
            Reg::ClkCfg => hw.clk_cfg,
            Reg::ModeCfg => hw.mode_cfg,
            Reg::IntMask => hw.int_mask,
            Reg::IntStatus => hw.int_status,
            Reg::TimeoutCfg => hw.timeout_cfg,
            Reg::Status => {
                let busy = if hw.stuck_busy {
                    true
                } else if hw.busy_reads > 0 {
                    hw.busy_reads -= 1;
                    true
                } else {
                    false
                };
                hw.tx_fifo.len() as u32
                    | (hw.rx_fifo.len() as u32) << 6
                    | (busy as u32) << 12
            }
            Reg::RxData => hw.pop_rx_word(),
            Reg::TxData | Reg::TransMode | Reg::SlvXmitLen => 0,
        })
    }

    fn write(&self, reg: Reg, value: u32) {
        self.with(|hw| match reg {
            Reg::ChCfg => {
                hw.ch_cfg = value & !(START | CLEAR_FIFO);
                if value & CONTINUE == 0 {
                    hw.cs_active = false;
                }
                if value & CLEAR_FIFO != 0 {
                    hw.tx_fifo.clear();
                    hw.rx_fifo.clear();
                }
                if value & START != 0 {
                    hw.run();
                }
            }
            Reg::Cfg => hw.cfg = value,
            Reg::ClkCfg => hw.clk_cfg = value,
            Reg::ModeCfg => hw.mode_cfg = value,
            Reg::IntMask => hw.int_mask = value,
            Reg::IntStatus => hw.int_status &= !value,
            Reg::TimeoutCfg => hw.timeout_cfg = value,
            Reg::TxData => hw.push_tx_word(value),
            Reg::Status | Reg::RxData | Reg::TransMode | Reg::SlvXmitLen => {}
        })
    }

    fn address(&self, reg: Reg) -> usize {
        BASE + reg.offset()
    }
}

impl ClockConfig for Sim {
    fn clock_mhz(&self, domain: ClockDomain) -> u32 {
        self.with(|hw| match domain {
            ClockDomain::Cpu => hw.cpu_mhz,
            ClockDomain::Apb => hw.apb_mhz,
        })
    }
}

impl TickCounter for Sim {
    fn reload(&self) -> u32 {
        self.with(|hw| hw.reload)
    }

    fn now(&self) -> u32 {
        self.with(|hw| {
            let current = hw.tick;
            hw.tick = if current >= hw.tick_step {
                current - hw.tick_step
            } else {
                hw.reload + 1 - (hw.tick_step - current)
            };
            hw.ticks_elapsed += hw.tick_step as u64;
            current
        })
    }
}

impl Interrupt for Sim {
    fn enable(&self, _irq: Irq) {
        self.with(|hw| hw.irq_enabled = true);
    }

    fn disable(&self, _irq: Irq) {
        self.with(|hw| hw.irq_enabled = false);
    }

    fn attach(&self, _irq: Irq) -> Result<(), irq::Error> {
        self.with(|hw| {
            if hw.attach_fails {
                return Err(irq::Error::AlreadyAttached);
            }
            hw.irq_attached = true;
            Ok(())
        })
    }

    fn detach(&self, _irq: Irq) {
        self.with(|hw| hw.irq_attached = false);
    }
}

impl DmaController for Sim {
    fn configure(&self, config: &DmaConfig) -> Result<(), dma::Error> {
        config.validate()?;
        self.with(|hw| {
            let slot = &mut hw.channels[config.channel().number() as usize];
            if matches!(slot, Some(ch) if ch.state == State::Running) {
                return Err(dma::Error::Busy);
            }
            *slot = Some(SimChannel {
                config: *config,
                state: State::Idle,
                transferred: 0,
                notify: false,
            });
            hw.dma_configs.push(*config);
            Ok(())
        })
    }

    fn start(&self, channel: Channel) -> Result<(), dma::Error> {
        let preempt = self.with(|hw| {
            let room = spi::FIFO_DEPTH - hw.tx_fifo.len();
            let preempt = hw.preempt;
            let ch = hw
                .channels
                .get_mut(channel.number() as usize)
                .and_then(Option::as_mut)
                .ok_or(dma::Error::InvalidChannel)?;
            ch.state = State::Running;

            let len = ch.config.byte_len();
            if preempt.is_none() || ch.config.request() != dma::Request::SpiTx || len > room {
                return Ok(None);
            }
            for offset in 0..len {
                let addr = ch.config.source_address() + offset;
                // NOTE(unsafe) the transaction holds the buffer until the transfer completes
                hw.tx_fifo.push_back(unsafe { *(addr as *const u8) });
            }
            ch.transferred = len;
            ch.state = State::Done;
            Ok(preempt)
        })?;

        if let Some(preempt) = preempt {
            preempt(channel);
        }
        Ok(())
    }

    fn stop(&self, channel: Channel) -> Result<(), dma::Error> {
        self.with(|hw| {
            let ch = hw.channel(channel)?;
            if ch.state == State::Running {
                ch.state = State::Idle;
            }
            Ok(())
        })
    }

    fn status(&self, channel: Channel) -> Result<Status, dma::Error> {
        self.with(|hw| {
            let ch = hw.channel(channel)?;
            Ok(Status {
                state: ch.state,
                transferred: ch.transferred,
            })
        })
    }

    fn register_callback(&self, channel: Channel) -> Result<(), dma::Error> {
        self.with(|hw| {
            hw.channel(channel)?.notify = true;
            Ok(())
        })
    }

    fn unregister_callback(&self, channel: Channel) -> Result<(), dma::Error> {
        self.with(|hw| {
            hw.channel(channel)?.notify = false;
            Ok(())
        })
    }
}

pub type SimSpi = Spi<Sim, Sim>;

pub fn setup(config: Config) -> (SimSpi, Sim) {
    let sim = Sim::new();
    let spi = Spi::new(
        sim.clone(),
        sim.clone(),
        config,
        Resources::new(IRQ).with_dma(TX_CHANNEL, RX_CHANNEL),
    )
    .unwrap();
    (spi, sim)
}

pub fn setup_default() -> (SimSpi, Sim) {
    setup(Config::new(spi::MODE_0))
}

/// Deliver interrupts and DMA completions until the hardware has nothing left to report.
/// Returns the number of handler invocations.
pub fn settle(spi: &SimSpi, sim: &Sim) -> usize {
    for calls in 0..10_000 {
        if sim.irq_pending() {
            spi.on_interrupt();
        } else if let Some(channel) = sim.next_dma_event() {
            spi.on_dma_complete(channel);
        } else {
            return calls;
        }
    }
    panic!("hardware never settled");
}

static COMPLETIONS: Mutex<Vec<(usize, Result<(), spi::Error>)>> = Mutex::new(Vec::new());

/// Completion callback that records into a shared log, keyed by `user_arg`
pub fn record(user_arg: usize, result: Result<(), spi::Error>) {
    COMPLETIONS.lock().unwrap().push((user_arg, result));
}

pub fn completions(user_arg: usize) -> Vec<Result<(), spi::Error>> {
    COMPLETIONS
        .lock()
        .unwrap()
        .iter()
        .filter(|(arg, _)| *arg == user_arg)
        .map(|(_, result)| *result)
        .collect()
}

/// `len` zeroed bytes starting `offset` bytes past a word boundary, leaked so the driver can
/// hold them for `'static`
pub fn static_buf(len: usize, offset: usize) -> &'static mut [u8] {
    let storage: &'static mut [u8] = Box::leak(vec![0u8; len + offset + 3].into_boxed_slice());
    let skip = (4 - storage.as_ptr() as usize % 4) % 4 + offset;
    &mut storage[skip..skip + len]
}

/// [`static_buf`] holding a copy of `data`
pub fn static_filled(data: &[u8], offset: usize) -> &'static mut [u8] {
    let buf = static_buf(data.len(), offset);
    buf.copy_from_slice(data);
    buf
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}
