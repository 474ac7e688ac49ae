use super::{Channel, Error, MAX_TRANSFER_LEN};

/// The TransferDirection represents the available options for transfer types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferDirection {
    MemoryToPeripheral,
    PeripheralToMemory,
}

/// Addressing mode represents whether the source or destination address is contiguously incremented
/// or fixed during a transfer
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressingMode {
    #[default]
    ContiguouslyIncremented,
    Fixed,
}

/// Width of a single bus access
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataUnit {
    Byte,
    HalfWord,
    #[default]
    Word,
}

impl DataUnit {
    pub const fn size(&self) -> usize {
        match self {
            DataUnit::Byte => 1,
            DataUnit::HalfWord => 2,
            DataUnit::Word => 4,
        }
    }
}

/// Hardware request lines the SPI driver uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// SPI transmit FIFO has room
    SpiTx,
    /// SPI receive FIFO has data
    SpiRx,
}

/// Descriptor of one DMA transfer
///
/// This structure uses builder semantics. The direction fixes the addressing of the peripheral
/// side, so only the addresses and length need to be supplied for SPI transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaConfig {
    channel: Channel,
    direction: TransferDirection,
    request: Request,
    source: usize,
    destination: usize,
    source_addressing: AddressingMode,
    destination_addressing: AddressingMode,
    unit: DataUnit,
    len: usize,
    interrupt: bool,
}

impl DmaConfig {
    fn new(
        channel: Channel,
        direction: TransferDirection,
        request: Request,
    ) -> Self {
        let (source_addressing, destination_addressing) = match direction {
            TransferDirection::MemoryToPeripheral => {
                (AddressingMode::ContiguouslyIncremented, AddressingMode::Fixed)
            }
            TransferDirection::PeripheralToMemory => {
                (AddressingMode::Fixed, AddressingMode::ContiguouslyIncremented)
            }
        };
        DmaConfig {
            channel,
            direction,
            request,
            source: 0,
            destination: 0,
            source_addressing,
            destination_addressing,
            unit: DataUnit::default(),
            len: 0,
            interrupt: true,
        }
    }

    pub fn memory_to_peripheral(channel: Channel, request: Request) -> Self {
        Self::new(channel, TransferDirection::MemoryToPeripheral, request)
    }

    pub fn peripheral_to_memory(channel: Channel, request: Request) -> Self {
        Self::new(channel, TransferDirection::PeripheralToMemory, request)
    }

    #[must_use]
    pub fn source(mut self, address: usize) -> Self {
        self.source = address;
        self
    }

    #[must_use]
    pub fn destination(mut self, address: usize) -> Self {
        self.destination = address;
        self
    }

    /// Length of the transfer in bytes
    #[must_use]
    pub fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: DataUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Raise the channel's completion interrupt and deliver it to the driver. On by default.
    #[must_use]
    pub fn interrupt(mut self, enable: bool) -> Self {
        self.interrupt = enable;
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn request(&self) -> Request {
        self.request
    }

    pub fn source_address(&self) -> usize {
        self.source
    }

    pub fn destination_address(&self) -> usize {
        self.destination
    }

    pub fn source_addressing(&self) -> AddressingMode {
        self.source_addressing
    }

    pub fn destination_addressing(&self) -> AddressingMode {
        self.destination_addressing
    }

    pub fn data_unit(&self) -> DataUnit {
        self.unit
    }

    pub fn byte_len(&self) -> usize {
        self.len
    }

    pub fn interrupt_enabled(&self) -> bool {
        self.interrupt
    }

    /// Number of bus accesses the transfer takes
    pub fn units(&self) -> usize {
        self.len / self.unit.size()
    }

    /// Check the descriptor against what the controller can execute.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.channel.is_valid() {
            return Err(Error::InvalidChannel);
        }
        let unit = self.unit.size();
        if self.len == 0
            || self.len > MAX_TRANSFER_LEN
            || self.len % unit != 0
            || self.source % unit != 0
            || self.destination % unit != 0
        {
            return Err(Error::Config);
        }
        Ok(())
    }
}
