//! SPI master driver for the BCM2708 SPI0 engine
//!
//! The engine has:
//! - Full-duplex synchronous serial interface, master only
//! - 16-entry TX and RX FIFOs (CS.DONE when TX empty, CS.RXR when RX 3/4 full)
//! - 3 chip selects (CE0..CE2), each with its own polarity bit
//! - SPI modes 0-3 (CPOL/CPHA)
//! - Clock: bus_clk / CDIV, CDIV a power of two in 2..=65536 (0 encodes 65536)
//! - LoSSI mode (CS.LEN): 9-bit words pushed through the FIFO as 16-bit units
//!
//! Data flow: [`Controller::submit`] queues a [`Message`]; the
//! [`Controller::run`] worker arms one [`Transfer`] at a time and waits for
//! [`Controller::on_interrupt`] to finish pumping it.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use embedded_hal::spi::{ErrorKind, Mode, MODE_0};

use crate::time::Hertz;

mod clock;
mod controller;
mod pump;

pub use clock::{resolve, PeerConfig, MAX_DIVISOR};
pub use controller::Controller;

/// Number of bytes the pump pushes on a DONE interrupt.
pub const FIFO_DONE_CHUNK: usize = 16;
/// Number of bytes the pump moves each way on an RXR interrupt.
pub const FIFO_RXR_CHUNK: usize = 12;

/// SPI Error
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The controller is shutting down and accepts no more work.
    ShuttingDown,
    /// A message was submitted without transfers.
    EmptyMessage,
    /// A transfer with a nonzero length has neither a TX nor an RX buffer.
    MissingBuffer,
    /// Bits per word other than 8 or 9.
    InvalidWordWidth(u8),
    /// The requested clock needs a divisor above 65536.
    FrequencyTooLow {
        /// Slowest clock the engine can produce from the current bus clock.
        minimum: Hertz,
    },
    /// Chip-select index beyond the lines the engine drives.
    InvalidChipSelect(u8),
    /// An odd byte count cannot be sent as 16-bit LoSSI words.
    OddLengthInWideMode,
    /// The engine did not finish the transfer within the configured budget.
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShuttingDown => f.write_str("controller is shutting down"),
            Error::EmptyMessage => f.write_str("message has no transfers"),
            Error::MissingBuffer => f.write_str("missing rx or tx buf"),
            Error::InvalidWordWidth(bits) => write!(f, "invalid bits_per_word {} (must be 8 or 9)", bits),
            Error::FrequencyTooLow { minimum } => write!(f, "frequency too low; min {}", minimum),
            Error::InvalidChipSelect(cs) => write!(f, "invalid chipselect {} ({} defined)", cs, NUM_CHIPSELECT),
            Error::OddLengthInWideMode => f.write_str("length must be even in LoSSI mode"),
            Error::Timeout => f.write_str("transfer timed out"),
        }
    }
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::OddLengthInWideMode => ErrorKind::FrameFormat,
            Error::InvalidChipSelect(_) => ErrorKind::ChipSelectFault,
            _ => ErrorKind::Other,
        }
    }
}

/// Chip-select lines driven by the engine.
pub const NUM_CHIPSELECT: u8 = 3;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChipSelect {
    #[default]
    Cs0 = 0,
    Cs1 = 1,
    Cs2 = 2,
}

impl ChipSelect {
    pub const fn index(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ChipSelect {
    type Error = Error;

    /// Indices `0..NUM_CHIPSELECT` are valid. Index 3 would alias the
    /// "no chip select" encoding of the CS field, so it is rejected.
    fn try_from(index: u8) -> Result<Self, Error> {
        match index {
            0 => Ok(ChipSelect::Cs0),
            1 => Ok(ChipSelect::Cs1),
            2 => Ok(ChipSelect::Cs2),
            _ => {
                debug!("setup: invalid chipselect {} ({} defined)", index, NUM_CHIPSELECT);
                Err(Error::InvalidChipSelect(index))
            }
        }
    }
}

/// Per-peer bus settings.
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub mode: Mode,
    /// Requested clock. 0 selects the slowest clock the engine can produce.
    pub frequency: Hertz,
    /// 8, or 9 for LoSSI mode.
    pub bits_per_word: u8,
    pub cs: ChipSelect,
    /// Chip select is asserted high.
    pub cs_high: bool,
    /// Do not drive any chip-select line.
    pub no_cs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: MODE_0,
            frequency: Hertz(500_000),
            bits_per_word: 8,
            cs: ChipSelect::Cs0,
            cs_high: false,
            no_cs: false,
        }
    }
}

impl Config {
    pub fn new(frequency: Hertz, mode: Mode, bits_per_word: u8, cs: ChipSelect) -> Self {
        Self {
            mode,
            frequency,
            bits_per_word,
            cs,
            ..Self::default()
        }
    }

    pub fn with_cs_high(mut self) -> Self {
        self.cs_high = true;
        self
    }

    pub fn with_no_cs(mut self) -> Self {
        self.no_cs = true;
        self
    }

    /// Apply a transfer's speed and word-width overrides.
    fn overridden_by(&self, xfer: &Transfer) -> Self {
        Self {
            frequency: xfer.speed.unwrap_or(self.frequency),
            bits_per_word: xfer.bits_per_word.unwrap_or(self.bits_per_word),
            ..*self
        }
    }
}

/// A device on the bus, addressed through one chip select.
///
/// The resolved [`PeerConfig`] is cached here by [`Controller::setup`] and
/// dropped whenever the settings change.
#[derive(Clone, Debug)]
pub struct Peer {
    config: Config,
    state: Option<PeerConfig>,
}

impl Peer {
    pub fn new(config: Config) -> Self {
        Self { config, state: None }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the settings; the cached configuration is invalidated.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
        self.state = None;
    }

    /// The cached configuration, if [`Controller::setup`] succeeded.
    pub fn state(&self) -> Option<&PeerConfig> {
        self.state.as_ref()
    }
}

/// One buffer-to-buffer exchange.
pub struct Transfer {
    tx: Option<Vec<u8>>,
    rx: Option<Vec<u8>>,
    len: usize,
    bits_per_word: Option<u8>,
    speed: Option<Hertz>,
    delay_us: u16,
    cs_change: bool,
}

impl Transfer {
    /// Build a transfer from raw parts.
    ///
    /// A missing `tx` clocks out zeros; a missing `rx` discards what comes in.
    pub fn new(tx: Option<Vec<u8>>, rx: Option<Vec<u8>>, len: usize) -> Self {
        Self {
            tx,
            rx,
            len,
            bits_per_word: None,
            speed: None,
            delay_us: 0,
            cs_change: false,
        }
    }

    /// Send `data`, discard the received bytes.
    pub fn write(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len();
        Self::new(Some(data), None, len)
    }

    /// Clock out `len` zeros and keep what comes back.
    pub fn read(len: usize) -> Self {
        Self::new(None, Some(vec![0; len]), len)
    }

    /// Full duplex: send `data` and receive the same number of bytes.
    pub fn transfer(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len();
        Self::new(Some(data), Some(vec![0; len]), len)
    }

    pub fn with_speed(mut self, speed: Hertz) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_bits_per_word(mut self, bits: u8) -> Self {
        self.bits_per_word = Some(bits);
        self
    }

    /// Busy-wait this long after the transfer before touching chip select.
    pub fn with_delay_us(mut self, delay_us: u16) -> Self {
        self.delay_us = delay_us;
        self
    }

    /// Release chip select after this transfer even if more follow.
    pub fn with_cs_change(mut self) -> Self {
        self.cs_change = true;
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tx_buf(&self) -> Option<&[u8]> {
        self.tx.as_deref()
    }

    /// Received bytes.
    pub fn rx_buf(&self) -> Option<&[u8]> {
        self.rx.as_deref()
    }

    pub fn into_rx_buf(self) -> Option<Vec<u8>> {
        self.rx
    }

    fn has_override(&self) -> bool {
        self.bits_per_word.is_some() || self.speed.is_some()
    }
}

/// Callback run by the worker once a message has finished.
pub type Complete = Box<dyn FnOnce(Message) + Send>;

/// An ordered batch of transfers with one completion callback.
pub struct Message {
    transfers: Vec<Transfer>,
    complete: Option<Complete>,
    status: Option<Result<(), Error>>,
    actual_length: usize,
    id: u32,
}

impl Message {
    pub fn new(transfers: Vec<Transfer>) -> Self {
        Self {
            transfers,
            complete: None,
            status: None,
            actual_length: 0,
            id: 0,
        }
    }

    /// Hand the finished message to `f`. Runs on the worker, once.
    pub fn on_complete(mut self, f: impl FnOnce(Message) + Send + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// `None` while queued or running.
    pub fn result(&self) -> Option<Result<(), Error>> {
        self.status
    }

    /// Bytes moved by the transfers that completed.
    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    /// Submission sequence number, assigned by [`Controller::submit`].
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn into_transfers(self) -> Vec<Transfer> {
        self.transfers
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("transfers", &self.transfers.len())
            .field("status", &self.status)
            .field("actual_length", &self.actual_length)
            .finish()
    }
}
