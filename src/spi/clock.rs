//! Control word and clock divisor resolution.

use embedded_hal::spi::{Phase, Polarity};

use super::{Config, Error};
use crate::regs::cs;
use crate::time::Hertz;

/// Largest divisor the CLK register can express (written as 0).
pub const MAX_DIVISOR: u32 = 65536;

/// Control word and CLK value resolved for one peer or transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerConfig {
    cs: u32,
    cdiv: u16,
}

impl PeerConfig {
    /// CS register value with the engine idle (TA and interrupts clear).
    pub fn control_word(&self) -> u32 {
        self.cs
    }

    /// Raw CLK register value. 0 means divide by 65536.
    pub fn clock_register(&self) -> u16 {
        self.cdiv
    }

    /// The divisor the engine applies to the bus clock.
    pub fn divisor(&self) -> u32 {
        match self.cdiv {
            0 => MAX_DIVISOR,
            cdiv => cdiv as u32,
        }
    }

    /// Bit clock produced from `bus`.
    pub fn frequency(&self, bus: Hertz) -> Hertz {
        Hertz(bus.0 / self.divisor())
    }

    /// 9-bit LoSSI words, moved through the FIFO as 16-bit units.
    pub fn is_wide(&self) -> bool {
        self.cs & cs::LEN != 0
    }
}

/// Resolve `config` against a bus clock of `bus`.
///
/// The divisor is rounded up to a power of two so the resulting clock never
/// exceeds the requested one; a request at or above the bus clock runs at
/// `bus / 2`, and a request of 0 Hz runs at the slowest clock.
pub fn resolve(bus: Hertz, config: &Config) -> Result<PeerConfig, Error> {
    let bus_hz = bus.0;
    let hz = config.frequency.0;

    let cdiv = if hz == 0 {
        0
    } else if hz >= bus_hz {
        // bus_hz / 2 is as fast as we can go
        2
    } else {
        match bus_hz.div_ceil(hz).checked_next_power_of_two() {
            Some(cdiv) if cdiv > MAX_DIVISOR => return Err(too_slow(bus, config.frequency, cdiv)),
            None => return Err(too_slow(bus, config.frequency, u32::MAX)),
            Some(MAX_DIVISOR) => 0,
            // 1 would be written as 0, which the engine reads as 65536
            Some(1) => 2,
            Some(cdiv) => cdiv,
        }
    };

    let mut word = 0u32;

    match config.bits_per_word {
        8 => {}
        9 => word |= cs::LEN,
        bits => {
            debug!("setup: invalid bits_per_word {} (must be 8 or 9)", bits);
            return Err(Error::InvalidWordWidth(bits));
        }
    }

    if config.mode.polarity == Polarity::IdleHigh {
        word |= cs::CPOL;
    }
    if config.mode.phase == Phase::CaptureOnSecondTransition {
        word |= cs::CPHA;
    }

    if config.no_cs {
        // Both CS bits set selects no line at all.
        word |= cs::CS_10 | cs::CS_01;
    } else {
        let line = config.cs.index() as u32;
        if config.cs_high {
            word |= cs::CSPOL;
            word |= cs::CSPOL0 << line;
        }
        word |= line;
    }

    let state = PeerConfig {
        cs: word,
        cdiv: cdiv as u16,
    };
    debug!(
        "setup: want {} Hz; bus_hz={} / cdiv={} == {} Hz; cs {:#x}",
        hz,
        bus_hz,
        state.divisor(),
        state.frequency(bus).0,
        word
    );
    Ok(state)
}

fn too_slow(bus: Hertz, want: Hertz, cdiv: u32) -> Error {
    let minimum = Hertz(bus.0 / MAX_DIVISOR);
    debug!("setup: {} Hz too slow, cdiv {}; min {} Hz", want.0, cdiv, minimum.0);
    Error::FrequencyTooLow { minimum }
}
