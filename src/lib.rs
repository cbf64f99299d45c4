#![cfg_attr(not(test), no_std)]
#![allow(unexpected_cfgs)]

//! Interrupt-driven driver for the Broadcom BCM2708/BCM2835 SPI0 engine.
//!
//! Clients queue [`spi::Message`]s on a [`spi::Controller`]. A single worker
//! (the [`spi::Controller::run`] future) feeds them one transfer at a time to
//! the FIFO pump, which the platform drives by calling
//! [`spi::Controller::on_interrupt`] from the SPI interrupt line.

extern crate alloc;

// This must go FIRST so that all the other modules see its macros.
mod fmt;

pub mod time;

pub mod regs;

pub mod gpio;

pub mod spi;

use embassy_time::Duration;

/// Completion budget for a single transfer, matching the stock kernel driver.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(150);

/// Controller-wide configuration.
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// How long the worker waits for the pump to finish one transfer.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Config {
    /// Create a config with the given per-transfer timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}
