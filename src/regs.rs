//! SPI0 register map and the register-interface seam.
//!
//! The engine exposes six 32-bit registers:
//! - CS   (0x00): control and status
//! - FIFO (0x04): TX write port / RX read port
//! - CLK  (0x08): clock divider
//! - DLEN (0x0C): data length (DMA mode only)
//! - LTOH (0x10): LoSSI output hold delay
//! - DC   (0x14): DMA DREQ controls
//!
//! Only CS, FIFO and CLK are touched by the interrupt-driven transfer path.

use crate::gpio;
use crate::time::Hertz;

/// Control and status
pub const CS: usize = 0x00;
/// TX and RX FIFOs
pub const FIFO: usize = 0x04;
/// Clock divider
pub const CLK: usize = 0x08;
/// Data length
pub const DLEN: usize = 0x0C;
/// LoSSI mode TOH
pub const LTOH: usize = 0x10;
/// DMA DREQ controls
pub const DC: usize = 0x14;

/// Bitfields in the CS register.
pub mod cs {
    pub const LEN_LONG: u32 = 0x0200_0000;
    pub const DMA_LEN: u32 = 0x0100_0000;
    pub const CSPOL2: u32 = 0x0080_0000;
    pub const CSPOL1: u32 = 0x0040_0000;
    pub const CSPOL0: u32 = 0x0020_0000;
    /// RX FIFO full
    pub const RXF: u32 = 0x0010_0000;
    /// RX FIFO needs reading
    pub const RXR: u32 = 0x0008_0000;
    /// TX FIFO can accept data
    pub const TXD: u32 = 0x0004_0000;
    /// RX FIFO contains data
    pub const RXD: u32 = 0x0002_0000;
    /// Transfer done
    pub const DONE: u32 = 0x0001_0000;
    /// LoSSI enable, 9-bit words
    pub const LEN: u32 = 0x0000_2000;
    /// Read enable (bidirectional mode)
    pub const REN: u32 = 0x0000_1000;
    pub const ADCS: u32 = 0x0000_0800;
    /// Interrupt on RXR
    pub const INTR: u32 = 0x0000_0400;
    /// Interrupt on DONE
    pub const INTD: u32 = 0x0000_0200;
    pub const DMAEN: u32 = 0x0000_0100;
    /// Transfer active
    pub const TA: u32 = 0x0000_0080;
    pub const CSPOL: u32 = 0x0000_0040;
    pub const CLEAR_RX: u32 = 0x0000_0020;
    pub const CLEAR_TX: u32 = 0x0000_0010;
    pub const CPOL: u32 = 0x0000_0008;
    pub const CPHA: u32 = 0x0000_0004;
    pub const CS_10: u32 = 0x0000_0002;
    pub const CS_01: u32 = 0x0000_0001;
}

/// Register access and clock supply for one SPI engine.
///
/// Implementations must tolerate being called from interrupt context.
pub trait Instance {
    /// Read the 32-bit register at `offset`.
    fn read(&self, offset: usize) -> u32;

    /// Write the 32-bit register at `offset`.
    fn write(&self, offset: usize, value: u32);

    /// Frequency of the clock feeding the divider.
    fn bus_clock(&self) -> Hertz;

    /// Gate the peripheral clock on.
    fn enable_clock(&self) {}

    /// Gate the peripheral clock off.
    fn disable_clock(&self) {}

    /// One-time pin-mux step performed at bring-up.
    fn prepare_pins(&self) {}
}

impl<T: Instance + ?Sized> Instance for &T {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }

    fn bus_clock(&self) -> Hertz {
        (**self).bus_clock()
    }

    fn enable_clock(&self) {
        (**self).enable_clock()
    }

    fn disable_clock(&self) {
        (**self).disable_clock()
    }

    fn prepare_pins(&self) {
        (**self).prepare_pins()
    }
}

/// SPI0 sits on GPIO 7 (CE1), 8 (CE0), 9 (MISO), 10 (MOSI), 11 (SCLK).
pub const SPI0_PINS: core::ops::RangeInclusive<u8> = 7..=11;

/// Memory-mapped SPI0 engine.
pub struct Mmio {
    base: usize,
    gpio_base: Option<usize>,
    bus_clock: Hertz,
}

impl Mmio {
    /// Bind to the register block at `base`, clocked at `bus_clock`.
    ///
    /// # Safety
    /// `base` must be the mapped address of an SPI0-compatible register block
    /// that nothing else writes to for the lifetime of the returned value.
    pub const unsafe fn new(base: usize, bus_clock: Hertz) -> Self {
        Self {
            base,
            gpio_base: None,
            bus_clock,
        }
    }

    /// Also switch GPIO 7..=11 to ALT0 during [`Instance::prepare_pins`].
    ///
    /// # Safety
    /// `gpio_base` must be the mapped address of the GPIO block, and no other
    /// code may be reconfiguring the function-select registers concurrently.
    pub const unsafe fn with_gpio(mut self, gpio_base: usize) -> Self {
        self.gpio_base = Some(gpio_base);
        self
    }
}

impl Instance for Mmio {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    fn bus_clock(&self) -> Hertz {
        self.bus_clock
    }

    fn prepare_pins(&self) {
        if let Some(gpio_base) = self.gpio_base {
            for pin in SPI0_PINS {
                // Go through Input first so no pin ever sits in a foreign alt mode.
                unsafe {
                    gpio::set_function(gpio_base, pin, gpio::Function::Input);
                    gpio::set_function(gpio_base, pin, gpio::Function::Alt0);
                }
            }
        }
    }
}
