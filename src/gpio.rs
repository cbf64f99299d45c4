//! GPIO function select for BCM2708
//!
//! Each GPFSELn register (offset = n * 4) holds the function of 10 pins,
//! 3 bits per pin. The alternate functions are not encoded in order:
//! ALT0..ALT3 are 4..7, ALT4 is 3 and ALT5 is 2.

/// Pin function (3 bits in a GPFSEL register)
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

/// Number of GPIO lines on the SoC.
pub const PIN_COUNT: u8 = 54;

/// Offset of the GPFSEL register holding `pin`.
#[inline]
pub const fn fsel_offset(pin: u8) -> usize {
    (pin as usize / 10) * 4
}

/// Replace the function field of `pin` inside a GPFSEL word.
#[inline]
pub const fn fsel_update(word: u32, pin: u8, function: Function) -> u32 {
    let shift = (pin as u32 % 10) * 3;
    (word & !(0x7 << shift)) | ((function as u32) << shift)
}

/// Set the function of `pin` in the GPIO block mapped at `base`.
///
/// # Safety
/// `base` must be the mapped GPIO register block and the read-modify-write
/// must not race with another writer of the same GPFSEL register.
pub unsafe fn set_function(base: usize, pin: u8, function: Function) {
    if pin >= PIN_COUNT {
        return;
    }
    let reg = (base + fsel_offset(pin)) as *mut u32;
    let val = reg.read_volatile();
    reg.write_volatile(fsel_update(val, pin, function));
}
