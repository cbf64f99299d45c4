//! Interrupt-side FIFO pump.
//!
//! The worker hands a transfer's buffers over with [`Pump::arm`]; from then
//! on only [`Pump::on_interrupt`] touches the cursors until the worker takes
//! the buffers back with [`Pump::finish`] or [`Pump::abort`]. All calls are
//! made with the controller lock held.

use alloc::vec::Vec;

use super::{Error, Transfer, FIFO_DONE_CHUNK, FIFO_RXR_CHUNK};
use crate::regs::{self, cs, Instance};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum State {
    /// No transfer owned.
    Idle,
    /// Buffers taken, waiting for the first DONE interrupt.
    Armed,
    /// Bytes are moving through the FIFOs.
    Draining,
    /// RX FIFO emptied and completion raised; waiting for the worker.
    Complete,
}

pub(crate) struct Pump {
    state: State,
    tx: Option<Vec<u8>>,
    tx_pos: usize,
    rx: Option<Vec<u8>>,
    rx_pos: usize,
    /// Bytes not yet pushed into the TX FIFO.
    len: usize,
    total: usize,
    wide: bool,
    fault: Option<Error>,
}

impl Pump {
    pub(crate) const fn new() -> Self {
        Self {
            state: State::Idle,
            tx: None,
            tx_pos: 0,
            rx: None,
            rx_pos: 0,
            len: 0,
            total: 0,
            wide: false,
            fault: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Take ownership of `xfer`'s buffers and reset the cursors.
    pub(crate) fn arm(&mut self, xfer: &mut Transfer, wide: bool) {
        debug_assert_eq!(self.state, State::Idle);
        self.tx = xfer.tx.take();
        self.rx = xfer.rx.take();
        self.tx_pos = 0;
        self.rx_pos = 0;
        self.len = xfer.len;
        self.total = xfer.len;
        self.wide = wide;
        self.fault = None;
        self.state = State::Armed;
    }

    /// Service one interrupt. Returns `true` once the transfer is complete.
    pub(crate) fn on_interrupt<T: Instance>(&mut self, regs: &T) -> bool {
        if !matches!(self.state, State::Armed | State::Draining) {
            trace!("spi: interrupt while {:?}", self.state);
            return false;
        }

        let mut status = regs.read(regs::CS);

        if status & cs::DONE != 0 {
            if self.len != 0 {
                // first interrupt, or the TX FIFO ran dry
                self.state = State::Draining;
                self.write_fifo(regs, FIFO_DONE_CHUNK);
            } else {
                status &= !(cs::INTR | cs::INTD);
                regs.write(regs::CS, status);

                while status & cs::RXD != 0 {
                    self.read_unit(regs);
                    status = regs.read(regs::CS);
                }

                self.state = State::Complete;
                return true;
            }
        } else if status & cs::RXR != 0 {
            self.read_fifo(regs, FIFO_RXR_CHUNK);
            self.write_fifo(regs, FIFO_RXR_CHUNK);
        }

        false
    }

    /// Give the buffers back after completion and report the bytes moved.
    pub(crate) fn finish(&mut self, xfer: &mut Transfer) -> Result<usize, Error> {
        debug_assert_eq!(self.state, State::Complete);
        let moved = self.total - self.len;
        self.release(xfer);
        match self.fault.take() {
            Some(e) => Err(e),
            None => Ok(moved),
        }
    }

    /// Give the buffers back without completion.
    pub(crate) fn abort(&mut self, xfer: &mut Transfer) {
        self.release(xfer);
        self.fault = None;
    }

    fn release(&mut self, xfer: &mut Transfer) {
        xfer.tx = self.tx.take();
        xfer.rx = self.rx.take();
        self.len = 0;
        self.total = 0;
        self.state = State::Idle;
    }

    fn write_fifo<T: Instance>(&mut self, regs: &T, max: usize) {
        let mut chunk = max.min(self.len);

        if self.wide {
            // chunks are even, so the parity of `len` never changes mid-transfer
            if self.len % 2 != 0 {
                error!("spi: length must be even in LoSSI mode, skipping");
                self.fault = Some(Error::OddLengthInWideMode);
                self.total = 0;
                self.len = 0;
                return;
            }
            while chunk != 0 {
                let word = u16::from_le_bytes([self.next_tx(), self.next_tx()]);
                regs.write(regs::FIFO, word as u32);
                self.len -= 2;
                chunk -= 2;
            }
            return;
        }

        while chunk != 0 {
            let byte = self.next_tx();
            regs.write(regs::FIFO, byte as u32);
            self.len -= 1;
            chunk -= 1;
        }
    }

    fn read_fifo<T: Instance>(&mut self, regs: &T, bytes: usize) {
        let units = if self.wide { bytes / 2 } else { bytes };
        for _ in 0..units {
            self.read_unit(regs);
        }
    }

    fn read_unit<T: Instance>(&mut self, regs: &T) {
        let word = regs.read(regs::FIFO);
        if self.wide {
            let [lo, hi] = (word as u16).to_le_bytes();
            self.store(lo);
            self.store(hi);
        } else {
            self.store(word as u8);
        }
    }

    fn next_tx(&mut self) -> u8 {
        let byte = self
            .tx
            .as_ref()
            .and_then(|tx| tx.get(self.tx_pos))
            .copied()
            .unwrap_or(0);
        self.tx_pos += 1;
        byte
    }

    fn store(&mut self, byte: u8) {
        if let Some(slot) = self.rx.as_mut().and_then(|rx| rx.get_mut(self.rx_pos)) {
            *slot = byte;
        }
        self.rx_pos += 1;
    }
}
