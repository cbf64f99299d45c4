//! A cycle-stepped model of the SPI0 engine for host tests.
//!
//! Each [`SimSpi::step`] shifts one FIFO entry out and one reply in, then
//! reports whether the (level-triggered) interrupt line is asserted.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use bcm2708_spi::regs::{self, cs, Instance};
use bcm2708_spi::spi::{Controller, Message};
use bcm2708_spi::time::Hertz;
use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_futures::yield_now;

pub const FIFO_DEPTH: usize = 16;
/// RX level at which the engine raises RXR.
pub const RXR_LEVEL: usize = 12;

const STATUS: u32 = cs::RXF | cs::RXR | cs::TXD | cs::RXD | cs::DONE;
const COMMANDS: u32 = cs::CLEAR_RX | cs::CLEAR_TX;

pub struct SimSpi {
    bus: Hertz,
    control: Cell<u32>,
    tx: RefCell<VecDeque<u32>>,
    rx: RefCell<VecDeque<u32>>,
    responder: RefCell<Box<dyn FnMut(u32) -> u32>>,
    mosi: RefCell<Vec<u32>>,
    cs_writes: RefCell<Vec<u32>>,
    clk_writes: RefCell<Vec<u32>>,
    stalled: Cell<bool>,
    clock_on: Cell<bool>,
    pins_prepared: Cell<bool>,
}

impl SimSpi {
    /// An engine whose slave echoes every word back.
    pub fn new(bus: Hertz) -> Self {
        Self {
            bus,
            control: Cell::new(0),
            tx: RefCell::new(VecDeque::new()),
            rx: RefCell::new(VecDeque::new()),
            responder: RefCell::new(Box::new(|word| word)),
            mosi: RefCell::new(Vec::new()),
            cs_writes: RefCell::new(Vec::new()),
            clk_writes: RefCell::new(Vec::new()),
            stalled: Cell::new(false),
            clock_on: Cell::new(false),
            pins_prepared: Cell::new(false),
        }
    }

    pub fn respond_with(&self, f: impl FnMut(u32) -> u32 + 'static) {
        *self.responder.borrow_mut() = Box::new(f);
    }

    /// Reply with `bytes` in order, then zeros.
    pub fn script_miso(&self, bytes: &[u8]) {
        let mut script: VecDeque<u32> = bytes.iter().map(|&b| b as u32).collect();
        self.respond_with(move |_| script.pop_front().unwrap_or(0));
    }

    /// A stalled engine never raises its interrupt.
    pub fn stall(&self, stalled: bool) {
        self.stalled.set(stalled);
    }

    /// Words shifted out on MOSI so far.
    pub fn mosi(&self) -> Vec<u32> {
        self.mosi.borrow().clone()
    }

    pub fn cs_writes(&self) -> Vec<u32> {
        self.cs_writes.borrow().clone()
    }

    pub fn clk_writes(&self) -> Vec<u32> {
        self.clk_writes.borrow().clone()
    }

    pub fn control(&self) -> u32 {
        self.control.get()
    }

    pub fn clock_on(&self) -> bool {
        self.clock_on.get()
    }

    pub fn pins_prepared(&self) -> bool {
        self.pins_prepared.get()
    }

    fn status(&self) -> u32 {
        let control = self.control.get();
        let tx = self.tx.borrow().len();
        let rx = self.rx.borrow().len();

        let mut status = 0;
        if control & cs::TA != 0 && tx == 0 {
            status |= cs::DONE;
        }
        if tx < FIFO_DEPTH {
            status |= cs::TXD;
        }
        if rx != 0 {
            status |= cs::RXD;
        }
        if rx >= RXR_LEVEL {
            status |= cs::RXR;
        }
        if rx >= FIFO_DEPTH {
            status |= cs::RXF;
        }
        status
    }

    /// Shift one entry, then sample the interrupt line.
    pub fn step(&self) -> bool {
        let control = self.control.get();
        if control & cs::TA != 0 && !self.stalled.get() {
            let word = self.tx.borrow_mut().pop_front();
            if let Some(word) = word {
                self.mosi.borrow_mut().push(word);
                let reply = (self.responder.borrow_mut())(word);
                self.rx.borrow_mut().push_back(reply);
            }
        }

        if self.stalled.get() || control & cs::TA == 0 {
            return false;
        }
        let status = self.status();
        (control & cs::INTD != 0 && status & cs::DONE != 0) || (control & cs::INTR != 0 && status & cs::RXR != 0)
    }
}

impl Instance for SimSpi {
    fn read(&self, offset: usize) -> u32 {
        match offset {
            regs::CS => self.control.get() | self.status(),
            regs::FIFO => self.rx.borrow_mut().pop_front().unwrap_or(0),
            _ => 0,
        }
    }

    fn write(&self, offset: usize, value: u32) {
        match offset {
            regs::CS => {
                self.cs_writes.borrow_mut().push(value);
                if value & cs::CLEAR_TX != 0 {
                    self.tx.borrow_mut().clear();
                }
                if value & cs::CLEAR_RX != 0 {
                    self.rx.borrow_mut().clear();
                }
                self.control.set(value & !(STATUS | COMMANDS));
            }
            regs::FIFO => {
                if self.control.get() & cs::TA != 0 {
                    self.tx.borrow_mut().push_back(value);
                }
            }
            regs::CLK => self.clk_writes.borrow_mut().push(value),
            _ => {}
        }
    }

    fn bus_clock(&self) -> Hertz {
        self.bus
    }

    fn enable_clock(&self) {
        self.clock_on.set(true);
    }

    fn disable_clock(&self) {
        self.clock_on.set(false);
    }

    fn prepare_pins(&self) {
        self.pins_prepared.set(true);
    }
}

/// Keep stepping the engine and delivering its interrupts.
pub async fn drive(sim: &SimSpi, ctrl: &Controller<&SimSpi>) {
    loop {
        if sim.step() {
            ctrl.on_interrupt();
        }
        yield_now().await;
    }
}

/// Run `client` alongside the worker and the engine, then shut down.
pub fn exercise<F: Future>(sim: &SimSpi, ctrl: &Controller<&SimSpi>, client: F) -> F::Output {
    block_on(async {
        let work = join(ctrl.run(), async {
            let out = client.await;
            ctrl.shutdown().await;
            out
        });
        match select(drive(sim, ctrl), work).await {
            Either::First(()) => unreachable!("engine loop returned"),
            Either::Second(((), out)) => out,
        }
    })
}

/// Collects finished messages in completion order.
#[derive(Clone, Default)]
pub struct Completions(Arc<Mutex<Vec<Message>>>);

impl Completions {
    pub fn sink(&self) -> impl FnOnce(Message) + Send + 'static {
        let done = self.0.clone();
        move |msg| done.lock().unwrap().push(msg)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    /// Yield until `n` messages have completed.
    pub async fn wait_for(&self, n: usize) {
        while self.len() < n {
            yield_now().await;
        }
    }
}
