//! Message queue, worker and interrupt entry.

use alloc::collections::VecDeque;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{block_for, with_timeout, Duration};
use portable_atomic::{AtomicU32, Ordering};

use super::clock::{resolve, PeerConfig};
use super::pump::Pump;
use super::{Config, Error, Message, Peer, Transfer};
use crate::regs::{self, cs, Instance};

/// A message waiting for the worker, with the peer settings it was queued under.
struct Queued {
    msg: Message,
    config: Config,
    state: PeerConfig,
}

/// Everything the worker and the interrupt handler share.
struct Shared {
    queue: VecDeque<Queued>,
    stopping: bool,
    /// The worker owns a message it has not completed yet.
    busy: bool,
    pump: Pump,
}

/// One SPI0 engine.
///
/// Drive [`Controller::run`] on an executor and call
/// [`Controller::on_interrupt`] from the SPI interrupt.
pub struct Controller<T: Instance> {
    regs: T,
    config: crate::Config,
    shared: Mutex<CriticalSectionRawMutex, RefCell<Shared>>,
    done: Signal<CriticalSectionRawMutex, ()>,
    wake: Signal<CriticalSectionRawMutex, ()>,
    drained: Signal<CriticalSectionRawMutex, ()>,
    next_id: AtomicU32,
}

impl<T: Instance> Controller<T> {
    /// Bring up the engine: clock on, pins muxed, FIFOs cleared.
    pub fn new(regs: T, config: crate::Config) -> Self {
        regs.enable_clock();
        regs.prepare_pins();
        regs.write(regs::CS, cs::REN | cs::CLEAR_RX | cs::CLEAR_TX);

        info!("SPI controller up, bus clock {} Hz", regs.bus_clock().0);

        Self {
            regs,
            config,
            shared: Mutex::new(RefCell::new(Shared {
                queue: VecDeque::new(),
                stopping: false,
                busy: false,
                pump: Pump::new(),
            })),
            done: Signal::new(),
            wake: Signal::new(),
            drained: Signal::new(),
            next_id: AtomicU32::new(0),
        }
    }

    pub fn instance(&self) -> &T {
        &self.regs
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.lock(|shared| shared.borrow().stopping)
    }

    /// Resolve `config` against the current bus clock.
    pub fn configure_peer(&self, config: &Config) -> Result<PeerConfig, Error> {
        if self.is_stopping() {
            return Err(Error::ShuttingDown);
        }
        resolve(self.regs.bus_clock(), config)
    }

    /// Resolve and cache the configuration of `peer`.
    ///
    /// On failure the cached configuration is dropped.
    pub fn setup(&self, peer: &mut Peer) -> Result<(), Error> {
        match self.configure_peer(&peer.config) {
            Ok(state) => {
                debug!(
                    "setup: cd {}: {} Hz, bpw {} -> CS={:#x} CDIV={:#x}",
                    peer.config.cs.index(),
                    peer.config.frequency.0,
                    peer.config.bits_per_word,
                    state.control_word(),
                    state.clock_register()
                );
                peer.state = Some(state);
                Ok(())
            }
            Err(e) => {
                peer.state = None;
                Err(e)
            }
        }
    }

    /// Queue `msg` for `peer`.
    ///
    /// Malformed messages and transfer overrides the engine cannot honour
    /// are rejected here, before anything is queued.
    pub fn submit(&self, peer: &Peer, mut msg: Message) -> Result<(), Error> {
        if self.is_stopping() {
            return Err(Error::ShuttingDown);
        }
        if msg.transfers.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let bus = self.regs.bus_clock();
        for xfer in &msg.transfers {
            if xfer.tx.is_none() && xfer.rx.is_none() && xfer.len != 0 {
                debug!("missing rx or tx buf");
                return Err(Error::MissingBuffer);
            }
            if xfer.has_override() {
                resolve(bus, &peer.config.overridden_by(xfer))?;
            }
        }

        let state = match peer.state {
            Some(state) => state,
            None => resolve(bus, &peer.config)?,
        };

        msg.status = None;
        msg.actual_length = 0;

        self.shared.lock(|shared| {
            let mut shared = shared.borrow_mut();
            if shared.stopping {
                return Err(Error::ShuttingDown);
            }
            // ids follow queue order
            msg.id = self.next_id.fetch_add(1, Ordering::Relaxed);
            shared.queue.push_back(Queued {
                msg,
                config: peer.config,
                state,
            });
            Ok(())
        })?;

        self.wake.signal(());
        Ok(())
    }

    /// SPI interrupt entry point.
    pub fn on_interrupt(&self) {
        self.shared.lock(|shared| {
            if shared.borrow_mut().pump.on_interrupt(&self.regs) {
                self.done.signal(());
            }
        });
    }

    /// The worker. Completes messages in submission order and returns once
    /// [`Controller::shutdown`] has been called and the queue is empty.
    pub async fn run(&self) {
        loop {
            let next = self.shared.lock(|shared| {
                let mut shared = shared.borrow_mut();
                match shared.queue.pop_front() {
                    Some(queued) => {
                        shared.busy = true;
                        Ok(queued)
                    }
                    None => {
                        shared.busy = false;
                        Err(shared.stopping)
                    }
                }
            });

            match next {
                Ok(queued) => self.process_message(queued).await,
                Err(true) => {
                    self.drained.signal(());
                    return;
                }
                Err(false) => self.wake.wait().await,
            }
        }
    }

    /// Stop accepting work and wait for the worker to drain.
    ///
    /// Messages already queued complete with [`Error::ShuttingDown`]; the
    /// transfer in flight is left to finish or time out. `run` must be
    /// polled for this to return while work is outstanding.
    pub async fn shutdown(&self) {
        info!("SPI controller shutting down");

        let idle = self.shared.lock(|shared| {
            let mut shared = shared.borrow_mut();
            shared.stopping = true;
            !shared.busy && shared.queue.is_empty()
        });
        self.wake.signal(());

        if !idle {
            self.drained.wait().await;
        }

        self.regs.write(regs::CS, cs::CLEAR_RX | cs::CLEAR_TX);
        self.regs.disable_clock();
    }

    async fn process_message(&self, queued: Queued) {
        let Queued { mut msg, config, state } = queued;
        let count = msg.transfers.len();
        let mut status = Ok(());

        for (i, xfer) in msg.transfers.iter_mut().enumerate() {
            match self.process_transfer(&config, &state, xfer, i + 1 == count).await {
                Ok(moved) => msg.actual_length += moved,
                Err(e) => {
                    status = Err(e);
                    break;
                }
            }
        }

        trace!(
            "spi: message {} done, {} bytes, {:?}",
            msg.id,
            msg.actual_length,
            status
        );
        msg.status = Some(status);
        if let Some(complete) = msg.complete.take() {
            complete(msg);
        }
    }

    async fn process_transfer(
        &self,
        config: &Config,
        state: &PeerConfig,
        xfer: &mut Transfer,
        last: bool,
    ) -> Result<usize, Error> {
        let state = if xfer.has_override() {
            resolve(self.regs.bus_clock(), &config.overridden_by(xfer))?
        } else {
            *state
        };

        self.shared.lock(|shared| {
            let mut shared = shared.borrow_mut();
            if shared.stopping {
                self.regs.write(regs::CS, state.control_word());
                return Err(Error::ShuttingDown);
            }
            // drop a completion left over from an aborted transfer
            self.done.reset();
            shared.pump.arm(xfer, state.is_wide());
            self.regs.write(regs::CLK, state.clock_register() as u32);
            self.regs
                .write(regs::CS, state.control_word() | cs::INTR | cs::INTD | cs::TA);
            Ok(())
        })?;

        let completed = with_timeout(self.config.timeout, async {
            loop {
                self.done.wait().await;
                if self.shared.lock(|shared| shared.borrow().pump.is_complete()) {
                    break;
                }
            }
        });

        if completed.await.is_err() {
            error!("transfer timed out");
            self.shared.lock(|shared| {
                shared.borrow_mut().pump.abort(xfer);
                self.regs
                    .write(regs::CS, state.control_word() | cs::CLEAR_RX | cs::CLEAR_TX);
            });
            return Err(Error::Timeout);
        }

        let result = self.shared.lock(|shared| shared.borrow_mut().pump.finish(xfer));

        if xfer.delay_us != 0 {
            block_for(Duration::from_micros(xfer.delay_us as u64));
        }

        if last || xfer.cs_change || result.is_err() {
            // clear TA and interrupt flags
            self.regs.write(regs::CS, state.control_word());
        }

        result
    }
}
