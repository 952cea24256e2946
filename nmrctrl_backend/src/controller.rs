//! Handle to an [`Experiment`] running on its own worker thread.
//!
//! Requests are posted to a latest-wins [`CmdChan`] and never block the caller. Progress comes
//! back as [`Event`]s; every handled request ends with [`Event::Idle`].

use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver};

use crate::config::ExperimentConfig;
use crate::error::{Error, Result};
use crate::experiment::{Event, Experiment};
use crate::toolchain::Toolchain;
use crate::transport::Connector;
use crate::worker_cmd_chan::{CmdChan, WorkerCmd};

pub struct Controller {
    chan: CmdChan,
    events: Receiver<Event>,
    worker: Option<JoinHandle<()>>,
}

/// Cloneable handle that can only cancel, e.g. from a signal handler
#[derive(Clone)]
pub struct StopHandle(CmdChan);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send(WorkerCmd::Stop);
    }
}

impl Controller {
    /// Moves a fresh experiment onto a new worker thread.
    pub fn spawn(
        config: ExperimentConfig,
        toolchain: Box<dyn Toolchain>,
        connector: Box<dyn Connector>,
    ) -> Result<Self> {
        let chan = CmdChan::new();
        let (tx, rx) = unbounded();
        let exp = Experiment::new(config, toolchain, connector, chan.new_recvr(), tx);
        let worker = thread::Builder::new()
            .name("nmrctrl-worker".to_string())
            .spawn(move || worker_loop(exp))
            .map_err(|e| Error::Worker(format!("cannot start worker thread: {}", e)))?;
        Ok(Self {
            chan,
            events: rx,
            worker: Some(worker),
        })
    }

    /// Reset, then run up to and including `step_start_experiment`.
    pub fn request_run(&self) {
        self.chan.send(WorkerCmd::Run);
    }

    pub fn request_step(&self) {
        self.chan.send(WorkerCmd::Step);
    }

    pub fn request_run_all(&self) {
        self.chan.send(WorkerCmd::RunAll);
    }

    pub fn request_reset(&self) {
        self.chan.send(WorkerCmd::Reset);
    }

    /// Cancels a pending delay or a running acquisition.
    pub fn request_stop(&self) {
        self.chan.send(WorkerCmd::Stop);
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.chan.clone())
    }

    /// Stops the worker and waits for it to exit. The device session is closed on the way out.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.chan.send(WorkerCmd::Close);
        worker
            .join()
            .map_err(|_| Error::Worker("worker thread panicked".to_string()))
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{}", err);
        }
    }
}

fn worker_loop(mut exp: Experiment) {
    log::debug!("Worker started");
    while !exp.is_closed() {
        let result = match exp.next_command() {
            WorkerCmd::Run => exp.run_preparation().map(drop),
            WorkerCmd::RunAll => exp.run_all().map(drop),
            WorkerCmd::Step => {
                exp.advance();
                Ok(())
            }
            WorkerCmd::Reset => {
                exp.reset();
                exp.emit(Event::Status("Sequence reset".to_string()));
                Ok(())
            }
            WorkerCmd::Stop => {
                log::info!("Nothing running, stop ignored");
                Ok(())
            }
            WorkerCmd::Close => break,
        };
        if let Err(err) = result {
            log::error!("{}", err);
            exp.emit(Event::Status(err.to_string()));
        }
        exp.emit(Event::Idle);
    }
    exp.reset();
    log::debug!("Worker stopped");
}
