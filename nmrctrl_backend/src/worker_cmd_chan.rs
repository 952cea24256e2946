use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Commands understood by the controller worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerCmd {
    /// Reset, then run the preparation steps up to and including the start step
    Run,
    /// Execute the next step
    Step,
    /// Reset, then run every step
    RunAll,
    /// Rewind the sequence and release the device
    Reset,
    /// Cancel a pending delay or a running acquisition
    Stop,
    /// Shut the worker down
    Close,
}

impl WorkerCmd {
    /// Whether this command should interrupt whatever the worker is busy with
    pub fn interrupts(&self) -> bool {
        matches!(self, WorkerCmd::Stop | WorkerCmd::Close)
    }
}

/// Single-slot, latest-wins command mailbox.
///
/// Every [`CmdChan::send`] overwrites the slot and bumps a message counter; receivers compare
/// the counter with the last one they saw to detect new commands.
#[derive(Clone)]
pub struct CmdChan {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>, // (msg_num: usize, worker_cmd: WorkerCmd)
    condvar: Arc<Condvar>,
}
impl CmdChan {
    pub fn new() -> Self {
        Self {
            cmd: Arc::new(Mutex::new((0, WorkerCmd::Stop))),
            condvar: Arc::new(Condvar::new()),
        }
    }
    pub fn new_recvr(&self) -> CmdRecvr {
        // If this command channel has already been used, posted `msg_num` is not 0.
        // The new receiver should be initialized with this value
        // since the first message it will need to react on will be `msg_num + 1`
        let (msg_num, _cmd_val) = &*self.cmd.lock();
        let last_posted_msg_num = *msg_num;

        CmdRecvr {
            cmd: self.cmd.clone(),
            condvar: self.condvar.clone(),
            viewed_msg_num: last_posted_msg_num,
            closed: false,
        }
    }
    pub fn send(&self, cmd: WorkerCmd) {
        let mut mutex_guard = self.cmd.lock();
        let (msg_num, cmd_val) = &mut *mutex_guard;
        *cmd_val = cmd;
        *msg_num += 1;
        self.condvar.notify_all();
    }
}

impl Default for CmdChan {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CmdRecvr {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>,
    condvar: Arc<Condvar>,
    viewed_msg_num: usize,
    closed: bool,
}
impl CmdRecvr {
    // Marks the posted command as viewed. Commands overwritten before being viewed are lost.
    fn take(&mut self, msg_num: usize, cmd: WorkerCmd) -> WorkerCmd {
        if msg_num > self.viewed_msg_num + 1 {
            log::warn!(
                "{} worker command(s) superseded before being handled, acting on {:?}",
                msg_num - self.viewed_msg_num - 1,
                cmd
            );
        }
        self.viewed_msg_num = msg_num;
        if cmd == WorkerCmd::Close {
            self.closed = true;
        }
        cmd
    }

    /// Blocks until a new command is posted.
    pub fn recv(&mut self) -> WorkerCmd {
        let mut mutex_guard = self.cmd.lock();
        while mutex_guard.0 == self.viewed_msg_num {
            self.condvar.wait(&mut mutex_guard);
        }
        let (msg_num, cmd_val) = *mutex_guard;
        drop(mutex_guard);
        self.take(msg_num, cmd_val)
    }

    /// Waits for a new command until `deadline`; `None` if nothing was posted in time.
    pub fn recv_deadline(&mut self, deadline: Instant) -> Option<WorkerCmd> {
        let mut mutex_guard = self.cmd.lock();
        while mutex_guard.0 == self.viewed_msg_num {
            if self.condvar.wait_until(&mut mutex_guard, deadline).timed_out() {
                break;
            }
        }
        let (msg_num, cmd_val) = *mutex_guard;
        drop(mutex_guard);
        if msg_num == self.viewed_msg_num {
            return None;
        }
        Some(self.take(msg_num, cmd_val))
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<WorkerCmd> {
        self.recv_deadline(Instant::now() + timeout)
    }

    /// Returns a pending command without waiting.
    pub fn try_recv(&mut self) -> Option<WorkerCmd> {
        let (msg_num, cmd_val) = *self.cmd.lock();
        if msg_num == self.viewed_msg_num {
            return None;
        }
        Some(self.take(msg_num, cmd_val))
    }

    /// Sleeps for `duration` unless an interrupting command arrives first.
    ///
    /// Returns `false` if interrupted. Non-interrupting commands received meanwhile are dropped
    /// with a warning, since the worker is busy.
    pub fn pause(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while let Some(cmd) = self.recv_deadline(deadline) {
            if cmd.interrupts() {
                return false;
            }
            log::warn!("Worker busy, ignoring {:?}", cmd);
        }
        true
    }

    /// Whether a [`WorkerCmd::Close`] has been received
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use crate::worker_cmd_chan::*;

    #[test]
    fn receiver_ignores_commands_posted_before_creation() {
        let chan = CmdChan::new();
        chan.send(WorkerCmd::Run);
        let mut recvr = chan.new_recvr();
        assert_eq!(recvr.try_recv(), None);
        chan.send(WorkerCmd::Step);
        assert_eq!(recvr.try_recv(), Some(WorkerCmd::Step));
        assert_eq!(recvr.try_recv(), None);
    }

    #[test]
    fn latest_command_wins() {
        let chan = CmdChan::new();
        let mut recvr = chan.new_recvr();
        chan.send(WorkerCmd::Step);
        chan.send(WorkerCmd::Close);
        assert_eq!(recvr.recv(), WorkerCmd::Close);
        assert!(recvr.is_closed());
    }

    #[test]
    fn recv_timeout_expires() {
        let chan = CmdChan::new();
        let mut recvr = chan.new_recvr();
        let start = Instant::now();
        assert_eq!(recvr.recv_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pause_is_interrupted_by_stop() {
        let chan = CmdChan::new();
        let mut recvr = chan.new_recvr();
        let sender = chan.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.send(WorkerCmd::Stop);
        });
        let start = Instant::now();
        assert!(!recvr.pause(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn pause_runs_to_completion_without_commands() {
        let chan = CmdChan::new();
        let mut recvr = chan.new_recvr();
        assert!(recvr.pause(Duration::from_millis(10)));
    }
}
