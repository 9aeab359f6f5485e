// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Background worker thread with cooperative start, stop, suspend and resume.
//!
//! The worker repeatedly runs a job closure. The job returns whether it has
//! more work; when it has none the worker sleeps until it is signalled (or,
//! for interval schedules, until the next tick). State changes requested by
//! other threads are acknowledged by the worker between job runs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Re-check interval while waiting for the worker to acknowledge a change.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Give up waiting for an acknowledgement after this long.
const ACK_GIVE_UP: Duration = Duration::from_secs(1);

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Suspended,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Running => "running",
            WorkerState::Suspended => "suspended",
        }
    }
}

/// When the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run while the job reports more work, then sleep until signalled.
    OnSignal,
    /// Run once per interval; more work or a signal triggers an early run.
    Every(Duration),
}

type Job = Box<dyn FnMut() -> bool + Send>;
type FaultHook = Box<dyn Fn() + Send + Sync>;

struct Control {
    state: WorkerState,
    requested: WorkerState,
    signaled: bool,
    more_work: bool,
    faulted: bool,
    next_run: Instant,
    thread: Option<ThreadId>,
}

struct Shared {
    name: String,
    schedule: Schedule,
    control: Mutex<Control>,
    changed: Condvar,
    job: Mutex<Job>,
    on_fault: Mutex<Option<FaultHook>>,
}

/// A restartable background thread driving one job.
pub struct Worker {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a stopped worker.
    pub fn new<F>(name: impl Into<String>, schedule: Schedule, job: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                schedule,
                control: Mutex::new(Control {
                    state: WorkerState::Stopped,
                    requested: WorkerState::Stopped,
                    signaled: false,
                    more_work: false,
                    faulted: false,
                    next_run: Instant::now(),
                    thread: None,
                }),
                changed: Condvar::new(),
                job: Mutex::new(Box::new(job)),
                on_fault: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Register a hook run on the worker thread if the job panics.
    pub fn set_fault_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.on_fault.lock() = Some(Box::new(hook));
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Last state acknowledged by the worker thread.
    pub fn state(&self) -> WorkerState {
        self.shared.control.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Suspended, or asked to suspend.
    pub fn is_suspended(&self) -> bool {
        let ctl = self.shared.control.lock();
        ctl.state == WorkerState::Suspended || ctl.requested == WorkerState::Suspended
    }

    /// Stopped, or asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.shared.control.lock().requested == WorkerState::Stopped
    }

    /// Whether the caller is running on this worker's thread.
    pub fn is_current_thread(&self) -> bool {
        Self::on_worker_thread(&self.shared.control.lock())
    }

    fn on_worker_thread(ctl: &Control) -> bool {
        ctl.thread == Some(thread::current().id())
    }

    /// Spawn the worker thread.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        {
            let ctl = self.shared.control.lock();
            if ctl.state != WorkerState::Stopped || ctl.requested != WorkerState::Stopped {
                return Err(Error::WorkerAlreadyStarted(self.shared.name.clone()));
            }
        }

        // Reap a thread that stopped itself.
        if let Some(previous) = handle.take() {
            if previous.thread().id() != thread::current().id() {
                let _ = previous.join();
            }
        }

        {
            let mut ctl = self.shared.control.lock();
            ctl.state = WorkerState::Running;
            ctl.requested = WorkerState::Running;
            ctl.signaled = false;
            ctl.more_work = true;
            ctl.faulted = false;
            ctl.next_run = Instant::now();
        }

        let shared = self.shared.clone();
        match thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || run(shared))
        {
            Ok(spawned) => {
                *handle = Some(spawned);
                Ok(())
            }
            Err(e) => {
                let mut ctl = self.shared.control.lock();
                ctl.state = WorkerState::Stopped;
                ctl.requested = WorkerState::Stopped;
                Err(Error::Io(e))
            }
        }
    }

    /// Stop the worker and wait for its thread to exit.
    ///
    /// Called from the worker's own thread this only requests the stop.
    pub fn stop(&self) -> Result<()> {
        {
            let mut ctl = self.shared.control.lock();
            if ctl.requested == WorkerState::Stopped && ctl.state == WorkerState::Stopped {
                if !ctl.faulted {
                    return Err(Error::WorkerAlreadyStopped(self.shared.name.clone()));
                }
                ctl.faulted = false;
            }
            ctl.requested = WorkerState::Stopped;
            self.shared.changed.notify_all();

            if Self::on_worker_thread(&ctl) {
                return Ok(());
            }
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Worker '{}' thread ended abnormally", self.shared.name);
            }
        }
        Ok(())
    }

    /// Pause the worker after its current job run.
    pub fn suspend(&self) -> Result<()> {
        let mut ctl = self.shared.control.lock();
        if ctl.requested != WorkerState::Running {
            return Err(Error::WorkerNotRunning(self.shared.name.clone()));
        }
        ctl.requested = WorkerState::Suspended;
        if Self::on_worker_thread(&ctl) {
            ctl.state = WorkerState::Suspended;
            return Ok(());
        }
        self.shared.changed.notify_all();
        self.await_state(ctl, WorkerState::Suspended)
    }

    /// Continue a suspended worker and let it look for work.
    pub fn resume(&self) -> Result<()> {
        let mut ctl = self.shared.control.lock();
        if ctl.requested != WorkerState::Suspended {
            return Err(Error::WorkerNotSuspended(self.shared.name.clone()));
        }
        ctl.requested = WorkerState::Running;
        ctl.signaled = true;
        if Self::on_worker_thread(&ctl) {
            ctl.state = WorkerState::Running;
            return Ok(());
        }
        self.shared.changed.notify_all();
        self.await_state(ctl, WorkerState::Running)
    }

    /// Wake the worker because new work is available.
    pub fn signal(&self) {
        let mut ctl = self.shared.control.lock();
        ctl.signaled = true;
        if ctl.requested == WorkerState::Running {
            self.shared.changed.notify_all();
        }
    }

    fn await_state(&self, mut ctl: MutexGuard<'_, Control>, target: WorkerState) -> Result<()> {
        let deadline = Instant::now() + ACK_GIVE_UP;
        while ctl.state != target {
            if ctl.state == WorkerState::Stopped {
                return Err(Error::WorkerNotRunning(self.shared.name.clone()));
            }
            if Instant::now() >= deadline {
                warn!(
                    "Worker '{}' did not acknowledge {} in time",
                    self.shared.name,
                    target.as_str()
                );
                break;
            }
            self.shared.changed.wait_for(&mut ctl, ACK_POLL_INTERVAL);
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let on_worker_thread = {
            let mut ctl = self.shared.control.lock();
            ctl.requested = WorkerState::Stopped;
            self.shared.changed.notify_all();
            Self::on_worker_thread(&ctl)
        };
        if !on_worker_thread {
            if let Some(handle) = self.handle.get_mut().take() {
                let _ = handle.join();
            }
        }
    }
}

fn run(shared: Arc<Shared>) {
    shared.control.lock().thread = Some(thread::current().id());
    debug!("Worker '{}' started", shared.name);

    while wait_for_work(&shared) {
        let outcome = {
            let mut job = shared.job.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (*job)()))
        };

        match outcome {
            Ok(more) => {
                let mut ctl = shared.control.lock();
                ctl.more_work = more;
                if let Schedule::Every(interval) = shared.schedule {
                    ctl.next_run = Instant::now() + interval;
                }
            }
            Err(_) => {
                error!("Worker '{}' job panicked, stopping worker", shared.name);
                {
                    let mut ctl = shared.control.lock();
                    ctl.faulted = true;
                    ctl.requested = WorkerState::Stopped;
                }
                if let Some(hook) = shared.on_fault.lock().as_ref() {
                    hook();
                }
            }
        }
    }

    debug!("Worker '{}' stopped", shared.name);
}

/// Block until the job should run. Returns false once the worker stops.
fn wait_for_work(shared: &Shared) -> bool {
    let mut ctl = shared.control.lock();
    loop {
        if ctl.requested != ctl.state {
            ctl.state = ctl.requested;
            shared.changed.notify_all();
        }

        match ctl.state {
            WorkerState::Stopped => {
                ctl.thread = None;
                shared.changed.notify_all();
                return false;
            }
            WorkerState::Suspended => shared.changed.wait(&mut ctl),
            WorkerState::Running => {
                let due = match shared.schedule {
                    Schedule::OnSignal => None,
                    Schedule::Every(_) => Some(ctl.next_run),
                };
                if ctl.signaled || ctl.more_work || due.is_some_and(|t| Instant::now() >= t) {
                    ctl.signaled = false;
                    return true;
                }
                match due {
                    Some(deadline) => {
                        shared.changed.wait_until(&mut ctl, deadline);
                    }
                    None => shared.changed.wait(&mut ctl),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_worker(schedule: Schedule) -> (Worker, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let worker = Worker::new("test-worker", schedule, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        });
        (worker, runs)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_start_twice_fails() {
        let (worker, _) = counting_worker(Schedule::OnSignal);
        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(Error::WorkerAlreadyStarted(_))));
        worker.stop().unwrap();
        assert!(matches!(worker.stop(), Err(Error::WorkerAlreadyStopped(_))));
    }

    #[test]
    fn test_signal_runs_job() {
        let (worker, runs) = counting_worker(Schedule::OnSignal);
        worker.start().unwrap();
        assert!(wait_until(|| runs.load(Ordering::SeqCst) == 1));

        worker.signal();
        assert!(wait_until(|| runs.load(Ordering::SeqCst) == 2));
        worker.stop().unwrap();
    }

    #[test]
    fn test_suspend_and_resume() {
        let (worker, runs) = counting_worker(Schedule::OnSignal);
        assert!(matches!(worker.suspend(), Err(Error::WorkerNotRunning(_))));

        worker.start().unwrap();
        assert!(wait_until(|| runs.load(Ordering::SeqCst) == 1));
        worker.suspend().unwrap();
        assert_eq!(worker.state(), WorkerState::Suspended);
        assert!(worker.is_suspended());

        worker.signal();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        worker.resume().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(wait_until(|| runs.load(Ordering::SeqCst) == 2));
        assert!(matches!(worker.resume(), Err(Error::WorkerNotSuspended(_))));
        worker.stop().unwrap();
    }

    #[test]
    fn test_stop_from_own_thread() {
        let slot: Arc<Mutex<Option<Arc<Worker>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let worker = Arc::new(Worker::new("self-stop", Schedule::OnSignal, move || {
            if let Some(worker) = inner.lock().as_ref() {
                worker.stop().unwrap();
            }
            false
        }));
        *slot.lock() = Some(worker.clone());

        worker.start().unwrap();
        assert!(wait_until(|| worker.state() == WorkerState::Stopped));
        worker.start().unwrap();
        assert!(wait_until(|| worker.state() == WorkerState::Stopped));
        slot.lock().take();
    }

    #[test]
    fn test_interval_schedule() {
        let (worker, runs) = counting_worker(Schedule::Every(Duration::from_millis(10)));
        worker.start().unwrap();
        assert!(wait_until(|| runs.load(Ordering::SeqCst) >= 3));
        worker.stop().unwrap();
    }

    #[test]
    fn test_panic_marks_fault() {
        let faults = Arc::new(AtomicUsize::new(0));
        let hook_faults = faults.clone();
        let worker = Worker::new("panicking", Schedule::OnSignal, || panic!("boom"));
        worker.set_fault_hook(move || {
            hook_faults.fetch_add(1, Ordering::SeqCst);
        });

        worker.start().unwrap();
        assert!(wait_until(|| worker.state() == WorkerState::Stopped));
        assert_eq!(faults.load(Ordering::SeqCst), 1);
        // A faulted worker may be stopped without error.
        worker.stop().unwrap();
    }
}
