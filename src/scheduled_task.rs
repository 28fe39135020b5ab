use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, trace};
use rocket::tokio::{
    self,
    sync::Notify,
    task::JoinHandle,
    time::{self, Duration},
};

/// A task scheduled for a specific point in the future.
/// It will automatically execute at that point unless aborted first.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule the given task to execute at time `run_at`.
    /// If `run_at` is in the past, the task will execute immediately.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let sleep_duration = datetime_to_duration(run_at);
        let handle = tokio::spawn(async move {
            time::sleep(sleep_duration).await;
            task.await
        });
        Self { handle }
    }

    /// Cancel the task if it has not run yet. Safe to call from synchronous code.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Convert a `DateTime` into a duration from the current instant.
/// A `DateTime` in the past will produce a duration of zero.
fn datetime_to_duration(datetime: DateTime<Utc>) -> Duration {
    let target_timestamp = datetime.timestamp_millis();
    let now_timestamp = Utc::now().timestamp_millis();
    let time_diff = u64::try_from(target_timestamp - now_timestamp).unwrap_or(0);
    Duration::from_millis(time_diff)
}

/// Shared flag telling a periodic body whether its owner still wants results.
/// A body checks this after every await and drops its result once it is cleared.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A body run once immediately and then every `period`, until cancelled.
/// [`trigger_now`](Self::trigger_now) cuts the current wait short.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
    trigger: Arc<Notify>,
    liveness: Liveness,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut(Liveness) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let liveness = Liveness::new();

        let task_trigger = trigger.clone();
        let task_liveness = liveness.clone();
        let handle = tokio::spawn(async move {
            while task_liveness.is_alive() {
                trace!("Running periodic task {name}");
                tick(task_liveness.clone()).await;
                // Either a trigger or the period elapsing starts the next tick.
                let _ = time::timeout(period, task_trigger.notified()).await;
            }
        });

        Self {
            name,
            handle,
            trigger,
            liveness,
        }
    }

    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Stop the task. A tick that is already running is aborted at its next
    /// await, and anything it produces after this point is discarded.
    pub fn cancel(&self) {
        debug!("Cancelling periodic task {}", self.name);
        self.liveness.kill();
        self.handle.abort();
    }

}

/// Named periodic tasks, at most one per name.
#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<&'static str, PeriodicTask>>,
}

impl Scheduler {
    fn tasks(&self) -> MutexGuard<'_, HashMap<&'static str, PeriodicTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start `tick` under `name`, cancelling any task already using that name.
    pub fn schedule<F, Fut>(&self, name: &'static str, period: Duration, tick: F)
    where
        F: FnMut(Liveness) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = PeriodicTask::spawn(name, period, tick);
        if let Some(previous) = self.tasks().insert(name, task) {
            previous.cancel();
        }
    }

    /// Run the named task now. Returns false if no such task is scheduled.
    pub fn trigger(&self, name: &str) -> bool {
        match self.tasks().get(name) {
            Some(task) => {
                task.trigger_now();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, task) in self.tasks().drain() {
            task.cancel();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
