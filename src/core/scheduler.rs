//! Scheduled jobs
//!
//! Deadline and periodic jobs that post protocol events through the
//! dispatcher when they fire. Jobs are keyed by id; registering an id again
//! replaces the old job, and cancelling an unknown or already-fired id is a
//! no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::dispatcher::{EventDispatcher, Origin};
use super::state_machine::ProtocolEvent;

/// When a job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Once, after the delay
    After(Duration),
    /// Repeatedly, every period
    Every(Duration),
}

/// Public view of a registered job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    /// Job id
    pub id: String,
    /// Firing rule
    pub trigger: Trigger,
    /// Event posted on firing
    pub event: ProtocolEvent,
}

struct JobEntry {
    generation: u64,
    trigger: Trigger,
    event: ProtocolEvent,
    task: JoinHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<String, JobEntry>>>;

/// Timer jobs posting into the dispatcher
#[derive(Clone)]
pub struct Scheduler {
    jobs: JobTable,
    dispatcher: EventDispatcher,
    runtime: Handle,
    generation: Arc<AtomicU64>,
}

impl Scheduler {
    /// Create a scheduler that spawns its timers on `runtime`
    pub fn new(dispatcher: EventDispatcher, runtime: Handle) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            dispatcher,
            runtime,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a job, replacing any job with the same id.
    ///
    /// Returns the registration's generation, which every firing carries in
    /// [`Origin::Timer`].
    pub fn register(&self, id: &str, trigger: Trigger, event: ProtocolEvent) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        // Hold the table while spawning so even a zero delay finds its entry
        let mut jobs = self.jobs.lock();
        let task = self.runtime.spawn(run_job(
            id.to_string(),
            generation,
            trigger,
            event,
            self.jobs.clone(),
            self.dispatcher.clone(),
        ));
        let previous = jobs.insert(id.to_string(), JobEntry { generation, trigger, event, task });
        drop(jobs);
        if let Some(old) = previous {
            old.task.abort();
        }
        debug!(job = id, generation, ?trigger, ?event, "job scheduled");
        generation
    }

    /// Cancel a job. Returns whether a live job was removed.
    pub fn cancel(&self, id: &str) -> bool {
        match self.jobs.lock().remove(id) {
            Some(entry) => {
                entry.task.abort();
                debug!(job = id, "job cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every job
    pub fn cancel_all(&self) {
        for (_, entry) in self.jobs.lock().drain() {
            entry.task.abort();
        }
    }

    /// True while a job with this id is pending
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.jobs.lock().contains_key(id)
    }

    /// Pending jobs
    pub fn scheduled(&self) -> Vec<ScheduledJob> {
        self.jobs
            .lock()
            .iter()
            .map(|(id, entry)| ScheduledJob { id: id.clone(), trigger: entry.trigger, event: entry.event })
            .collect()
    }
}

async fn run_job(
    id: String,
    generation: u64,
    trigger: Trigger,
    event: ProtocolEvent,
    jobs: JobTable,
    dispatcher: EventDispatcher,
) {
    let (period, repeat) = match trigger {
        Trigger::After(delay) => (delay, false),
        Trigger::Every(period) => (period, true),
    };

    loop {
        tokio::time::sleep(period).await;

        // Fire under the table lock so a concurrent cancel either wins
        // outright or sees the job already gone
        let mut table = jobs.lock();
        if table.get(&id).map(|entry| entry.generation) != Some(generation) {
            return;
        }
        if !repeat {
            table.remove(&id);
        }
        debug!(job = %id, ?event, "job fired");
        if dispatcher.post(event, Origin::Timer { id: id.clone(), generation }).is_err() {
            warn!(job = %id, "dispatcher closed, dropping job");
            table.remove(&id);
            return;
        }
        drop(table);

        if !repeat {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::event_channel;

    #[tokio::test]
    async fn test_deadline_job_fires_once() {
        let (dispatcher, mut queue) = event_channel();
        let scheduler = Scheduler::new(dispatcher, Handle::current());
        let generation =
            scheduler.register("leveling", Trigger::After(Duration::from_millis(10)), ProtocolEvent::LevelingTimeout);
        assert!(scheduler.is_scheduled("leveling"));

        let envelope = queue.recv().await.unwrap();
        assert_eq!(envelope.event, ProtocolEvent::LevelingTimeout);
        assert_eq!(envelope.origin, Origin::Timer { id: "leveling".into(), generation });
        assert!(!scheduler.is_scheduled("leveling"));
        // Already fired
        assert!(!scheduler.cancel("leveling"));
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let (dispatcher, mut queue) = event_channel();
        let scheduler = Scheduler::new(dispatcher, Handle::current());
        scheduler.register("leveling", Trigger::After(Duration::from_millis(20)), ProtocolEvent::LevelingTimeout);
        assert!(scheduler.cancel("leveling"));
        assert!(!scheduler.cancel("unknown"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        drop(scheduler);
        queue.close();
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_register_replaces() {
        let (dispatcher, mut queue) = event_channel();
        let scheduler = Scheduler::new(dispatcher, Handle::current());
        let first = scheduler.register("job", Trigger::After(Duration::from_millis(10)), ProtocolEvent::LevelingTimeout);
        let second = scheduler.register("job", Trigger::After(Duration::from_millis(10)), ProtocolEvent::StopLeveling);
        assert_ne!(first, second);
        assert_eq!(scheduler.scheduled().len(), 1);

        let envelope = queue.recv().await.unwrap();
        assert_eq!(envelope.event, ProtocolEvent::StopLeveling);
        assert_eq!(envelope.origin, Origin::Timer { id: "job".into(), generation: second });
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.close();
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_periodic_job() {
        let (dispatcher, mut queue) = event_channel();
        let scheduler = Scheduler::new(dispatcher, Handle::current());
        scheduler.register("poll", Trigger::Every(Duration::from_millis(5)), ProtocolEvent::Discover);
        for _ in 0..3 {
            assert_eq!(queue.recv().await.unwrap().event, ProtocolEvent::Discover);
        }
        assert!(scheduler.is_scheduled("poll"));
        scheduler.cancel_all();
        assert!(scheduler.scheduled().is_empty());
    }
}
