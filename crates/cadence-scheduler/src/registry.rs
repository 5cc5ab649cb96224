use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use cadence_core::{JobKey, TriggerKey};
use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::schedule::{first_fire_time, next_fire_time};
use crate::types::{JobDescriptor, TriggerSpec};

/// One fire taken off the queue, ready for the engine to dispatch or skip.
#[derive(Debug, Clone)]
pub(crate) struct Firing {
    pub descriptor: Arc<JobDescriptor>,
    pub trigger: Arc<TriggerSpec>,
    pub scheduled: DateTime<Utc>,
    pub fire_count: u32,
}

struct TriggerState {
    spec: Arc<TriggerSpec>,
    /// `None` once the trigger is exhausted; the entry stays registered.
    next_fire: Option<DateTime<Utc>>,
    fired: u32,
}

struct ScheduledEntry {
    descriptor: Arc<JobDescriptor>,
    triggers: Vec<TriggerState>,
    /// Bumped whenever the trigger set changes; older queue slots go stale.
    generation: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct FireSlot {
    at: DateTime<Utc>,
    seq: u64,
    job: JobKey,
    trigger: usize,
    generation: u64,
}

// Reversed so `BinaryHeap` pops the earliest slot first; `seq` keeps
// insertion order among equal times.
impl Ord for FireSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for FireSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Registered jobs plus a time-ordered queue of their next fires.
///
/// Queue slots are invalidated lazily: a slot is live only while its entry
/// still carries the same generation and the trigger still expects that time.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<JobKey, ScheduledEntry>,
    trigger_index: HashMap<TriggerKey, JobKey>,
    queue: BinaryHeap<FireSlot>,
    next_generation: u64,
    next_seq: u64,
}

impl Registry {
    /// Insert or replace the entry for `descriptor.key`. Returns `true` when a
    /// previous registration was replaced.
    pub fn insert(
        &mut self,
        descriptor: JobDescriptor,
        triggers: Vec<TriggerSpec>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if triggers.is_empty() {
            return Err(SchedulerError::InvalidTrigger(format!(
                "job '{}' must be registered with at least one trigger",
                descriptor.key
            )));
        }
        {
            let mut seen = HashSet::new();
            for spec in &triggers {
                if !seen.insert(&spec.key) {
                    return Err(SchedulerError::InvalidTrigger(format!(
                        "trigger '{}' appears twice",
                        spec.key
                    )));
                }
                self.check_trigger_owner(&spec.key, &descriptor.key)?;
            }
        }

        // Resolve every trigger before touching the registry.
        let triggers: Vec<TriggerState> = triggers
            .into_iter()
            .map(|spec| TriggerState::start(spec, now))
            .collect();

        let key = descriptor.key.clone();
        let replaced = self.remove_job(&key);
        for trigger in &triggers {
            self.trigger_index.insert(trigger.spec.key.clone(), key.clone());
        }
        self.entries.insert(
            key.clone(),
            ScheduledEntry {
                descriptor: Arc::new(descriptor),
                triggers,
                generation: 0,
            },
        );
        self.enqueue(&key);
        Ok(replaced)
    }

    /// Remove a job and all its triggers.
    pub fn remove_job(&mut self, key: &JobKey) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for trigger in &entry.triggers {
            self.trigger_index.remove(&trigger.spec.key);
        }
        true
    }

    /// Remove one trigger. A job left without triggers is removed too.
    /// Returns the owning job when the trigger existed.
    pub fn remove_trigger(&mut self, trigger_key: &TriggerKey) -> Option<JobKey> {
        let job = self.trigger_index.remove(trigger_key)?;
        let now_empty = match self.entries.get_mut(&job) {
            Some(entry) => {
                entry.triggers.retain(|t| &t.spec.key != trigger_key);
                entry.triggers.is_empty()
            }
            None => return Some(job),
        };
        if now_empty {
            self.entries.remove(&job);
        } else {
            self.enqueue(&job);
        }
        Some(job)
    }

    /// Swap the trigger registered as `trigger_key` for `spec`, which may carry
    /// a different key. Returns the owning job when the old trigger existed.
    pub fn replace_trigger(
        &mut self,
        trigger_key: &TriggerKey,
        spec: TriggerSpec,
        now: DateTime<Utc>,
    ) -> Result<Option<JobKey>> {
        let Some(job) = self.trigger_index.get(trigger_key).cloned() else {
            return Ok(None);
        };
        if &spec.key != trigger_key && self.trigger_index.contains_key(&spec.key) {
            return Err(SchedulerError::InvalidTrigger(format!(
                "trigger '{}' is already registered",
                spec.key
            )));
        }
        let Some(entry) = self.entries.get_mut(&job) else {
            return Ok(None);
        };
        let Some(slot) = entry.triggers.iter_mut().find(|t| &t.spec.key == trigger_key) else {
            return Ok(None);
        };
        self.trigger_index.remove(trigger_key);
        self.trigger_index.insert(spec.key.clone(), job.clone());
        *slot = TriggerState::start(spec, now);
        self.enqueue(&job);
        Ok(Some(job))
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn job_keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn trigger_keys(&self, key: &JobKey) -> Vec<TriggerKey> {
        self.entries
            .get(key)
            .map(|e| e.triggers.iter().map(|t| t.spec.key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn descriptor(&self, key: &JobKey) -> Option<Arc<JobDescriptor>> {
        self.entries.get(key).map(|e| e.descriptor.clone())
    }

    /// Earliest pending fire across all of a job's triggers.
    pub fn next_fire_time(&self, key: &JobKey) -> Option<DateTime<Utc>> {
        self.entries
            .get(key)?
            .triggers
            .iter()
            .filter_map(|t| t.next_fire)
            .min()
    }

    /// Earliest live slot in the queue, discarding stale ones on the way.
    pub fn next_due(&mut self) -> Option<DateTime<Utc>> {
        while let Some(slot) = self.queue.peek() {
            if self.is_live(slot) {
                return Some(slot.at);
            }
            self.queue.pop();
        }
        None
    }

    /// Pop every slot due at `now`, advance its trigger and return the firings.
    ///
    /// A trigger that fell behind (standby, a stalled loop) fires once and is
    /// then re-anchored on `now` instead of replaying every missed slot.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut due = Vec::new();
        loop {
            match self.queue.peek() {
                Some(slot) if slot.at <= now => {}
                _ => break,
            }
            let Some(slot) = self.queue.pop() else {
                break;
            };
            if !self.is_live(&slot) {
                continue;
            }
            let Some(entry) = self.entries.get_mut(&slot.job) else {
                continue;
            };
            let Some(trigger) = entry.triggers.get_mut(slot.trigger) else {
                continue;
            };

            trigger.fired = trigger.fired.saturating_add(1);
            let policy = &trigger.spec.policy;
            let mut next = next_fire_time(policy, slot.at, trigger.fired);
            if next.is_some_and(|t| t <= now) {
                next = next_fire_time(policy, now, trigger.fired);
            }
            let next = next.filter(|t| trigger.spec.end_at.map_or(true, |end| *t <= end));
            trigger.next_fire = next;

            due.push(Firing {
                descriptor: entry.descriptor.clone(),
                trigger: trigger.spec.clone(),
                scheduled: slot.at,
                fire_count: trigger.fired,
            });

            if let Some(at) = next {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.queue.push(FireSlot {
                    at,
                    seq,
                    job: slot.job,
                    trigger: slot.trigger,
                    generation: slot.generation,
                });
            }
        }
        due
    }

    fn check_trigger_owner(&self, trigger: &TriggerKey, job: &JobKey) -> Result<()> {
        match self.trigger_index.get(trigger) {
            Some(owner) if owner != job => Err(SchedulerError::InvalidTrigger(format!(
                "trigger '{trigger}' already belongs to job '{owner}'"
            ))),
            _ => Ok(()),
        }
    }

    /// Start a new generation for `key` and queue each trigger's next fire.
    fn enqueue(&mut self, key: &JobKey) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.generation = generation;
        for (index, trigger) in entry.triggers.iter().enumerate() {
            if let Some(at) = trigger.next_fire {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.queue.push(FireSlot {
                    at,
                    seq,
                    job: key.clone(),
                    trigger: index,
                    generation,
                });
            }
        }
    }

    fn is_live(&self, slot: &FireSlot) -> bool {
        self.entries
            .get(&slot.job)
            .filter(|e| e.generation == slot.generation)
            .and_then(|e| e.triggers.get(slot.trigger))
            .is_some_and(|t| t.next_fire == Some(slot.at))
    }
}

impl TriggerState {
    fn start(spec: TriggerSpec, now: DateTime<Utc>) -> Self {
        let start = spec.start.resolve(now);
        let next_fire = first_fire_time(&spec.policy, start)
            .filter(|t| spec.end_at.map_or(true, |end| *t <= end));
        Self {
            spec: Arc::new(spec),
            next_fire,
            fired: 0,
        }
    }
}
