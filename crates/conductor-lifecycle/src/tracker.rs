//! Per-campaign progress of every component
//!
//! A [`Tracker`] lives for one campaign (for example the uninstall of one
//! Platform) and is lost on restart. That is fine: every state machine
//! starts by re-reading the cluster, so a fresh tracker resumes correctly.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;

use crate::component::Operation;

/// Suppresses repeats of the same informational message within a campaign
#[derive(Debug, Default)]
pub struct OnceLog {
    seen: HashSet<String>,
}

impl OnceLog {
    /// Returns true the first time `key` is seen
    pub fn first(&mut self, key: impl Into<String>) -> bool {
        self.seen.insert(key.into())
    }
}

/// Component name to current state, for one campaign
#[derive(Debug)]
pub struct Tracker<S> {
    states: HashMap<String, S>,
    once: OnceLog,
}

impl<S> Default for Tracker<S> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
            once: OnceLog::default(),
        }
    }
}

impl<S: Copy + Default> Tracker<S> {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `component`, creating it at the initial state
    pub fn state(&mut self, component: &str) -> S {
        *self.states.entry(component.to_string()).or_default()
    }

    /// Record a new state for `component`
    pub fn set(&mut self, component: &str, state: S) {
        self.states.insert(component.to_string(), state);
    }

    /// State of `component` if it has been touched in this campaign
    pub fn get(&self, component: &str) -> Option<S> {
        self.states.get(component).copied()
    }

    /// Message de-duplication for this campaign
    pub fn once(&mut self) -> &mut OnceLog {
        &mut self.once
    }
}

/// Identity of one campaign
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CampaignKey {
    /// Platform namespace
    pub namespace: String,
    /// Platform name
    pub name: String,
    /// Platform UID, so a recreated Platform starts a new campaign
    pub uid: String,
    /// Direction
    pub operation: Operation,
}

impl fmt::Display for CampaignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short uid prefix tells a recreated Platform's campaign from the old one
        let uid: String = self.uid.chars().take(8).collect();
        write!(f, "{}/{}@{}:{}", self.namespace, self.name, uid, self.operation)
    }
}

/// Trackers of all running campaigns, keyed by [`CampaignKey`]
///
/// A reconcile checks its tracker out, drives it, and checks it back in.
/// The lock is only held for the map operations, never across an await.
#[derive(Debug)]
pub struct TrackerArena<S> {
    trackers: Mutex<HashMap<CampaignKey, Tracker<S>>>,
}

impl<S> Default for TrackerArena<S> {
    fn default() -> Self {
        Self {
            trackers: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Copy + Default> TrackerArena<S> {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the campaign's tracker, or a fresh one
    pub fn checkout(&self, key: &CampaignKey) -> Tracker<S> {
        self.trackers.lock().remove(key).unwrap_or_default()
    }

    /// Return a tracker after a run
    pub fn checkin(&self, key: CampaignKey, tracker: Tracker<S>) {
        self.trackers.lock().insert(key, tracker);
    }

    /// Forget a finished campaign
    pub fn finish(&self, key: &CampaignKey) {
        self.trackers.lock().remove(key);
    }

    /// Number of campaigns in flight
    pub fn len(&self) -> usize {
        self.trackers.lock().len()
    }

    /// True when no campaign is in flight
    pub fn is_empty(&self) -> bool {
        self.trackers.lock().is_empty()
    }
}
