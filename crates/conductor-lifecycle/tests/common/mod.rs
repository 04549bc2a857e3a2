//! In-memory components and recorders for driver tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conductor_common::crd::ComponentCondition;
use conductor_common::{Error, Result};
use conductor_lifecycle::{
    Campaign, ComponentContext, ComponentHooks, ComponentSet, HealthTarget, NoExternalOwnership,
    Operation, StatusRecorder,
};

/// A component living entirely in memory
///
/// Every hook call is appended to `calls`. After `uninstall` the component
/// keeps reporting installed for `lingering_polls` more `is_installed` calls.
#[derive(Default)]
pub struct FakeComponent {
    calls: Mutex<Vec<&'static str>>,
    installed: AtomicBool,
    ready: AtomicBool,
    uninstalled: AtomicBool,
    lingering_polls: AtomicUsize,
    failing_hook: Mutex<Option<&'static str>>,
}

impl FakeComponent {
    pub fn installed() -> Arc<Self> {
        let c = Self::default();
        c.installed.store(true, Ordering::SeqCst);
        c.ready.store(true, Ordering::SeqCst);
        Arc::new(c)
    }

    pub fn absent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lingering(self: Arc<Self>, polls: usize) -> Arc<Self> {
        self.lingering_polls.store(polls, Ordering::SeqCst);
        self
    }

    pub fn failing_at(self: Arc<Self>, hook: &'static str) -> Arc<Self> {
        *self.failing_hook.lock().unwrap() = Some(hook);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, hook: &str) -> usize {
        self.calls().iter().filter(|c| **c == hook).count()
    }

    fn call(&self, hook: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(hook);
        if *self.failing_hook.lock().unwrap() == Some(hook) {
            return Err(Error::component("fake", hook, "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ComponentHooks for FakeComponent {
    async fn pre_install(&self, _ctx: &ComponentContext) -> Result<()> {
        self.call("pre_install")
    }

    async fn install(&self, _ctx: &ComponentContext) -> Result<()> {
        self.call("install")?;
        self.installed.store(true, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn post_install(&self, _ctx: &ComponentContext) -> Result<()> {
        self.call("post_install")
    }

    async fn pre_uninstall(&self, _ctx: &ComponentContext) -> Result<()> {
        self.call("pre_uninstall")
    }

    async fn uninstall(&self, _ctx: &ComponentContext) -> Result<()> {
        self.call("uninstall")?;
        self.uninstalled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn post_uninstall(&self, _ctx: &ComponentContext) -> Result<()> {
        self.call("post_uninstall")
    }

    async fn is_installed(&self, _ctx: &ComponentContext) -> Result<bool> {
        self.call("is_installed")?;
        if !self.uninstalled.load(Ordering::SeqCst) {
            return Ok(self.installed.load(Ordering::SeqCst));
        }
        let left = self.lingering_polls.load(Ordering::SeqCst);
        if left > 0 {
            self.lingering_polls.store(left - 1, Ordering::SeqCst);
            return Ok(true);
        }
        self.installed.store(false, Ordering::SeqCst);
        Ok(false)
    }

    async fn is_ready(&self, _ctx: &ComponentContext) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.uninstalled.load(Ordering::SeqCst)
    }
}

/// Status recorder that keeps every update
#[derive(Default)]
pub struct RecordingStatus {
    updates: Mutex<Vec<(String, String, ComponentCondition)>>,
}

impl RecordingStatus {
    pub fn updates_for(&self, component: &str) -> Vec<ComponentCondition> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| c == component)
            .map(|(_, _, cond)| *cond)
            .collect()
    }
}

#[async_trait]
impl StatusRecorder for RecordingStatus {
    async fn update_status(
        &self,
        component: &str,
        message: &str,
        condition: ComponentCondition,
    ) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((component.to_string(), message.to_string(), condition));
        Ok(())
    }
}

/// Health target that replays a script of observations
pub struct ScriptedTarget {
    script: Mutex<VecDeque<bool>>,
    pub actions: AtomicUsize,
}

impl ScriptedTarget {
    pub fn new(script: impl IntoIterator<Item = bool>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            actions: AtomicUsize::new(0),
        })
    }

    pub fn actions(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthTarget for ScriptedTarget {
    async fn is_healthy(&self) -> Result<bool> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::internal("health script exhausted"))
    }

    async fn corrective_action(&self) -> Result<()> {
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn context(operation: Operation) -> ComponentContext {
    ComponentContext::new("conductor-system/prod", operation)
}

pub fn campaign<'a>(
    context: &'a ComponentContext,
    components: &'a ComponentSet,
    status: &'a RecordingStatus,
) -> Campaign<'a> {
    Campaign {
        context,
        components,
        status,
        ownership: &NoExternalOwnership,
    }
}
