//! Recording behaviors and the shared log they write to.

use std::fmt;
use std::sync::{Arc, Mutex};

use modkit_core::{GadgetBehavior, GadgetConfig, GadgetError, GadgetId, GadgetResult, Registrar};

/// A lifecycle hook a [`RecordingBehavior`] can be told to fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    LoadConfig,
    PrePatch,
    Register,
    Initialize,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadConfig => "load_config",
            Self::PrePatch => "pre_patch",
            Self::Register => "register",
            Self::Initialize => "initialize",
        };
        f.write_str(name)
    }
}

/// Shared, clonable log of `"<bundle:gadget> <hook>"` lines.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, gadget: &GadgetId, event: &str) {
        self.events.lock().unwrap().push(format!("{gadget} {event}"));
    }

    /// Every line recorded so far.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Lines recorded for `hook`, with the hook name stripped.
    pub fn gadgets_for(&self, hook: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|line| {
                let (gadget, event) = line.split_once(' ')?;
                (event == hook).then(|| gadget.to_string())
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Behavior that logs every hook, optionally registers entries and fails
/// in one chosen hook.
pub struct RecordingBehavior {
    id: GadgetId,
    log: EventLog,
    fail_at: Option<Hook>,
    registrations: Vec<(String, String)>,
}

impl RecordingBehavior {
    pub fn new(id: GadgetId, log: EventLog) -> Self {
        Self {
            id,
            log,
            fail_at: None,
            registrations: Vec::new(),
        }
    }

    pub fn failing_at(mut self, hook: Option<Hook>) -> Self {
        self.fail_at = hook;
        self
    }

    pub fn registering(mut self, registrations: Vec<(String, String)>) -> Self {
        self.registrations = registrations;
        self
    }

    fn hook(&self, hook: Hook) -> GadgetResult {
        self.log.record(&self.id, &hook.to_string());
        if self.fail_at == Some(hook) {
            return Err(GadgetError::new(format!("{hook} failed on purpose")));
        }
        Ok(())
    }
}

impl GadgetBehavior for RecordingBehavior {
    fn load_config(&mut self, _config: &GadgetConfig) -> GadgetResult {
        self.hook(Hook::LoadConfig)
    }

    fn pre_patch(&mut self) -> GadgetResult {
        self.hook(Hook::PrePatch)
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) -> GadgetResult {
        for (kind, key) in &self.registrations {
            registrar.register(kind.clone(), key.clone())?;
        }
        self.hook(Hook::Register)
    }

    fn initialize(&mut self) -> GadgetResult {
        self.hook(Hook::Initialize)
    }

    fn uninitialize(&mut self) {
        self.log.record(&self.id, "uninitialize");
    }
}
