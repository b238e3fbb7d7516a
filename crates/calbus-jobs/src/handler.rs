//! Registry of change handlers keyed by event code.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use calbus_core::{logging, ChangeHandler, SysCode};

/// Maps each event code to the handler responsible for it.
///
/// Populated at startup. A code with no handler is consumed as `NO_ACTION`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<SysCode, Arc<dyn ChangeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every code it declares.
    ///
    /// A later registration for the same code replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ChangeHandler>) {
        for code in handler.codes() {
            if self.handlers.insert(code, handler.clone()).is_some() {
                debug!(
                    subsystem = logging::SUBSYSTEM_JOBS,
                    component = logging::COMPONENT_CONSUMER,
                    syscode = %code,
                    "Replaced change handler"
                );
            }
        }
        debug!(
            subsystem = logging::SUBSYSTEM_JOBS,
            component = logging::COMPONENT_CONSUMER,
            codes = self.handlers.len(),
            "Registered change handler"
        );
    }

    pub fn get(&self, code: SysCode) -> Option<Arc<dyn ChangeHandler>> {
        self.handlers.get(&code).cloned()
    }

    pub fn handles(&self, code: SysCode) -> bool {
        self.handlers.contains_key(&code)
    }

    /// Number of codes with a registered handler.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<&str> = self.handlers.keys().map(|c| c.as_str()).collect();
        codes.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("codes", &codes)
            .finish()
    }
}
