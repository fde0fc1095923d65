//! Send-side profiling hooks.
//!
//! Links notify attached profile tools on every send. Tools issue a key per
//! registered handler so they can bucket observations without re-parsing
//! metadata on the hot path.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::event::Event;

/// Identity of the handler a profile tool is observing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerMetadata {
    pub component_name: String,
    pub component_type: String,
    pub port_name: String,
}

impl HandlerMetadata {
    pub fn new(
        component_name: impl Into<String>,
        component_type: impl Into<String>,
        port_name: impl Into<String>,
    ) -> Self {
        Self {
            component_name: component_name.into(),
            component_type: component_type.into(),
            port_name: port_name.into(),
        }
    }
}

/// Observer notified of link sends.
pub trait EventProfileTool {
    /// Registers a handler with the tool, returning the key the tool wants
    /// passed back on each observation.
    fn register_handler(&mut self, metadata: &HandlerMetadata) -> u64;

    /// Called for every event sent on a link the tool is attached to.
    fn event_sent(&mut self, key: u64, event: &Event);
}

/// Shared handle to a profile tool.
pub type ProfileToolRef = Rc<RefCell<dyn EventProfileTool>>;

/// The (tool, key) pairs attached to one link.
#[derive(Default)]
pub(crate) struct ProfileToolList {
    tools: Vec<(ProfileToolRef, u64)>,
}

impl ProfileToolList {
    pub(crate) fn attach(&mut self, tool: ProfileToolRef, key: u64) {
        self.tools.push((tool, key));
    }

    pub(crate) fn event_sent(&self, event: &Event) {
        for (tool, key) in &self.tools {
            tool.borrow_mut().event_sent(*key, event);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ProfileToolList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileToolList")
            .field("tools", &self.tools.len())
            .finish()
    }
}
