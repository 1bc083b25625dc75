//! Notifications delivered to the application

use std::sync::Arc;

/// A change in the registry the application may want to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// A tracked variable changed through a NOTIFY
    VariableChanged {
        udn: String,
        service: usize,
        name: String,
        value: String,
    },
    DeviceAdded {
        udn: String,
    },
    DeviceRemoved {
        udn: String,
    },
    /// Answer to a `get_var` query
    GetVarComplete {
        udn: String,
        service: usize,
        name: String,
        value: String,
    },
}

impl StateUpdate {
    pub fn udn(&self) -> &str {
        match self {
            StateUpdate::VariableChanged { udn, .. }
            | StateUpdate::DeviceAdded { udn }
            | StateUpdate::DeviceRemoved { udn }
            | StateUpdate::GetVarComplete { udn, .. } => udn,
        }
    }
}

pub type StateUpdateCallback = Arc<dyn Fn(StateUpdate) + Send + Sync>;
