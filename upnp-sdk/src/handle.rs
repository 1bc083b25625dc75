//! Fixed-capacity handle table
//!
//! Handles are small positive integers indexing a slot array. Slot 0 is never
//! issued, and allocation always returns the lowest free slot so that callers
//! see low, stable values. The table itself is not synchronized: the SDK
//! keeps it behind a single reader/writer lock.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, UpnpError};
use crate::event::{ClientCallback, SearchId};
use crate::timer::TimerId;
use crate::Timeout;

/// Opaque session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    pub fn get(self) -> u32 {
        self.0
    }

    /// Rebuild a handle from its integer value; validity is checked on use
    pub fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscription held by the client
#[derive(Debug, Clone)]
pub(crate) struct ClientSubscription {
    pub(crate) event_url: String,
    pub(crate) timeout: Timeout,
    /// Pending auto-renewal or expiry
    pub(crate) timer: Option<TimerId>,
}

/// An outstanding search awaiting its timeout
#[derive(Debug, Clone)]
pub(crate) struct SearchEntry {
    pub(crate) id: SearchId,
    pub(crate) target: String,
    pub(crate) timer: Option<TimerId>,
}

/// Session state of a registered control point
pub struct ClientInfo {
    pub(crate) callback: ClientCallback,
    pub(crate) subscriptions: HashMap<String, ClientSubscription>,
    pub(crate) searches: Vec<SearchEntry>,
}

impl ClientInfo {
    pub fn new(callback: ClientCallback) -> Self {
        Self {
            callback,
            subscriptions: HashMap::new(),
            searches: Vec::new(),
        }
    }

    pub fn callback(&self) -> &ClientCallback {
        &self.callback
    }

    /// SIDs of the subscriptions currently held
    pub fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }

    pub fn pending_searches(&self) -> usize {
        self.searches.len()
    }
}

impl fmt::Debug for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientInfo")
            .field("subscriptions", &self.subscriptions.len())
            .field("searches", &self.searches.len())
            .finish()
    }
}

/// Session state of a registered root device
pub struct DeviceInfo {
    pub(crate) description_url: String,
    pub(crate) callback: ClientCallback,
}

impl DeviceInfo {
    pub fn new(description_url: impl Into<String>, callback: ClientCallback) -> Self {
        Self {
            description_url: description_url.into(),
            callback,
        }
    }

    pub fn description_url(&self) -> &str {
        &self.description_url
    }

    pub fn callback(&self) -> &ClientCallback {
        &self.callback
    }
}

impl fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("description_url", &self.description_url)
            .finish()
    }
}

/// Tagged session record stored in a slot
#[derive(Debug)]
pub enum HandleInfo {
    Client(ClientInfo),
    Device(DeviceInfo),
}

/// Slot array mapping handles to session records, plus the registration flags
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Option<HandleInfo>>,
    pub(crate) client_registered: bool,
    pub(crate) device_registered_v4: bool,
    pub(crate) device_registered_v6: bool,
}

impl HandleTable {
    /// Create a table with `capacity` slots; slot 0 is reserved
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            client_registered: false,
            device_registered_v4: false,
            device_registered_v6: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store `info` in the lowest free slot above 0
    pub fn allocate(&mut self, info: HandleInfo) -> Result<Handle> {
        let index = self
            .slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .ok_or(UpnpError::OutOfHandles)?;

        self.slots[index] = Some(info);
        u32::try_from(index)
            .map(Handle)
            .map_err(|_| UpnpError::OutOfHandles)
    }

    pub fn get(&self, handle: Handle) -> Option<&HandleInfo> {
        if handle.index() == 0 {
            return None;
        }
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut HandleInfo> {
        if handle.index() == 0 {
            return None;
        }
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Release a slot, returning the record it held
    pub fn free(&mut self, handle: Handle) -> Result<HandleInfo> {
        if handle.index() == 0 {
            return Err(UpnpError::InvalidHandle);
        }
        self.slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(UpnpError::InvalidHandle)
    }

    /// Drop every record and reset the registration flags
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.client_registered = false;
        self.device_registered_v4 = false;
        self.device_registered_v6 = false;
    }

    /// Number of live handles
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether a client session is registered
    pub fn has_client(&self) -> bool {
        self.client_registered
    }

    pub fn client(&self, handle: Handle) -> Option<&ClientInfo> {
        match self.get(handle) {
            Some(HandleInfo::Client(client)) => Some(client),
            _ => None,
        }
    }

    pub fn client_mut(&mut self, handle: Handle) -> Option<&mut ClientInfo> {
        match self.get_mut(handle) {
            Some(HandleInfo::Client(client)) => Some(client),
            _ => None,
        }
    }

    /// The lowest-numbered client session; at most one exists at a time
    pub fn find_client(&self) -> Option<(Handle, &ClientInfo)> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(index, slot)| match slot {
                Some(HandleInfo::Client(client)) => Some((Handle(index as u32), client)),
                _ => None,
            })
    }

    pub(crate) fn find_client_mut(&mut self) -> Option<(Handle, &mut ClientInfo)> {
        self.slots
            .iter_mut()
            .enumerate()
            .skip(1)
            .find_map(|(index, slot)| match slot {
                Some(HandleInfo::Client(client)) => Some((Handle(index as u32), client)),
                _ => None,
            })
    }
}
