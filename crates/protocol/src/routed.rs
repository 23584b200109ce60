//! Fixed-width routed messages.
//!
//! Each delivery to a listener is a row of optional slots: three status
//! slots (connected, error, disconnected) followed by one data slot per
//! subscription output. Exactly one slot is populated per message.

use serde::Serialize;
use serde_json::Value;

use crate::constants::{
    CONNECTED_MARKER, CONNECTED_SLOT, DATA_SLOT_OFFSET, DISCONNECTED_MARKER, DISCONNECTED_SLOT,
    ERROR_SLOT,
};

/// Named output of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSlot {
    Connected,
    Error,
    Disconnected,
    /// Data output for the subscription bound to this output index.
    Data(usize),
}

impl OutputSlot {
    /// Position of the slot within the message.
    pub fn index(self) -> usize {
        match self {
            Self::Connected => CONNECTED_SLOT,
            Self::Error => ERROR_SLOT,
            Self::Disconnected => DISCONNECTED_SLOT,
            Self::Data(output) => DATA_SLOT_OFFSET + output,
        }
    }
}

/// One delivery to a listener's downstream consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RoutedMessage {
    slots: Vec<Option<Value>>,
}

impl RoutedMessage {
    /// Builds a message of `width` slots with only `slot` populated.
    ///
    /// The message grows past `width` if `slot` would not fit, so the
    /// populated slot is never lost.
    pub fn new(width: usize, slot: OutputSlot, payload: Value) -> Self {
        let index = slot.index();
        let mut slots = vec![None; width.max(index + 1)];
        slots[index] = Some(payload);
        Self { slots }
    }

    /// Message carrying the "connected" marker.
    pub fn connected(width: usize) -> Self {
        Self::new(width, OutputSlot::Connected, Value::from(CONNECTED_MARKER))
    }

    /// Message carrying an error cause, `null` when the cause is unknown.
    pub fn error(width: usize, cause: Option<&str>) -> Self {
        let payload = cause.map(Value::from).unwrap_or(Value::Null);
        Self::new(width, OutputSlot::Error, payload)
    }

    /// Message carrying the "disconnected" marker.
    pub fn disconnected(width: usize) -> Self {
        Self::new(
            width,
            OutputSlot::Disconnected,
            Value::from(DISCONNECTED_MARKER),
        )
    }

    /// Message carrying an inbound event payload on a data output.
    pub fn data(width: usize, output: usize, payload: Value) -> Self {
        Self::new(width, OutputSlot::Data(output), payload)
    }

    /// Number of slots.
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Slot contents at `index`, `None` when empty or out of range.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Index and payload of the populated slot.
    pub fn populated(&self) -> Option<(usize, &Value)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.as_ref().map(|v| (i, v)))
    }

    pub fn slots(&self) -> &[Option<Value>] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<Option<Value>> {
        self.slots
    }
}
