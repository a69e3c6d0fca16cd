//! Periodic status slots. The MCU only reports slots that have been enabled;
//! READ_SLOTS returns every enabled slot that changed since the last read.

use std::collections::BTreeSet;

use log::warn;
use rrrc_protocol::records::{Record, Records, SLOT_RESET};

use crate::control::Control;
use crate::error::CommandError;

/// One slot record, detached from the READ_SLOTS payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotData {
    pub slot: u8,
    pub data: Vec<u8>,
}

impl SlotData {
    pub fn record(&self) -> Record<'_> {
        Record {
            id: self.slot,
            data: &self.data,
        }
    }
}

#[derive(Debug)]
pub struct StatusUpdater {
    control: Control,
    enabled: BTreeSet<u8>,
}

impl StatusUpdater {
    pub fn new(control: Control) -> Self {
        Self {
            control,
            enabled: BTreeSet::from([SLOT_RESET]),
        }
    }

    pub fn is_enabled(&self, slot: u8) -> bool {
        self.enabled.contains(&slot)
    }

    /// Disable every slot on the MCU. The reset slot stays tracked as
    /// enabled since the MCU always reports it.
    pub fn reset(&mut self) -> Result<(), CommandError> {
        self.control.reset_slots()?;
        self.enabled.clear();
        self.enabled.insert(SLOT_RESET);
        Ok(())
    }

    pub fn enable(&mut self, slot: u8) -> Result<(), CommandError> {
        self.set(slot, true)
    }

    pub fn disable(&mut self, slot: u8) -> Result<(), CommandError> {
        self.set(slot, false)
    }

    /// Send SLOT_CTRL only when the tracked state actually changes.
    pub fn set(&mut self, slot: u8, enabled: bool) -> Result<(), CommandError> {
        if self.is_enabled(slot) == enabled {
            return Ok(());
        }
        self.control.control_slot(slot, enabled)?;
        if enabled {
            self.enabled.insert(slot);
        } else {
            self.enabled.remove(&slot);
        }
        Ok(())
    }

    /// Fetch pending slot records. A record that claims more data than the
    /// payload holds is dropped along with everything after it.
    pub fn read(&self) -> Result<Vec<SlotData>, CommandError> {
        let payload = self.control.read_slots()?;
        let mut slots = Vec::new();
        for record in Records::new(&payload) {
            match record {
                Ok(record) => slots.push(SlotData {
                    slot: record.id,
                    data: record.data.to_vec(),
                }),
                Err(e) => {
                    warn!("invalid slot length in {} byte payload: {e:?}", payload.len());
                    break;
                }
            }
        }
        Ok(slots)
    }
}
