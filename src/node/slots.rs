//! Slot Catalog.
//!
//! Slots are the node's named data connections. Input slots hold a buffer
//! borrowed from upstream for one invocation; output slots receive the buffers
//! the kernel wrote once the invocation succeeds.

use crate::backend::DeviceBuffer;
use crate::error::{KernelNodeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a slot; fixed once declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotDirection {
    Input,
    Output,
}

impl fmt::Display for SlotDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotDirection::Input => f.write_str("input"),
            SlotDirection::Output => f.write_str("output"),
        }
    }
}

/// A named connection point and the buffer currently attached to it
#[derive(Debug, Clone)]
pub struct Slot {
    name: String,
    direction: SlotDirection,
    buffer: Option<DeviceBuffer>,
}

impl Slot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> SlotDirection {
        self.direction
    }

    pub fn buffer(&self) -> Option<&DeviceBuffer> {
        self.buffer.as_ref()
    }

    pub fn is_input(&self) -> bool {
        self.direction == SlotDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == SlotDirection::Output
    }
}

/// Ordered set of slots with unique names
#[derive(Debug, Clone, Default)]
pub struct SlotCatalog {
    slots: Vec<Slot>,
}

impl SlotCatalog {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Build an unbound catalog from slot names
    pub fn from_names<I, O, S, T>(inputs: I, outputs: O) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut catalog = Self::new();
        for name in inputs {
            catalog.declare_input(name.as_ref())?;
        }
        for name in outputs {
            catalog.declare_output(name.as_ref())?;
        }
        Ok(catalog)
    }

    pub fn declare_input(&mut self, name: &str) -> Result<()> {
        self.declare(name, SlotDirection::Input)
    }

    pub fn declare_output(&mut self, name: &str) -> Result<()> {
        self.declare(name, SlotDirection::Output)
    }

    fn declare(&mut self, name: &str, direction: SlotDirection) -> Result<()> {
        if name.is_empty() {
            return Err(KernelNodeError::Config(
                "Slot names must not be empty".to_string(),
            ));
        }
        if let Some(existing) = self.get(name) {
            return Err(KernelNodeError::Config(format!(
                "Slot '{}' is already declared as an {}",
                name, existing.direction
            )));
        }
        tracing::debug!(slot = name, %direction, "slot declared");
        self.slots.push(Slot {
            name: name.to_string(),
            direction,
            buffer: None,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn direction(&self, name: &str) -> Option<SlotDirection> {
        self.get(name).map(Slot::direction)
    }

    /// Attach an upstream buffer to an input slot for the next invocation
    pub fn bind_input(&mut self, name: &str, buffer: DeviceBuffer) -> Result<()> {
        let slot = self.expect_direction(name, SlotDirection::Input, "bind")?;
        tracing::trace!(slot = name, buffer = %buffer.id(), "input bound");
        slot.buffer = Some(buffer);
        Ok(())
    }

    /// Attach a produced buffer to an output slot
    pub fn publish_output(&mut self, name: &str, buffer: DeviceBuffer) -> Result<()> {
        let slot = self.expect_direction(name, SlotDirection::Output, "publish")?;
        tracing::trace!(slot = name, buffer = %buffer.id(), "output published");
        slot.buffer = Some(buffer);
        Ok(())
    }

    fn expect_direction(
        &mut self,
        name: &str,
        direction: SlotDirection,
        action: &str,
    ) -> Result<&mut Slot> {
        let slot = self
            .get_mut(name)
            .ok_or_else(|| KernelNodeError::Config(format!("Unknown slot '{}'", name)))?;
        if slot.direction != direction {
            return Err(KernelNodeError::Config(format!(
                "Cannot {} slot '{}': it is an {} slot",
                action, name, slot.direction
            )));
        }
        Ok(slot)
    }

    pub fn bound_input(&self, name: &str) -> Option<&DeviceBuffer> {
        self.get(name)
            .filter(|s| s.is_input())
            .and_then(Slot::buffer)
    }

    pub fn published(&self, name: &str) -> Option<&DeviceBuffer> {
        self.get(name)
            .filter(|s| s.is_output())
            .and_then(Slot::buffer)
    }

    /// Detach every published output, leaving the output slots empty
    pub fn take_outputs(&mut self) -> Vec<(String, DeviceBuffer)> {
        self.slots
            .iter_mut()
            .filter(|s| s.is_output())
            .filter_map(|s| s.buffer.take().map(|b| (s.name.clone(), b)))
            .collect()
    }

    pub fn remove(&mut self, name: &str) -> Option<Slot> {
        let index = self.slots.iter().position(|s| s.name == name)?;
        tracing::debug!(slot = name, "slot removed");
        Some(self.slots.remove(index))
    }

    /// Rename a slot, keeping its direction and position
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if new.is_empty() {
            return Err(KernelNodeError::Config(
                "Slot names must not be empty".to_string(),
            ));
        }
        if old != new && self.contains(new) {
            return Err(KernelNodeError::Config(format!(
                "Slot '{}' is already declared",
                new
            )));
        }
        let slot = self
            .get_mut(old)
            .ok_or_else(|| KernelNodeError::Config(format!("Unknown slot '{}'", old)))?;
        slot.name = new.to_string();
        tracing::debug!(from = old, to = new, "slot renamed");
        Ok(())
    }

    /// Input slots in declaration order
    pub fn inputs(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_input())
    }

    /// Output slots in declaration order
    pub fn outputs(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_output())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Extents, PixelType};

    fn buffer() -> DeviceBuffer {
        DeviceBuffer::zeroed(Extents::new(vec![2, 2]).unwrap(), PixelType::Float32)
    }

    fn catalog() -> SlotCatalog {
        SlotCatalog::from_names(["src", "mask"], ["dst"]).unwrap()
    }

    #[test]
    fn test_declare_order_and_direction() {
        let catalog = catalog();
        let inputs: Vec<_> = catalog.inputs().map(Slot::name).collect();
        let outputs: Vec<_> = catalog.outputs().map(Slot::name).collect();
        assert_eq!(inputs, vec!["src", "mask"]);
        assert_eq!(outputs, vec!["dst"]);
        assert_eq!(catalog.direction("dst"), Some(SlotDirection::Output));
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let mut catalog = catalog();
        let err = catalog.declare_output("src").unwrap_err();
        assert!(err.to_string().contains("already declared as an input"));
        assert!(catalog.declare_input("").is_err());
    }

    #[test]
    fn test_bind_and_publish_directions() {
        let mut catalog = catalog();
        let buf = buffer();

        catalog.bind_input("src", buf.clone()).unwrap();
        assert!(catalog.bound_input("src").unwrap().shares_storage(&buf));

        assert!(catalog.bind_input("dst", buf.clone()).is_err());
        assert!(catalog.bind_input("nope", buf.clone()).is_err());
        assert!(catalog.publish_output("src", buf.clone()).is_err());

        catalog.publish_output("dst", buf.clone()).unwrap();
        assert!(catalog.published("dst").is_some());
        assert!(catalog.published("src").is_none());
    }

    #[test]
    fn test_take_outputs() {
        let mut catalog = catalog();
        catalog.publish_output("dst", buffer()).unwrap();
        let outputs = catalog.take_outputs();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].0, "dst");
        assert!(catalog.published("dst").is_none());
    }

    #[test]
    fn test_rename_and_remove() {
        let mut catalog = catalog();
        catalog.rename("mask", "alpha").unwrap();
        assert_eq!(catalog.direction("alpha"), Some(SlotDirection::Input));
        assert!(catalog.rename("alpha", "dst").is_err());
        assert!(catalog.rename("missing", "x").is_err());

        assert!(catalog.remove("alpha").is_some());
        assert!(!catalog.contains("alpha"));
        assert_eq!(catalog.len(), 2);
    }
}
