//! Reassembles streamed tool-call fragments into complete calls.

use crate::{adapters::ToolCallFragment, core::canonical::ToolCall};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collects fragments keyed by their announced index. Argument text is
/// concatenated verbatim and never validated here.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PartialToolCall>,
    by_index: HashMap<u32, usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: ToolCallFragment) {
        let existing = self.by_index.get(&fragment.index).copied().filter(|&slot| {
            // an index reused under a different id is a new call
            match (&fragment.id, self.calls[slot].id.as_str()) {
                (Some(id), current) if !current.is_empty() => id == current,
                _ => true,
            }
        });

        let slot = match existing {
            Some(slot) => slot,
            None => {
                self.calls.push(PartialToolCall::default());
                let slot = self.calls.len() - 1;
                self.by_index.insert(fragment.index, slot);
                slot
            }
        };

        let call = &mut self.calls[slot];
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            if call.id.is_empty() {
                call.id = id;
            }
        }
        if let Some(name) = fragment.name.filter(|name| !name.is_empty()) {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        call.arguments.push_str(&fragment.arguments);
    }

    pub fn extend<I: IntoIterator<Item = ToolCallFragment>>(&mut self, fragments: I) {
        for fragment in fragments {
            self.push(fragment);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Completed calls in first-seen order. Calls whose provider never sent
    /// an id get a generated one.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|call| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{}", Uuid::new_v4().simple())
                } else {
                    call.id
                },
                name: call.name,
                arguments: call.arguments,
            })
            .collect()
    }
}
