use std::collections::HashMap;

use super::abi::{ComputeFn, CreateStateFn, DestroyStateFn};

/// Callables the fusion pass produced for one node. Only `compute` is mandatory.
#[derive(Debug, Clone, Copy)]
pub struct FusedFunctionEntry {
    pub compute: ComputeFn,
    pub create_state: Option<CreateStateFn>,
    pub destroy_state: Option<DestroyStateFn>,
}

impl FusedFunctionEntry {
    pub fn new(compute: ComputeFn) -> Self {
        Self {
            compute,
            create_state: None,
            destroy_state: None,
        }
    }

    pub fn with_state(mut self, create: CreateStateFn, destroy: Option<DestroyStateFn>) -> Self {
        self.create_state = Some(create);
        self.destroy_state = destroy;
        self
    }
}

/// Node name to fused entry map, filled during setup and read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct FusedFunctionRegistry {
    entries: HashMap<String, FusedFunctionEntry>,
}

impl FusedFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry previously registered for `node`, if any.
    pub fn register(
        &mut self,
        node: impl Into<String>,
        entry: FusedFunctionEntry,
    ) -> Option<FusedFunctionEntry> {
        self.entries.insert(node.into(), entry)
    }

    pub fn lookup(&self, node: &str) -> Option<FusedFunctionEntry> {
        self.entries.get(node).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
