// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use maestro_model::ToolSchema;

use crate::Tool;

/// Central registry holding all available tools, partitioned into named
/// groups.  A session selects one active group; only that group's tools are
/// dispatchable and advertised to the model.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    groups: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Define a named group as a subset of registered tool names.
    /// Unknown names are ignored at lookup time, not here.
    pub fn define_group(&mut self, name: impl Into<String>, tools: Vec<String>) {
        self.groups.insert(name.into(), tools);
    }

    /// Every registered tool, as the implicit "default" group.
    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    fn group_names(&self, group: &str) -> Vec<String> {
        match self.groups.get(group) {
            Some(names) => names.clone(),
            None => self.all_names(),
        }
    }

    /// Look up a tool, honouring group membership.
    pub fn get(&self, group: &str, name: &str) -> Option<Arc<dyn Tool>> {
        if !self.group_names(group).iter().any(|n| n == name) {
            return None;
        }
        self.tools.get(name).cloned()
    }

    /// Schemas for the active group, sorted by name for deterministic
    /// request payloads.
    pub fn schemas(&self, group: &str) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .group_names(group)
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
