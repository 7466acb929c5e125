//! Tool registry — capability records plus executor functions.
//!
//! Exactly one registration exists per tool type; aliases are unique and
//! resolve to a registered type. The registry is written at startup and
//! afterwards only availability toggles mutate it, so readers always see
//! a consistent snapshot behind the lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::tools::ToolHandler;
use crate::types::{ToolCapability, ToolType};

/// Registration errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The tool type already has a registration.
    #[error("tool already registered: {0}")]
    DuplicateTool(ToolType),
    /// An alias is already taken by another tool.
    #[error("alias '{alias}' already registered for {existing}")]
    DuplicateAlias {
        /// The conflicting alias.
        alias: String,
        /// The tool currently owning it.
        existing: ToolType,
    },
}

/// Result of a dependency validation.
#[derive(Debug, Clone)]
pub struct DependencyCheck {
    /// True when every declared dependency is registered and available.
    pub valid: bool,
    /// Dependencies that are missing or unavailable.
    pub missing: Vec<ToolType>,
}

/// Registry statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Registered tools.
    pub total_tools: usize,
    /// Tools currently available.
    pub available_tools: usize,
    /// Tools supporting streaming.
    pub streaming_tools: usize,
    /// Registered aliases.
    pub aliases: usize,
}

struct Registration {
    capability: ToolCapability,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
struct Inner {
    tools: HashMap<ToolType, Registration>,
    aliases: HashMap<String, ToolType>,
}

/// Holds capability records and executor functions for the tool set.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ToolRegistry")
            .field("total_tools", &stats.total_tools)
            .field("available_tools", &stats.available_tools)
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability with its executor. Rejects a duplicate tool
    /// type or a clashing alias.
    pub fn register(
        &self,
        capability: ToolCapability,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        let Ok(mut inner) = self.inner.write() else {
            return Ok(());
        };
        if inner.tools.contains_key(&capability.tool) {
            return Err(RegistryError::DuplicateTool(capability.tool));
        }
        for alias in &capability.aliases {
            if let Some(existing) = inner.aliases.get(alias) {
                return Err(RegistryError::DuplicateAlias {
                    alias: alias.clone(),
                    existing: *existing,
                });
            }
        }
        for alias in &capability.aliases {
            inner.aliases.insert(alias.clone(), capability.tool);
        }
        tracing::debug!(tool = %capability.tool, "tool registered");
        inner
            .tools
            .insert(capability.tool, Registration { capability, handler });
        Ok(())
    }

    /// Remove a registration and its aliases. Returns whether it existed.
    pub fn unregister(&self, tool: ToolType) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        let removed = inner.tools.remove(&tool).is_some();
        if removed {
            inner.aliases.retain(|_, t| *t != tool);
        }
        removed
    }

    /// Capability snapshot for a tool type.
    pub fn get(&self, tool: ToolType) -> Option<ToolCapability> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.tools.get(&tool).map(|r| r.capability.clone()))
    }

    /// Capability lookup through an alias.
    pub fn get_by_alias(&self, name: &str) -> Option<ToolCapability> {
        let inner = self.inner.read().ok()?;
        let tool = inner.aliases.get(name)?;
        inner.tools.get(tool).map(|r| r.capability.clone())
    }

    /// Executor function for a tool type.
    pub fn handler(&self, tool: ToolType) -> Option<Arc<dyn ToolHandler>> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.tools.get(&tool).map(|r| r.handler.clone()))
    }

    /// Whether a tool is registered and currently available.
    pub fn is_available(&self, tool: ToolType) -> bool {
        self.get(tool).is_some_and(|c| c.available)
    }

    /// Toggle a tool's availability. Returns whether the tool exists.
    pub fn set_availability(&self, tool: ToolType, available: bool) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        match inner.tools.get_mut(&tool) {
            Some(registration) => {
                registration.capability.available = available;
                true
            }
            None => false,
        }
    }

    /// All available capabilities, highest priority first.
    pub fn available_tools(&self) -> Vec<ToolCapability> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        let mut tools: Vec<ToolCapability> = inner
            .tools
            .values()
            .filter(|r| r.capability.available)
            .map(|r| r.capability.clone())
            .collect();
        tools.sort_by(|a, b| b.priority.cmp(&a.priority));
        tools
    }

    /// Capabilities advertising an operation.
    pub fn tools_by_operation(&self, operation: &str) -> Vec<ToolCapability> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        inner
            .tools
            .values()
            .filter(|r| r.capability.operations.iter().any(|o| o == operation))
            .map(|r| r.capability.clone())
            .collect()
    }

    /// Capabilities supporting streaming.
    pub fn streaming_tools(&self) -> Vec<ToolCapability> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        inner
            .tools
            .values()
            .filter(|r| r.capability.supports_streaming)
            .map(|r| r.capability.clone())
            .collect()
    }

    /// Check that every declared dependency of `tool` is registered and
    /// available.
    pub fn validate_dependencies(&self, tool: ToolType) -> DependencyCheck {
        let Ok(inner) = self.inner.read() else {
            return DependencyCheck {
                valid: false,
                missing: Vec::new(),
            };
        };
        let Some(registration) = inner.tools.get(&tool) else {
            return DependencyCheck {
                valid: false,
                missing: vec![tool],
            };
        };
        let missing: Vec<ToolType> = registration
            .capability
            .dependencies
            .iter()
            .filter(|dep| {
                !inner
                    .tools
                    .get(dep)
                    .is_some_and(|r| r.capability.available)
            })
            .copied()
            .collect();
        DependencyCheck {
            valid: missing.is_empty(),
            missing,
        }
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> RegistryStats {
        let Ok(inner) = self.inner.read() else {
            return RegistryStats {
                total_tools: 0,
                available_tools: 0,
                streaming_tools: 0,
                aliases: 0,
            };
        };
        RegistryStats {
            total_tools: inner.tools.len(),
            available_tools: inner
                .tools
                .values()
                .filter(|r| r.capability.available)
                .count(),
            streaming_tools: inner
                .tools
                .values()
                .filter(|r| r.capability.supports_streaming)
                .count(),
            aliases: inner.aliases.len(),
        }
    }
}
