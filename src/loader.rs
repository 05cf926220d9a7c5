//! Code loader
//!
//! Resolves named code units against an ordered list of virtual roots
//! (first match wins) and enforces the entry-point contract before
//! invocation. A unit's serialized definition is parsed on first reference
//! and memoized for the process lifetime; the executable bodies live in an
//! explicit [`OperationRegistry`] mapping `(unit, operation)` to a
//! callable, so nothing is process-global and the loader is testable in
//! isolation.

use crate::error::{CapletError, Result};
use crate::vfs::VirtualRoot;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Parameter shape an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// The process argument list
    Args,
    /// No parameters
    None,
}

/// Result shape an operation produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnKind {
    Void,
    Value,
}

/// One operation declared by a unit definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDef {
    pub name: String,
    pub params: ParamKind,
    pub returns: ReturnKind,
}

/// Serialized definition of a code unit
///
/// A unit named `a.b.C` lives at archive entry `a/b/C.unit` as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDefinition {
    /// Fully-qualified unit name
    pub name: String,

    /// Optional module grouping this unit belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Operations the unit exposes
    #[serde(default)]
    pub operations: Vec<OperationDef>,
}

impl UnitDefinition {
    /// Archive entry name holding the definition of `unit_name`
    pub fn entry_path(unit_name: &str) -> String {
        format!("{}.unit", unit_name.replace('.', "/"))
    }

    /// Look up a declared operation by name
    pub fn operation(&self, name: &str) -> Option<&OperationDef> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(CapletError::from)
    }
}

/// Result produced by a registered operation body
pub type OperationResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type OperationFn = Box<dyn Fn(&[String]) -> OperationResult>;

/// Explicit lookup table mapping `(unit, operation)` to a callable
///
/// Populated by the embedding application before launch; passed into
/// whichever component needs to invoke loaded code rather than registered
/// process-globally.
#[derive(Default)]
pub struct OperationRegistry {
    table: HashMap<(String, String), OperationFn>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body for `unit`'s `operation`
    pub fn register<F>(&mut self, unit: &str, operation: &str, body: F)
    where
        F: Fn(&[String]) -> OperationResult + 'static,
    {
        self.table
            .insert((unit.to_string(), operation.to_string()), Box::new(body));
    }

    fn get(&self, unit: &str, operation: &str) -> Option<&OperationFn> {
        self.table.get(&(unit.to_string(), operation.to_string()))
    }
}

/// Resolves and invokes code units against an ordered list of roots
pub struct CodeLoader {
    roots: Vec<Rc<VirtualRoot>>,
    required_module: Option<String>,
    units: RefCell<HashMap<String, Rc<UnitDefinition>>>,
}

impl CodeLoader {
    /// Create a loader over `roots`; the first root containing a name
    /// shadows later ones, for every lookup, for the process lifetime
    pub fn new(roots: Vec<Rc<VirtualRoot>>) -> Self {
        Self {
            roots,
            required_module: None,
            units: RefCell::new(HashMap::new()),
        }
    }

    /// Only accept unit definitions declaring this module
    pub fn with_required_module(mut self, module: Option<String>) -> Self {
        self.required_module = module;
        self
    }

    /// The ordered resolution roots
    pub fn roots(&self) -> &[Rc<VirtualRoot>] {
        &self.roots
    }

    /// Find a resource by name, first root wins
    pub fn find_resource(&self, name: &str) -> Option<Rc<VirtualRoot>> {
        self.roots.iter().find(|root| root.contains(name)).cloned()
    }

    /// Resolve a unit definition, parsing it on first reference and
    /// returning the cached definition afterwards
    pub fn load_unit(&self, unit_name: &str) -> Result<Rc<UnitDefinition>> {
        if let Some(definition) = self.units.borrow().get(unit_name) {
            return Ok(definition.clone());
        }

        let entry_path = UnitDefinition::entry_path(unit_name);
        for root in &self.roots {
            if !root.contains(&entry_path) {
                continue;
            }
            let definition: UnitDefinition = serde_json::from_slice(&root.read(&entry_path)?)
                .map_err(|e| CapletError::InvalidUnitDefinition {
                    unit: unit_name.to_string(),
                    detail: e.to_string(),
                })?;
            if definition.name != unit_name {
                return Err(CapletError::InvalidUnitDefinition {
                    unit: unit_name.to_string(),
                    detail: format!("definition declares name '{}'", definition.name),
                });
            }
            if let Some(required) = &self.required_module {
                if definition.module.as_deref() != Some(required.as_str()) {
                    debug!(
                        unit = unit_name,
                        root = root.key(),
                        "unit found outside required module, continuing search"
                    );
                    continue;
                }
            }
            debug!(unit = unit_name, root = root.key(), "unit loaded");
            let definition = Rc::new(definition);
            self.units
                .borrow_mut()
                .insert(unit_name.to_string(), definition.clone());
            return Ok(definition);
        }

        Err(CapletError::NotFound(format!("unit '{}'", unit_name)))
    }

    /// Invoke `operation_name` of `unit_name` with the process arguments,
    /// enforcing the entry-point contract
    ///
    /// Errors raised by the operation body itself propagate to the caller
    /// unmodified.
    pub fn invoke(
        &self,
        registry: &OperationRegistry,
        unit_name: &str,
        operation_name: &str,
        args: &[String],
    ) -> Result<()> {
        let definition = self.load_unit(unit_name)?;

        let operation = definition.operation(operation_name).ok_or_else(|| {
            CapletError::EntryPointNotFound {
                unit: unit_name.to_string(),
                operation: operation_name.to_string(),
            }
        })?;

        if operation.returns != ReturnKind::Void {
            return Err(CapletError::InvalidEntryPointSignature {
                unit: unit_name.to_string(),
                operation: operation_name.to_string(),
                detail: "expected no return value, found 'value'".to_string(),
            });
        }
        if operation.params != ParamKind::Args {
            return Err(CapletError::InvalidEntryPointSignature {
                unit: unit_name.to_string(),
                operation: operation_name.to_string(),
                detail: "expected the argument list, found 'none'".to_string(),
            });
        }

        let body = registry.get(unit_name, operation_name).ok_or_else(|| {
            CapletError::EntryPointNotFound {
                unit: unit_name.to_string(),
                operation: operation_name.to_string(),
            }
        })?;

        body(args).map_err(CapletError::Application)
    }
}
