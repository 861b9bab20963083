//! Registers: the shared per-frame evaluation namespace.
//!
//! Identity is a dense [`RegisterId`] issued by the [`RegisterTable`]; names
//! exist for the external namespace service and for diagnostics. Read access
//! goes through the `Copy` handles ([`FloatReg`], [`BoolReg`], [`IntReg`]);
//! write access requires a sink ([`FloatSink`], [`BoolSink`]) that only the
//! table hands out when allocating a Derived or Driven register. Downstream
//! code never looks registers up by free-form string.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RegisterId(pub u32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Bool,
    Int,
    Float,
}

/// Where a register's value comes from each tick.
///
/// - `Source`: staged by the host before the tick (sensors, time, world scale).
/// - `Derived`: recomputed every tick as the sum of fragment contributions.
/// - `Driven`: set to constants by state-entry drive actions, holds otherwise.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    Source,
    Derived,
    Driven,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
}

impl Default for Value {
    fn default() -> Self {
        Value::Float(0.0)
    }
}

impl Value {
    pub fn kind(&self) -> RegisterKind {
        match self {
            Value::Bool(_) => RegisterKind::Bool,
            Value::Int(_) => RegisterKind::Int,
            Value::Float(_) => RegisterKind::Float,
        }
    }

    /// Numeric view used by threshold predicates and blend drivers.
    pub fn as_float(&self) -> f32 {
        match self {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => *i as f32,
            Value::Float(f) => *f,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
        }
    }
}

/// Readable handle to a Float register.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FloatReg(pub RegisterId);

/// Readable handle to a Bool register.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BoolReg(pub RegisterId);

/// Readable handle to an Int register.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IntReg(pub RegisterId);

/// Write capability for a Derived Float register. Fragments are constructed
/// against a sink, so only the component that allocated a register can emit
/// writes to it.
#[derive(Debug, Clone)]
pub struct FloatSink {
    reg: FloatReg,
}

impl FloatSink {
    pub fn reg(&self) -> FloatReg {
        self.reg
    }

    pub fn id(&self) -> RegisterId {
        self.reg.0
    }
}

/// Write capability for a Driven Bool register (drive actions only).
#[derive(Debug, Clone)]
pub struct BoolSink {
    reg: BoolReg,
}

impl BoolSink {
    pub fn reg(&self) -> BoolReg {
        self.reg
    }

    pub fn id(&self) -> RegisterId {
        self.reg.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDef {
    pub id: RegisterId,
    pub name: String,
    pub kind: RegisterKind,
    pub default: Value,
    pub class: StorageClass,
}

/// Owns every register definition in a build artifact.
///
/// Allocation is idempotent by name: asking for an existing name with the same
/// kind returns the existing id, a different kind is a collision. Global
/// uniqueness against other features is the job of the external namespace
/// service; the table only guards its own build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterTable {
    defs: Vec<RegisterDef>,
    by_name: HashMap<String, RegisterId>,
}

impl RegisterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn defs(&self) -> &[RegisterDef] {
        &self.defs
    }

    pub fn def(&self, id: RegisterId) -> &RegisterDef {
        &self.defs[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisterDef> {
        self.by_name.get(name).map(|id| self.def(*id))
    }

    fn alloc(
        &mut self,
        name: &str,
        kind: RegisterKind,
        default: Value,
        class: StorageClass,
    ) -> Result<RegisterId, String> {
        if let Some(id) = self.by_name.get(name) {
            let existing = self.def(*id);
            if existing.kind == kind && existing.class == class {
                return Ok(*id);
            }
            return Err(format!(
                "register '{name}' already allocated as {:?}/{:?}, requested {:?}/{:?}",
                existing.kind, existing.class, kind, class
            ));
        }
        debug_assert_eq!(default.kind(), kind);
        let id = RegisterId(self.defs.len() as u32);
        self.defs.push(RegisterDef {
            id,
            name: name.to_string(),
            kind,
            default,
            class,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn source_float(&mut self, name: &str, default: f32) -> Result<FloatReg, String> {
        self.alloc(
            name,
            RegisterKind::Float,
            Value::Float(default),
            StorageClass::Source,
        )
        .map(FloatReg)
    }

    pub fn source_bool(&mut self, name: &str, default: bool) -> Result<BoolReg, String> {
        self.alloc(
            name,
            RegisterKind::Bool,
            Value::Bool(default),
            StorageClass::Source,
        )
        .map(BoolReg)
    }

    pub fn derived_float(&mut self, name: &str, default: f32) -> Result<FloatSink, String> {
        self.alloc(
            name,
            RegisterKind::Float,
            Value::Float(default),
            StorageClass::Derived,
        )
        .map(|id| FloatSink {
            reg: FloatReg(id),
        })
    }

    pub fn driven_bool(&mut self, name: &str, default: bool) -> Result<BoolSink, String> {
        self.alloc(
            name,
            RegisterKind::Bool,
            Value::Bool(default),
            StorageClass::Driven,
        )
        .map(|id| BoolSink {
            reg: BoolReg(id),
        })
    }

    pub fn driven_float(&mut self, name: &str, default: f32) -> Result<FloatSink, String> {
        self.alloc(
            name,
            RegisterKind::Float,
            Value::Float(default),
            StorageClass::Driven,
        )
        .map(|id| FloatSink {
            reg: FloatReg(id),
        })
    }

    /// Initial register image for an evaluator.
    pub fn defaults(&self) -> Vec<Value> {
        self.defs.iter().map(|d| d.default).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_idempotent_by_name() {
        let mut table = RegisterTable::new();
        let a = table.source_float("pair/tip", 0.0).unwrap();
        let b = table.source_float("pair/tip", 0.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn alloc_kind_mismatch_is_error() {
        let mut table = RegisterTable::new();
        table.source_float("pair/tip", 0.0).unwrap();
        let err = table.source_bool("pair/tip", false).unwrap_err();
        assert!(err.contains("pair/tip"));
    }

    #[test]
    fn defaults_follow_declaration_order() {
        let mut table = RegisterTable::new();
        table.source_float("a", 0.25).unwrap();
        table.driven_bool("b", true).unwrap();
        assert_eq!(
            table.defaults(),
            vec![Value::Float(0.25), Value::Bool(true)]
        );
    }
}
