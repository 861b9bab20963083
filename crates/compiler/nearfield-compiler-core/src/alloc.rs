//! Register reservation against the surrounding merge/allocation service.
//!
//! The compiler never asserts global uniqueness itself: every fresh register
//! name is first offered to a [`RegisterBroker`], which owns the global
//! used-name set and the finite synchronized-parameter budget. Derived
//! intermediates are host-local and free; Source and Driven registers cross
//! the host boundary and count against the budget.

use hashbrown::HashSet;
use nearfield_substrate_core::RegisterKind;

use crate::error::ReserveError;

pub trait RegisterBroker {
    /// Reserve `name` globally. `synced` marks registers that consume the
    /// synchronized-parameter budget.
    fn reserve(
        &mut self,
        name: &str,
        kind: RegisterKind,
        synced: bool,
    ) -> Result<(), ReserveError>;
}

/// Reference broker: a used-name set plus a budget counter. Real builds wrap
/// the external allocation service instead.
#[derive(Debug)]
pub struct LocalBroker {
    used: HashSet<String>,
    budget: usize,
    synced_used: usize,
}

impl LocalBroker {
    pub fn new(budget: usize) -> Self {
        LocalBroker {
            used: HashSet::new(),
            budget,
            synced_used: 0,
        }
    }

    /// Pre-populate the used-name set, e.g. with names other features took.
    pub fn occupy(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    pub fn synced_used(&self) -> usize {
        self.synced_used
    }
}

impl RegisterBroker for LocalBroker {
    fn reserve(
        &mut self,
        name: &str,
        _kind: RegisterKind,
        synced: bool,
    ) -> Result<(), ReserveError> {
        if self.used.contains(name) {
            return Err(ReserveError::NameCollision(name.to_string()));
        }
        if synced && self.synced_used >= self.budget {
            return Err(ReserveError::BudgetExhausted(name.to_string()));
        }
        self.used.insert(name.to_string());
        if synced {
            self.synced_used += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_against_occupied_name() {
        let mut broker = LocalBroker::new(8);
        broker.occupy("other/feature/param");
        let err = broker
            .reserve("other/feature/param", RegisterKind::Float, false)
            .unwrap_err();
        assert!(matches!(err, ReserveError::NameCollision(_)));
    }

    #[test]
    fn budget_only_counts_synced() {
        let mut broker = LocalBroker::new(1);
        broker.reserve("a", RegisterKind::Float, false).unwrap();
        broker.reserve("b", RegisterKind::Float, true).unwrap();
        let err = broker.reserve("c", RegisterKind::Bool, true).unwrap_err();
        assert!(matches!(err, ReserveError::BudgetExhausted(_)));
        assert_eq!(broker.synced_used(), 1);
    }
}
