//! Guarded state graphs: discrete machines evaluated once per tick.
//!
//! Transitions compare register snapshots against constant thresholds; a
//! state's ordered transition list is checked first-match and at most one
//! transition fires per machine per tick. Entering a state applies its drive
//! actions (constant writes) at end of tick. A state may host a motion
//! fragment that contributes like a top-level fragment while the state is
//! active, weighted by crossfade progress during a timed transition.

use serde::{Deserialize, Serialize};

use crate::blend::BlendFragment;
use crate::registers::{BoolReg, BoolSink, FloatReg, FloatSink, RegisterId, Value};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StateId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Snapshot value, viewed as float, strictly above the threshold.
    Greater(f32),
    /// Strictly below the threshold.
    Less(f32),
    /// Bool register equals the literal.
    Is(bool),
    /// Int register equals the literal.
    IntEq(i32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub reg: RegisterId,
    pub pred: Predicate,
}

impl Condition {
    pub fn above(reg: FloatReg, threshold: f32) -> Self {
        Condition {
            reg: reg.0,
            pred: Predicate::Greater(threshold),
        }
    }

    pub fn below(reg: FloatReg, threshold: f32) -> Self {
        Condition {
            reg: reg.0,
            pred: Predicate::Less(threshold),
        }
    }

    pub fn is(reg: BoolReg, value: bool) -> Self {
        Condition {
            reg: reg.0,
            pred: Predicate::Is(value),
        }
    }

    pub fn holds(&self, snapshot: &Value) -> bool {
        match self.pred {
            Predicate::Greater(th) => snapshot.as_float() > th,
            Predicate::Less(th) => snapshot.as_float() < th,
            Predicate::Is(b) => snapshot.as_bool() == b,
            Predicate::IntEq(i) => matches!(snapshot, Value::Int(v) if *v == i),
        }
    }
}

/// All conditions must hold (AND). OR is expressed as multiple transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub to: StateId,
    pub conditions: Vec<Condition>,
    /// Crossfade duration in seconds; 0 switches instantly.
    #[serde(default)]
    pub duration: f32,
}

impl Transition {
    pub fn when(to: StateId, conditions: Vec<Condition>) -> Self {
        Transition {
            to,
            conditions,
            duration: 0.0,
        }
    }

    pub fn always(to: StateId) -> Self {
        Transition {
            to,
            conditions: Vec::new(),
            duration: 0.0,
        }
    }
}

/// Entry-time constant write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveAction {
    pub target: RegisterId,
    pub value: Value,
}

impl DriveAction {
    pub fn bool(sink: &BoolSink, value: bool) -> Self {
        DriveAction {
            target: sink.id(),
            value: Value::Bool(value),
        }
    }

    pub fn float(sink: &FloatSink, value: f32) -> Self {
        DriveAction {
            target: sink.id(),
            value: Value::Float(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    #[serde(default)]
    pub drives: Vec<DriveAction>,
    #[serde(default)]
    pub motion: Option<BlendFragment>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachine {
    pub name: String,
    pub states: Vec<State>,
    pub initial: StateId,
}

impl StateMachine {
    pub fn new(name: impl Into<String>) -> Self {
        StateMachine {
            name: name.into(),
            states: Vec::new(),
            initial: StateId(0),
        }
    }

    pub fn add_state(&mut self, name: impl Into<String>) -> StateId {
        let id = StateId(self.states.len() as u32);
        self.states.push(State {
            name: name.into(),
            drives: Vec::new(),
            motion: None,
            transitions: Vec::new(),
        });
        id
    }

    pub fn state(&self, id: StateId) -> &State {
        &self.states[id.0 as usize]
    }

    pub fn state_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id.0 as usize]
    }

    pub fn drive(&mut self, state: StateId, action: DriveAction) {
        self.state_mut(state).drives.push(action);
    }

    pub fn motion(&mut self, state: StateId, fragment: BlendFragment) {
        self.state_mut(state).motion = Some(fragment);
    }

    /// Append a transition; order is evaluation priority.
    pub fn transition(&mut self, from: StateId, transition: Transition) {
        self.state_mut(from).transitions.push(transition);
    }

    pub fn find_state(&self, name: &str) -> Option<StateId> {
        self.states
            .iter()
            .position(|s| s.name == name)
            .map(|i| StateId(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_predicates() {
        let greater = Condition {
            reg: RegisterId(0),
            pred: Predicate::Greater(0.5),
        };
        assert!(greater.holds(&Value::Float(0.6)));
        assert!(!greater.holds(&Value::Float(0.5)));

        let is_true = Condition {
            reg: RegisterId(0),
            pred: Predicate::Is(true),
        };
        assert!(is_true.holds(&Value::Bool(true)));
        assert!(!is_true.holds(&Value::Bool(false)));

        let int_eq = Condition {
            reg: RegisterId(0),
            pred: Predicate::IntEq(3),
        };
        assert!(int_eq.holds(&Value::Int(3)));
        assert!(!int_eq.holds(&Value::Float(3.0)));
    }

    #[test]
    fn machine_builder_indexes_states() {
        let mut m = StateMachine::new("demo");
        let a = m.add_state("a");
        let b = m.add_state("b");
        m.transition(a, Transition::always(b));
        assert_eq!(m.find_state("b"), Some(b));
        assert_eq!(m.state(a).transitions[0].to, b);
    }
}
