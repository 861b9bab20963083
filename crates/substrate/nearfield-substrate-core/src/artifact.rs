//! The combined build artifact handed to the host.
//!
//! Nearfield owns no file format; the artifact is a serde-serializable value
//! merged into a larger build by an external assembly step. Fragments listed
//! here are always active; fragments hosted inside machine states contribute
//! only while their state is.

use serde::{Deserialize, Serialize};

use crate::blend::BlendFragment;
use crate::graph::StateMachine;
use crate::registers::RegisterTable;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub registers: RegisterTable,
    pub fragments: Vec<BlendFragment>,
    pub machines: Vec<StateMachine>,
}

impl BuildArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn machine(&self, name: &str) -> Option<&StateMachine> {
        self.machines.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::{BlendFragment, BlendNode};
    use crate::graph::{StateMachine, Transition};

    #[test]
    fn artifact_round_trips_through_json() {
        let mut artifact = BuildArtifact::new();
        let tip = artifact.registers.source_float("pair/tip", 0.0).unwrap();
        let out = artifact.registers.derived_float("pair/out", 0.0).unwrap();
        artifact.fragments.push(BlendFragment::new(
            &out,
            BlendNode::identity(tip, 0.0, 1.0),
        ));
        let mut machine = StateMachine::new("toggle");
        let a = machine.add_state("low");
        let b = machine.add_state("high");
        machine.transition(a, Transition::when(b, vec![crate::graph::Condition::above(tip, 0.5)]));
        artifact.machines.push(machine);

        let json = serde_json::to_string(&artifact).unwrap();
        let back: BuildArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.registers.len(), 2);
        assert_eq!(back.fragments.len(), 1);
        assert_eq!(back.machine("toggle").unwrap().states.len(), 2);
    }
}
