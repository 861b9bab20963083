//! Reference evaluator: one tick per rendered frame, host semantics.
//!
//! Tick order:
//! 1. Snapshot every register. Source registers staged by the host are stable
//!    for the whole tick.
//! 2. Advance machines: each machine checks its current state's ordered
//!    transitions against the snapshot and fires at most one. Entry drives
//!    are deferred to commit.
//! 3. Zero an accumulator for every fragment target, then sample every
//!    top-level fragment and every active state motion against the snapshot,
//!    summing contributions per target.
//! 4. Commit accumulators, then drives.
//!
//! Because writes land after sampling, no fragment observes another's
//! current-tick output; a fragment whose tree reads its own target register
//! carries last tick's value forward, which is exactly the one-frame-delay
//! primitive the compiler builds on.

use hashbrown::HashMap;

use crate::artifact::BuildArtifact;
use crate::registers::{BoolReg, FloatReg, RegisterId, StorageClass, Value};
use crate::graph::StateId;

#[derive(Debug, Clone)]
struct Fade {
    from: StateId,
    remaining: f32,
    total: f32,
}

#[derive(Debug, Clone)]
struct MachineRuntime {
    current: StateId,
    fade: Option<Fade>,
}

#[derive(Debug)]
pub struct Evaluator {
    values: Vec<Value>,
    classes: Vec<StorageClass>,
    machines: Vec<MachineRuntime>,
    pub t: f32,
    pub frame: u64,
}

impl Evaluator {
    pub fn new(artifact: &BuildArtifact) -> Self {
        Evaluator {
            values: artifact.registers.defaults(),
            classes: artifact.registers.defs().iter().map(|d| d.class).collect(),
            machines: artifact
                .machines
                .iter()
                .map(|m| MachineRuntime {
                    current: m.initial,
                    fade: None,
                })
                .collect(),
            t: 0.0,
            frame: 0,
        }
    }

    /// Stage a Source float for the upcoming tick.
    pub fn set_source(&mut self, reg: FloatReg, value: f32) -> Result<(), String> {
        self.stage(reg.0, Value::Float(value))
    }

    /// Stage a Source bool for the upcoming tick.
    pub fn set_source_bool(&mut self, reg: BoolReg, value: bool) -> Result<(), String> {
        self.stage(reg.0, Value::Bool(value))
    }

    fn stage(&mut self, id: RegisterId, value: Value) -> Result<(), String> {
        let idx = id.0 as usize;
        if idx >= self.values.len() {
            return Err(format!("register {:?} out of range", id));
        }
        if self.classes[idx] != StorageClass::Source {
            return Err(format!(
                "register {:?} is {:?}, only Source registers accept host writes",
                id, self.classes[idx]
            ));
        }
        self.values[idx] = value;
        Ok(())
    }

    pub fn value(&self, id: RegisterId) -> Value {
        self.values[id.0 as usize]
    }

    pub fn float(&self, reg: FloatReg) -> f32 {
        self.value(reg.0).as_float()
    }

    pub fn bool(&self, reg: BoolReg) -> bool {
        self.value(reg.0).as_bool()
    }

    /// Name of a machine's current state, for assertions and diagnostics.
    pub fn state_name<'a>(&self, artifact: &'a BuildArtifact, machine: usize) -> &'a str {
        let rt = &self.machines[machine];
        &artifact.machines[machine].state(rt.current).name
    }

    pub fn tick(&mut self, artifact: &BuildArtifact, dt: f32) {
        let snapshot = self.values.clone();
        let read = |reg: FloatReg| snapshot[reg.0 .0 as usize].as_float();

        // Machines: at most one transition per machine per tick.
        let mut drives: Vec<(RegisterId, Value)> = Vec::new();
        for (machine, rt) in artifact.machines.iter().zip(self.machines.iter_mut()) {
            if let Some(fade) = rt.fade.as_mut() {
                fade.remaining -= dt;
                if fade.remaining <= 0.0 {
                    rt.fade = None;
                }
                continue;
            }
            let state = machine.state(rt.current);
            let fired = state.transitions.iter().find(|tr| {
                tr.conditions
                    .iter()
                    .all(|c| c.holds(&snapshot[c.reg.0 as usize]))
            });
            if let Some(tr) = fired {
                log::debug!(
                    "machine '{}' {} -> {}",
                    machine.name,
                    state.name,
                    machine.state(tr.to).name
                );
                for d in &machine.state(tr.to).drives {
                    drives.push((d.target, d.value));
                }
                if tr.duration > 0.0 {
                    rt.fade = Some(Fade {
                        from: rt.current,
                        remaining: tr.duration,
                        total: tr.duration,
                    });
                }
                rt.current = tr.to;
            }
        }

        // Fragments: every target is recomputed from zero each tick.
        let mut acc: HashMap<RegisterId, f32> = HashMap::new();
        for fragment in &artifact.fragments {
            acc.entry(fragment.target.0).or_insert(0.0);
        }
        for machine in &artifact.machines {
            for state in &machine.states {
                if let Some(motion) = &state.motion {
                    acc.entry(motion.target.0).or_insert(0.0);
                }
            }
        }
        for fragment in &artifact.fragments {
            *acc.get_mut(&fragment.target.0).unwrap() += fragment.root.sample(&read);
        }
        for (machine, rt) in artifact.machines.iter().zip(self.machines.iter()) {
            let (current_weight, from) = match &rt.fade {
                Some(fade) => (1.0 - fade.remaining / fade.total, Some(fade.from)),
                None => (1.0, None),
            };
            if let Some(motion) = &machine.state(rt.current).motion {
                *acc.get_mut(&motion.target.0).unwrap() += current_weight * motion.root.sample(&read);
            }
            if let Some(from) = from {
                if let Some(motion) = &machine.state(from).motion {
                    *acc.get_mut(&motion.target.0).unwrap() +=
                        (1.0 - current_weight) * motion.root.sample(&read);
                }
            }
        }

        // Commit: fragment outputs first, entry drives last.
        for (id, total) in acc {
            self.values[id.0 as usize] = Value::Float(total);
        }
        for (id, value) in drives {
            self.values[id.0 as usize] = value;
        }

        self.t += dt;
        self.frame += 1;
    }

    /// Tick `n` times with a fixed `dt`.
    pub fn run(&mut self, artifact: &BuildArtifact, dt: f32, n: usize) {
        for _ in 0..n {
            self.tick(artifact, dt);
        }
    }
}
