//! Nearest-candidate exclusive selector.
//!
//! N runtime-registered candidates each expose a request bool (externally
//! toggled) and a derived distance register. While the auto register holds,
//! an O(N^2) tournament machine keeps exactly one enable register true: the
//! requested candidate with the globally smallest distance.
//!
//! The pairwise signal is built from the IR itself: for each pair,
//! `share_ij = d_i / (d_i + d_j)` via `invert` and `multiply`. A share of 0.5
//! is an exact tie; the leader is only dethroned once its share exceeds
//! `win_share` (default 0.51, above the midpoint on purpose), so ties and
//! jitter inside the band stick with the lower index. A leader change is
//! therefore always strictly closer, which bounds one pass at N^2
//! transitions and rules out leader cycles.
//!
//! The tournament re-runs continuously while auto holds; re-running against
//! a stable distance snapshot re-drives the same winner, so the exclusive
//! enables never flap. Request edges are picked up within one pass.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use nearfield_substrate_core::{
    BoolReg, BoolSink, Condition, DriveAction, FloatReg, StateId, StateMachine, Transition,
};

use crate::error::BuildError;
use crate::program::{Normalized, Operand, Program, Term};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    /// Externally toggled: candidate wants to participate.
    pub request: BoolReg,
    /// Derived distance register (smaller is closer).
    pub distance: FloatReg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Share of the pair distance above which the leader loses. Above 0.5 by
    /// design: the gap is the anti-flapping hysteresis. Tunable, not
    /// load-bearing.
    pub win_share: f32,
    /// Hysteresis half-width of the share comparison.
    pub share_band: f32,
    /// Documented upper bound of every candidate distance register.
    pub distance_max: f32,
    /// Lower bound of a pair sum on the reciprocal curve.
    pub min_pair_sum: f32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            win_share: 0.51,
            share_band: 0.005,
            distance_max: 10.0,
            min_pair_sum: 0.05,
        }
    }
}

/// Exclusive enable registers, indexed like the candidate slice.
#[derive(Debug, Clone)]
pub struct Selector {
    pub enables: Vec<BoolReg>,
    pub machine: String,
}

pub fn build_selector(
    p: &mut Program,
    name: &str,
    candidates: &[Candidate],
    auto: BoolReg,
    cfg: &SelectorConfig,
) -> Result<Selector, BuildError> {
    if !(cfg.win_share > 0.5 && cfg.win_share < 1.0) {
        return Err(BuildError::Domain {
            register: name.to_string(),
            detail: format!("win_share {} must sit in (0.5, 1.0)", cfg.win_share),
        });
    }
    if cfg.distance_max <= 0.0 || cfg.min_pair_sum <= 0.0 {
        return Err(BuildError::Domain {
            register: name.to_string(),
            detail: "distance_max and min_pair_sum must be positive".to_string(),
        });
    }

    let n = candidates.len();
    let machine_name = format!("{name}/tournament");

    // Zero candidates is a legitimate configuration, not an error: the
    // machine is a lone Stop state that drives nothing.
    if n == 0 {
        log::debug!("selector '{name}': no candidates, emitting inert machine");
        let mut machine = StateMachine::new(machine_name.clone());
        machine.add_state("stop");
        p.machine(machine);
        return Ok(Selector {
            enables: Vec::new(),
            machine: machine_name,
        });
    }

    let enables: Vec<BoolSink> = candidates
        .iter()
        .map(|c| p.driven_bool(&format!("{name}/{}/enable", c.name), false))
        .collect::<Result<_, _>>()?;

    // Pairwise "leader i is beaten by j" signals, N >= 2 only.
    let dist_domain = (0.0, cfg.distance_max);
    let mut beaten: HashMap<(usize, usize), BoolReg> = HashMap::new();
    if n >= 2 {
        let norms: Vec<FloatReg> = candidates
            .iter()
            .map(|c| {
                let sink = p.derived_float(&format!("{name}/{}/d_norm", c.name), 0.0)?;
                p.copy(&sink, c.distance, 1.0 / cfg.distance_max, 0.0, dist_domain)?;
                Ok(sink.reg())
            })
            .collect::<Result<_, BuildError>>()?;

        for i in 0..n {
            for j in (i + 1)..n {
                let stem = format!("{name}/pair/{}_{}", candidates[i].name, candidates[j].name);
                let sum = p.derived_float(&format!("{stem}/sum"), cfg.min_pair_sum)?;
                p.add(
                    &sum,
                    &[
                        Term::reg(candidates[i].distance, 1.0, dist_domain),
                        Term::reg(candidates[j].distance, 1.0, dist_domain),
                    ],
                )?;
                let inv = p.derived_float(&format!("{stem}/inv"), 0.0)?;
                p.invert(&inv, sum.reg(), cfg.min_pair_sum, 2.0 * cfg.distance_max)?;
                let inv_norm = p.derived_float(&format!("{stem}/inv_norm"), 0.0)?;
                p.copy(
                    &inv_norm,
                    inv.reg(),
                    cfg.min_pair_sum,
                    0.0,
                    (0.0, 1.0 / cfg.min_pair_sum),
                )?;

                for (a, b) in [(i, j), (j, i)] {
                    let share = p.derived_float(
                        &format!("{name}/cmp/{}_{}/share", candidates[a].name, candidates[b].name),
                        0.5,
                    )?;
                    p.multiply(
                        &share,
                        Normalized::new(norms[a], cfg.distance_max),
                        Normalized::new(inv_norm.reg(), 1.0 / cfg.min_pair_sum),
                    )?;
                    let flag = p.greater_than(
                        &format!("{name}/cmp/{}_{}/beaten", candidates[a].name, candidates[b].name),
                        share.reg().into(),
                        Operand::Const(cfg.win_share),
                        false,
                        cfg.share_band,
                        (0.0, 1.0),
                    )?;
                    beaten.insert((a, b), flag);
                }
            }
        }
    }

    // Tournament machine.
    let mut machine = StateMachine::new(machine_name.clone());
    let stop = machine.add_state("stop");
    let start = machine.add_state("start");
    let activate: Vec<_> = candidates
        .iter()
        .map(|c| machine.add_state(format!("activate/{}", c.name)))
        .collect();
    let deactivate: Vec<_> = candidates
        .iter()
        .map(|c| machine.add_state(format!("deactivate/{}", c.name)))
        .collect();
    let mut compare = HashMap::new();
    if n >= 2 {
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let id = machine.add_state(format!(
                        "compare/{}/{}",
                        candidates[i].name, candidates[j].name
                    ));
                    compare.insert((i, j), id);
                }
            }
        }
    }

    let rivals = |i: usize| (0..n).filter(move |j| *j != i);
    // Where leader `i` begins its pass: the first comparison, or straight to
    // activation when there is nobody to compare against.
    let entry = |i: usize| -> StateId {
        match rivals(i).next() {
            Some(j) => compare[&(i, j)],
            None => activate[i],
        }
    };

    // Stop: retire stale enables first, then re-run the tournament. Every
    // exit requires auto, so disabling auto freezes the machine here and
    // leaves non-auto activation paths alone.
    for i in 0..n {
        machine.transition(
            stop,
            Transition::when(
                deactivate[i],
                vec![
                    Condition::is(auto, true),
                    Condition::is(enables[i].reg(), true),
                    Condition::is(candidates[i].request, false),
                ],
            ),
        );
    }
    machine.transition(stop, Transition::when(start, vec![Condition::is(auto, true)]));

    for i in 0..n {
        machine.drive(deactivate[i], DriveAction::bool(&enables[i], false));
        machine.transition(deactivate[i], Transition::always(start));
    }

    // Start: the first requested candidate in fixed index order leads.
    for i in 0..n {
        machine.transition(
            start,
            Transition::when(
                entry(i),
                vec![
                    Condition::is(auto, true),
                    Condition::is(candidates[i].request, true),
                ],
            ),
        );
    }
    machine.transition(start, Transition::always(stop));

    // Compare(i, j): a requested, decisively closer j takes over the pass;
    // otherwise move on to the next rival.
    for i in 0..n {
        let row: Vec<usize> = rivals(i).collect();
        for (slot, &j) in row.iter().enumerate() {
            let state = compare[&(i, j)];
            machine.transition(
                state,
                Transition::when(
                    entry(j),
                    vec![
                        Condition::is(candidates[j].request, true),
                        Condition::is(beaten[&(i, j)], true),
                    ],
                ),
            );
            let next = match row.get(slot + 1) {
                Some(&next_j) => compare[&(i, next_j)],
                None => activate[i],
            };
            machine.transition(state, Transition::always(next));
        }
    }

    // Activate(i): exclusivity is structural, every other enable is driven
    // false in the same state.
    for i in 0..n {
        for (k, sink) in enables.iter().enumerate() {
            machine.drive(activate[i], DriveAction::bool(sink, k == i));
        }
        machine.transition(activate[i], Transition::always(stop));
    }

    p.machine(machine);
    Ok(Selector {
        enables: enables.iter().map(|s| s.reg()).collect(),
        machine: machine_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::LocalBroker;
    use nearfield_substrate_core::Evaluator;

    const DT: f32 = 1.0 / 60.0;

    fn mk_candidates(p: &mut Program, distances: &[f32]) -> Vec<Candidate> {
        distances
            .iter()
            .enumerate()
            .map(|(i, d)| Candidate {
                name: format!("c{i}"),
                request: p.source_bool(&format!("req{i}"), false).unwrap(),
                distance: p.source_float(&format!("dist{i}"), *d).unwrap(),
            })
            .collect()
    }

    #[test]
    fn win_share_must_exceed_midpoint() {
        let mut broker = LocalBroker::new(64);
        let mut p = Program::new(&mut broker);
        let auto = p.source_bool("auto", true).unwrap();
        let cfg = SelectorConfig {
            win_share: 0.5,
            ..SelectorConfig::default()
        };
        let err = build_selector(&mut p, "sel", &[], auto, &cfg).unwrap_err();
        assert!(matches!(err, BuildError::Domain { .. }));
    }

    #[test]
    fn zero_candidates_stays_in_stop() {
        let mut broker = LocalBroker::new(64);
        let mut p = Program::new(&mut broker);
        let auto = p.source_bool("auto", true).unwrap();
        let sel = build_selector(&mut p, "sel", &[], auto, &SelectorConfig::default()).unwrap();
        let artifact = p.finish();

        assert!(sel.enables.is_empty());
        let machine = artifact.machine(&sel.machine).unwrap();
        assert_eq!(machine.states.len(), 1);

        let mut ev = Evaluator::new(&artifact);
        ev.run(&artifact, DT, 10);
        assert_eq!(ev.state_name(&artifact, 0), "stop");
    }

    #[test]
    fn single_candidate_has_no_compare_states() {
        let mut broker = LocalBroker::new(64);
        let mut p = Program::new(&mut broker);
        let auto = p.source_bool("auto", true).unwrap();
        let candidates = mk_candidates(&mut p, &[2.0]);
        let sel =
            build_selector(&mut p, "sel", &candidates, auto, &SelectorConfig::default()).unwrap();
        let artifact = p.finish();

        let machine = artifact.machine(&sel.machine).unwrap();
        assert!(machine.states.iter().all(|s| !s.name.starts_with("compare")));

        let mut ev = Evaluator::new(&artifact);
        ev.run(&artifact, DT, 5);
        assert!(!ev.bool(sel.enables[0]));

        ev.set_source_bool(candidates[0].request, true).unwrap();
        ev.run(&artifact, DT, 5);
        assert!(ev.bool(sel.enables[0]));

        ev.set_source_bool(candidates[0].request, false).unwrap();
        ev.run(&artifact, DT, 5);
        assert!(!ev.bool(sel.enables[0]));
    }

    #[test]
    fn three_candidates_nearest_wins_exclusively() {
        let mut broker = LocalBroker::new(64);
        let mut p = Program::new(&mut broker);
        let auto = p.source_bool("auto", true).unwrap();
        let candidates = mk_candidates(&mut p, &[5.0, 2.0, 8.0]);
        let sel =
            build_selector(&mut p, "sel", &candidates, auto, &SelectorConfig::default()).unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        for c in &candidates {
            ev.set_source_bool(c.request, true).unwrap();
        }
        ev.run(&artifact, DT, 40);
        assert!(!ev.bool(sel.enables[0]));
        assert!(ev.bool(sel.enables[1]));
        assert!(!ev.bool(sel.enables[2]));
    }

    #[test]
    fn exact_tie_keeps_first_index_without_oscillation() {
        let mut broker = LocalBroker::new(64);
        let mut p = Program::new(&mut broker);
        let auto = p.source_bool("auto", true).unwrap();
        let candidates = mk_candidates(&mut p, &[4.0, 4.0]);
        let sel =
            build_selector(&mut p, "sel", &candidates, auto, &SelectorConfig::default()).unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        for c in &candidates {
            ev.set_source_bool(c.request, true).unwrap();
        }
        ev.run(&artifact, DT, 40);
        assert!(ev.bool(sel.enables[0]));
        assert!(!ev.bool(sel.enables[1]));
        // Re-running passes must not flip the winner.
        for _ in 0..100 {
            ev.tick(&artifact, DT);
            assert!(ev.bool(sel.enables[0]));
            assert!(!ev.bool(sel.enables[1]));
        }
    }

    #[test]
    fn disabling_auto_freezes_enables() {
        let mut broker = LocalBroker::new(64);
        let mut p = Program::new(&mut broker);
        let auto = p.source_bool("auto", true).unwrap();
        let candidates = mk_candidates(&mut p, &[1.0, 3.0]);
        let sel =
            build_selector(&mut p, "sel", &candidates, auto, &SelectorConfig::default()).unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        for c in &candidates {
            ev.set_source_bool(c.request, true).unwrap();
        }
        ev.run(&artifact, DT, 40);
        assert!(ev.bool(sel.enables[0]));

        // Auto off: even a request drop no longer touches the enables.
        ev.set_source_bool(auto, false).unwrap();
        ev.set_source_bool(candidates[0].request, false).unwrap();
        ev.run(&artifact, DT, 30);
        assert!(ev.bool(sel.enables[0]));
    }
}
