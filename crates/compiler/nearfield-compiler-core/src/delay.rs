//! Memory primitives: one-frame delay, change-gated latch, differentiation.
//!
//! The substrate's commit-at-end-of-tick rule makes a plain copy fragment the
//! unit delay: the copy's target carries the value its source had at the
//! start of the tick, so consumers one stage downstream always see the
//! previous frame. The latch wraps the same copy in a two-state machine
//! ("update" / "maintain") so the value can be frozen by a bool guard, and
//! differentiation combines delays, a latch and the reciprocal curve into a
//! per-frame rate.

use serde::{Deserialize, Serialize};

use nearfield_substrate_core::{
    BlendFragment, BlendNode, BoolReg, Condition, FloatReg, StateMachine, Transition,
};

use crate::error::BuildError;
use crate::program::{Operand, Program, Term};

/// `dst` equals `src` as of the previous frame; before the first tick it
/// equals `default`.
pub fn buffer(
    p: &mut Program,
    name: &str,
    src: FloatReg,
    default: f32,
    domain: (f32, f32),
) -> Result<FloatReg, BuildError> {
    let dst = p.derived_float(name, default)?;
    p.copy(&dst, src, 1.0, 0.0, domain)?;
    Ok(dst.reg())
}

/// `dst` tracks `value` while `update_when` holds and keeps the last tracked
/// value otherwise. Starts in "maintain", holding `default`.
pub fn latch(
    p: &mut Program,
    name: &str,
    value: FloatReg,
    update_when: BoolReg,
    default: f32,
    domain: (f32, f32),
) -> Result<FloatReg, BuildError> {
    let dst = p.derived_float(name, default)?;
    let mut machine = StateMachine::new(format!("{name}/latch"));
    let maintain = machine.add_state("maintain");
    let update = machine.add_state("update");
    machine.motion(
        maintain,
        BlendFragment::new(&dst, BlendNode::identity(dst.reg(), domain.0, domain.1)),
    );
    machine.motion(
        update,
        BlendFragment::new(&dst, BlendNode::identity(value, domain.0, domain.1)),
    );
    machine.transition(
        maintain,
        Transition::when(update, vec![Condition::is(update_when, true)]),
    );
    machine.transition(
        update,
        Transition::when(maintain, vec![Condition::is(update_when, false)]),
    );
    p.machine(machine);
    Ok(dst.reg())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DifferentiateParams {
    /// Bound on |value change| per frame; the rate normalization range.
    pub max_step: f32,
    /// Smallest credible frame delta. Time deltas below `dt_min / 2` are
    /// treated as a stalled clock and freeze the output.
    pub dt_min: f32,
    /// Largest frame delta on the reciprocal curve.
    pub dt_max: f32,
    /// Documented operating range of `value`.
    pub value_domain: (f32, f32),
    /// Documented operating range of `time`.
    pub time_domain: (f32, f32),
}

impl Default for DifferentiateParams {
    fn default() -> Self {
        DifferentiateParams {
            max_step: 1.0,
            dt_min: 1.0 / 240.0,
            dt_max: 0.5,
            value_domain: (0.0, 1.0),
            time_domain: (0.0, 1.0e6),
        }
    }
}

/// Per-frame rate of change: `(value - buffer(value)) / (time - buffer(time))`.
///
/// The time delta is compared against `dt_min / 2` and both the value delta
/// and the time delta are latched while the clock is advancing, so a stalled
/// clock freezes the output instead of feeding a zero denominator to the
/// reciprocal curve. The result settles a few frames behind its inputs.
pub fn differentiate(
    p: &mut Program,
    name: &str,
    value: FloatReg,
    time: FloatReg,
    params: DifferentiateParams,
) -> Result<FloatReg, BuildError> {
    if !params.max_step.is_finite() || params.max_step <= 0.0 {
        return Err(BuildError::Domain {
            register: name.to_string(),
            detail: "differentiate max_step must be finite and positive".to_string(),
        });
    }
    if params.dt_min <= 0.0 || params.dt_max <= params.dt_min {
        return Err(BuildError::Domain {
            register: name.to_string(),
            detail: "differentiate requires 0 < dt_min < dt_max".to_string(),
        });
    }

    let prev_value = buffer(
        p,
        &format!("{name}/prev_value"),
        value,
        params.value_domain.0,
        params.value_domain,
    )?;
    let prev_time = buffer(
        p,
        &format!("{name}/prev_time"),
        time,
        params.time_domain.0,
        params.time_domain,
    )?;

    let delta = p.derived_float(&format!("{name}/delta"), 0.0)?;
    p.add(
        &delta,
        &[
            Term::reg(value, 1.0, params.value_domain),
            Term::reg(prev_value, -1.0, params.value_domain),
        ],
    )?;
    let dt = p.derived_float(&format!("{name}/dt"), 0.0)?;
    p.add(
        &dt,
        &[
            Term::reg(time, 1.0, params.time_domain),
            Term::reg(prev_time, -1.0, params.time_domain),
        ],
    )?;

    let ticking = p.greater_than(
        &format!("{name}/ticking"),
        dt.reg().into(),
        Operand::Const(params.dt_min / 2.0),
        false,
        params.dt_min / 4.0,
        params.time_domain,
    )?;

    let held_delta = latch(
        p,
        &format!("{name}/held_delta"),
        delta.reg(),
        ticking,
        0.0,
        (-params.max_step, params.max_step),
    )?;
    let held_dt = latch(
        p,
        &format!("{name}/held_dt"),
        dt.reg(),
        ticking,
        params.dt_min,
        (0.0, params.dt_max),
    )?;

    let inv_dt = p.derived_float(&format!("{name}/inv_dt"), 1.0 / params.dt_max)?;
    p.invert(&inv_dt, held_dt, params.dt_min, params.dt_max)?;

    p.signed_product(
        name,
        held_delta,
        (-params.max_step, params.max_step),
        inv_dt.reg(),
        1.0 / params.dt_min,
    )
}
