//! The linear IR and its lowering onto the substrate.
//!
//! A [`Program`] owns a [`BuildArtifact`] under construction and a borrow of
//! the external [`RegisterBroker`]. Each primitive is pure apart from writing
//! its own derived register once per evaluation, and lowers to either a blend
//! fragment or a small guarded state machine:
//!
//! - `constant`, `copy`, `add` -> additive fragment trees,
//! - `multiply` -> a bilinear `Map2D` surface over two [0,1]-normalized
//!   operands,
//! - `invert` -> a monotonic sampled reciprocal curve,
//! - `greater_than`, `all_of` -> two-state machines driving a bool register,
//!   with a hysteresis band against flapping at equality,
//! - `conditional_select` -> a hub-and-leaves guarded machine hosting one
//!   fragment per branch.
//!
//! Domain rules are enforced at build time; at runtime the substrate clamps
//! drivers to the declared sample range, so an out-of-domain value saturates
//! instead of extrapolating.

use nearfield_substrate_core::{
    BlendFragment, BlendNode, BoolReg, BoolSink, BuildArtifact, Condition, DriveAction, FloatReg,
    FloatSink, RegisterId, RegisterKind, StateMachine, Transition,
};

use crate::alloc::RegisterBroker;
use crate::error::BuildError;

/// Number of samples on the reciprocal curve. Geometric spacing keeps the
/// relative interpolation error of 1/x roughly uniform across the domain; at
/// 33 samples a 400:1 domain stays under 1% error, which keeps a distance
/// tie's share signal inside the selector's hysteresis band.
const INVERT_SAMPLES: usize = 33;

/// Default hysteresis half-width for comparisons.
pub const DEFAULT_BAND: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Reg(FloatReg),
    Const(f32),
}

impl From<FloatReg> for Operand {
    fn from(reg: FloatReg) -> Self {
        Operand::Reg(reg)
    }
}

impl From<f32> for Operand {
    fn from(v: f32) -> Self {
        Operand::Const(v)
    }
}

/// One weighted term of an `add`. Register terms carry the documented
/// operating range of the register, which becomes the passthrough domain of
/// the lowered map.
#[derive(Debug, Clone, Copy)]
pub struct Term {
    pub operand: Operand,
    pub weight: f32,
    pub domain: (f32, f32),
}

impl Term {
    pub fn reg(reg: FloatReg, weight: f32, domain: (f32, f32)) -> Self {
        Term {
            operand: Operand::Reg(reg),
            weight,
            domain,
        }
    }

    pub fn constant(value: f32, weight: f32) -> Self {
        Term {
            operand: Operand::Const(value),
            weight,
            domain: (0.0, 1.0),
        }
    }
}

/// A multiply operand: a register the caller has normalized into [0,1], plus
/// the scale factor that was divided out. The product is rescaled by the two
/// scales on output.
#[derive(Debug, Clone, Copy)]
pub struct Normalized {
    pub reg: FloatReg,
    pub scale: f32,
}

impl Normalized {
    pub fn new(reg: FloatReg, scale: f32) -> Self {
        Normalized { reg, scale }
    }

    /// Operand already in [0,1] with no rescaling.
    pub fn unit(reg: FloatReg) -> Self {
        Normalized { reg, scale: 1.0 }
    }
}

/// One branch of a `conditional_select`: a conjunction of bool literals
/// guarding a candidate fragment.
#[derive(Debug, Clone)]
pub struct SelectBranch {
    pub when: Vec<(BoolReg, bool)>,
    pub node: BlendNode,
}

impl SelectBranch {
    pub fn new(when: Vec<(BoolReg, bool)>, node: BlendNode) -> Self {
        SelectBranch { when, node }
    }
}

pub struct Program<'b> {
    artifact: BuildArtifact,
    broker: &'b mut dyn RegisterBroker,
}

impl<'b> Program<'b> {
    pub fn new(broker: &'b mut dyn RegisterBroker) -> Self {
        Program {
            artifact: BuildArtifact::new(),
            broker,
        }
    }

    pub fn artifact(&self) -> &BuildArtifact {
        &self.artifact
    }

    pub fn finish(self) -> BuildArtifact {
        self.artifact
    }

    pub fn name_of(&self, id: RegisterId) -> &str {
        &self.artifact.registers.def(id).name
    }

    // ---- allocation -------------------------------------------------------

    /// Reserve a fresh name with the external service. Re-allocating a name
    /// this build already owns is idempotent and skips the broker.
    fn ensure_reserved(
        &mut self,
        name: &str,
        kind: RegisterKind,
        synced: bool,
    ) -> Result<(), BuildError> {
        if self.artifact.registers.lookup(name).is_none() {
            self.broker.reserve(name, kind, synced)?;
        }
        Ok(())
    }

    fn collision(name: &str, detail: String) -> BuildError {
        BuildError::NameCollision {
            name: name.to_string(),
            detail,
        }
    }

    pub fn source_float(&mut self, name: &str, default: f32) -> Result<FloatReg, BuildError> {
        self.ensure_reserved(name, RegisterKind::Float, true)?;
        self.artifact
            .registers
            .source_float(name, default)
            .map_err(|d| Self::collision(name, d))
    }

    pub fn source_bool(&mut self, name: &str, default: bool) -> Result<BoolReg, BuildError> {
        self.ensure_reserved(name, RegisterKind::Bool, true)?;
        self.artifact
            .registers
            .source_bool(name, default)
            .map_err(|d| Self::collision(name, d))
    }

    /// Derived intermediates are host-local: no synchronized budget cost.
    pub fn derived_float(&mut self, name: &str, default: f32) -> Result<FloatSink, BuildError> {
        self.ensure_reserved(name, RegisterKind::Float, false)?;
        self.artifact
            .registers
            .derived_float(name, default)
            .map_err(|d| Self::collision(name, d))
    }

    pub fn driven_bool(&mut self, name: &str, default: bool) -> Result<BoolSink, BuildError> {
        self.ensure_reserved(name, RegisterKind::Bool, true)?;
        self.artifact
            .registers
            .driven_bool(name, default)
            .map_err(|d| Self::collision(name, d))
    }

    pub fn driven_float(&mut self, name: &str, default: f32) -> Result<FloatSink, BuildError> {
        self.ensure_reserved(name, RegisterKind::Float, true)?;
        self.artifact
            .registers
            .driven_float(name, default)
            .map_err(|d| Self::collision(name, d))
    }

    pub(crate) fn fragment(&mut self, fragment: BlendFragment) {
        self.artifact.fragments.push(fragment);
    }

    pub(crate) fn machine(&mut self, machine: StateMachine) {
        self.artifact.machines.push(machine);
    }

    // ---- arithmetic primitives -------------------------------------------

    /// `dst` always outputs `v`.
    pub fn constant(&mut self, dst: &FloatSink, v: f32) {
        self.fragment(BlendFragment::new(dst, BlendNode::Value(v)));
    }

    /// Affine passthrough `dst = scale * src + shift` over the declared
    /// driver domain (negation via `scale = -1`).
    pub fn copy(
        &mut self,
        dst: &FloatSink,
        src: FloatReg,
        scale: f32,
        shift: f32,
        domain: (f32, f32),
    ) -> Result<(), BuildError> {
        self.check_domain(dst, domain)?;
        if !scale.is_finite() || !shift.is_finite() {
            return Err(self.domain_error(dst, "copy scale/shift must be finite"));
        }
        self.fragment(BlendFragment::new(
            dst,
            BlendNode::affine(src, scale, shift, domain.0, domain.1),
        ));
        Ok(())
    }

    /// Weighted sum of terms. Arity above two is binary-decomposed into a
    /// left-leaning `Sum` tree, because the substrate blends exactly two
    /// children at a time.
    pub fn add(&mut self, dst: &FloatSink, terms: &[Term]) -> Result<(), BuildError> {
        if terms.is_empty() {
            return Err(self.domain_error(dst, "add needs at least one term"));
        }
        let mut nodes = Vec::with_capacity(terms.len());
        for term in terms {
            let node = match term.operand {
                Operand::Reg(reg) => {
                    self.check_domain(dst, term.domain)?;
                    BlendNode::identity(reg, term.domain.0, term.domain.1)
                }
                Operand::Const(c) => BlendNode::Value(c),
            };
            nodes.push((term.weight, node));
        }
        let mut iter = nodes.into_iter();
        let (w0, n0) = iter.next().unwrap();
        let mut acc = match iter.next() {
            None => BlendNode::Sum {
                left: (w0, Box::new(n0)),
                right: (0.0, Box::new(BlendNode::Value(0.0))),
            },
            Some((w1, n1)) => BlendNode::Sum {
                left: (w0, Box::new(n0)),
                right: (w1, Box::new(n1)),
            },
        };
        for (w, n) in iter {
            acc = BlendNode::Sum {
                left: (1.0, Box::new(acc)),
                right: (w, Box::new(n)),
            };
        }
        self.fragment(BlendFragment::new(dst, acc));
        Ok(())
    }

    /// `dst = a * b` via a bilinear surface sampling exactly four corners.
    ///
    /// Both operands must be registers normalized into [0,1]; `a*b` is
    /// bilinear in its operands, so the surface through corner values
    /// (0, 0, 0, scale_a*scale_b) reproduces the rescaled product exactly
    /// across the whole unit square. Out-of-domain driver values clamp.
    pub fn multiply(
        &mut self,
        dst: &FloatSink,
        a: Normalized,
        b: Normalized,
    ) -> Result<(), BuildError> {
        for op in [&a, &b] {
            if !op.scale.is_finite() || op.scale <= 0.0 {
                return Err(self.domain_error(
                    dst,
                    "multiply operand scale must be finite and positive",
                ));
            }
        }
        self.fragment(BlendFragment::new(
            dst,
            BlendNode::Map2D {
                x: a.reg,
                y: b.reg,
                corners: Box::new([
                    BlendNode::Value(0.0),
                    BlendNode::Value(0.0),
                    BlendNode::Value(0.0),
                    BlendNode::Value(a.scale * b.scale),
                ]),
            },
        ));
        Ok(())
    }

    /// `dst = 1 / src` via a monotonic sampled curve over `[min, max]`.
    ///
    /// `min` must be strictly positive: the curve never reaches the
    /// singularity at 0, and inputs below `min` clamp to `1/min` (the curve's
    /// largest value), inputs above `max` to `1/max`.
    pub fn invert(
        &mut self,
        dst: &FloatSink,
        src: FloatReg,
        min: f32,
        max: f32,
    ) -> Result<(), BuildError> {
        if !(min.is_finite() && max.is_finite()) || min <= 0.0 || max <= min {
            return Err(self.domain_error(
                dst,
                "invert requires 0 < min < max (singularity at 0 is out of domain)",
            ));
        }
        let ratio = (max / min).powf(1.0 / (INVERT_SAMPLES - 1) as f32);
        let mut points = Vec::with_capacity(INVERT_SAMPLES);
        let mut x = min;
        for _ in 0..INVERT_SAMPLES {
            points.push((x, BlendNode::Value(1.0 / x)));
            x *= ratio;
        }
        self.fragment(BlendFragment::new(dst, BlendNode::map1d(src, points)));
        Ok(())
    }

    // ---- comparison and branching ----------------------------------------

    /// `a > b` (or `a >= b`) as a bool register.
    ///
    /// The substrate has no continuous comparator, so this is a two-state
    /// machine: the low state drives `false`, the high state drives `true`.
    /// The machine rises once the inequality exceeds the hysteresis band and
    /// falls once it drops below the opposite bound, so a signal oscillating
    /// inside the band toggles at most once. With `or_equal` the band sits
    /// just below the threshold so exact equality reads as above.
    ///
    /// `name` becomes the driven bool register; `domain` is the documented
    /// operand range, used when both operands are registers and a difference
    /// fragment must be emitted first.
    pub fn greater_than(
        &mut self,
        name: &str,
        a: Operand,
        b: Operand,
        or_equal: bool,
        band: f32,
        domain: (f32, f32),
    ) -> Result<BoolReg, BuildError> {
        if !band.is_finite() || band <= 0.0 {
            return Err(BuildError::Domain {
                register: name.to_string(),
                detail: "comparison band must be finite and positive".to_string(),
            });
        }

        // Constant fold: no machine needed.
        if let (Operand::Const(x), Operand::Const(y)) = (a, b) {
            let value = if or_equal { x >= y } else { x > y };
            return Ok(self.driven_bool(name, value)?.reg());
        }

        let (rise, fall) = match (a, b) {
            (Operand::Reg(r), Operand::Const(c)) => {
                let center = if or_equal { c - 2.0 * band } else { c };
                (
                    Condition::above(r, center + band),
                    Condition::below(r, center - band),
                )
            }
            (Operand::Const(c), Operand::Reg(r)) => {
                // c > r is r < c.
                let center = if or_equal { c + 2.0 * band } else { c };
                (
                    Condition::below(r, center - band),
                    Condition::above(r, center + band),
                )
            }
            (Operand::Reg(ra), Operand::Reg(rb)) => {
                let diff = self.derived_float(&format!("{name}/diff"), 0.0)?;
                self.add(
                    &diff,
                    &[Term::reg(ra, 1.0, domain), Term::reg(rb, -1.0, domain)],
                )?;
                let center = if or_equal { -2.0 * band } else { 0.0 };
                (
                    Condition::above(diff.reg(), center + band),
                    Condition::below(diff.reg(), center - band),
                )
            }
            (Operand::Const(_), Operand::Const(_)) => unreachable!(),
        };

        let out = self.driven_bool(name, false)?;
        let mut machine = StateMachine::new(name.to_string());
        let low = machine.add_state("low");
        let high = machine.add_state("high");
        machine.drive(low, DriveAction::bool(&out, false));
        machine.drive(high, DriveAction::bool(&out, true));
        machine.transition(low, Transition::when(high, vec![rise]));
        machine.transition(high, Transition::when(low, vec![fall]));
        self.machine(machine);
        Ok(out.reg())
    }

    /// Conjunction of bool literals as a driven bool register: a two-state
    /// machine that rises when every literal holds and falls on any single
    /// failing literal (one transition per negated literal).
    pub fn all_of(
        &mut self,
        name: &str,
        literals: &[(BoolReg, bool)],
    ) -> Result<BoolReg, BuildError> {
        if literals.is_empty() {
            return Err(BuildError::Domain {
                register: name.to_string(),
                detail: "all_of needs at least one literal".to_string(),
            });
        }
        let out = self.driven_bool(name, false)?;
        let mut machine = StateMachine::new(name.to_string());
        let low = machine.add_state("low");
        let high = machine.add_state("high");
        machine.drive(low, DriveAction::bool(&out, false));
        machine.drive(high, DriveAction::bool(&out, true));
        machine.transition(
            low,
            Transition::when(
                high,
                literals
                    .iter()
                    .map(|(reg, v)| Condition::is(*reg, *v))
                    .collect(),
            ),
        );
        for (reg, v) in literals {
            machine.transition(high, Transition::when(low, vec![Condition::is(*reg, !*v)]));
        }
        self.machine(machine);
        Ok(out.reg())
    }

    /// The branching primitive: blend trees cannot branch, so each branch
    /// fragment lives in a leaf of a guarded machine.
    ///
    /// From the fallback hub, ordered transitions enter the first branch
    /// whose conjunction holds (earlier branches win overlaps). A leaf is
    /// preempted directly by any higher-priority branch whose guard becomes
    /// true, and exits to the hub when one of its own literals fails; the hub
    /// then re-dispatches. Settles within two ticks of the guards going
    /// stable.
    pub fn conditional_select(
        &mut self,
        dst: &FloatSink,
        branches: &[SelectBranch],
        fallback: BlendNode,
    ) -> Result<(), BuildError> {
        let dst_name = self.name_of(dst.id()).to_string();
        if branches.is_empty() {
            return Err(BuildError::EmptySelect { register: dst_name });
        }
        let mut machine = StateMachine::new(format!("{dst_name}/select"));
        let hub = machine.add_state("fallback");
        machine.motion(hub, BlendFragment::new(dst, fallback));

        let mut leaves = Vec::with_capacity(branches.len());
        for (i, branch) in branches.iter().enumerate() {
            let leaf = machine.add_state(format!("branch{i}"));
            machine.motion(leaf, BlendFragment::new(dst, branch.node.clone()));
            leaves.push(leaf);
        }
        for (i, branch) in branches.iter().enumerate() {
            machine.transition(
                hub,
                Transition::when(
                    leaves[i],
                    branch
                        .when
                        .iter()
                        .map(|(reg, v)| Condition::is(*reg, *v))
                        .collect(),
                ),
            );
        }
        for (i, branch) in branches.iter().enumerate() {
            // Higher-priority branches preempt this leaf directly.
            for (k, other) in branches.iter().enumerate().take(i) {
                machine.transition(
                    leaves[i],
                    Transition::when(
                        leaves[k],
                        other
                            .when
                            .iter()
                            .map(|(reg, v)| Condition::is(*reg, *v))
                            .collect(),
                    ),
                );
            }
            // Any failing literal of our own guard sends us back to the hub.
            for (reg, v) in &branch.when {
                machine.transition(
                    leaves[i],
                    Transition::when(hub, vec![Condition::is(*reg, !*v)]),
                );
            }
        }
        self.machine(machine);
        Ok(())
    }

    /// `a * b` for a signed `a` and a non-negative `b`, built from the
    /// normalized `multiply`: `a` is shifted into [0,1] first and the shift
    /// is compensated with an additive term, `(a - lo)*b + lo*b = a*b`.
    /// Output settles three ticks behind its inputs.
    pub fn signed_product(
        &mut self,
        name: &str,
        a: FloatReg,
        a_range: (f32, f32),
        b: FloatReg,
        b_max: f32,
    ) -> Result<FloatReg, BuildError> {
        let (lo, hi) = a_range;
        if !(lo.is_finite() && hi.is_finite()) || lo >= hi {
            return Err(BuildError::Domain {
                register: name.to_string(),
                detail: format!("signed_product range ({lo}, {hi}) is not an interval"),
            });
        }
        if !b_max.is_finite() || b_max <= 0.0 {
            return Err(BuildError::Domain {
                register: name.to_string(),
                detail: "signed_product b_max must be finite and positive".to_string(),
            });
        }
        let span = hi - lo;
        let a_n = self.derived_float(&format!("{name}/a_norm"), 0.0)?;
        self.copy(&a_n, a, 1.0 / span, -lo / span, (lo, hi))?;
        let b_n = self.derived_float(&format!("{name}/b_norm"), 0.0)?;
        self.copy(&b_n, b, 1.0 / b_max, 0.0, (0.0, b_max))?;
        let shifted = self.derived_float(&format!("{name}/shifted"), 0.0)?;
        self.multiply(
            &shifted,
            Normalized::new(a_n.reg(), span),
            Normalized::new(b_n.reg(), b_max),
        )?;
        if lo == 0.0 {
            return Ok(shifted.reg());
        }
        let out = self.derived_float(name, 0.0)?;
        self.add(
            &out,
            &[
                Term::reg(shifted.reg(), 1.0, (0.0, span * b_max)),
                Term::reg(b, lo, (0.0, b_max)),
            ],
        )?;
        Ok(out.reg())
    }

    fn check_domain(&self, dst: &FloatSink, domain: (f32, f32)) -> Result<(), BuildError> {
        if !(domain.0.is_finite() && domain.1.is_finite()) || domain.0 >= domain.1 {
            return Err(self.domain_error(dst, "driver domain is not a finite interval"));
        }
        Ok(())
    }

    fn domain_error(&self, dst: &FloatSink, detail: &str) -> BuildError {
        BuildError::Domain {
            register: self.name_of(dst.id()).to_string(),
            detail: detail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::LocalBroker;
    use nearfield_substrate_core::Evaluator;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn add_binary_decomposes_and_sums() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let a = p.source_float("a", 0.0).unwrap();
        let b = p.source_float("b", 0.0).unwrap();
        let c = p.source_float("c", 0.0).unwrap();
        let out = p.derived_float("sum", 0.0).unwrap();
        p.add(
            &out,
            &[
                Term::reg(a, 1.0, (0.0, 1.0)),
                Term::reg(b, 2.0, (0.0, 1.0)),
                Term::reg(c, -1.0, (0.0, 1.0)),
                Term::constant(0.5, 1.0),
            ],
        )
        .unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        ev.set_source(a, 0.25).unwrap();
        ev.set_source(b, 0.5).unwrap();
        ev.set_source(c, 0.75).unwrap();
        ev.run(&artifact, DT, 2);
        assert!((ev.float(out.reg()) - (0.25 + 1.0 - 0.75 + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn multiply_rescales_by_operand_scales() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let a = p.source_float("a", 0.0).unwrap();
        let b = p.source_float("b", 0.0).unwrap();
        let out = p.derived_float("prod", 0.0).unwrap();
        // a normalized from [0, 4], b normalized from [0, 10].
        p.multiply(&out, Normalized::new(a, 4.0), Normalized::new(b, 10.0))
            .unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        ev.set_source(a, 0.5).unwrap(); // represents 2.0
        ev.set_source(b, 0.3).unwrap(); // represents 3.0
        ev.run(&artifact, DT, 2);
        assert!((ev.float(out.reg()) - 6.0).abs() < 1e-4);
    }

    #[test]
    fn multiply_rejects_bad_scale() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let a = p.source_float("a", 0.0).unwrap();
        let out = p.derived_float("prod", 0.0).unwrap();
        let err = p
            .multiply(&out, Normalized::new(a, -1.0), Normalized::unit(a))
            .unwrap_err();
        assert!(matches!(err, BuildError::Domain { .. }));
    }

    #[test]
    fn invert_rejects_singular_domain() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let a = p.source_float("a", 1.0).unwrap();
        let out = p.derived_float("inv", 0.0).unwrap();
        let err = p.invert(&out, a, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, BuildError::Domain { .. }));
    }

    #[test]
    fn invert_clamps_below_min() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let a = p.source_float("a", 1.0).unwrap();
        let out = p.derived_float("inv", 0.0).unwrap();
        p.invert(&out, a, 0.5, 8.0).unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        ev.set_source(a, 0.01).unwrap();
        ev.run(&artifact, DT, 2);
        assert!((ev.float(out.reg()) - 2.0).abs() < 1e-4);
    }

    #[test]
    fn greater_than_constant_folds() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let yes = p
            .greater_than("yes", 2.0.into(), 1.0.into(), false, DEFAULT_BAND, (0.0, 1.0))
            .unwrap();
        let no = p
            .greater_than("no", 1.0.into(), 1.0.into(), false, DEFAULT_BAND, (0.0, 1.0))
            .unwrap();
        let eq = p
            .greater_than("eq", 1.0.into(), 1.0.into(), true, DEFAULT_BAND, (0.0, 1.0))
            .unwrap();
        let artifact = p.finish();
        assert!(artifact.machines.is_empty());

        let ev = Evaluator::new(&artifact);
        assert!(ev.bool(yes));
        assert!(!ev.bool(no));
        assert!(ev.bool(eq));
    }

    #[test]
    fn conditional_select_priority_and_fallback() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let ga = p.source_bool("ga", false).unwrap();
        let gb = p.source_bool("gb", false).unwrap();
        let out = p.derived_float("sel", 0.0).unwrap();
        p.conditional_select(
            &out,
            &[
                SelectBranch::new(vec![(ga, true)], BlendNode::Value(1.0)),
                SelectBranch::new(vec![(gb, true)], BlendNode::Value(2.0)),
            ],
            BlendNode::Value(-1.0),
        )
        .unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        ev.run(&artifact, DT, 2);
        assert_eq!(ev.float(out.reg()), -1.0);

        ev.set_source_bool(gb, true).unwrap();
        ev.run(&artifact, DT, 3);
        assert_eq!(ev.float(out.reg()), 2.0);

        // Higher-priority branch preempts without passing through fallback.
        ev.set_source_bool(ga, true).unwrap();
        ev.run(&artifact, DT, 3);
        assert_eq!(ev.float(out.reg()), 1.0);

        ev.set_source_bool(ga, false).unwrap();
        ev.set_source_bool(gb, false).unwrap();
        ev.run(&artifact, DT, 3);
        assert_eq!(ev.float(out.reg()), -1.0);
    }

    #[test]
    fn signed_product_handles_negative_operand() {
        let mut broker = LocalBroker::new(16);
        let mut p = Program::new(&mut broker);
        let a = p.source_float("a", 0.0).unwrap();
        let b = p.source_float("b", 0.0).unwrap();
        let out = p
            .signed_product("out", a, (-2.0, 2.0), b, 5.0)
            .unwrap();
        let artifact = p.finish();

        let mut ev = Evaluator::new(&artifact);
        ev.set_source(a, -1.5).unwrap();
        ev.set_source(b, 4.0).unwrap();
        ev.run(&artifact, DT, 5);
        assert!((ev.float(out) - (-6.0)).abs() < 1e-3, "{}", ev.float(out));
    }

    #[test]
    fn broker_collision_surfaces_as_build_error() {
        let mut broker = LocalBroker::new(16);
        broker.occupy("taken");
        let mut p = Program::new(&mut broker);
        let err = p.source_float("taken", 0.0).unwrap_err();
        assert!(matches!(err, BuildError::Broker(_)));
    }

    #[test]
    fn realloc_same_name_is_idempotent_and_free() {
        let mut broker = LocalBroker::new(1);
        let mut p = Program::new(&mut broker);
        let a = p.source_float("only", 0.0).unwrap();
        let b = p.source_float("only", 0.0).unwrap();
        assert_eq!(a, b);
        // Second allocation did not consume budget again.
        let err = p.source_float("another", 0.0).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Broker(crate::error::ReserveError::BudgetExhausted(_))
        ));
    }
}
