//! Proximity-to-distance derivation.
//!
//! A tracked pair binds up to three saturating [0,1] overlap sensors, each
//! reading `1 - d/R` clipped to [0,1] for a sensing radius `R`: `tip` at the
//! probe tip, `root` trailing the tip by `sensor_span` along the probe axis,
//! and an optional `width` sensor for lateral extent. From those ramps the
//! pipeline derives calibrated length, radius and signed axial distance, plus
//! a world-scale-normalized velocity.
//!
//! Three regimes partition the sensor space, classified by three hysteresis
//! predicates: `contact` (tip > 0), `saturated` (tip >= 1) and `basis`
//! (root > 0). Every one of the eight truth combinations maps to exactly one
//! regime:
//!
//! | contact | saturated | basis | regime                                   |
//! |---------|-----------|-------|------------------------------------------|
//! |    0    |     0     |   0   | Outside (no overlap, distance = R)       |
//! |    0    |     0     |   1   | Outside (basis alone; tip formula holds) |
//! |    0    |     1     |   0   | Outside (contradictory reading)          |
//! |    0    |     1     |   1   | Outside (contradictory reading)          |
//! |    1    |     0     |   0   | Outside (distance = R*(1-tip))           |
//! |    1    |     0     |   1   | Detectable (affine solve, latched)       |
//! |    1    |     1     |   0   | Inside (hold latched measurement)        |
//! |    1    |     1     |   1   | Inside                                   |
//!
//! The select lowers with Inside as the highest-priority branch and Outside
//! as the fallback, which reproduces the table exactly: any row without
//! `contact` falls through to Outside.

use serde::{Deserialize, Serialize};

use nearfield_substrate_core::{BlendNode, BoolReg, FloatReg};

use crate::delay::{differentiate, latch, DifferentiateParams};
use crate::error::BuildError;
use crate::program::{Operand, Program, SelectBranch, Term};

/// Sensor bindings for one tracked pair. `tip` and `root` are required;
/// `width` is optional and falls back to a configured default radius.
#[derive(Debug, Clone)]
pub struct SensorSet {
    pub pair: String,
    pub tip: Option<FloatReg>,
    pub root: Option<FloatReg>,
    pub width: Option<FloatReg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationConfig {
    /// Sensing radius R of each overlap sensor, in rig units.
    pub sensor_radius: f32,
    /// Axial offset between the tip and root sensors, in rig units.
    pub sensor_span: f32,
    /// Hysteresis half-width for the regime predicates.
    pub detect_band: f32,
    /// Length reported until the first Detectable measurement lands.
    pub default_length: f32,
    /// Radius reported when no width sensor is bound.
    pub default_radius: f32,
    /// Documented upper bound of the derived distance register.
    pub distance_max: f32,
    /// Valid range of the dynamically supplied world-scale register.
    pub world_scale_range: (f32, f32),
    pub differentiate: DifferentiateParams,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        DerivationConfig {
            sensor_radius: 0.25,
            sensor_span: 0.08,
            detect_band: 0.005,
            default_length: 0.1,
            default_radius: 0.03,
            distance_max: 0.5,
            world_scale_range: (0.1, 10.0),
            differentiate: DifferentiateParams {
                max_step: 0.05,
                ..DifferentiateParams::default()
            },
        }
    }
}

/// Derived Float registers exposed to downstream layers.
#[derive(Debug, Clone, Copy)]
pub struct DerivedChannels {
    pub distance: FloatReg,
    pub length: FloatReg,
    pub radius: FloatReg,
    pub velocity: FloatReg,
}

pub fn derive_channels(
    p: &mut Program,
    sensors: &SensorSet,
    time: FloatReg,
    world_scale: FloatReg,
    cfg: &DerivationConfig,
) -> Result<DerivedChannels, BuildError> {
    let pair = sensors.pair.as_str();
    let tip = sensors.tip.ok_or(BuildError::MissingSensor {
        pair: pair.to_string(),
        sensor: "tip",
    })?;
    let root = sensors.root.ok_or(BuildError::MissingSensor {
        pair: pair.to_string(),
        sensor: "root",
    })?;
    let radius_cfg_ok = cfg.sensor_radius.is_finite() && cfg.sensor_radius > 0.0;
    if !radius_cfg_ok || cfg.sensor_span <= 0.0 || cfg.sensor_span >= 2.0 * cfg.sensor_radius {
        return Err(BuildError::Domain {
            register: format!("{pair}/distance"),
            detail: format!(
                "sensor geometry out of range: radius {}, span {}",
                cfg.sensor_radius, cfg.sensor_span
            ),
        });
    }

    let r = cfg.sensor_radius;
    let unit = (0.0, 1.0);
    let band = cfg.detect_band;

    // Regime predicates (see the table in the module docs). The zero
    // comparisons sit `2*band` inside the sensor range so the release
    // threshold stays reachable for a saturating [0,1] signal.
    let contact = p.greater_than(
        &format!("{pair}/contact"),
        tip.into(),
        Operand::Const(2.0 * band),
        false,
        band,
        unit,
    )?;
    let saturated = p.greater_than(
        &format!("{pair}/saturated"),
        tip.into(),
        Operand::Const(1.0),
        true,
        band,
        unit,
    )?;
    let basis = p.greater_than(
        &format!("{pair}/basis"),
        root.into(),
        Operand::Const(2.0 * band),
        false,
        band,
        unit,
    )?;
    let detectable = p.all_of(
        &format!("{pair}/detectable"),
        &[(contact, true), (saturated, false), (basis, true)],
    )?;

    // Detectable-regime measurements, computed continuously and only trusted
    // (latched) while the regime predicate holds.
    //
    // With the target surface at axial distance d from the tip sensor:
    //   tip  = 1 - d/R              root = 1 - (d + span)/R
    // so the affine combination of the two ramps recovers
    //   d      = R - R*(tip + root)/2 - span/2
    //   length = R*(tip - root)      (the apparent sensor separation)
    let detect_raw = p.derived_float(&format!("{pair}/detect_raw"), 0.0)?;
    p.add(
        &detect_raw,
        &[
            Term::constant(r - cfg.sensor_span / 2.0, 1.0),
            Term::reg(tip, -r / 2.0, unit),
            Term::reg(root, -r / 2.0, unit),
        ],
    )?;
    let length_raw = p.derived_float(&format!("{pair}/length_raw"), 0.0)?;
    p.add(
        &length_raw,
        &[Term::reg(tip, r, unit), Term::reg(root, -r, unit)],
    )?;

    let held_distance = latch(
        p,
        &format!("{pair}/held_distance"),
        detect_raw.reg(),
        detectable,
        0.0,
        (0.0, cfg.distance_max),
    )?;
    let length = latch(
        p,
        &format!("{pair}/length"),
        length_raw.reg(),
        detectable,
        cfg.default_length,
        (0.0, cfg.distance_max),
    )?;

    let radius = match sensors.width {
        Some(width) => {
            let radius_raw = p.derived_float(&format!("{pair}/radius_raw"), 0.0)?;
            p.copy(&radius_raw, width, -r, r, unit)?;
            latch(
                p,
                &format!("{pair}/radius"),
                radius_raw.reg(),
                contact,
                cfg.default_radius,
                (0.0, cfg.distance_max),
            )?
        }
        None => {
            log::warn!(
                "pair '{pair}': no width sensor bound, radius falls back to {}",
                cfg.default_radius
            );
            let sink = p.derived_float(&format!("{pair}/radius"), cfg.default_radius)?;
            p.constant(&sink, cfg.default_radius);
            sink.reg()
        }
    };

    // Signed axial distance across the three regimes. Inside outranks
    // Detectable so a saturated tip never re-enters the affine solve.
    let distance = p.derived_float(&format!("{pair}/distance"), r)?;
    p.conditional_select(
        &distance,
        &[
            SelectBranch::new(
                vec![(contact, true), (saturated, true)],
                BlendNode::identity(held_distance, 0.0, cfg.distance_max),
            ),
            SelectBranch::new(
                vec![(contact, true), (saturated, false), (basis, true)],
                BlendNode::identity(detect_raw.reg(), 0.0, cfg.distance_max),
            ),
        ],
        BlendNode::affine(tip, -r, r, 0.0, 1.0),
    )?;

    // Velocity: per-frame rate of the derived distance, normalized by the
    // dynamically supplied world scale.
    let rate_params = DifferentiateParams {
        value_domain: (0.0, cfg.distance_max),
        ..cfg.differentiate
    };
    let rate = differentiate(p, &format!("{pair}/rate"), distance.reg(), time, rate_params)?;
    let inv_scale = p.derived_float(&format!("{pair}/inv_world_scale"), 1.0)?;
    p.invert(
        &inv_scale,
        world_scale,
        cfg.world_scale_range.0,
        cfg.world_scale_range.1,
    )?;
    let rate_max = rate_params.max_step / rate_params.dt_min;
    let velocity = p.signed_product(
        &format!("{pair}/velocity"),
        rate,
        (-rate_max, rate_max),
        inv_scale.reg(),
        1.0 / cfg.world_scale_range.0,
    )?;

    Ok(DerivedChannels {
        distance: distance.reg(),
        length,
        radius,
        velocity,
    })
}
