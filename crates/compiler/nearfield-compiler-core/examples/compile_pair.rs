//! Compile one tracked pair plus a two-candidate selector, dump the artifact
//! as JSON, then simulate an approach with the reference evaluator.
//!
//! Run with `cargo run --example compile_pair`.

use anyhow::Result;

use nearfield_compiler_core::proximity::{derive_channels, DerivationConfig, SensorSet};
use nearfield_compiler_core::selector::{build_selector, Candidate, SelectorConfig};
use nearfield_compiler_core::{LocalBroker, Program};
use nearfield_substrate_core::Evaluator;

fn main() -> Result<()> {
    let mut broker = LocalBroker::new(64);
    let mut p = Program::new(&mut broker);

    let tip = p.source_float("pairA/tip", 0.0)?;
    let root = p.source_float("pairA/root", 0.0)?;
    let time = p.source_float("time", 0.0)?;
    let world_scale = p.source_float("world_scale", 1.0)?;
    let sensors = SensorSet {
        pair: "pairA".to_string(),
        tip: Some(tip),
        root: Some(root),
        width: None,
    };
    let cfg = DerivationConfig::default();
    let channels = derive_channels(&mut p, &sensors, time, world_scale, &cfg)?;

    let auto = p.source_bool("auto", true)?;
    let far = p.source_float("far/distance", 0.4)?;
    let candidates = vec![
        Candidate {
            name: "pairA".to_string(),
            request: p.source_bool("pairA/request", true)?,
            distance: channels.distance,
        },
        Candidate {
            name: "far".to_string(),
            request: p.source_bool("far/request", true)?,
            distance: far,
        },
    ];
    let sel_cfg = SelectorConfig {
        distance_max: cfg.distance_max,
        min_pair_sum: 0.01,
        ..SelectorConfig::default()
    };
    let selector = build_selector(&mut p, "sel", &candidates, auto, &sel_cfg)?;

    let artifact = p.finish();
    println!("{}", serde_json::to_string_pretty(&artifact)?);

    let dt = 1.0 / 60.0;
    let mut ev = Evaluator::new(&artifact);
    for frame in 0..120u32 {
        // pairA sweeps in from no overlap to saturation.
        let t = frame as f32 * dt;
        ev.set_source(tip, (t / 1.5).min(1.0)).map_err(anyhow::Error::msg)?;
        ev.set_source(root, ((t - 0.3) / 1.5).clamp(0.0, 1.0))
            .map_err(anyhow::Error::msg)?;
        ev.set_source(time, t).map_err(anyhow::Error::msg)?;
        ev.tick(&artifact, dt);
        if frame % 20 == 0 {
            println!(
                "t={t:.2} distance={:.4} velocity={:+.4} pairA_enabled={}",
                ev.float(channels.distance),
                ev.float(channels.velocity),
                ev.bool(selector.enables[0]),
            );
        }
    }
    Ok(())
}
