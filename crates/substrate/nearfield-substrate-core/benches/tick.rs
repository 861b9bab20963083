use criterion::{criterion_group, criterion_main, Criterion};

use nearfield_substrate_core::{
    BlendFragment, BlendNode, BuildArtifact, Condition, DriveAction, Evaluator, StateMachine,
    Transition,
};

/// A medium artifact: 32 affine fragments fed by 8 sources, plus 8 two-state
/// machines driving bool flags off the derived values.
fn build_artifact() -> BuildArtifact {
    let mut artifact = BuildArtifact::new();
    let sources: Vec<_> = (0..8)
        .map(|i| {
            artifact
                .registers
                .source_float(&format!("bench/src{i}"), 0.0)
                .unwrap()
        })
        .collect();
    let mut derived = Vec::new();
    for i in 0..32 {
        let sink = artifact
            .registers
            .derived_float(&format!("bench/derived{i}"), 0.0)
            .unwrap();
        let src = sources[i % sources.len()];
        artifact.fragments.push(BlendFragment::new(
            &sink,
            BlendNode::affine(src, 0.5 + i as f32 * 0.01, 0.1, 0.0, 1.0),
        ));
        derived.push(sink);
    }
    for i in 0..8 {
        let flag = artifact
            .registers
            .driven_bool(&format!("bench/flag{i}"), false)
            .unwrap();
        let watch = derived[i * 4].reg();
        let mut machine = StateMachine::new(format!("bench/machine{i}"));
        let low = machine.add_state("low");
        let high = machine.add_state("high");
        machine.drive(low, DriveAction::bool(&flag, false));
        machine.drive(high, DriveAction::bool(&flag, true));
        machine.transition(low, Transition::when(high, vec![Condition::above(watch, 0.3)]));
        machine.transition(high, Transition::when(low, vec![Condition::below(watch, 0.2)]));
        artifact.machines.push(machine);
    }
    artifact
}

fn bench_tick(c: &mut Criterion) {
    let artifact = build_artifact();
    let sources: Vec<_> = artifact
        .registers
        .defs()
        .iter()
        .filter(|d| d.name.starts_with("bench/src"))
        .map(|d| nearfield_substrate_core::FloatReg(d.id))
        .collect();

    c.bench_function("evaluator_tick", |b| {
        let mut ev = Evaluator::new(&artifact);
        let mut phase = 0.0f32;
        b.iter(|| {
            phase += 0.01;
            for (i, reg) in sources.iter().enumerate() {
                ev.set_source(*reg, (phase + i as f32 * 0.1).sin().abs()).unwrap();
            }
            ev.tick(&artifact, 1.0 / 60.0);
        });
    });
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
