use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nitta::bus::BusNetwork;
use nitta::front::parse_algorithm;
use nitta::simulator::simulate;
use nitta::spi::IoSync;
use nitta::synthesis::{synthesize, ModelState, SynthesisConfig};
use nitta::value::{Fx24_32, Int32};

// ── Sample algorithms ───────────────────────────────────────────────────────

const FIB: &str = "\
loop(0, b2) = a1
loop(1, c) = b1, b2
add(a1, b1) = c
";

const TEACUP: &str = "\
loop(180, temp_cup_2) = temp_cup_1, temp_cup_1b
constant(70) = ambient
constant(10) = tau
constant(0.125) = dt
sub(temp_cup_1b, ambient) = diff
div(diff, tau) = rate
mul(rate, dt) = delta
sub(temp_cup_1, delta) = temp_cup_2
";

fn bench_synthesis(c: &mut Criterion) {
    c.bench_function("synthesize_fibonacci", |b| {
        let fs = parse_algorithm::<Int32>(FIB).unwrap();
        b.iter(|| {
            let model = ModelState::new(BusNetwork::default_march(IoSync::Sync), fs.clone());
            let r = synthesize(black_box(model), &SynthesisConfig::default()).unwrap();
            assert!(r.complete);
            r.decisions
        })
    });

    c.bench_function("synthesize_teacup", |b| {
        let fs = parse_algorithm::<Fx24_32>(TEACUP).unwrap();
        b.iter(|| {
            let model = ModelState::new(BusNetwork::default_march(IoSync::Sync), fs.clone());
            let r = synthesize(black_box(model), &SynthesisConfig::default()).unwrap();
            assert!(r.complete);
            r.decisions
        })
    });
}

fn bench_simulation(c: &mut Criterion) {
    c.bench_function("simulate_teacup_100_cycles", |b| {
        let fs = parse_algorithm::<Fx24_32>(TEACUP).unwrap();
        b.iter(|| simulate(black_box(&fs), 100, &Default::default(), false).unwrap())
    });
}

criterion_group!(benches, bench_synthesis, bench_simulation);
criterion_main!(benches);
