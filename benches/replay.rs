//! Replay throughput benchmarks.

use chrono::{DateTime, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use scene_engine::{
    core::rng::{roll, ServerSeed},
    game::{ActorId, RollKind, RulesEvent},
    proof::{replay, replay_log, GoldenFixture, ReplayStep},
    DmAction, Intent, RollRequest, SceneState,
};

fn fixture(rounds: usize) -> GoldenFixture {
    let initial = SceneState::new("bench", "bench-seed", DateTime::<Utc>::default())
        .with_initiative(["pc1", "npc1"]);
    let mut fixture = GoldenFixture::new("bench", initial);

    for round in 0..rounds {
        for (i, actor) in ["pc1", "npc1"].into_iter().enumerate() {
            let x = (round % 16) as i32;
            fixture = fixture
                .intent(Intent::move_to(actor, &format!("{actor}-{round}"), x, i as i32))
                .step(ReplayStep::Roll(RollRequest::d20(actor, RollKind::Attack, 4)))
                .dm(DmAction::narrate("Steel rings."))
                .step(ReplayStep::RulesEvent(RulesEvent::TurnEnd {
                    actor: ActorId::from(actor),
                }));
        }
    }
    fixture
}

fn bench_fixture_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixture_replay");
    for rounds in [10, 100] {
        let fixture = fixture(rounds);
        group.bench_with_input(BenchmarkId::from_parameter(rounds), &fixture, |b, f| {
            b.iter(|| replay(black_box(f)))
        });
    }
    group.finish();
}

fn bench_log_replay(c: &mut Criterion) {
    let fixture = fixture(100);
    let entries = match replay(&fixture) {
        Ok(report) => report.entries,
        Err(e) => panic!("fixture failed: {e}"),
    };
    c.bench_function("replay_log_100_rounds", |b| {
        b.iter(|| replay_log(black_box(&fixture.initial_state), black_box(&entries)))
    });
}

fn bench_roll(c: &mut Criterion) {
    let seed = ServerSeed::from_bytes([42; 32]);
    let mut nonce = 0u64;
    c.bench_function("hmac_roll_d20", |b| {
        b.iter(|| {
            nonce += 1;
            roll(black_box(&seed), "client", nonce, 20)
        })
    });
}

criterion_group!(benches, bench_fixture_replay, bench_log_replay, bench_roll);
criterion_main!(benches);
