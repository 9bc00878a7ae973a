//! Scene Engine demo
//!
//! Runs a short skirmish through the registry, closes the scene, verifies
//! every roll against the revealed seed, then replays the log to confirm
//! determinism.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scene_engine::{
    game::{ActorId, Advantage, RollKind, SceneClock, SceneId},
    log::EventLog,
    proof::{replay_log, verify_chain},
    DmAction, EngineConfig, FileEventLog, Intent, MemoryEventLog, RollRequest, RulesEvent,
    SceneEngine, SceneRegistry, SceneState, SystemClock, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    info!("Scene Engine v{}", VERSION);

    let config = EngineConfig::from_env()?;
    let log: Arc<dyn EventLog> = match &config.log_path {
        Some(path) => Arc::new(FileEventLog::open(path)?),
        None => Arc::new(MemoryEventLog::new()),
    };
    info!("Reaction window: {:?}", config.reaction_window);

    let engine = SceneEngine::builder()
        .clock(Arc::new(SystemClock))
        .log(log.clone())
        .config(config)
        .build()?;
    let registry = SceneRegistry::new(Arc::new(engine));

    demo_scene(&registry, log.as_ref()).await
}

async fn demo_scene(registry: &SceneRegistry, log: &dyn EventLog) -> anyhow::Result<()> {
    info!("=== Opening Scene ===");

    let scene = SceneId::generate();
    let pc1 = ActorId::from("pc1");
    let npc1 = ActorId::from("npc1");
    let initial = SceneState::new(scene.clone(), "demo-seed", chrono::Utc::now())
        .with_initiative([pc1.clone(), npc1.clone()])
        .with_location("ruined-chapel")
        .with_clock(SceneClock::new("reinforcements", "Reinforcements arrive", 4));

    let commitment = registry.open_scene(initial.clone(), None).await?;
    info!("Scene {} seed commitment: {}", scene, commitment.commitment_hash);

    let (_, entry) = registry.submit_intent(&scene, Intent::move_to("pc1", "m1", 2, 1)).await?;
    info!("pc1 moves: {:?}", entry.outcome);

    let (_, entry) = registry.submit_intent(&scene, Intent::move_to("pc1", "m1", 2, 1)).await?;
    info!("pc1 resubmits: {:?}", entry.outcome);

    let attack = registry
        .roll(
            &scene,
            RollRequest::d20("pc1", RollKind::Attack, 5)
                .with_advantage(Advantage::Advantage)
                .with_rationale("longsword, flanking")
                .against_ac(13),
        )
        .await?;
    info!(
        "pc1 attacks with advantage: d20+5 = {} vs AC 13 (kept {}, hit: {:?})",
        attack.total, attack.record.roll_id, attack.success
    );

    if attack.success == Some(true) {
        let damage = registry
            .roll_formula(&scene, &pc1, RollKind::Damage, "1d8+3")
            .await?;
        registry
            .submit_dm_action(&scene, DmAction::ApplyDamage {
                target: npc1.clone(),
                amount: u32::try_from(damage.total.max(0))?,
                source: "longsword".into(),
            })
            .await?;
        info!("npc1 takes {} damage", damage.total);
    }

    let (_, entry) = registry.submit_intent(&scene, Intent::move_to("npc1", "n1", 0, 0)).await?;
    info!("npc1 acts early: {:?}", entry.outcome);

    registry
        .submit_rules_event(&scene, RulesEvent::TurnEnd { actor: pc1.clone() })
        .await?;
    registry
        .submit_dm_action(&scene, DmAction::AdvanceClock {
            clock: "reinforcements".into(),
            ticks: 1,
            reason: "the fight is loud".into(),
        })
        .await?;

    info!("=== Closing Scene ===");
    let closed = registry.close_scene(&scene).await?;
    info!("Final State Hash: {}", closed.state.compute_hash());
    info!("Revealed seed: {}", closed.server_seed.to_hex());
    info!("Rolls verified: {}/{}", closed.rolls_verified, closed.rolls.len());

    info!("=== Verifying Determinism ===");
    let entries = log.for_scene(&scene)?;
    verify_chain(&entries)?;
    let rebuilt = replay_log(&initial, &entries)?;

    if rebuilt.compute_hash() != closed.state.compute_hash() {
        bail!("DETERMINISM FAILURE: replayed hash {} differs", rebuilt.compute_hash());
    }
    info!("DETERMINISM VERIFIED: {} entries replayed, hashes match", entries.len());
    Ok(())
}
