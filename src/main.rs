use anyhow::Context;
use cortado_rs::controller::{
    BrewController, LinkActionChannel, LinkEventChannel, UserCommandChannel,
};
use cortado_rs::sim::ScaleSimulator;
use cortado_rs::state::StateManager;
use cortado_rs::types::{SystemState, UserCommand};
use embassy_executor::Spawner;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use log::{error, info};
use std::sync::Arc;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting cortado brew controller (simulated scale)");

    let link_events: Arc<LinkEventChannel> = Arc::new(Channel::new());
    let link_actions: Arc<LinkActionChannel> = Arc::new(Channel::new());
    let user_commands: Arc<UserCommandChannel> = Arc::new(Channel::new());
    let state_manager = Arc::new(StateManager::new());

    let sim = ScaleSimulator::new(Arc::clone(&link_events), Arc::clone(&link_actions));
    if spawner.spawn(sim_task(sim)).is_err() {
        error!("Failed to spawn simulated scale task");
        return;
    }

    if spawner
        .spawn(demo_task(
            Arc::clone(&user_commands),
            Arc::clone(&state_manager),
        ))
        .is_err()
    {
        error!("Failed to spawn demo script task");
        return;
    }

    let mut controller = BrewController::new(
        link_events,
        link_actions,
        user_commands,
        Arc::clone(&state_manager),
    );
    controller.run().await;
}

#[embassy_executor::task]
async fn sim_task(sim: ScaleSimulator) {
    sim.run().await;
}

/// Walks one auto-start brew end to end: enable auto-start, dose, let the
/// pour trigger the session, pause and resume mid-brew, reset at the end.
#[embassy_executor::task]
async fn demo_task(commands: Arc<UserCommandChannel>, state_manager: Arc<StateManager>) {
    let script: &[(u64, UserCommand)] = &[
        (3, UserCommand::SetAutoStart(true)),
        (6, UserCommand::Dose),
        (40, UserCommand::Pause),
        (43, UserCommand::Resume),
        (70, UserCommand::Reset),
    ];

    let mut elapsed = 0u64;
    let mut next = script.iter();
    let mut pending = next.next();

    loop {
        Timer::after(Duration::from_secs(1)).await;
        elapsed += 1;

        while let Some(&(at, command)) = pending {
            if elapsed < at {
                break;
            }
            info!("Demo: sending {:?}", command);
            commands.send(command).await;
            pending = next.next();
        }

        if elapsed % 5 == 0 {
            let snapshot = state_manager.snapshot().await;
            if let Err(e) = log_snapshot(&snapshot) {
                error!("Snapshot log failed: {:?}", e);
            }
        }
    }
}

fn log_snapshot(snapshot: &SystemState) -> anyhow::Result<()> {
    let json = serde_json::to_string(snapshot).context("serializing state snapshot")?;
    info!("State: {}", json);
    Ok(())
}
