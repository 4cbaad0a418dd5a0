//! Plays a game of Thousand between bots on an in-memory broker.
//!
//! ```text
//! RUST_LOG=info THOUSAND_SIM_PLAYERS=3 cargo run --bin thousand-sim
//! ```

use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::sync::watch;
use tokio::time;
use tracing::info;

use thousand_sync::state::{ActionKind, GameState, Scorer, ThousandScorer, MAX_PLAYERS, MIN_PLAYERS};
use thousand_sync::sync::{
    connect, generate_room_code, ClientHandle, Command, MemoryBus, SyncConfig, View,
};

/// Bots bank once the turn is worth this much.
const BANK_AT: i32 = 300;
const MAX_STEPS: usize = 5_000;
const STEP_DELAY: Duration = Duration::from_millis(5);
const NAMES: [&str; MAX_PLAYERS] = ["Ann", "Bob", "Cat", "Dan", "Eve"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let players = std::env::var("THOUSAND_SIM_PLAYERS")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(3)
        .clamp(MIN_PLAYERS, MAX_PLAYERS);
    let config = SyncConfig::from_env().with_bootstrap_grace(Duration::from_millis(100));
    let bus = MemoryBus::new();
    let room = generate_room_code(&mut rand::thread_rng());
    info!(%room, players, "starting simulation");

    let mut clients: Vec<(String, ClientHandle)> = Vec::new();
    for name in NAMES.iter().take(players) {
        let session = format!("sim-{}", name.to_lowercase());
        let client = connect(&bus, &room, session.clone(), *name, config.clone())?;
        let mut view = client.view();
        wait_until(&mut view, |v| v.game_state.is_some()).await?;
        client.send(Command::Join)?;
        wait_until(&mut view, |v| v.my_player_id.is_some()).await?;
        clients.push((session, client));
    }

    let host = &clients[0].1;
    let mut table = host.view();
    wait_until(&mut table, |v| {
        v.game_state
            .as_ref()
            .is_some_and(|s| s.active_player_count() == players)
    })
    .await?;
    host.send(Command::Act(ActionKind::StartOfficialGame))?;
    wait_until(&mut table, |v| v.game_state.as_ref().is_some_and(|s| s.is_game_started)).await?;

    for _ in 0..MAX_STEPS {
        time::sleep(STEP_DELAY).await;
        let Some(state) = table.borrow().game_state.clone() else {
            continue;
        };
        if state.is_game_over {
            break;
        }

        let current = &state.players[state.current_player_index];
        let (_, actor) = clients
            .iter()
            .find(|(session, _)| current.is_bound_to(session))
            .ok_or_else(|| anyhow!("nobody controls slot {}", current.slot_id))?;
        if let Some(own) = actor.view().borrow().game_state.as_ref() {
            actor.send(next_command(own))?;
        }
    }

    let state = table
        .borrow()
        .game_state
        .clone()
        .context("host lost its state")?;
    for player in state.players.iter().filter(|p| p.is_active()) {
        info!(
            name = %player.name,
            total = ThousandScorer.total_score(player),
            turns = player.scores.len(),
            "final score"
        );
    }
    info!(message = %state.game_message, version = state.version, "simulation finished");

    for (_, client) in clients {
        client.shutdown().await;
    }
    Ok(())
}

/// Roll until the turn is worth [`BANK_AT`], keeping every scoring die.
fn next_command(state: &GameState) -> Command {
    if state.can_roll && (!state.can_bank || state.current_turn_score < BANK_AT) {
        return Command::Roll;
    }
    if !state.can_roll && !state.dice_on_board.is_empty() {
        let mut indices: Vec<usize> = Vec::new();
        for group in ThousandScorer.analyze_dice(&state.dice_on_board) {
            for face in group.faces {
                let free = state
                    .dice_on_board
                    .iter()
                    .enumerate()
                    .position(|(i, &f)| f == face && !indices.contains(&i));
                if let Some(i) = free {
                    indices.push(i);
                }
            }
        }
        if !indices.is_empty() {
            return Command::Act(ActionKind::KeepDice { indices });
        }
    }
    Command::Act(ActionKind::BankScore)
}

async fn wait_until(
    view: &mut watch::Receiver<View>,
    ready: impl Fn(&View) -> bool,
) -> anyhow::Result<()> {
    time::timeout(Duration::from_secs(10), async {
        loop {
            if ready(&view.borrow_and_update()) {
                return Ok::<(), anyhow::Error>(());
            }
            view.changed().await?;
        }
    })
    .await
    .context("timed out waiting for the room")?
}
