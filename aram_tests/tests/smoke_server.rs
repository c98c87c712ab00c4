use aram_server::GameServer;
use aram_shared::{
    config::ServerConfig,
    net::{InputMessage, KeyState, NetMsg},
};

/// Smoke test: the world can take joins and a few seconds of input without errors.
#[test]
fn server_runs_few_seconds() -> anyhow::Result<()> {
    let mut server = GameServer::new(ServerConfig::default());
    let ids: Vec<_> = (0..4).map(|_| server.join().player_id).collect();

    for seq in 1..=180 {
        for id in &ids {
            let input = InputMessage {
                keys: KeyState {
                    w: true,
                    space: seq % 60 == 0,
                    ..Default::default()
                },
                rotation_y: seq as f32 * 0.05,
                sequence_number: seq,
            };
            server.handle(id, &NetMsg::Move(input))?;
        }
    }

    for id in &ids {
        assert_eq!(server.last_processed(id), Some(180));
        assert_eq!(server.snapshot_for(id).players.len(), ids.len());
    }
    Ok(())
}
