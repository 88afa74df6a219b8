//! Wire protocol and shared game types for the stackbattle server.
//!
//! Everything a client needs to talk to the server lives here: the board
//! geometry constants, the packet enum (both directions, bincode-encoded),
//! and the snapshot structures broadcast every tick.

use serde::{Deserialize, Serialize};

/// Protocol version clients must present when joining.
pub const PROTOCOL_VERSION: u32 = 1;

/// Playable board width; cell x coordinates range over `1..=BOARD_WIDTH`.
pub const BOARD_WIDTH: i32 = 10;
/// Playable board height; cell y coordinates range over `1..=BOARD_HEIGHT`,
/// with y increasing toward the floor. Rows at y <= 0 are the spawn buffer.
pub const BOARD_HEIGHT: i32 = 21;
/// Topmost playable row. A settled cell at or above this row overflows the board.
pub const TOP_ROW: i32 = 1;

/// Length of each player's upcoming-piece queue.
pub const QUEUE_LEN: usize = 4;

/// Simulation tick length in milliseconds (50Hz).
pub const TICK_MS: u64 = 20;
/// Delay between the first challenger appearing and the match starting.
pub const START_DELAY_MS: u64 = 500;
/// A clear more than this long after the previous one breaks the combo chain.
pub const COMBO_TIMEOUT_MS: u64 = 3000;
/// Pause between the elimination effect and the continue/spectate prompt.
pub const EFFECT_DELAY_MS: u64 = 1500;
/// How long an eliminated player has to answer the continue prompt.
pub const DECISION_WINDOW_MS: u64 = 10_000;

/// One occupied board coordinate.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Whether a player competes or watches.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Challenger,
    Spectator,
}

/// Lifecycle state of a player within a match.
///
/// `Lose` and `Eliminated` are transient markers owned by the elimination
/// protocol: `Lose` while the client-side elimination effect plays,
/// `Eliminated` while the continue/spectate decision window is open.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Ready,
    Active,
    Lose,
    Eliminated,
    Spectating,
}

/// Match-wide phase owned by the orchestrator.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Lobby,
    Running,
}

/// Horizontal/soft-drop movement intents.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MoveDir {
    Left,
    Right,
    Down,
}

/// A "lucky event" bonus rolled on a line clear.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BonusEvent {
    pub name: String,
    pub color: String,
    pub multiplier: f32,
}

/// The falling piece as seen on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PieceView {
    pub kind: u8,
    pub cells: Vec<Cell>,
}

/// Full wire view of one player, embedded in every state snapshot.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlayerSnapshot {
    pub id: u32,
    pub name: String,
    pub seat: String,
    pub role: Role,
    pub state: PlayerState,
    pub board: Vec<Cell>,
    pub piece: Option<PieceView>,
    pub queue: Vec<u8>,
    pub held: Option<u8>,
    pub score: u64,
    pub exp: u64,
    pub level: u32,
    pub exp_to_next: u64,
    pub combo: u32,
}

/// One row of the final standings in a `MatchOver` packet.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ranking {
    pub player_id: u32,
    pub name: String,
    pub score: u64,
    pub level: u32,
    pub place: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // client -> server
    Join { name: String, client_version: u32 },
    Move { dir: MoveDir },
    Rotate,
    HardDrop,
    Hold,
    RequestStatus,
    ContinueResponse { accept: bool },
    Disconnect,

    // server -> client
    Joined {
        player_id: u32,
        role: Role,
    },
    PlayerJoined {
        snapshot: PlayerSnapshot,
    },
    StateSnapshot {
        tick: u64,
        phase: MatchPhase,
        players: Vec<PlayerSnapshot>,
    },
    LinesCleared {
        player_id: u32,
        rows: Vec<i32>,
    },
    Bonus {
        player_id: u32,
        event: BonusEvent,
    },
    LevelUp {
        player_id: u32,
        level: u32,
    },
    Attack {
        attacker: u32,
        target: u32,
        power: u32,
    },
    /// `final_out` distinguishes the effect-only broadcast fired at overflow
    /// from the definitive one fired when the player becomes a spectator.
    Eliminated {
        player_id: u32,
        final_out: bool,
    },
    DecisionRequest {
        player_id: u32,
        timeout_ms: u64,
    },
    MatchOver {
        rankings: Vec<Ranking>,
    },
    PlayerLeft {
        player_id: u32,
    },
    Rejected {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_fixture() -> PlayerSnapshot {
        PlayerSnapshot {
            id: 7,
            name: "ada".to_string(),
            seat: "P7".to_string(),
            role: Role::Challenger,
            state: PlayerState::Active,
            board: vec![Cell::new(1, 21), Cell::new(2, 21)],
            piece: Some(PieceView {
                kind: 2,
                cells: vec![
                    Cell::new(5, 0),
                    Cell::new(4, 0),
                    Cell::new(6, 0),
                    Cell::new(5, 1),
                ],
            }),
            queue: vec![0, 3, 6, 1],
            held: None,
            score: 1200,
            exp: 450,
            level: 0,
            exp_to_next: 500,
            combo: 2,
        }
    }

    #[test]
    fn test_cell_equality_and_hash() {
        let a = Cell::new(3, 7);
        let b = Cell::new(3, 7);
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&Cell::new(7, 3)));
    }

    #[test]
    fn test_packet_serialization_join() {
        let packet = Packet::Join {
            name: "ada".to_string(),
            client_version: PROTOCOL_VERSION,
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Join {
                name,
                client_version,
            } => {
                assert_eq!(name, "ada");
                assert_eq!(client_version, PROTOCOL_VERSION);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_move() {
        for dir in [MoveDir::Left, MoveDir::Right, MoveDir::Down] {
            let serialized = bincode::serialize(&Packet::Move { dir }).unwrap();
            let deserialized: Packet = bincode::deserialize(&serialized).unwrap();
            match deserialized {
                Packet::Move { dir: d } => assert_eq!(d, dir),
                _ => panic!("Wrong packet type after deserialization"),
            }
        }
    }

    #[test]
    fn test_packet_serialization_snapshot() {
        let packet = Packet::StateSnapshot {
            tick: 42,
            phase: MatchPhase::Running,
            players: vec![snapshot_fixture()],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::StateSnapshot {
                tick,
                phase,
                players,
            } => {
                assert_eq!(tick, 42);
                assert_eq!(phase, MatchPhase::Running);
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, 7);
                assert_eq!(players[0].board.len(), 2);
                assert_eq!(players[0].queue, vec![0, 3, 6, 1]);
                assert_eq!(players[0].piece.as_ref().unwrap().kind, 2);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_attack() {
        let packet = Packet::Attack {
            attacker: 1,
            target: 2,
            power: 3,
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Attack {
                attacker,
                target,
                power,
            } => {
                assert_eq!(attacker, 1);
                assert_eq!(target, 2);
                assert_eq!(power, 3);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_eliminated_flag() {
        for final_out in [false, true] {
            let packet = Packet::Eliminated {
                player_id: 9,
                final_out,
            };
            let serialized = bincode::serialize(&packet).unwrap();
            let deserialized: Packet = bincode::deserialize(&serialized).unwrap();
            match deserialized {
                Packet::Eliminated {
                    player_id,
                    final_out: f,
                } => {
                    assert_eq!(player_id, 9);
                    assert_eq!(f, final_out);
                }
                _ => panic!("Wrong packet type after deserialization"),
            }
        }
    }

    #[test]
    fn test_packet_serialization_match_over() {
        let packet = Packet::MatchOver {
            rankings: vec![
                Ranking {
                    player_id: 2,
                    name: "bo".to_string(),
                    score: 900,
                    level: 3,
                    place: 1,
                },
                Ranking {
                    player_id: 1,
                    name: "ada".to_string(),
                    score: 400,
                    level: 1,
                    place: 2,
                },
            ],
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::MatchOver { rankings } => {
                assert_eq!(rankings.len(), 2);
                assert_eq!(rankings[0].place, 1);
                assert_eq!(rankings[0].player_id, 2);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_malformed_packet_rejected() {
        let valid = bincode::serialize(&Packet::StateSnapshot {
            tick: 1,
            phase: MatchPhase::Lobby,
            players: vec![snapshot_fixture()],
        })
        .unwrap();
        let truncated = &valid[..valid.len() / 2];
        let result: Result<Packet, _> = bincode::deserialize(truncated);
        assert!(result.is_err());

        let result: Result<Packet, _> = bincode::deserialize(&[]);
        assert!(result.is_err());
    }
}
