//! Player records and the registry that owns them.
//!
//! This module handles the server-side management of participants:
//! - the `Player` aggregate (board, falling piece, queue, hold slot,
//!   scoring counters, lifecycle state)
//! - the `PlayerRegistry`: id allocation, capacity enforcement, role
//!   queries and the spectator-to-challenger conversion
//!
//! The registry is plain owned state; the match orchestrator holds it and
//! the tick loop serializes every mutation, so no interior locking is
//! needed.

use std::collections::{HashMap, VecDeque};

use log::info;
use rand::Rng;
use shared::{PlayerSnapshot, PlayerState, Role, QUEUE_LEN};

use crate::board::Board;
use crate::pieces::{random_kind, Piece};
use crate::scoring;

/// Everything a player's clear produced within one tick. Built at settle
/// time, read once by the attack-resolution step, then dropped; nothing
/// here survives the tick it was produced in.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub cleared_rows: Vec<i32>,
    pub attack: u32,
    pub bonus: Option<shared::BonusEvent>,
    pub leveled_up: bool,
}

/// One connected participant.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub seat: String,
    pub role: Role,
    pub state: PlayerState,
    pub board: Board,
    pub piece: Option<Piece>,
    /// Upcoming piece kinds, refilled to `QUEUE_LEN` as pieces are drawn.
    pub queue: VecDeque<u8>,
    pub held: Option<u8>,
    /// One hold per drop; re-armed when a new piece spawns.
    pub can_hold: bool,
    /// Ticks until the next forced gravity step.
    pub action_time: u32,
    pub score: u64,
    pub exp: u64,
    pub level: u32,
    pub exp_to_next: u64,
    pub combo: u32,
    pub last_clear_ms: u64,
    /// Whether this player has competed at any point in the current match.
    pub was_challenger: bool,
}

impl Player {
    pub fn new(id: u32, name: String, role: Role) -> Self {
        let state = match role {
            Role::Challenger => PlayerState::Ready,
            Role::Spectator => PlayerState::Spectating,
        };
        Self {
            id,
            name,
            seat: format!("P{}", id),
            role,
            state,
            board: Board::new(),
            piece: None,
            queue: VecDeque::new(),
            held: None,
            can_hold: true,
            action_time: 0,
            score: 0,
            exp: 0,
            level: 0,
            exp_to_next: scoring::check_level_up(0, 0).1,
            combo: 0,
            last_clear_ms: 0,
            was_challenger: false,
        }
    }

    /// Fresh board, queue and piece without touching score or level.
    /// Used when an eliminated player opts to continue.
    pub fn reset_board(&mut self, rng: &mut impl Rng) {
        self.board = Board::new();
        self.held = None;
        self.can_hold = true;
        self.combo = 0;
        self.last_clear_ms = 0;
        self.refill_queue(rng);
        self.piece = None;
    }

    /// Full reset at match start: empty board, zeroed progression, fresh
    /// queue, first piece spawned.
    pub fn reset_for_match(&mut self, rng: &mut impl Rng) {
        self.reset_board(rng);
        self.score = 0;
        self.exp = 0;
        self.level = 0;
        self.exp_to_next = scoring::check_level_up(0, 0).1;
        self.spawn_piece(rng);
    }

    fn refill_queue(&mut self, rng: &mut impl Rng) {
        self.queue.clear();
        while self.queue.len() < QUEUE_LEN {
            self.queue.push_back(random_kind(rng));
        }
    }

    /// Draws the next piece from the queue (topping the queue back up) and
    /// puts it in play. Re-arms the hold and the gravity countdown.
    pub fn spawn_piece(&mut self, rng: &mut impl Rng) {
        if self.queue.is_empty() {
            self.refill_queue(rng);
        }
        let kind = self.queue.pop_front().unwrap_or_else(|| random_kind(rng));
        self.queue.push_back(random_kind(rng));
        self.piece = Some(Piece::spawn(kind));
        self.can_hold = true;
        self.action_time = scoring::gravity_delay_ticks(self.level);
    }

    pub fn is_simulated(&self) -> bool {
        self.role == Role::Challenger && self.state == PlayerState::Active
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            seat: self.seat.clone(),
            role: self.role,
            state: self.state,
            board: self.board.cells().to_vec(),
            piece: self.piece.as_ref().map(|p| p.view()),
            queue: self.queue.iter().copied().collect(),
            held: self.held,
            score: self.score,
            exp: self.exp,
            level: self.level,
            exp_to_next: self.exp_to_next,
            combo: self.combo,
        }
    }
}

/// Owns every connected player and allocates their ids.
pub struct PlayerRegistry {
    players: HashMap<u32, Player>,
    next_player_id: u32,
    max_players: usize,
}

impl PlayerRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: HashMap::new(),
            next_player_id: 1,
            max_players,
        }
    }

    /// Adds a player, or returns None at capacity.
    pub fn add(&mut self, name: String, role: Role) -> Option<u32> {
        if self.players.len() >= self.max_players {
            return None;
        }

        let id = self.next_player_id;
        self.next_player_id += 1;

        info!("Player {} ({:?}) joined as {:?}", id, name, role);
        self.players.insert(id, Player::new(id, name, role));
        Some(id)
    }

    /// Removes a player entirely. Returns the record so the caller can
    /// finish broadcasting about it.
    pub fn remove(&mut self, id: u32) -> Option<Player> {
        let removed = self.players.remove(&id);
        if let Some(player) = &removed {
            info!("Player {} ({}) removed", player.id, player.name);
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.players.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.players.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn values(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }

    pub fn challengers(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .players
            .values()
            .filter(|p| p.role == Role::Challenger)
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn spectators(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .players
            .values()
            .filter(|p| p.role == Role::Spectator)
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Flips a spectator into a challenger with a clean board. Any other
    /// starting role is a conflict reported back to the caller as `false`;
    /// nothing is mutated in that case.
    pub fn convert_to_challenger(&mut self, id: u32, rng: &mut impl Rng) -> bool {
        match self.players.get_mut(&id) {
            Some(player) if player.role == Role::Spectator => {
                player.role = Role::Challenger;
                player.state = PlayerState::Ready;
                player.reset_board(rng);
                info!("Player {} converted to challenger", id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn snapshots(&self) -> Vec<PlayerSnapshot> {
        let mut snapshots: Vec<PlayerSnapshot> =
            self.players.values().map(Player::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }
}
