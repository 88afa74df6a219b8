//! Match orchestration: the authoritative tick pipeline.
//!
//! `MatchState` owns the player registry, the random source, the match
//! phase, and the elimination negotiations in flight. The transport layer
//! calls into it from exactly one task, so every mutation here is
//! serialized; intents arriving between ticks are applied immediately and
//! atomically to the addressed player.
//!
//! The orchestrator is deliberately transport-free: it never sleeps and
//! never touches a socket. Anything the outside world must do — unicast or
//! broadcast a packet, arm a negotiation timer — comes back as an `Event`
//! for the caller to dispatch. Timers post back through
//! `effect_elapsed`/`decision_elapsed` with the negotiation token they were
//! armed with; a token that no longer matches is stale and ignored, which
//! is what cancels a timer when the player responds, disconnects, or the
//! match ends first.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use shared::{
    MatchPhase, MoveDir, Packet, PlayerState, Ranking, Role, DECISION_WINDOW_MS, START_DELAY_MS,
    TICK_MS,
};

use crate::board;
use crate::pieces::{random_kind, Piece};
use crate::player::{Player, PlayerRegistry, TickOutcome};
use crate::scoring;

/// Ticks between the first challenger appearing and the match starting.
const START_DELAY_TICKS: u32 = (START_DELAY_MS / TICK_MS) as u32;

/// Side effects the transport layer must carry out after a call into the
/// orchestrator.
#[derive(Debug, Clone)]
pub enum Event {
    Broadcast(Packet),
    ToPlayer(u32, Packet),
    ArmEffectTimer { player_id: u32, token: u64 },
    ArmDecisionTimer { player_id: u32, token: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationStage {
    /// The elimination effect is playing on clients; no input expected yet.
    EffectDelay,
    /// The decision prompt is out; waiting for a continue/spectate answer.
    AwaitingDecision,
}

#[derive(Debug, Clone, Copy)]
struct Negotiation {
    token: u64,
    stage: NegotiationStage,
}

pub struct MatchState {
    registry: PlayerRegistry,
    rng: StdRng,
    phase: MatchPhase,
    tick: u64,
    now_ms: u64,
    start_countdown: Option<u32>,
    /// Eliminations awaiting a continue/spectate resolution, keyed by
    /// player. The token makes a reused player id unable to revive a timer
    /// from an earlier negotiation.
    pending: HashMap<u32, Negotiation>,
    /// Per-player outputs produced since the last attack-resolution step.
    outcomes: HashMap<u32, TickOutcome>,
    /// Everyone who competed in the current match, including players who
    /// have since disconnected.
    ever_challengers: HashSet<u32>,
    next_token: u64,
}

impl MatchState {
    pub fn new(max_players: usize, rng: StdRng) -> Self {
        Self {
            registry: PlayerRegistry::new(max_players),
            rng,
            phase: MatchPhase::Lobby,
            tick: 0,
            now_ms: 0,
            start_countdown: None,
            pending: HashMap::new(),
            outcomes: HashMap::new(),
            ever_challengers: HashSet::new(),
            next_token: 1,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn player(&self, id: u32) -> Option<&Player> {
        self.registry.get(id)
    }

    pub fn player_mut(&mut self, id: u32) -> Option<&mut Player> {
        self.registry.get_mut(id)
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    fn snapshot_packet(&self) -> Packet {
        Packet::StateSnapshot {
            tick: self.tick,
            phase: self.phase,
            players: self.registry.snapshots(),
        }
    }

    /// Registers a new player. Joins during a running match spectate;
    /// joins in the lobby compete. Returns `None` when the server is full.
    pub fn join(&mut self, name: String) -> (Option<u32>, Vec<Event>) {
        let role = match self.phase {
            MatchPhase::Lobby => Role::Challenger,
            MatchPhase::Running => Role::Spectator,
        };

        let Some(id) = self.registry.add(name, role) else {
            return (None, Vec::new());
        };

        let mut events = vec![Event::ToPlayer(
            id,
            Packet::Joined {
                player_id: id,
                role,
            },
        )];
        if let Some(player) = self.registry.get(id) {
            events.push(Event::Broadcast(Packet::PlayerJoined {
                snapshot: player.snapshot(),
            }));
        }

        self.arm_start_countdown();
        (Some(id), events)
    }

    /// A `Join` from a player we already know: a spectator asking to
    /// compete. Only legal between matches; conflicts go back to the
    /// requester alone.
    pub fn rejoin_as_challenger(&mut self, id: u32) -> Vec<Event> {
        if self.phase != MatchPhase::Lobby {
            return vec![Event::ToPlayer(
                id,
                Packet::Rejected {
                    reason: "match in progress".to_string(),
                },
            )];
        }

        if !self.registry.convert_to_challenger(id, &mut self.rng) {
            return vec![Event::ToPlayer(
                id,
                Packet::Rejected {
                    reason: "already competing".to_string(),
                },
            )];
        }

        self.arm_start_countdown();
        let mut events = Vec::new();
        if let Some(player) = self.registry.get(id) {
            events.push(Event::Broadcast(Packet::PlayerJoined {
                snapshot: player.snapshot(),
            }));
        }
        events
    }

    fn arm_start_countdown(&mut self) {
        if self.phase == MatchPhase::Lobby
            && self.start_countdown.is_none()
            && !self.registry.challengers().is_empty()
        {
            self.start_countdown = Some(START_DELAY_TICKS);
        }
    }

    /// Removes a player entirely. Any negotiation they were in dies with
    /// them, and the match may end as a result.
    pub fn disconnect(&mut self, id: u32) -> Vec<Event> {
        self.pending.remove(&id);
        self.outcomes.remove(&id);

        let Some(player) = self.registry.remove(id) else {
            return Vec::new();
        };

        let mut events = vec![Event::Broadcast(Packet::PlayerLeft {
            player_id: player.id,
        })];

        if self.registry.challengers().is_empty() {
            self.start_countdown = None;
        }
        self.check_match_end(&mut events);
        events
    }

    pub fn request_status(&self, id: u32) -> Vec<Event> {
        if !self.registry.contains(id) {
            return Vec::new();
        }
        vec![Event::ToPlayer(id, self.snapshot_packet())]
    }

    fn simulated(&self, id: u32) -> bool {
        self.phase == MatchPhase::Running
            && self
                .registry
                .get(id)
                .map(Player::is_simulated)
                .unwrap_or(false)
    }

    /// Horizontal movement and soft drop. Unknown or inactive players are
    /// ignored without any state change.
    pub fn move_piece(&mut self, id: u32, dir: MoveDir) -> Vec<Event> {
        if !self.simulated(id) {
            debug!("Ignoring move from player {}", id);
            return Vec::new();
        }

        let mut events = Vec::new();
        match dir {
            MoveDir::Left | MoveDir::Right => {
                if let Some(player) = self.registry.get_mut(id) {
                    if let Some(piece) = player.piece.take() {
                        let moved = match dir {
                            MoveDir::Left => board::move_left(&piece, &player.board),
                            _ => board::move_right(&piece, &player.board),
                        };
                        player.piece = Some(moved);
                    }
                }
            }
            MoveDir::Down => {
                self.step_down(id, &mut events);
            }
        }
        events
    }

    pub fn rotate_piece(&mut self, id: u32) -> Vec<Event> {
        if !self.simulated(id) {
            debug!("Ignoring rotate from player {}", id);
            return Vec::new();
        }

        if let Some(player) = self.registry.get_mut(id) {
            if let Some(piece) = player.piece.take() {
                player.piece = Some(board::rotate(&piece, &player.board));
            }
        }
        Vec::new()
    }

    pub fn hard_drop(&mut self, id: u32) -> Vec<Event> {
        if !self.simulated(id) {
            debug!("Ignoring hard drop from player {}", id);
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut dropped = false;
        if let Some(player) = self.registry.get_mut(id) {
            if let Some(piece) = player.piece.take() {
                player.piece = Some(board::hard_drop(&piece, &player.board));
                dropped = true;
            }
        }
        if dropped {
            self.settle(id, &mut events);
        }
        events
    }

    /// Swaps the falling piece with the hold slot (or the queue head when
    /// the slot is empty). One hold per drop; a swap whose replacement
    /// would spawn into settled cells is refused outright.
    pub fn hold(&mut self, id: u32) -> Vec<Event> {
        if !self.simulated(id) {
            debug!("Ignoring hold from player {}", id);
            return Vec::new();
        }

        let Some(player) = self.registry.get_mut(id) else {
            return Vec::new();
        };
        if !player.can_hold {
            return Vec::new();
        }
        let Some(current) = player.piece.clone() else {
            return Vec::new();
        };

        let (replacement_kind, from_queue) = match player.held {
            Some(kind) => (kind, false),
            None => match player.queue.front() {
                Some(&kind) => (kind, true),
                None => return Vec::new(),
            },
        };

        let replacement = Piece::spawn(replacement_kind);
        if board::collides(&replacement.cells, &player.board) {
            return Vec::new();
        }

        if from_queue {
            player.queue.pop_front();
            let refill = random_kind(&mut self.rng);
            player.queue.push_back(refill);
        }
        player.held = Some(current.kind);
        player.piece = Some(replacement);
        player.can_hold = false;
        Vec::new()
    }

    /// The player's answer to the continue/spectate prompt. Only meaningful
    /// while their decision window is open.
    pub fn continue_response(&mut self, id: u32, accept: bool) -> Vec<Event> {
        match self.pending.get(&id) {
            Some(n) if n.stage == NegotiationStage::AwaitingDecision => {}
            _ => {
                debug!("Ignoring continue response from player {}", id);
                return Vec::new();
            }
        }

        let mut events = Vec::new();
        self.pending.remove(&id);
        if accept {
            info!("Player {} continues after elimination", id);
            if let Some(player) = self.registry.get_mut(id) {
                player.reset_board(&mut self.rng);
                player.state = PlayerState::Ready;
            }
        } else {
            info!("Player {} opts out after elimination", id);
            self.finalize_spectator(id, &mut events);
        }
        self.check_match_end(&mut events);
        events
    }

    /// The 1.5s elimination-effect delay ran out: open the decision window.
    pub fn effect_elapsed(&mut self, id: u32, token: u64) -> Vec<Event> {
        match self.pending.get_mut(&id) {
            Some(n) if n.token == token && n.stage == NegotiationStage::EffectDelay => {
                n.stage = NegotiationStage::AwaitingDecision;
            }
            _ => {
                debug!("Stale effect timer for player {} (token {})", id, token);
                return Vec::new();
            }
        }

        if let Some(player) = self.registry.get_mut(id) {
            player.state = PlayerState::Eliminated;
        }
        vec![
            Event::ToPlayer(
                id,
                Packet::DecisionRequest {
                    player_id: id,
                    timeout_ms: DECISION_WINDOW_MS,
                },
            ),
            Event::ArmDecisionTimer {
                player_id: id,
                token,
            },
        ]
    }

    /// The 10s decision window ran out with no answer: the player becomes a
    /// spectator. A normal path, logged for observability.
    pub fn decision_elapsed(&mut self, id: u32, token: u64) -> Vec<Event> {
        match self.pending.get(&id) {
            Some(n) if n.token == token && n.stage == NegotiationStage::AwaitingDecision => {}
            _ => {
                debug!("Stale decision timer for player {} (token {})", id, token);
                return Vec::new();
            }
        }

        info!(
            "Player {} decision window expired, defaulting to spectator",
            id
        );
        let mut events = Vec::new();
        self.pending.remove(&id);
        self.finalize_spectator(id, &mut events);
        self.check_match_end(&mut events);
        events
    }

    fn finalize_spectator(&mut self, id: u32, events: &mut Vec<Event>) {
        if let Some(player) = self.registry.get_mut(id) {
            player.role = Role::Spectator;
            player.state = PlayerState::Spectating;
            player.board = board::Board::new();
            player.piece = None;
            player.held = None;
            player.queue.clear();
        }
        events.push(Event::Broadcast(Packet::Eliminated {
            player_id: id,
            final_out: true,
        }));
    }

    /// One fixed-interval simulation step. Runs the whole per-tick pipeline
    /// and ends with the consolidated snapshot broadcast.
    pub fn tick(&mut self) -> Vec<Event> {
        self.tick += 1;
        self.now_ms += TICK_MS;
        let mut events = Vec::new();

        match self.phase {
            MatchPhase::Lobby => self.tick_lobby(&mut events),
            MatchPhase::Running => self.tick_running(&mut events),
        }

        events.push(Event::Broadcast(self.snapshot_packet()));
        events
    }

    fn tick_lobby(&mut self, events: &mut Vec<Event>) {
        let Some(remaining) = self.start_countdown else {
            return;
        };

        if self.registry.challengers().is_empty() {
            self.start_countdown = None;
            return;
        }

        if remaining > 1 {
            self.start_countdown = Some(remaining - 1);
        } else {
            self.start_countdown = None;
            self.start_match(events);
        }
    }

    fn start_match(&mut self, _events: &mut Vec<Event>) {
        info!(
            "Match starting with {} challenger(s)",
            self.registry.challengers().len()
        );
        self.phase = MatchPhase::Running;
        self.ever_challengers.clear();

        for id in self.registry.challengers() {
            self.ever_challengers.insert(id);
            if let Some(player) = self.registry.get_mut(id) {
                player.reset_for_match(&mut self.rng);
                player.state = PlayerState::Active;
                player.was_challenger = true;
            }
        }
    }

    fn tick_running(&mut self, events: &mut Vec<Event>) {
        // Re-activate challengers who chose to continue: fresh board, fresh
        // piece, straight back into the simulation.
        for id in self.registry.challengers() {
            let Some(player) = self.registry.get_mut(id) else {
                continue;
            };
            if player.state == PlayerState::Ready {
                player.spawn_piece(&mut self.rng);
                player.state = PlayerState::Active;
                player.was_challenger = true;
                self.ever_challengers.insert(id);
            }
        }

        // Gravity pass over every simulated board.
        for id in self.registry.challengers() {
            if !self.simulated(id) {
                continue;
            }
            let (due, level) = {
                let Some(player) = self.registry.get_mut(id) else {
                    continue;
                };
                if player.piece.is_none() {
                    continue;
                }
                player.action_time = player.action_time.saturating_sub(1);
                (player.action_time == 0, player.level)
            };
            if due {
                let settled = self.step_down(id, events);
                if !settled {
                    if let Some(player) = self.registry.get_mut(id) {
                        player.action_time = scoring::gravity_delay_ticks(level);
                    }
                }
            }
        }

        self.resolve_attacks(events);
        self.detect_overflows(events);
        self.check_match_end(events);
    }

    /// Attempts a one-cell descent; a blocked descent settles the piece.
    fn step_down(&mut self, id: u32, events: &mut Vec<Event>) -> bool {
        let mut blocked = false;
        if let Some(player) = self.registry.get_mut(id) {
            if let Some(piece) = player.piece.take() {
                match board::move_down(&piece, &player.board) {
                    Some(moved) => player.piece = Some(moved),
                    None => {
                        player.piece = Some(piece);
                        blocked = true;
                    }
                }
            }
        }
        if blocked {
            self.settle(id, events);
        }
        blocked
    }

    /// Locks the falling piece into the settled cells, scores any clears,
    /// records this tick's outputs, and puts the next piece in play.
    fn settle(&mut self, id: u32, events: &mut Vec<Event>) {
        let now = self.now_ms;
        let Some(player) = self.registry.get_mut(id) else {
            return;
        };
        let Some(piece) = player.piece.take() else {
            return;
        };

        player.board.merge(&piece);
        let (cleared_board, rows) = board::clear_lines(&player.board);
        player.board = cleared_board;

        if !rows.is_empty() {
            let lines = rows.len() as u32;
            player.combo = scoring::update_combo(player.combo, player.last_clear_ms, now);
            player.last_clear_ms = now;

            let level = player.level;
            let combo = player.combo;
            let attack = scoring::attack_power(lines, level, combo);
            let bonus = scoring::roll_bonus(&mut self.rng);
            let exp = scoring::gained_exp(lines, combo, bonus.as_ref(), &mut self.rng);

            player.score += scoring::line_score(lines, level);
            player.exp += exp;
            let (new_level, next_threshold, leveled_up) =
                scoring::check_level_up(player.level, player.exp);
            player.level = new_level;
            player.exp_to_next = next_threshold;
            player.spawn_piece(&mut self.rng);

            let outcome = self.outcomes.entry(id).or_default();
            outcome.cleared_rows.extend(rows.iter().copied());
            outcome.attack += attack;
            if bonus.is_some() {
                outcome.bonus = bonus.clone();
            }
            outcome.leveled_up |= leveled_up;

            events.push(Event::Broadcast(Packet::LinesCleared {
                player_id: id,
                rows,
            }));
            if let Some(event) = bonus {
                events.push(Event::Broadcast(Packet::Bonus {
                    player_id: id,
                    event,
                }));
            }
            if leveled_up {
                events.push(Event::Broadcast(Packet::LevelUp {
                    player_id: id,
                    level: new_level,
                }));
            }
        } else {
            player.spawn_piece(&mut self.rng);
        }
    }

    /// Sends every attacker's garbage to one uniformly random other active
    /// challenger, then drops the tick-local outputs.
    fn resolve_attacks(&mut self, events: &mut Vec<Event>) {
        let outcomes = std::mem::take(&mut self.outcomes);
        if outcomes.is_empty() {
            return;
        }

        let mut attackers: Vec<u32> = outcomes.keys().copied().collect();
        attackers.sort_unstable();

        let mut active: Vec<u32> = self
            .registry
            .values()
            .filter(|p| p.is_simulated())
            .map(|p| p.id)
            .collect();
        active.sort_unstable();

        for attacker in attackers {
            let outcome = &outcomes[&attacker];
            if outcome.attack == 0 || !self.registry.contains(attacker) {
                continue;
            }

            let targets: Vec<u32> = active.iter().copied().filter(|&t| t != attacker).collect();
            if targets.is_empty() {
                continue;
            }

            let target = targets[self.rng.gen_range(0..targets.len())];
            let power = outcome.attack;
            if let Some(victim) = self.registry.get_mut(target) {
                victim.board = board::inject_garbage(&victim.board, power as usize, &mut self.rng);
            }

            info!(
                "Player {} attacks player {} with {} garbage line(s)",
                attacker, target, power
            );
            events.push(Event::Broadcast(Packet::Attack {
                attacker,
                target,
                power,
            }));
        }
    }

    /// Runs after every board advance and garbage injection of the tick so
    /// it never sees partially-updated state.
    fn detect_overflows(&mut self, events: &mut Vec<Event>) {
        for id in self.registry.challengers() {
            let Some(player) = self.registry.get(id) else {
                continue;
            };
            if player.state == PlayerState::Active && player.board.overflowed() {
                self.begin_elimination(id, events);
            }
        }
    }

    fn begin_elimination(&mut self, id: u32, events: &mut Vec<Event>) {
        let token = self.next_token;
        self.next_token += 1;

        info!(
            "Player {} board overflowed, starting negotiation {}",
            id, token
        );
        if let Some(player) = self.registry.get_mut(id) {
            player.state = PlayerState::Lose;
            player.piece = None;
        }
        self.pending.insert(
            id,
            Negotiation {
                token,
                stage: NegotiationStage::EffectDelay,
            },
        );

        events.push(Event::Broadcast(Packet::Eliminated {
            player_id: id,
            final_out: false,
        }));
        events.push(Event::ArmEffectTimer {
            player_id: id,
            token,
        });
    }

    /// Declares the match over once zero or one challenger is left standing
    /// among everyone who competed — but never while an elimination
    /// negotiation is still unresolved.
    fn check_match_end(&mut self, events: &mut Vec<Event>) {
        if self.phase != MatchPhase::Running || !self.pending.is_empty() {
            return;
        }

        let mut alive: Vec<u32> = self
            .registry
            .values()
            .filter(|p| {
                p.role == Role::Challenger
                    && matches!(p.state, PlayerState::Active | PlayerState::Ready)
            })
            .map(|p| p.id)
            .collect();
        alive.sort_unstable();

        let contested = self.ever_challengers.len() >= 2;
        if (contested && alive.len() <= 1) || alive.is_empty() {
            self.finish_match(alive.first().copied(), events);
        }
    }

    fn finish_match(&mut self, winner: Option<u32>, events: &mut Vec<Event>) {
        info!("Match over, winner: {:?}", winner);

        let mut finishers: Vec<&Player> = self
            .registry
            .values()
            .filter(|p| p.was_challenger)
            .collect();
        finishers.sort_by(|a, b| {
            let a_won = Some(a.id) == winner;
            let b_won = Some(b.id) == winner;
            b_won
                .cmp(&a_won)
                .then(b.score.cmp(&a.score))
                .then(b.level.cmp(&a.level))
                .then(a.id.cmp(&b.id))
        });

        let rankings: Vec<Ranking> = finishers
            .iter()
            .enumerate()
            .map(|(i, p)| Ranking {
                player_id: p.id,
                name: p.name.clone(),
                score: p.score,
                level: p.level,
                place: i as u32 + 1,
            })
            .collect();

        events.push(Event::Broadcast(Packet::MatchOver { rankings }));

        self.phase = MatchPhase::Lobby;
        self.outcomes.clear();
        self.ever_challengers.clear();

        for player in self.registry.values_mut() {
            player.was_challenger = false;
            if player.role == Role::Challenger {
                player.state = PlayerState::Ready;
                player.board = board::Board::new();
                player.piece = None;
            }
        }

        // Survivors rematch automatically after the usual start delay.
        self.arm_start_countdown();
    }
}
