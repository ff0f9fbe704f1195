//! Live session state machine
//!
//! A [`Session`] holds all runtime state for one game: the immutable quiz,
//! the joined players with their scores and per-question submissions, the
//! current phase, and the host connection. Phase transitions are driven by
//! host commands, by player submissions (early resolution), and by alarms
//! the session previously scheduled.
//!
//! Every transition bumps a monotonic phase token. Alarms carry the token
//! current when they were scheduled, and [`Session::receive_alarm`] drops
//! any delivery whose token no longer matches, which makes late or
//! duplicated timer callbacks harmless.
//!
//! Methods never sleep and never read the clock; callers pass `now`
//! explicitly, so the whole lifecycle of a game can be replayed
//! deterministically in tests.

use std::cmp::Reverse;
use std::collections::HashMap;

use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info};
use web_time::Instant;

use crate::{
    Error, Event,
    connection::ConnectionId,
    constants::{session::MAX_NAME_LENGTH, session::MAX_PLAYER_COUNT, timing},
    gateway::Gateway,
    join_code::JoinCode,
    quiz::Quiz,
    scheduler::{Alarm, AlarmKind, Scheduler},
    scoring,
};

/// Lifecycle phase of a session.
///
/// Variants that concern a specific question carry its index, so the phase
/// alone identifies both where the game is and which question it is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Waiting for players; the game has not started
    Lobby,
    /// The game started; the question at `index` begins after a short delay
    Countdown {
        /// Index of the upcoming question
        index: usize,
    },
    /// The question at `index` is accepting answers
    QuestionActive {
        /// Index of the active question
        index: usize,
    },
    /// The question at `index` resolved; results are on screen
    Resolving {
        /// Index of the resolved question
        index: usize,
    },
    /// The game is over; the session awaits eviction
    Ended,
}

impl Phase {
    /// Returns the index of the question the phase concerns, if any
    pub fn question_index(self) -> Option<usize> {
        match self {
            Self::Lobby | Self::Ended => None,
            Self::Countdown { index }
            | Self::QuestionActive { index }
            | Self::Resolving { index } => Some(index),
        }
    }

    /// Whether the game has started and not yet ended
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Countdown { .. } | Self::QuestionActive { .. } | Self::Resolving { .. }
        )
    }
}

/// A player's answer to the currently active question.
///
/// The score is computed at submission time but only applied to the
/// player's total when the question resolves.
#[derive(Debug, Clone, Copy)]
struct Submission {
    option_index: usize,
    elapsed_seconds: f64,
    correct: bool,
    points: u64,
}

#[derive(Debug, Clone)]
struct Player {
    name: String,
    score: u64,
    join_order: usize,
    submission: Option<Submission>,
}

/// A player as seen by other participants.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerSnapshot {
    /// Connection identifier of the player
    pub id: ConnectionId,
    /// Display name
    pub name: String,
    /// Applied score
    pub score: u64,
}

/// One player's outcome for a resolved question.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerResult {
    /// Connection identifier of the player
    pub player_id: ConnectionId,
    /// Display name
    pub player_name: String,
    /// The option the player picked, if they answered in time
    pub answer: Option<usize>,
    /// Whether the pick was correct
    pub correct: bool,
    /// Seconds from question start to submission, clamped to the time limit
    pub elapsed_seconds: f64,
    /// Cumulative points after this question resolved
    pub points: u64,
}

/// One row of the leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    /// Connection identifier of the player
    pub player_id: ConnectionId,
    /// Display name
    pub name: String,
    /// Total applied score
    pub score: u64,
}

/// Full observable state of a session, sent to joining or reattaching
/// connections so they can render without replaying history.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Join code of the session
    pub code: JoinCode,
    /// Title of the quiz being played
    pub title: String,
    /// Current phase
    pub phase: Phase,
    /// Index of the question the phase concerns, if any
    pub current_index: Option<usize>,
    /// Whether the game is paused
    pub paused: bool,
    /// Number of questions in the quiz
    pub total_questions: usize,
    /// Joined players in join order
    pub players: Vec<PlayerSnapshot>,
}

/// Runtime state for a single live game.
#[derive(Debug)]
pub struct Session {
    code: JoinCode,
    quiz: Quiz,
    host: Option<ConnectionId>,
    players: HashMap<ConnectionId, Player>,
    /// Total joins ever, used to assign stable join-order ranks
    joined_count: usize,
    phase: Phase,
    paused: bool,
    /// Bumped on every phase transition; stale alarms fail the comparison
    phase_token: u64,
    question_started_at: Option<Instant>,
}

impl Session {
    /// Creates a session in the lobby phase and announces it to the host.
    ///
    /// The quiz is assumed to be validated; see
    /// [`Quiz::validate_content`].
    pub fn create<G: Gateway>(code: JoinCode, quiz: Quiz, host: ConnectionId, gateway: &G) -> Self {
        let session = Self {
            code,
            quiz,
            host: Some(host),
            players: HashMap::new(),
            joined_count: 0,
            phase: Phase::Lobby,
            paused: false,
            phase_token: 0,
            question_started_at: None,
        };

        gateway.join_room(host, code);
        gateway.send_to_connection(
            host,
            &Event::GameCreated {
                code,
                title: session.quiz.title.clone(),
            },
        );

        info!(code = %code, title = %session.quiz.title, "game created");
        session
    }

    /// Points the session at a new host connection and sends it the current
    /// state. Returns the previous host, if any, so the caller can retire
    /// its routing entry.
    pub fn attach_host<G: Gateway>(&mut self, host: ConnectionId, gateway: &G) -> Option<ConnectionId> {
        let previous = self.host.replace(host);

        gateway.join_room(host, self.code);
        gateway.send_to_connection(
            host,
            &Event::HostAttached {
                snapshot: self.snapshot(),
            },
        );

        info!(code = %self.code, "host attached");
        previous
    }

    /// Adds a player to the session.
    ///
    /// Display names must be unique within the session (comparison is
    /// case-sensitive); overlong names are truncated rather than rejected,
    /// but a name that trims to nothing is refused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionAlreadyEnded`] if the game is over,
    /// [`Error::SessionFull`] at the player cap, [`Error::InvalidName`]
    /// for an empty name, and [`Error::NameTaken`] on a duplicate name.
    pub fn join_player<G: Gateway>(
        &mut self,
        connection: ConnectionId,
        name: &str,
        gateway: &G,
    ) -> Result<(), Error> {
        if matches!(self.phase, Phase::Ended) {
            return Err(Error::SessionAlreadyEnded);
        }
        if self.players.len() >= MAX_PLAYER_COUNT {
            return Err(Error::SessionFull);
        }

        let name: String = name.trim().chars().take(MAX_NAME_LENGTH).collect();
        if name.is_empty() {
            return Err(Error::InvalidName);
        }
        if self.players.values().any(|player| player.name == name) {
            return Err(Error::NameTaken);
        }

        self.joined_count += 1;
        self.players.insert(
            connection,
            Player {
                name: name.clone(),
                score: 0,
                join_order: self.joined_count,
                submission: None,
            },
        );

        gateway.join_room(connection, self.code);
        gateway.send_to_connection(
            connection,
            &Event::JoinedGame {
                player: PlayerSnapshot {
                    id: connection,
                    name: name.clone(),
                    score: 0,
                },
                snapshot: self.snapshot(),
            },
        );
        gateway.send_to_room(
            self.code,
            &Event::PlayerJoined {
                player: PlayerSnapshot {
                    id: connection,
                    name,
                    score: 0,
                },
                total_players: self.players.len(),
            },
        );

        debug!(code = %self.code, players = self.players.len(), "player joined");
        Ok(())
    }

    /// Starts the game: announces the start and schedules the first
    /// question after the pre-question countdown.
    ///
    /// Calling it again once the game is underway is a no-op, so a
    /// double-clicked start button cannot fork the timeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] unless `requester` is the host.
    pub fn start_game<G: Gateway>(
        &mut self,
        requester: ConnectionId,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) -> Result<(), Error> {
        self.authorize(requester)?;
        if !matches!(self.phase, Phase::Lobby) {
            return Ok(());
        }

        self.transition(Phase::Countdown { index: 0 });
        gateway.send_to_room(
            self.code,
            &Event::GameStarted {
                snapshot: self.snapshot(),
            },
        );
        scheduler.schedule(
            Alarm {
                code: self.code,
                token: self.phase_token,
                kind: AlarmKind::QuestionStart { index: 0 },
            },
            timing::QUESTION_COUNTDOWN,
            now,
        );

        info!(code = %self.code, players = self.players.len(), "game started");
        Ok(())
    }

    /// Opens the question at `index` for answers and schedules its
    /// deadline.
    ///
    /// If the session is paused the start is deferred: the alarm is
    /// re-armed with the pre-question delay and will be retried after the
    /// resume. If `index` is past the end of the quiz the game ends
    /// instead.
    fn start_question<G: Gateway>(
        &mut self,
        index: usize,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) {
        if matches!(self.phase, Phase::Ended) {
            return;
        }
        if self.paused {
            scheduler.schedule(
                Alarm {
                    code: self.code,
                    token: self.phase_token,
                    kind: AlarmKind::QuestionStart { index },
                },
                timing::QUESTION_COUNTDOWN,
                now,
            );
            return;
        }

        let Some(question) = self.quiz.questions.get(index) else {
            self.finish(scheduler, gateway, now);
            return;
        };
        let public = question.public();
        let time_limit = question.time_limit;

        for player in self.players.values_mut() {
            player.submission = None;
        }
        self.question_started_at = Some(now);
        self.transition(Phase::QuestionActive { index });

        gateway.send_to_room(
            self.code,
            &Event::QuestionStarted {
                time_limit: public.time_limit,
                question: public,
                index,
            },
        );
        scheduler.schedule(
            Alarm {
                code: self.code,
                token: self.phase_token,
                kind: AlarmKind::QuestionDeadline { index },
            },
            time_limit,
            now,
        );

        debug!(code = %self.code, index, "question started");
    }

    /// Records a player's answer to the active question.
    ///
    /// Invalid submissions are dropped silently rather than rejected: no
    /// question is active, the sender is not a joined player, the question
    /// id does not match the active question (a stale submission from a
    /// lagging client), or the player already answered. A valid submission
    /// has its score computed immediately but applied only at resolution.
    ///
    /// When the last unanswered player submits, the question resolves
    /// early and its pending deadline is cancelled.
    pub fn submit_answer<G: Gateway>(
        &mut self,
        connection: ConnectionId,
        question_id: &str,
        option_index: usize,
        elapsed_seconds: f64,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) {
        let Phase::QuestionActive { index } = self.phase else {
            return;
        };
        let Some(question) = self.quiz.questions.get(index) else {
            return;
        };
        if question.id != question_id {
            debug!(code = %self.code, index, "submission for stale question dropped");
            return;
        }
        let correct_answer = question.correct_answer;
        let time_limit = question.time_limit_seconds();
        let Some(player) = self.players.get_mut(&connection) else {
            return;
        };
        if player.submission.is_some() {
            return;
        }

        let elapsed = elapsed_seconds.clamp(0.0, time_limit as f64);
        let correct = option_index == correct_answer;
        let points = scoring::score(correct, elapsed, time_limit);
        player.submission = Some(Submission {
            option_index,
            elapsed_seconds: elapsed,
            correct,
            points,
        });

        debug!(code = %self.code, index, correct, points, "answer recorded");

        let all_answered =
            !self.players.is_empty() && self.players.values().all(|p| p.submission.is_some());
        if all_answered {
            scheduler.cancel(self.code);
            self.end_question(index, scheduler, gateway, now);
        }
    }

    /// Resolves the question at `index`: applies deferred scores,
    /// broadcasts results and the updated leaderboard, and schedules the
    /// advance to the next question.
    ///
    /// A no-op unless the question at `index` is currently active, which
    /// makes a late deadline after an early resolution harmless.
    fn end_question<G: Gateway>(
        &mut self,
        index: usize,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) {
        if self.phase != (Phase::QuestionActive { index }) {
            return;
        }
        let Some(question) = self.quiz.questions.get(index) else {
            return;
        };
        let time_limit = question.time_limit_seconds();
        let correct_answer = question.correct_answer;

        for player in self.players.values_mut() {
            if let Some(submission) = player.submission {
                player.score += submission.points;
            }
        }

        let results = self
            .players
            .iter()
            .sorted_by_key(|(_, player)| player.join_order)
            .map(|(id, player)| match player.submission {
                Some(submission) => PlayerResult {
                    player_id: *id,
                    player_name: player.name.clone(),
                    answer: Some(submission.option_index),
                    correct: submission.correct,
                    elapsed_seconds: submission.elapsed_seconds,
                    points: player.score,
                },
                None => PlayerResult {
                    player_id: *id,
                    player_name: player.name.clone(),
                    answer: None,
                    correct: false,
                    elapsed_seconds: time_limit as f64,
                    points: player.score,
                },
            })
            .collect_vec();

        self.transition(Phase::Resolving { index });

        gateway.send_to_room(
            self.code,
            &Event::QuestionEnded {
                correct_answer,
                results,
            },
        );
        gateway.send_to_room(
            self.code,
            &Event::LeaderboardUpdated {
                leaderboard: self.leaderboard(),
            },
        );
        scheduler.schedule(
            Alarm {
                code: self.code,
                token: self.phase_token,
                kind: AlarmKind::AdvanceQuestion {
                    next_index: index + 1,
                },
            },
            timing::RESULTS_DISPLAY,
            now,
        );

        let elapsed = self
            .question_started_at
            .map(|started| now.saturating_duration_since(started));
        debug!(code = %self.code, index, ?elapsed, "question resolved");
    }

    /// Moves on after the results display: starts the next question or, if
    /// the quiz is exhausted, ends the game.
    fn advance<G: Gateway>(
        &mut self,
        next_index: usize,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) {
        if matches!(self.phase, Phase::Ended) {
            return;
        }
        if next_index < self.quiz.len() {
            self.start_question(next_index, scheduler, gateway, now);
        } else {
            self.finish(scheduler, gateway, now);
        }
    }

    /// Ends the game: cancels pending timers, broadcasts the final
    /// leaderboard, and schedules eviction after the grace period.
    fn finish<G: Gateway>(&mut self, scheduler: &mut Scheduler, gateway: &G, now: Instant) {
        if matches!(self.phase, Phase::Ended) {
            return;
        }

        scheduler.cancel(self.code);
        self.transition(Phase::Ended);
        self.paused = false;

        gateway.send_to_room(
            self.code,
            &Event::GameEnded {
                final_leaderboard: self.leaderboard(),
            },
        );
        scheduler.schedule(
            Alarm {
                code: self.code,
                token: self.phase_token,
                kind: AlarmKind::Evict,
            },
            timing::EVICTION_GRACE,
            now,
        );

        info!(code = %self.code, "game ended");
    }

    /// Toggles the paused flag, suspending or resuming the session's
    /// pending timers with their remaining time preserved.
    ///
    /// Pausing is only meaningful before the game ends; in the resolving
    /// and ended phases the toggle is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] unless `requester` is the host.
    pub fn pause_toggle<G: Gateway>(
        &mut self,
        requester: ConnectionId,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) -> Result<(), Error> {
        self.authorize(requester)?;
        if !matches!(
            self.phase,
            Phase::Lobby | Phase::Countdown { .. } | Phase::QuestionActive { .. }
        ) {
            return Ok(());
        }

        self.paused = !self.paused;
        if self.paused {
            scheduler.suspend(self.code, now);
        } else {
            scheduler.resume(self.code, now);
        }

        gateway.send_to_room(
            self.code,
            &Event::GamePaused {
                paused: self.paused,
            },
        );
        info!(code = %self.code, paused = self.paused, "pause toggled");
        Ok(())
    }

    /// Ends the game immediately regardless of phase.
    ///
    /// Submissions for a question that has not resolved are discarded;
    /// only applied scores appear in the final leaderboard.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] unless `requester` is the host.
    pub fn end_game<G: Gateway>(
        &mut self,
        requester: ConnectionId,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) -> Result<(), Error> {
        self.authorize(requester)?;
        self.finish(scheduler, gateway, now);
        Ok(())
    }

    /// Removes a player at the host's request.
    ///
    /// The target is notified directly, removed from the room, and the
    /// departure is broadcast. Kicking a connection that is not a player
    /// of this session succeeds without effect; the returned flag tells
    /// the caller whether a player was actually removed, so routing state
    /// for connections belonging to other sessions is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] unless `requester` is the host.
    pub fn kick_player<G: Gateway>(
        &mut self,
        requester: ConnectionId,
        target: ConnectionId,
        gateway: &G,
    ) -> Result<bool, Error> {
        self.authorize(requester)?;

        if self.players.remove(&target).is_none() {
            return Ok(false);
        }

        gateway.send_to_connection(target, &Event::Kicked);
        gateway.leave_room(target, self.code);
        gateway.send_to_room(
            self.code,
            &Event::PlayerLeft {
                player_id: target,
                total_players: self.players.len(),
            },
        );
        info!(code = %self.code, "player kicked");
        Ok(true)
    }

    /// Removes a player whose connection dropped and broadcasts the
    /// departure. Unknown connections are ignored.
    pub fn handle_player_disconnect<G: Gateway>(&mut self, connection: ConnectionId, gateway: &G) {
        if self.players.remove(&connection).is_some() {
            gateway.send_to_room(
                self.code,
                &Event::PlayerLeft {
                    player_id: connection,
                    total_players: self.players.len(),
                },
            );
            debug!(code = %self.code, players = self.players.len(), "player disconnected");
        }
    }

    /// Detaches the host when its connection drops.
    ///
    /// The session keeps running headless: active timers still fire and
    /// players can still answer, but host commands are rejected until a
    /// new host attaches with the join code.
    pub fn handle_host_disconnect(&mut self, connection: ConnectionId) {
        if self.host == Some(connection) {
            self.host = None;
            info!(code = %self.code, "host disconnected, session is headless");
        }
    }

    /// Delivers a previously scheduled alarm.
    ///
    /// The alarm's token must match the current phase token; otherwise the
    /// session has transitioned since scheduling and the delivery is
    /// silently dropped.
    pub fn receive_alarm<G: Gateway>(
        &mut self,
        alarm: Alarm,
        scheduler: &mut Scheduler,
        gateway: &G,
        now: Instant,
    ) {
        if alarm.token != self.phase_token {
            debug!(code = %self.code, ?alarm, "stale alarm dropped");
            return;
        }

        match alarm.kind {
            AlarmKind::QuestionStart { index } => {
                self.start_question(index, scheduler, gateway, now);
            }
            AlarmKind::QuestionDeadline { index } => {
                self.end_question(index, scheduler, gateway, now);
            }
            AlarmKind::AdvanceQuestion { next_index } => {
                self.advance(next_index, scheduler, gateway, now);
            }
            // Eviction removes the whole session and is handled by the
            // registry before alarms reach here.
            AlarmKind::Evict => {}
        }
    }

    /// Returns the standings: players sorted by score descending, with
    /// ties broken by join order (earlier joiner first).
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.players
            .iter()
            .sorted_by_key(|(_, player)| (Reverse(player.score), player.join_order))
            .map(|(id, player)| LeaderboardEntry {
                player_id: *id,
                name: player.name.clone(),
                score: player.score,
            })
            .collect_vec()
    }

    /// Returns the full observable state of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            code: self.code,
            title: self.quiz.title.clone(),
            phase: self.phase,
            current_index: self.phase.question_index(),
            paused: self.paused,
            total_questions: self.quiz.len(),
            players: self
                .players
                .iter()
                .sorted_by_key(|(_, player)| player.join_order)
                .map(|(id, player)| PlayerSnapshot {
                    id: *id,
                    name: player.name.clone(),
                    score: player.score,
                })
                .collect_vec(),
        }
    }

    fn authorize(&self, requester: ConnectionId) -> Result<(), Error> {
        if self.host == Some(requester) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    fn transition(&mut self, phase: Phase) {
        debug!(code = %self.code, from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
        self.phase_token += 1;
    }

    /// Returns the session's join code
    pub fn code(&self) -> JoinCode {
        self.code
    }

    /// Returns the current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the current phase token
    pub fn phase_token(&self) -> u64 {
        self.phase_token
    }

    /// Returns the current host connection, if one is attached
    pub fn host(&self) -> Option<ConnectionId> {
        self.host
    }

    /// Returns the quiz title
    pub fn title(&self) -> &str {
        &self.quiz.title
    }

    /// Returns the number of joined players
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Returns the number of questions in the quiz
    pub fn question_count(&self) -> usize {
        self.quiz.len()
    }

    /// Whether the game is currently paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }
}
