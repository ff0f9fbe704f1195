//! Session registry
//!
//! The registry owns every live session, keyed by join code, plus the
//! reverse routing map from connection to session and the shared timer
//! scheduler. It is the single entry point an embedding server talks to:
//! inbound commands are routed to the right session, disconnects are
//! translated into player or host departures, and a periodic
//! [`Registry::tick`] drains due alarms back into their sessions.
//!
//! All interior state sits behind mutexes, so the registry itself can live
//! in an `Arc` and be shared across transport handler tasks. Locks are
//! always taken in the same order (session map, then session, then
//! scheduler) to keep the handlers deadlock-free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::{
    Error,
    connection::ConnectionId,
    gateway::Gateway,
    join_code::JoinCode,
    quiz::Quiz,
    scheduler::{AlarmKind, Scheduler},
    session::Session,
};

/// The side of the session a connection is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connection controls the session
    Host,
    /// The connection is a joined player
    Player,
}

#[derive(Debug, Clone, Copy)]
struct ConnectionEntry {
    code: JoinCode,
    role: Role,
}

/// One row of the live-sessions listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Join code of the session
    pub code: JoinCode,
    /// Title of the quiz being played
    pub title: String,
    /// Number of joined players
    pub player_count: usize,
    /// Whether the game has started and not yet ended
    pub active: bool,
    /// One-based number of the question in play, or 0 before the start
    pub current_question: usize,
    /// Number of questions in the quiz
    pub total_questions: usize,
}

/// Holds all live sessions and routes commands, disconnects, and timer
/// callbacks to them.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<HashMap<JoinCode, Arc<Mutex<Session>>>>,
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    scheduler: Mutex<Scheduler>,
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Session state stays internally consistent across panics because every
/// operation either completes or returns early before mutating, so
/// continuing with the inner value is safe.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session for `host`, or reattaches `host` to an existing
    /// one.
    ///
    /// With no `code`, a fresh unique code is allocated and a quiz is
    /// required. With a `code` that names a live session, the host is
    /// attached to it and receives a state snapshot; any quiz passed along
    /// is ignored. With a `code` that names no session, one is created
    /// under that code.
    ///
    /// Returns the join code of the session the host now controls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingQuizData`] when creation is needed but no
    /// quiz was supplied, and [`Error::InvalidQuiz`] when the supplied quiz
    /// fails validation.
    pub fn create_or_attach<G: Gateway>(
        &self,
        code: Option<JoinCode>,
        quiz: Option<Quiz>,
        host: ConnectionId,
        gateway: &G,
    ) -> Result<JoinCode, Error> {
        let mut sessions = lock(&self.sessions);

        if let Some(code) = code {
            if let Some(session) = sessions.get(&code).cloned() {
                drop(sessions);
                let previous = lock(&session).attach_host(host, gateway);

                let mut connections = lock(&self.connections);
                if let Some(previous) = previous {
                    if previous != host {
                        connections.remove(&previous);
                    }
                }
                connections.insert(
                    host,
                    ConnectionEntry {
                        code,
                        role: Role::Host,
                    },
                );
                return Ok(code);
            }
        }

        let quiz = quiz.ok_or(Error::MissingQuizData)?;
        quiz.validate_content()?;

        let code = match code {
            Some(code) => code,
            None => Self::allocate(&sessions),
        };
        let session = Session::create(code, quiz, host, gateway);
        sessions.insert(code, Arc::new(Mutex::new(session)));
        drop(sessions);

        lock(&self.connections).insert(
            host,
            ConnectionEntry {
                code,
                role: Role::Host,
            },
        );
        Ok(code)
    }

    /// Adds a player to the session with the given join code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for an unknown code, plus
    /// whatever [`Session::join_player`] rejects.
    pub fn join_as_player<G: Gateway>(
        &self,
        code: JoinCode,
        connection: ConnectionId,
        name: &str,
        gateway: &G,
    ) -> Result<(), Error> {
        let session = self.session(code)?;
        lock(&session).join_player(connection, name, gateway)?;

        lock(&self.connections).insert(
            connection,
            ConnectionEntry {
                code,
                role: Role::Player,
            },
        );
        Ok(())
    }

    /// Starts the game in the session with the given join code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for an unknown code and
    /// [`Error::Unauthorized`] unless `requester` hosts the session.
    pub fn start_game<G: Gateway>(
        &self,
        code: JoinCode,
        requester: ConnectionId,
        gateway: &G,
        now: Instant,
    ) -> Result<(), Error> {
        let session = self.session(code)?;
        let mut session = lock(&session);
        session.start_game(requester, &mut lock(&self.scheduler), gateway, now)
    }

    /// Records a player's answer in the session with the given join code.
    ///
    /// Unknown codes and invalid submissions are dropped silently, matching
    /// the fire-and-forget nature of answer traffic.
    pub fn submit_answer<G: Gateway>(
        &self,
        code: JoinCode,
        connection: ConnectionId,
        question_id: &str,
        option_index: usize,
        elapsed_seconds: f64,
        gateway: &G,
        now: Instant,
    ) {
        let Ok(session) = self.session(code) else {
            debug!(code = %code, "submission for unknown session dropped");
            return;
        };
        let mut session = lock(&session);
        session.submit_answer(
            connection,
            question_id,
            option_index,
            elapsed_seconds,
            &mut lock(&self.scheduler),
            gateway,
            now,
        );
    }

    /// Pauses or resumes the session with the given join code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for an unknown code and
    /// [`Error::Unauthorized`] unless `requester` hosts the session.
    pub fn pause_toggle<G: Gateway>(
        &self,
        code: JoinCode,
        requester: ConnectionId,
        gateway: &G,
        now: Instant,
    ) -> Result<(), Error> {
        let session = self.session(code)?;
        let mut session = lock(&session);
        session.pause_toggle(requester, &mut lock(&self.scheduler), gateway, now)
    }

    /// Ends the session with the given join code immediately.
    ///
    /// The session stays resident for the eviction grace period so late
    /// listings can still see the final state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for an unknown code and
    /// [`Error::Unauthorized`] unless `requester` hosts the session.
    pub fn end_game<G: Gateway>(
        &self,
        code: JoinCode,
        requester: ConnectionId,
        gateway: &G,
        now: Instant,
    ) -> Result<(), Error> {
        let session = self.session(code)?;
        let mut session = lock(&session);
        session.end_game(requester, &mut lock(&self.scheduler), gateway, now)
    }

    /// Removes a player from the session with the given join code.
    ///
    /// The routing entry for `target` is dropped only when the session
    /// actually removed a player, so a kick aimed at a connection that
    /// belongs to a different session cannot sever that session's routing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for an unknown code and
    /// [`Error::Unauthorized`] unless `requester` hosts the session.
    pub fn kick_player<G: Gateway>(
        &self,
        code: JoinCode,
        requester: ConnectionId,
        target: ConnectionId,
        gateway: &G,
    ) -> Result<(), Error> {
        let session = self.session(code)?;
        let removed = lock(&session).kick_player(requester, target, gateway)?;

        if removed {
            lock(&self.connections).remove(&target);
        }
        Ok(())
    }

    /// Handles a transport-reported disconnect.
    ///
    /// A player departure is broadcast to the room; a host departure leaves
    /// the session headless until a new host attaches. Connections unknown
    /// to the registry are ignored.
    pub fn handle_disconnect<G: Gateway>(&self, connection: ConnectionId, gateway: &G) {
        let Some(entry) = lock(&self.connections).remove(&connection) else {
            return;
        };
        let Ok(session) = self.session(entry.code) else {
            return;
        };

        match entry.role {
            Role::Player => lock(&session).handle_player_disconnect(connection, gateway),
            Role::Host => lock(&session).handle_host_disconnect(connection),
        }
    }

    /// Fires every alarm due at `now`.
    ///
    /// Eviction alarms are handled here, since removing a session is
    /// outside the session's own reach; everything else is delivered to the
    /// owning session, which drops it if its token went stale. Alarms for
    /// sessions that have already been evicted are discarded.
    pub fn tick<G: Gateway>(&self, now: Instant, gateway: &G) {
        let due = lock(&self.scheduler).pop_due(now);

        for alarm in due {
            let Ok(session) = self.session(alarm.code) else {
                warn!(?alarm, "alarm for evicted session dropped");
                continue;
            };

            if matches!(alarm.kind, AlarmKind::Evict) {
                let stale = lock(&session).phase_token() != alarm.token;
                if !stale {
                    self.evict(alarm.code);
                }
                continue;
            }

            let mut session = lock(&session);
            session.receive_alarm(alarm, &mut lock(&self.scheduler), gateway, now);
        }
    }

    /// Returns the earliest instant at which an alarm becomes due.
    ///
    /// Drivers use this to size the sleep before the next [`tick`](Self::tick).
    pub fn next_deadline(&self) -> Option<Instant> {
        lock(&self.scheduler).next_deadline()
    }

    /// Returns the number of live sessions
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Lists every live session, for monitoring endpoints
    pub fn sessions_summary(&self) -> Vec<SessionSummary> {
        lock(&self.sessions)
            .values()
            .map(|session| {
                let session = lock(session);
                let phase = session.phase();
                SessionSummary {
                    code: session.code(),
                    title: session.title().to_string(),
                    player_count: session.player_count(),
                    active: phase.is_active(),
                    current_question: phase.question_index().map_or(0, |index| index + 1),
                    total_questions: session.question_count(),
                }
            })
            .collect()
    }

    fn session(&self, code: JoinCode) -> Result<Arc<Mutex<Session>>, Error> {
        lock(&self.sessions)
            .get(&code)
            .cloned()
            .ok_or(Error::SessionNotFound)
    }

    /// Removes a session and everything that references it
    fn evict(&self, code: JoinCode) {
        lock(&self.sessions).remove(&code);
        lock(&self.connections).retain(|_, entry| entry.code != code);
        lock(&self.scheduler).cancel(code);
        info!(code = %code, "session evicted");
    }

    /// Draws random codes until one is free.
    ///
    /// Codes are drawn from a 36^6 space, so with any realistic number of
    /// live sessions the loop terminates almost immediately.
    fn allocate(sessions: &HashMap<JoinCode, Arc<Mutex<Session>>>) -> JoinCode {
        loop {
            let code = JoinCode::random();
            if !sessions.contains_key(&code) {
                return code;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, quiz::Question};
    use std::str::FromStr;
    use web_time::Duration;

    #[derive(Default)]
    struct RecordingGateway {
        room_events: Mutex<Vec<(JoinCode, Event)>>,
        direct_events: Mutex<Vec<(ConnectionId, Event)>>,
    }

    impl RecordingGateway {
        fn room_events(&self) -> Vec<Event> {
            lock(&self.room_events)
                .iter()
                .map(|(_, event)| event.clone())
                .collect()
        }

        fn direct_events_for(&self, connection: ConnectionId) -> Vec<Event> {
            lock(&self.direct_events)
                .iter()
                .filter(|(to, _)| *to == connection)
                .map(|(_, event)| event.clone())
                .collect()
        }
    }

    impl Gateway for RecordingGateway {
        fn join_room(&self, _connection: ConnectionId, _code: JoinCode) {}

        fn leave_room(&self, _connection: ConnectionId, _code: JoinCode) {}

        fn send_to_room(&self, code: JoinCode, event: &Event) {
            lock(&self.room_events).push((code, event.clone()));
        }

        fn send_to_connection(&self, connection: ConnectionId, event: &Event) {
            lock(&self.direct_events).push((connection, event.clone()));
        }
    }

    fn create_test_quiz() -> Quiz {
        Quiz {
            id: "sample1".to_string(),
            title: "General Knowledge".to_string(),
            questions: vec![Question {
                id: "q1".to_string(),
                prompt: "What is the capital of France?".to_string(),
                options: vec![
                    "London".to_string(),
                    "Berlin".to_string(),
                    "Paris".to_string(),
                    "Madrid".to_string(),
                ],
                correct_answer: 2,
                time_limit: Duration::from_secs(20),
            }],
        }
    }

    #[test]
    fn test_create_allocates_unique_codes() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();

        let first = registry
            .create_or_attach(None, Some(create_test_quiz()), ConnectionId::new(), &gateway)
            .unwrap();
        let second = registry
            .create_or_attach(None, Some(create_test_quiz()), ConnectionId::new(), &gateway)
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_create_without_quiz_rejected() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();

        let result = registry.create_or_attach(None, None, ConnectionId::new(), &gateway);
        assert_eq!(result, Err(Error::MissingQuizData));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_create_with_invalid_quiz_rejected() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let mut quiz = create_test_quiz();
        quiz.questions[0].correct_answer = 9;

        let result = registry.create_or_attach(None, Some(quiz), ConnectionId::new(), &gateway);
        assert!(matches!(result, Err(Error::InvalidQuiz(_))));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_attach_to_existing_session() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let host = ConnectionId::new();
        let code = registry
            .create_or_attach(None, Some(create_test_quiz()), host, &gateway)
            .unwrap();

        let new_host = ConnectionId::new();
        let attached = registry
            .create_or_attach(Some(code), None, new_host, &gateway)
            .unwrap();

        assert_eq!(attached, code);
        assert_eq!(registry.session_count(), 1);
        assert!(matches!(
            gateway.direct_events_for(new_host)[0],
            Event::HostAttached { .. }
        ));

        // The new host controls the session; the old one does not.
        let now = Instant::now();
        assert_eq!(
            registry.start_game(code, host, &gateway, now),
            Err(Error::Unauthorized)
        );
        registry.start_game(code, new_host, &gateway, now).unwrap();
    }

    #[test]
    fn test_create_under_explicit_code() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let code = JoinCode::from_str("GAME42").unwrap();

        let created = registry
            .create_or_attach(Some(code), Some(create_test_quiz()), ConnectionId::new(), &gateway)
            .unwrap();

        assert_eq!(created, code);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_join_unknown_code_rejected() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let code = JoinCode::from_str("NOSUCH").unwrap();

        let result = registry.join_as_player(code, ConnectionId::new(), "Alice", &gateway);
        assert_eq!(result, Err(Error::SessionNotFound));
    }

    #[test]
    fn test_player_disconnect_routed_to_session() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let code = registry
            .create_or_attach(None, Some(create_test_quiz()), ConnectionId::new(), &gateway)
            .unwrap();
        let alice = ConnectionId::new();
        registry.join_as_player(code, alice, "Alice", &gateway).unwrap();

        registry.handle_disconnect(alice, &gateway);

        assert!(
            gateway
                .room_events()
                .iter()
                .any(|event| matches!(event, Event::PlayerLeft { .. }))
        );

        // A second report for the same connection is ignored.
        registry.handle_disconnect(alice, &gateway);
    }

    #[test]
    fn test_host_disconnect_leaves_session_running() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let host = ConnectionId::new();
        let code = registry
            .create_or_attach(None, Some(create_test_quiz()), host, &gateway)
            .unwrap();

        registry.handle_disconnect(host, &gateway);

        assert_eq!(registry.session_count(), 1);
        assert_eq!(
            registry.start_game(code, host, &gateway, Instant::now()),
            Err(Error::Unauthorized)
        );
    }

    #[test]
    fn test_tick_drives_game_to_eviction() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let host = ConnectionId::new();
        let now = Instant::now();
        let code = registry
            .create_or_attach(None, Some(create_test_quiz()), host, &gateway)
            .unwrap();
        let alice = ConnectionId::new();
        registry.join_as_player(code, alice, "Alice", &gateway).unwrap();
        registry.start_game(code, host, &gateway, now).unwrap();

        // Countdown elapses and the question opens.
        registry.tick(now + Duration::from_secs(3), &gateway);
        assert!(
            gateway
                .room_events()
                .iter()
                .any(|event| matches!(event, Event::QuestionStarted { .. }))
        );

        registry.submit_answer(
            code,
            alice,
            "q1",
            2,
            4.0,
            &gateway,
            now + Duration::from_secs(7),
        );

        // Results display elapses; the single-question quiz is done.
        registry.tick(now + Duration::from_secs(12), &gateway);
        assert!(
            gateway
                .room_events()
                .iter()
                .any(|event| matches!(event, Event::GameEnded { .. }))
        );
        assert_eq!(registry.session_count(), 1);

        // The grace period elapses and the session is evicted.
        registry.tick(now + Duration::from_secs(42), &gateway);
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.next_deadline(), None);

        // Late commands for the evicted session fail cleanly.
        assert_eq!(
            registry.start_game(code, host, &gateway, now + Duration::from_secs(43)),
            Err(Error::SessionNotFound)
        );
    }

    #[test]
    fn test_ended_session_survives_until_grace_elapses() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let host = ConnectionId::new();
        let now = Instant::now();
        let code = registry
            .create_or_attach(None, Some(create_test_quiz()), host, &gateway)
            .unwrap();

        registry.end_game(code, host, &gateway, now).unwrap();

        registry.tick(now + Duration::from_secs(29), &gateway);
        assert_eq!(registry.session_count(), 1);

        registry.tick(now + Duration::from_secs(30), &gateway);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_sessions_summary() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let host = ConnectionId::new();
        let now = Instant::now();
        let code = registry
            .create_or_attach(None, Some(create_test_quiz()), host, &gateway)
            .unwrap();
        registry
            .join_as_player(code, ConnectionId::new(), "Alice", &gateway)
            .unwrap();

        let summaries = registry.sessions_summary();
        let lobby = &summaries[0];
        assert_eq!(lobby.code, code);
        assert_eq!(lobby.title, "General Knowledge");
        assert_eq!(lobby.player_count, 1);
        assert!(!lobby.active);
        assert_eq!(lobby.current_question, 0);
        assert_eq!(lobby.total_questions, 1);

        registry.start_game(code, host, &gateway, now).unwrap();
        registry.tick(now + Duration::from_secs(3), &gateway);

        let summaries = registry.sessions_summary();
        let playing = &summaries[0];
        assert!(playing.active);
        assert_eq!(playing.current_question, 1);
    }

    #[test]
    fn test_kick_clears_routing_entry() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let host = ConnectionId::new();
        let code = registry
            .create_or_attach(None, Some(create_test_quiz()), host, &gateway)
            .unwrap();
        let alice = ConnectionId::new();
        registry.join_as_player(code, alice, "Alice", &gateway).unwrap();

        registry.kick_player(code, host, alice, &gateway).unwrap();

        // The kicked connection no longer routes anywhere.
        registry.handle_disconnect(alice, &gateway);
        let departures = gateway
            .room_events()
            .iter()
            .filter(|event| matches!(event, Event::PlayerLeft { .. }))
            .count();
        assert_eq!(departures, 1);
    }

    #[test]
    fn test_kick_in_one_session_leaves_other_sessions_routing_intact() {
        let registry = Registry::new();
        let gateway = RecordingGateway::default();
        let host_a = ConnectionId::new();
        let host_b = ConnectionId::new();
        let code_a = registry
            .create_or_attach(None, Some(create_test_quiz()), host_a, &gateway)
            .unwrap();
        let code_b = registry
            .create_or_attach(None, Some(create_test_quiz()), host_b, &gateway)
            .unwrap();
        let bob = ConnectionId::new();
        registry.join_as_player(code_b, bob, "Bob", &gateway).unwrap();

        // A's host kicks a connection that belongs to B. Nothing is
        // removed from A, and B's routing entry must survive.
        registry.kick_player(code_a, host_a, bob, &gateway).unwrap();
        assert!(
            !gateway
                .direct_events_for(bob)
                .iter()
                .any(|event| matches!(event, Event::Kicked))
        );

        registry.handle_disconnect(bob, &gateway);
        let departures = gateway
            .room_events()
            .iter()
            .filter(|event| matches!(event, Event::PlayerLeft { .. }))
            .count();
        assert_eq!(departures, 1);
    }

    #[test]
    fn test_allocation_retries_on_collision() {
        let sessions: HashMap<JoinCode, Arc<Mutex<Session>>> = HashMap::new();

        // Learn what the first draw of this seed produces.
        fastrand::seed(42);
        let first_draw = JoinCode::random();

        // Occupy that code, replay the seed, and allocation must move past
        // the collision to the second draw.
        let gateway = RecordingGateway::default();
        let mut sessions = sessions;
        sessions.insert(
            first_draw,
            Arc::new(Mutex::new(Session::create(
                first_draw,
                create_test_quiz(),
                ConnectionId::new(),
                &gateway,
            ))),
        );
        fastrand::seed(42);
        let allocated = Registry::allocate(&sessions);

        assert_ne!(allocated, first_draw);
    }
}
