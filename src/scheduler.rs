//! Delayed phase-transition scheduling
//!
//! Sessions never sleep; they hand the scheduler an alarm and a delay, and
//! the embedding driver later drains whatever has become due and feeds it
//! back into the registry. Every alarm carries the phase token that was
//! current when it was scheduled, so a delivery that arrives after the
//! session has already moved on is recognized as stale and dropped.
//!
//! All methods take an explicit `now` instant, which makes timer behavior
//! fully deterministic under test: tests fabricate a base instant and add
//! offsets instead of sleeping.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use web_time::{Duration, Instant};

use crate::join_code::JoinCode;

/// The target operation of a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmKind {
    /// Start the question at `index` (fires after the pre-question countdown)
    QuestionStart {
        /// Index of the question to start
        index: usize,
    },
    /// The answering deadline for the question at `index` has passed
    QuestionDeadline {
        /// Index of the question whose deadline expired
        index: usize,
    },
    /// Results display is over; advance to `next_index` or end the game
    AdvanceQuestion {
        /// Index of the next question to start, possibly past the end
        next_index: usize,
    },
    /// The post-game grace period is over; evict the session
    Evict,
}

/// A scheduled callback bound to one session and one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// Join code of the session this alarm targets
    pub code: JoinCode,
    /// Phase token current at scheduling time; checked on delivery
    pub token: u64,
    /// The operation to perform when the alarm fires
    pub kind: AlarmKind,
}

/// Firing state of a pending entry.
#[derive(Debug, Clone, Copy)]
enum When {
    /// Fires once `now` reaches the instant
    At(Instant),
    /// Suspended by a pause; holds the remaining delay
    Suspended(Duration),
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    alarm: Alarm,
    when: When,
}

/// Pending delayed callbacks for all live sessions.
///
/// At most a handful of entries exist per session (in practice one), so
/// storage is a flat vector scanned on every operation.
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    /// Creates an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `alarm` to fire `delay` after `now`
    pub fn schedule(&mut self, alarm: Alarm, delay: Duration, now: Instant) {
        self.entries.push(Entry {
            alarm,
            when: When::At(now + delay),
        });
    }

    /// Cancels every pending entry for the given session.
    ///
    /// Used when a question resolves early because all players answered,
    /// and when a session ends before its timers have fired.
    pub fn cancel(&mut self, code: JoinCode) {
        self.entries.retain(|entry| entry.alarm.code != code);
    }

    /// Suspends the session's pending entries, preserving remaining time.
    ///
    /// A paused session's deadline must not advance; suspension converts
    /// each pending instant into the delay still outstanding so that
    /// [`resume`](Self::resume) can re-arm it unchanged.
    pub fn suspend(&mut self, code: JoinCode, now: Instant) {
        for entry in &mut self.entries {
            if entry.alarm.code == code {
                if let When::At(fires_at) = entry.when {
                    entry.when = When::Suspended(fires_at.saturating_duration_since(now));
                }
            }
        }
    }

    /// Re-arms the session's suspended entries with their remaining time
    pub fn resume(&mut self, code: JoinCode, now: Instant) {
        for entry in &mut self.entries {
            if entry.alarm.code == code {
                if let When::Suspended(remaining) = entry.when {
                    entry.when = When::At(now + remaining);
                }
            }
        }
    }

    /// Removes and returns every alarm due at `now`, in firing order.
    ///
    /// Suspended entries are never due.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Alarm> {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|entry| match entry.when {
                When::At(fires_at) => fires_at <= now,
                When::Suspended(_) => false,
            });

        self.entries = pending;

        due.into_iter()
            .sorted_by_key(|entry| match entry.when {
                When::At(fires_at) => fires_at,
                When::Suspended(_) => now,
            })
            .map(|entry| entry.alarm)
            .collect_vec()
    }

    /// Returns the earliest instant at which anything becomes due, if any.
    ///
    /// Drivers use this to decide how long to sleep between ticks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.when {
                When::At(fires_at) => Some(fires_at),
                When::Suspended(_) => None,
            })
            .min()
    }

    /// Returns the number of pending entries (suspended included)
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn code(s: &str) -> JoinCode {
        JoinCode::from_str(s).unwrap()
    }

    fn alarm(s: &str, token: u64, kind: AlarmKind) -> Alarm {
        Alarm {
            code: code(s),
            token,
            kind,
        }
    }

    #[test]
    fn test_nothing_due_before_delay_elapses() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            alarm("AAAAAA", 1, AlarmKind::QuestionDeadline { index: 0 }),
            Duration::from_secs(20),
            now,
        );

        assert!(scheduler.pop_due(now + Duration::from_secs(19)).is_empty());
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn test_due_alarms_fire_in_deadline_order() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            alarm("AAAAAA", 1, AlarmKind::QuestionDeadline { index: 0 }),
            Duration::from_secs(20),
            now,
        );
        scheduler.schedule(
            alarm("BBBBBB", 3, AlarmKind::QuestionStart { index: 0 }),
            Duration::from_secs(3),
            now,
        );

        let due = scheduler.pop_due(now + Duration::from_secs(30));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].code, code("BBBBBB"));
        assert_eq!(due[1].code, code("AAAAAA"));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_cancel_removes_only_that_session() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            alarm("AAAAAA", 1, AlarmKind::QuestionDeadline { index: 0 }),
            Duration::from_secs(10),
            now,
        );
        scheduler.schedule(
            alarm("BBBBBB", 1, AlarmKind::QuestionDeadline { index: 0 }),
            Duration::from_secs(10),
            now,
        );

        scheduler.cancel(code("AAAAAA"));

        let due = scheduler.pop_due(now + Duration::from_secs(10));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].code, code("BBBBBB"));
    }

    #[test]
    fn test_suspend_holds_remaining_time() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            alarm("AAAAAA", 1, AlarmKind::QuestionDeadline { index: 0 }),
            Duration::from_secs(20),
            now,
        );

        // Pause 12s in with 8s remaining.
        scheduler.suspend(code("AAAAAA"), now + Duration::from_secs(12));
        assert!(scheduler.pop_due(now + Duration::from_secs(60)).is_empty());
        assert_eq!(scheduler.pending_count(), 1);

        // Resume at t=100; deadline should land 8s later.
        let resumed_at = now + Duration::from_secs(100);
        scheduler.resume(code("AAAAAA"), resumed_at);
        assert!(
            scheduler
                .pop_due(resumed_at + Duration::from_secs(7))
                .is_empty()
        );
        let due = scheduler.pop_due(resumed_at + Duration::from_secs(8));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_next_deadline_ignores_suspended_entries() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        assert!(scheduler.next_deadline().is_none());

        scheduler.schedule(
            alarm("AAAAAA", 1, AlarmKind::Evict),
            Duration::from_secs(30),
            now,
        );
        assert_eq!(scheduler.next_deadline(), Some(now + Duration::from_secs(30)));

        scheduler.suspend(code("AAAAAA"), now);
        assert!(scheduler.next_deadline().is_none());
    }

    #[test]
    fn test_alarm_carries_its_token() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            alarm("AAAAAA", 7, AlarmKind::AdvanceQuestion { next_index: 2 }),
            Duration::ZERO,
            now,
        );

        let due = scheduler.pop_due(now);
        assert_eq!(due[0].token, 7);
        assert_eq!(due[0].kind, AlarmKind::AdvanceQuestion { next_index: 2 });
    }
}
