// live-sessions-service/src/sessions/state.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{CallOverrides, Event};

/// Stand-in for an empty leg id during loose matching, so that an unknown
/// leg never pairs with a pending session's empty slot by accident.
const MISSING_LEG: &str = "not_exist";

/// One conversation between a caller leg and a callee leg.
///
/// Either leg id may be empty while the partner leg is still being
/// discovered (a pending session).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub caller_uid: String,
    pub callee_uid: String,
    pub caller_num: String,
    pub callee_num: String,
    pub call_state: String,
    pub pole: String,
    pub date_start: Option<DateTime<Utc>>,
    pub date_ring: Option<DateTime<Utc>>,
    pub date_con: Option<DateTime<Utc>>,
    pub record_id: String,
    pub recording_name: String,
    pub is_recorded: bool,
    #[serde(flatten)]
    pub overrides: CallOverrides,
}

impl Session {
    /// A new session whose legs are the event's legs.
    pub fn from_event(event: &Event) -> Self {
        Self {
            caller_uid: event.unique_id.clone(),
            callee_uid: event.other_id.clone(),
            pole: event.pole.clone(),
            overrides: event.overrides.clone(),
            ..Default::default()
        }
    }

    /// Copy the event's identity/display overrides onto the session.
    pub fn apply_overrides(&mut self, event: &Event) {
        self.overrides = event.overrides.clone();
    }

    /// Re-key the session on the legs the event reports.
    pub fn fix_uids(&mut self, event: &Event) {
        if self.caller_uid != event.unique_id {
            self.caller_uid = event.unique_id.clone();
        }
        if self.callee_uid != event.other_id {
            self.callee_uid = event.other_id.clone();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.caller_uid.is_empty() || self.callee_uid.is_empty()
    }

    /// True when `{a, b}` is this session's leg pair, in either order.
    pub fn has_pair(&self, a: &str, b: &str) -> bool {
        (self.caller_uid == a && self.callee_uid == b)
            || (self.caller_uid == b && self.callee_uid == a)
    }

    pub fn same_legs(&self, other: &Session) -> bool {
        self.caller_uid == other.caller_uid && self.callee_uid == other.callee_uid
    }
}

/// Result of a successful lookup: the position in the table and a copy of
/// the session to mutate and write back.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMatch {
    pub index: usize,
    pub session: Session,
}

/// The ordered session table.
///
/// Matching is "first hit in list order" inside each tier, so this stays a
/// plain vector rather than an index keyed by leg id.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: Vec<Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        Self { sessions }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot_all(&self) -> Vec<Session> {
        self.sessions.clone()
    }

    pub fn as_slice(&self) -> &[Session] {
        &self.sessions
    }

    /// Find the session an event with legs `id_a`/`id_b` belongs to.
    ///
    /// Tiers, first hit wins, each scanning in list order:
    /// 1. exact pair, either order (empty ids replaced by a sentinel unless `exact`);
    /// 2. pending session adoption (only when not `exact`);
    /// 3. any session with one matching leg (only when `single_id_ok`).
    pub fn lookup(&self, id_a: &str, id_b: &str, exact: bool, single_id_ok: bool) -> Option<SessionMatch> {
        if exact {
            return self
                .position(|s| s.caller_uid == id_a && s.callee_uid == id_b)
                .or_else(|| self.position(|s| s.caller_uid == id_b && s.callee_uid == id_a))
                .map(|index| self.hit(index));
        }

        let a = if id_a.is_empty() { MISSING_LEG } else { id_a };
        let b = if id_b.is_empty() { MISSING_LEG } else { id_b };

        let pair = self
            .position(|s| s.caller_uid == a && s.callee_uid == b)
            .or_else(|| self.position(|s| s.caller_uid == b && s.callee_uid == a));

        let pending = || {
            self.position(|s| s.caller_uid == a && s.callee_uid.is_empty())
                .or_else(|| self.position(|s| s.callee_uid == b && s.caller_uid.is_empty()))
                .or_else(|| self.position(|s| s.callee_uid == a && s.caller_uid.is_empty()))
                .or_else(|| self.position(|s| s.caller_uid == b && s.callee_uid.is_empty()))
        };

        let single = || {
            if !single_id_ok {
                return None;
            }
            self.position(|s| s.caller_uid == a)
                .or_else(|| self.position(|s| s.callee_uid == a))
                .or_else(|| self.position(|s| s.caller_uid == b))
                .or_else(|| self.position(|s| s.callee_uid == b))
        };

        pair.or_else(pending).or_else(single).map(|index| self.hit(index))
    }

    /// Remove the first session structurally matching `id_a`/`id_b`.
    ///
    /// Exact pair (either order) first, then a lone leg match: caller = a,
    /// callee = b, callee = a, caller = b. An empty id never matches alone.
    /// Later entries shift down, so indexes are not stable across removals.
    pub fn remove(&mut self, id_a: &str, id_b: &str) -> Option<Session> {
        let index = self
            .position(|s| s.caller_uid == id_a && s.callee_uid == id_b)
            .or_else(|| self.position(|s| s.caller_uid == id_b && s.callee_uid == id_a))
            .or_else(|| lone(id_a).and_then(|a| self.position(|s| s.caller_uid == a)))
            .or_else(|| lone(id_b).and_then(|b| self.position(|s| s.callee_uid == b)))
            .or_else(|| lone(id_a).and_then(|a| self.position(|s| s.callee_uid == a)))
            .or_else(|| lone(id_b).and_then(|b| self.position(|s| s.caller_uid == b)))?;

        Some(self.sessions.remove(index))
    }

    /// Overwrite the session at `index`. Out-of-range indexes are ignored.
    pub fn replace(&mut self, index: usize, session: Session) -> bool {
        match self.sessions.get_mut(index) {
            Some(slot) => {
                *slot = session;
                true
            }
            None => false,
        }
    }

    pub fn append(&mut self, session: Session) {
        self.sessions.push(session);
    }

    fn position<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&Session) -> bool,
    {
        self.sessions.iter().position(pred)
    }

    fn hit(&self, index: usize) -> SessionMatch {
        SessionMatch {
            index,
            session: self.sessions[index].clone(),
        }
    }
}

fn lone(id: &str) -> Option<&str> {
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(caller: &str, callee: &str) -> Session {
        Session {
            caller_uid: caller.to_string(),
            callee_uid: callee.to_string(),
            ..Default::default()
        }
    }

    fn table(sessions: &[(&str, &str)]) -> SessionTable {
        SessionTable::from_sessions(sessions.iter().map(|(a, b)| session(a, b)).collect())
    }

    #[test]
    fn exact_pair_wins_over_pending_adoption() {
        let t = table(&[("1", "2"), ("2", "")]);
        let hit = t.lookup("2", "1", false, false).expect("match");
        assert_eq!(hit.index, 0);
        assert_eq!(hit.session, session("1", "2"));
    }

    #[test]
    fn pending_session_adopted_only_when_loose() {
        let t = table(&[("2", "")]);
        let hit = t.lookup("2", "9", false, false).expect("loose match");
        assert_eq!(hit.session, session("2", ""));
        assert!(t.lookup("2", "9", true, false).is_none());
    }

    #[test]
    fn pending_adoption_tries_both_legs() {
        let t = table(&[("", "7")]);
        assert_eq!(t.lookup("7", "8", false, false).map(|m| m.index), Some(0));
        assert_eq!(t.lookup("8", "7", false, false).map(|m| m.index), Some(0));
    }

    #[test]
    fn empty_ids_do_not_match_pending_slots_when_loose() {
        // ("", "") would exactly match a fully empty record; the sentinel
        // prevents it.
        let t = table(&[("", "")]);
        assert!(t.lookup("", "", false, false).is_none());
        assert!(t.lookup("", "", true, false).is_some());
    }

    #[test]
    fn exact_lookup_accepts_swapped_order() {
        let t = table(&[("a", "b")]);
        assert!(t.lookup("b", "a", true, false).is_some());
        assert!(t.lookup("a", "c", true, false).is_none());
    }

    #[test]
    fn single_id_tier_order() {
        let t = table(&[("x", "a"), ("a", "y")]);
        // caller = a is tried before callee = a
        let hit = t.lookup("a", "", false, true).expect("single id");
        assert_eq!(hit.index, 1);
        assert!(t.lookup("a", "", false, false).is_none());

        let t = table(&[("x", "b"), ("q", "r")]);
        let hit = t.lookup("zzz", "b", false, true).expect("single id on b");
        assert_eq!(hit.index, 0);
    }

    #[test]
    fn single_id_tier_not_used_for_exact_lookups() {
        let t = table(&[("a", "y")]);
        assert!(t.lookup("a", "", true, true).is_none());
    }

    #[test]
    fn remove_prefers_exact_pair_then_lone_legs() {
        let mut t = table(&[("a", "z"), ("b", "a")]);
        let removed = t.remove("a", "b").expect("removed");
        assert_eq!(removed, session("b", "a"));
        assert_eq!(t.snapshot_all(), vec![session("a", "z")]);

        let mut t = table(&[("q", "b"), ("a", "r")]);
        // caller = a is tried before callee = b
        assert_eq!(t.remove("a", "b"), Some(session("a", "r")));
        assert_eq!(t.remove("a", "b"), Some(session("q", "b")));
        assert!(t.is_empty());
    }

    #[test]
    fn remove_ignores_empty_ids_for_lone_matches() {
        let mut t = table(&[("q", "")]);
        assert!(t.remove("a", "").is_none());
        assert_eq!(t.len(), 1);
        assert!(t.remove("q", "").is_some());
    }

    #[test]
    fn remove_compacts_the_table() {
        let mut t = table(&[("1", "2"), ("3", "4"), ("5", "6")]);
        t.remove("3", "4");
        assert_eq!(t.lookup("5", "6", true, false).map(|m| m.index), Some(1));
    }

    #[test]
    fn replace_out_of_range_is_ignored() {
        let mut t = table(&[("1", "2")]);
        assert!(!t.replace(3, session("x", "y")));
        assert!(t.replace(0, session("x", "y")));
        assert_eq!(t.snapshot_all(), vec![session("x", "y")]);
    }

    #[test]
    fn has_pair_is_order_insensitive() {
        let s = session("x", "y");
        assert!(s.has_pair("y", "x"));
        assert!(s.has_pair("x", "y"));
        assert!(!s.has_pair("x", ""));
        assert!(session("x", "").is_pending());
    }
}
