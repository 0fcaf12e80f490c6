/**
 * HOST STATE - lifecycle automaton of a single host
 *
 * ROLE:
 * Replays a host's time-ordered events and decides, event by event, whether
 * the event is consistent with what the host looked like just before it.
 *
 * OPERATION:
 * - HostState = {exists, enabled, last_kind, last_properties}
 * - transition(state, event) -> (next state, keep)
 * - a rejected event leaves the state untouched
 *
 * RULES:
 * - the first event of a host must be CREATE
 * - same kind + same payload as the previous accepted event is a re-observation
 * - an UPDATE must change the payload
 * - CREATE/DELETE and ENABLE/DISABLE must alternate
 */

use crate::models::{EventKind, Properties};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostState {
    pub exists: bool,
    pub enabled: bool,
    pub last_kind: Option<EventKind>,
    pub last_properties: Option<Properties>,
}

impl HostState {
    /// Whether an event of `kind` carrying `properties` is valid from this state.
    pub fn admits(&self, kind: EventKind, properties: &Properties) -> bool {
        let Some(last_kind) = self.last_kind else {
            return kind == EventKind::Create;
        };

        let same_payload = self.last_properties.as_ref() == Some(properties);
        if kind == last_kind && same_payload {
            return false;
        }
        if kind == EventKind::Update && same_payload {
            return false;
        }

        match kind {
            EventKind::Create => !self.exists,
            EventKind::Delete => self.exists,
            EventKind::Enable => !self.enabled,
            EventKind::Disable => self.enabled,
            EventKind::Update => true,
        }
    }

    /// Pure transition: the next state and whether the event is kept.
    pub fn transition(&self, kind: EventKind, properties: &Properties) -> (HostState, bool) {
        if !self.admits(kind, properties) {
            return (self.clone(), false);
        }

        let mut next = HostState {
            last_kind: Some(kind),
            last_properties: Some(properties.clone()),
            ..self.clone()
        };
        match kind {
            EventKind::Create => next.exists = true,
            EventKind::Delete => next.exists = false,
            EventKind::Enable => next.enabled = true,
            EventKind::Disable => next.enabled = false,
            EventKind::Update => {}
        }
        (next, true)
    }
}
