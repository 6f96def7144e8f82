//! Identifiers carried by workflow events.
//!
//! Every event of one top-level execution shares a `TraceId`, nested
//! executions included. Each workflow execution and each node execution
//! has its own `SpanId`, and events point at their parent span through
//! their parent context. Events and persisted states carry an `EventId`
//! and a `StateId`.
//!
//! Ids are ULIDs, so ids minted later sort later. They display as
//! `<prefix>_<ulid>` and parse from that form or from a bare ULID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when an id cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The id type that was being parsed, e.g. `SpanId`.
    pub kind: &'static str,
    /// What was wrong with the input.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Accepts `<prefix>_<ulid>` or a bare ULID. A foreign prefix is refused
/// so that a span id is never read back as a trace id.
fn parse_prefixed(kind: &'static str, prefix: &str, input: &str) -> Result<Ulid, ParseIdError> {
    let error = |reason: String| ParseIdError { kind, reason };
    let encoded = match input.split_once('_') {
        Some((found, rest)) if found == prefix => rest,
        Some((found, _)) => {
            return Err(error(format!("expected prefix '{prefix}', found '{found}'")));
        }
        None => input,
    };
    Ulid::from_string(encoded).map_err(|e| error(e.to_string()))
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Mints a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Milliseconds since the Unix epoch at which the id was minted.
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(stringify!($name), $prefix, s).map(Self)
            }
        }
    };
}

define_id!(
    /// Shared by every event of one top-level execution.
    TraceId,
    "trace"
);

define_id!(
    /// One workflow execution or one node execution.
    SpanId,
    "span"
);

define_id!(EventId, "evt");

define_id!(
    /// One persisted `State`.
    StateId,
    "state"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_their_prefix() {
        assert!(TraceId::new().to_string().starts_with("trace_"));
        assert!(SpanId::new().to_string().starts_with("span_"));
        assert!(EventId::new().to_string().starts_with("evt_"));
    }

    #[test]
    fn displayed_ids_parse_back() {
        let span = SpanId::new();
        let parsed: SpanId = span.to_string().parse().expect("parse");
        assert_eq!(parsed, span);
    }

    #[test]
    fn bare_ulids_parse() {
        let ulid = Ulid::new();
        let event: EventId = ulid.to_string().parse().expect("parse");
        assert_eq!(event.as_ulid(), ulid);
    }

    #[test]
    fn span_ids_are_not_trace_ids() {
        let span = SpanId::new().to_string();
        let err = span.parse::<TraceId>().unwrap_err();
        assert_eq!(err.kind, "TraceId");
        assert!(err.reason.contains("'span'"));
    }

    #[test]
    fn garbage_is_refused() {
        let err = "state_not-a-ulid".parse::<StateId>().unwrap_err();
        assert_eq!(err.kind, "StateId");
    }

    #[test]
    fn later_spans_sort_later() {
        let first = SpanId::from_ulid(Ulid::from_parts(1_000, 7));
        let second = SpanId::from_ulid(Ulid::from_parts(2_000, 3));
        assert!(first < second);
        assert_eq!(first.timestamp_ms(), 1_000);
    }

    #[test]
    fn serialized_as_bare_ulids() {
        let trace = TraceId::new();
        let json = serde_json::to_value(trace).expect("serialize");
        assert_eq!(json, serde_json::Value::String(trace.as_ulid().to_string()));
        let parsed: TraceId = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, trace);
    }
}
