use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a conversation node (UUIDv7 — time-sortable for
/// easier log correlation, same idiom as the old session identifiers).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies a tree (the set of nodes reachable from one root).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeId(pub String);

impl TreeId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TreeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a single archive record. Globally unique, content-addressed
/// by nothing more than its own UUIDv7 — the archive never mutates a
/// record once written, so the id never needs to encode content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Speaker role for a single turn. Shared by the buffer, the archive, and
/// the LM request/response types so a turn's role never needs re-parsing
/// as it crosses crate boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Monotonic, sub-second-precision timestamp used throughout the buffer
/// and archive. Backed by an `f64` count of seconds rather than a wall-clock
/// type so buffers can guarantee strictly increasing, distinct stamps
/// without depending on system clock resolution.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(pub f64);

/// Last timestamp handed out by [`Timestamp::now`], stored as raw `f64`
/// bits so it fits an `AtomicU64`. Guards against two rapid calls landing
/// on the same wall-clock reading — ties are broken by nudging forward a
/// sub-millisecond step rather than returned as-is.
static LAST_TIMESTAMP_BITS: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

impl Timestamp {
    /// Stands in for spec's `+∞` cutoff when a buffer is empty — every
    /// real archive record timestamp compares less than this.
    pub const INFINITE: Timestamp = Timestamp(f64::INFINITY);

    /// Smallest step used to break a tie between two calls that land on
    /// the same wall-clock reading — well under a millisecond.
    const MIN_STEP: f64 = 1e-7;

    /// Current time, guaranteed strictly greater than every previous
    /// value this process has handed out (spec §4.1: "timestamps within
    /// a single buffer are monotonically non-decreasing and distinct").
    pub fn now() -> Self {
        use std::sync::atomic::Ordering;

        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let mut last_bits = LAST_TIMESTAMP_BITS.load(Ordering::Relaxed);
        loop {
            let last = f64::from_bits(last_bits);
            let candidate = if wall > last { wall } else { last + Self::MIN_STEP };
            match LAST_TIMESTAMP_BITS.compare_exchange_weak(
                last_bits,
                candidate.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(observed) => last_bits = observed,
            }
        }
    }

    pub fn seconds(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}
