use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flip duration never drops below this, no matter what a persisted record says.
pub const MIN_FLIP_TIME_MS: u64 = 100;

/// Per-track purchase counts. `auto_flip` is a 0/1 ownership flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeLevels {
    pub heads_chance: u32,
    pub flip_time: u32,
    pub combo_mult: u32,
    pub base_worth: u32,
    pub auto_flip: u32,
}

/// The persisted unit of game state, keyed server-side by a client-generated id.
///
/// Session-only state (busy flag, celebration latch, timers) is deliberately
/// absent: it resets on every load. Monetary fields are minor units and stay
/// integers end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub heads: u64,
    pub tails: u64,
    pub heads_in_a_row: u64,
    pub max_heads_streak: u64,
    pub cash_cents: u64,
    pub heads_chance: f64,
    pub flip_time_ms: u64,
    pub combo_mult: f64,
    pub base_worth_cents: u64,
    pub auto_flip_enabled: bool,
    pub upgrades: UpgradeLevels,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            heads: 0,
            tails: 0,
            heads_in_a_row: 0,
            max_heads_streak: 0,
            cash_cents: 0,
            heads_chance: 0.2,
            flip_time_ms: 1000,
            combo_mult: 1.0,
            base_worth_cents: 1,
            auto_flip_enabled: false,
            upgrades: UpgradeLevels::default(),
        }
    }
}

impl Snapshot {
    /// Encode for the wire. Total: a snapshot always serializes.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Merge a raw persisted record over this snapshot, field by field.
    ///
    /// Each field is taken only when present and well-formed; anything missing
    /// or malformed leaves the current value untouched, so a partial or
    /// corrupted record can never null out live state. `upgrades` merges
    /// key-by-key over the current levels so that records written before a new
    /// track existed do not erase it.
    pub fn merge_value(&mut self, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            return;
        };

        merge_u64(&mut self.heads, obj.get("heads"));
        merge_u64(&mut self.tails, obj.get("tails"));
        merge_u64(&mut self.heads_in_a_row, obj.get("headsInARow"));
        merge_u64(&mut self.max_heads_streak, obj.get("maxHeadsStreak"));
        merge_u64(&mut self.cash_cents, obj.get("cashCents"));
        merge_u64(&mut self.base_worth_cents, obj.get("baseWorthCents"));

        if let Some(v) = finite_f64(obj.get("headsChance")) {
            self.heads_chance = v.clamp(0.0, 1.0);
        }
        if let Some(v) = finite_f64(obj.get("comboMult")) {
            if v >= 0.0 {
                self.combo_mult = v;
            }
        }
        if let Some(v) = obj.get("flipTimeMs").and_then(Value::as_u64) {
            self.flip_time_ms = v.max(MIN_FLIP_TIME_MS);
        }
        if let Some(v) = obj.get("autoFlipEnabled").and_then(Value::as_bool) {
            self.auto_flip_enabled = v;
        }

        if let Some(u) = obj.get("upgrades").and_then(Value::as_object) {
            merge_level(&mut self.upgrades.heads_chance, u.get("headsChance"));
            merge_level(&mut self.upgrades.flip_time, u.get("flipTime"));
            merge_level(&mut self.upgrades.combo_mult, u.get("comboMult"));
            merge_level(&mut self.upgrades.base_worth, u.get("baseWorth"));
            merge_level(&mut self.upgrades.auto_flip, u.get("autoFlip"));
        }

        // Counters must stay self-consistent even against a hand-edited record.
        if self.max_heads_streak < self.heads_in_a_row {
            self.max_heads_streak = self.heads_in_a_row;
        }
    }

    /// Whether applying this snapshot should re-arm the auto-flip timer:
    /// enabled in the record *and* the upgrade is actually owned.
    pub fn wants_auto_flip(&self) -> bool {
        self.auto_flip_enabled && self.upgrades.auto_flip >= 1
    }
}

fn merge_u64(slot: &mut u64, v: Option<&Value>) {
    if let Some(n) = v.and_then(Value::as_u64) {
        *slot = n;
    }
}

fn merge_level(slot: &mut u32, v: Option<&Value>) {
    if let Some(n) = v.and_then(Value::as_u64) {
        *slot = u32::try_from(n).unwrap_or(u32::MAX);
    }
}

fn finite_f64(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_f64).filter(|f| f.is_finite())
}

/// Messages exchanged over the state channel, addressed by one opaque id.
///
/// A client `get` omits `state`; the server answers (and pushes) with the
/// same shape carrying the stored snapshot, or an explicit `null` when no
/// record exists yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Get {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
    },
    Put {
        id: String,
        state: Value,
    },
}

impl WireMessage {
    pub fn get_request(id: impl Into<String>) -> Self {
        Self::Get {
            id: id.into(),
            state: None,
        }
    }

    pub fn put(id: impl Into<String>, state: Value) -> Self {
        Self::Put {
            id: id.into(),
            state,
        }
    }

    /// Parse an inbound frame. Fails closed: malformed JSON, non-object
    /// payloads, and unknown message types all come back as `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
