//! The Coinstreak simulation: a coin with tunable odds, a streak-driven
//! payout, and five purchasable upgrade tracks.
//!
//! Everything here is pure, synchronous state manipulation. The caller owns
//! all clocks (flip duration, auto-flip cadence) and all networking; the
//! engine only tells it what happened. Randomness enters through a single
//! [`rand::Rng`] seam so tests can force outcomes.

use coinstreak_protocol::{Snapshot, UpgradeLevels, MIN_FLIP_TIME_MS};
use rand::Rng;
use thiserror::Error;

/// Streak length that triggers the one-time win celebration.
pub const WIN_STREAK: u64 = 10;

/// Cash granted by the `/show-me-the-money` cheat: $100,000,000.00.
pub const CHEAT_CASH_CENTS: u64 = 10_000_000_000;

/// Auto-flip never ticks faster than this, regardless of flip time.
pub const AUTO_FLIP_FLOOR_MS: u64 = 120;

/// Slack added to the flip duration so the next auto-flip does not start the
/// instant the previous one lands.
pub const AUTO_FLIP_BUFFER_MS: u64 = 100;

/// Base-worth reward per heads at each upgrade level, in cents:
/// $0.01 -> $0.10 -> $1 -> $10 -> $25 -> $50 -> $100 -> $500 -> $1000 ...
pub const BASE_WORTH_STEPS_CENTS: [u64; 11] = [
    1, 10, 100, 1000, 2500, 5000, 10_000, 50_000, 100_000, 250_000, 500_000,
];

/// The five purchasable tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeKind {
    HeadsChance,
    FlipTime,
    ComboMult,
    BaseWorth,
    AutoFlip,
}

impl UpgradeKind {
    pub const ALL: [UpgradeKind; 5] = [
        UpgradeKind::HeadsChance,
        UpgradeKind::FlipTime,
        UpgradeKind::ComboMult,
        UpgradeKind::BaseWorth,
        UpgradeKind::AutoFlip,
    ];

    /// Price at level 0, in cents. Each purchase multiplies the price by 10.
    pub fn base_price_cents(self) -> u64 {
        match self {
            UpgradeKind::HeadsChance => 10,
            UpgradeKind::FlipTime => 10,
            UpgradeKind::ComboMult => 10,
            UpgradeKind::BaseWorth => 25,
            UpgradeKind::AutoFlip => 10_000,
        }
    }

    /// Level cap; purchases beyond it are unavailable regardless of funds.
    pub fn max_level(self) -> u32 {
        match self {
            UpgradeKind::HeadsChance => 10,
            UpgradeKind::FlipTime => 9,
            UpgradeKind::ComboMult => 10,
            UpgradeKind::BaseWorth => 10,
            UpgradeKind::AutoFlip => 1,
        }
    }
}

/// Why a purchase did not happen. Callers treat these as silent no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PurchaseError {
    #[error("not enough cash: price is {price_cents} cents")]
    InsufficientFunds { price_cents: u64 },
    #[error("upgrade is already at max level")]
    MaxedOut,
}

/// Result of resolving one flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOutcome {
    Heads {
        payout_cents: u64,
        streak: u64,
        /// True exactly once per process, the first time the streak reaches
        /// [`WIN_STREAK`].
        celebration: bool,
    },
    Tails,
}

/// Authoritative in-memory game state.
///
/// The persisted subset round-trips through [`Snapshot`]; `flipping`,
/// `win_shown`, and `win_open` are session-only and reset on every load.
#[derive(Debug, Clone)]
pub struct GameState {
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

    /// A flip is mid-air; a second one is refused until it lands.
    pub flipping: bool,
    /// The 10-streak celebration already fired this session.
    pub win_shown: bool,
    /// The win prompt is up; flips are blocked until it is dismissed.
    pub win_open: bool,
}

impl Default for GameState {
    fn default() -> Self {
        let base = Snapshot::default();
        Self {
            heads: base.heads,
            tails: base.tails,
            heads_in_a_row: base.heads_in_a_row,
            max_heads_streak: base.max_heads_streak,
            cash_cents: base.cash_cents,
            heads_chance: base.heads_chance,
            flip_time_ms: base.flip_time_ms,
            combo_mult: base.combo_mult,
            base_worth_cents: base.base_worth_cents,
            auto_flip_enabled: base.auto_flip_enabled,
            upgrades: base.upgrades,
            flipping: false,
            win_shown: false,
            win_open: false,
        }
    }
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the persisted subset. Pure and total.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            heads: self.heads,
            tails: self.tails,
            heads_in_a_row: self.heads_in_a_row,
            max_heads_streak: self.max_heads_streak,
            cash_cents: self.cash_cents,
            heads_chance: self.heads_chance,
            flip_time_ms: self.flip_time_ms,
            combo_mult: self.combo_mult,
            base_worth_cents: self.base_worth_cents,
            auto_flip_enabled: self.auto_flip_enabled,
            upgrades: self.upgrades,
        }
    }

    /// Overwrite the persisted fields from a snapshot.
    ///
    /// This is a pure local mutation: session-only fields are untouched and
    /// no persistence is requested, so applying a remote snapshot can never
    /// feed back into another write of the same data.
    pub fn apply_snapshot(&mut self, snap: &Snapshot) {
        self.heads = snap.heads;
        self.tails = snap.tails;
        self.heads_in_a_row = snap.heads_in_a_row;
        self.max_heads_streak = snap.max_heads_streak.max(snap.heads_in_a_row);
        self.cash_cents = snap.cash_cents;
        self.heads_chance = snap.heads_chance;
        self.flip_time_ms = snap.flip_time_ms.max(MIN_FLIP_TIME_MS);
        self.combo_mult = snap.combo_mult;
        self.base_worth_cents = snap.base_worth_cents;
        self.auto_flip_enabled = snap.auto_flip_enabled;
        self.upgrades = snap.upgrades;
    }

    /// Start a flip. Returns false (and changes nothing) while another flip
    /// is in flight or the win prompt is open.
    pub fn begin_flip(&mut self) -> bool {
        if self.flipping || self.win_open {
            return false;
        }
        self.flipping = true;
        true
    }

    /// Land the coin started by [`begin_flip`](Self::begin_flip).
    ///
    /// Heads pays `round(baseWorth * (1 + comboMult * max(0, streak - 1)))`
    /// with the streak already incremented; tails resets the streak.
    pub fn resolve_flip<R: Rng>(&mut self, rng: &mut R) -> FlipOutcome {
        self.flipping = false;

        if rng.gen::<f64>() < self.heads_chance {
            self.heads += 1;
            self.heads_in_a_row += 1;
            if self.heads_in_a_row > self.max_heads_streak {
                self.max_heads_streak = self.heads_in_a_row;
            }

            let celebration = self.heads_in_a_row >= WIN_STREAK && !self.win_shown;
            if celebration {
                self.win_shown = true;
                self.win_open = true;
            }

            let payout_cents = self.payout_cents();
            self.cash_cents = self.cash_cents.saturating_add(payout_cents);

            FlipOutcome::Heads {
                payout_cents,
                streak: self.heads_in_a_row,
                celebration,
            }
        } else {
            self.tails += 1;
            self.heads_in_a_row = 0;
            FlipOutcome::Tails
        }
    }

    /// Payout for the current streak, in cents.
    pub fn payout_cents(&self) -> u64 {
        let combo_steps = self.heads_in_a_row.saturating_sub(1) as f64;
        let raw = self.base_worth_cents as f64 * (1.0 + self.combo_mult * combo_steps);
        raw.round().max(0.0) as u64
    }

    /// Dismiss the win prompt and allow flipping again.
    pub fn dismiss_win(&mut self) {
        self.win_open = false;
    }

    pub fn upgrade_level(&self, kind: UpgradeKind) -> u32 {
        match kind {
            UpgradeKind::HeadsChance => self.upgrades.heads_chance,
            UpgradeKind::FlipTime => self.upgrades.flip_time,
            UpgradeKind::ComboMult => self.upgrades.combo_mult,
            UpgradeKind::BaseWorth => self.upgrades.base_worth,
            UpgradeKind::AutoFlip => self.upgrades.auto_flip,
        }
    }

    /// Current price for a track: base price times 10 per level owned.
    pub fn price_for(&self, kind: UpgradeKind) -> u64 {
        let level = self.upgrade_level(kind);
        kind.base_price_cents()
            .saturating_mul(10u64.saturating_pow(level))
    }

    pub fn upgrade_available(&self, kind: UpgradeKind) -> bool {
        self.upgrade_level(kind) < kind.max_level()
    }

    /// Atomic check-then-deduct purchase. On success the price is deducted
    /// and the track effect applied in one step; on failure nothing changes.
    pub fn purchase(&mut self, kind: UpgradeKind) -> Result<u64, PurchaseError> {
        if !self.upgrade_available(kind) {
            return Err(PurchaseError::MaxedOut);
        }
        let price_cents = self.price_for(kind);
        if self.cash_cents < price_cents {
            return Err(PurchaseError::InsufficientFunds { price_cents });
        }

        self.cash_cents -= price_cents;
        match kind {
            UpgradeKind::HeadsChance => {
                self.heads_chance = (self.heads_chance + 0.05).min(1.0);
                self.upgrades.heads_chance += 1;
            }
            UpgradeKind::FlipTime => {
                self.flip_time_ms = self
                    .flip_time_ms
                    .saturating_sub(100)
                    .max(MIN_FLIP_TIME_MS);
                self.upgrades.flip_time += 1;
            }
            UpgradeKind::ComboMult => {
                self.combo_mult += 0.5;
                self.upgrades.combo_mult += 1;
            }
            UpgradeKind::BaseWorth => {
                let next = (self.upgrades.base_worth as usize + 1)
                    .min(BASE_WORTH_STEPS_CENTS.len() - 1);
                self.base_worth_cents = BASE_WORTH_STEPS_CENTS[next];
                self.upgrades.base_worth += 1;
            }
            UpgradeKind::AutoFlip => {
                self.upgrades.auto_flip = 1;
                self.auto_flip_enabled = true;
            }
        }
        Ok(price_cents)
    }

    /// Auto-flip cadence derived from the current flip time.
    pub fn auto_flip_period_ms(&self) -> u64 {
        (self.flip_time_ms + AUTO_FLIP_BUFFER_MS).max(AUTO_FLIP_FLOOR_MS)
    }

    /// Grant the auto-flip upgrade outright and enable it. Returns true when
    /// the upgrade was newly granted.
    pub fn grant_auto_flip(&mut self) -> bool {
        let newly = self.upgrades.auto_flip < 1;
        self.upgrades.auto_flip = 1;
        self.auto_flip_enabled = true;
        newly
    }

    pub fn grant_cash(&mut self, cents: u64) {
        self.cash_cents = self.cash_cents.saturating_add(cents);
    }
}

/// Out-of-band utility commands, typed as `/`-prefixed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheatCommand {
    /// `/auto-flip`: grants the auto-flip upgrade for free and turns it on.
    GrantAutoFlip,
    /// `/show-me-the-money`: grants [`CHEAT_CASH_CENTS`].
    GrantCash,
}

impl CheatCommand {
    pub fn parse(raw: &str) -> Option<Self> {
        let cmd = raw.trim().to_ascii_lowercase();
        match cmd.as_str() {
            "/auto-flip" => Some(Self::GrantAutoFlip),
            "/show-me-the-money" => Some(Self::GrantCash),
            _ => None,
        }
    }
}
