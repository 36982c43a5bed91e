//! The game session: one single-threaded actor owning the authoritative
//! [`GameState`], the persistence scheduler, and the state channel.
//!
//! Every mutation happens inside the actor's `select!` loop, so timers and
//! network callbacks interleave but never run in parallel. Four logical
//! clocks exist: the in-flight flip's landing time, the auto-flip cadence,
//! the scheduler's earliest write deadline, and the one-shot bootstrap load
//! timeout. Each is a single `Option<Instant>` that is cleared before being
//! reset, so a stale fire is impossible.

use std::time::Duration;

use coinstreak_engine::{
    CheatCommand, FlipOutcome, GameState, PurchaseError, UpgradeKind, CHEAT_CASH_CENTS,
};
use coinstreak_protocol::{Snapshot, WireMessage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::scheduler::{PersistScheduler, PERSIST_DEBOUNCE, PERSIST_MAX_WAIT};
use crate::transport::{spawn_channel, ChannelHandle, RECONNECT_DELAY};

/// How long bootstrap waits for the server's first `get` response before
/// proceeding with default in-memory state.
pub const LOAD_TIMEOUT: Duration = Duration::from_millis(750);

/// Cheat text longer than this is truncated before interpretation.
pub const COMMAND_BUFFER_MAX: usize = 64;

/// Session timings and addressing. The defaults are the reference values;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub server_url: String,
    pub state_id: String,
    pub debounce: Duration,
    pub max_wait: Duration,
    pub reconnect_delay: Duration,
    pub load_timeout: Duration,
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>, state_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            state_id: state_id.into(),
            debounce: PERSIST_DEBOUNCE,
            max_wait: PERSIST_MAX_WAIT,
            reconnect_delay: RECONNECT_DELAY,
            load_timeout: LOAD_TIMEOUT,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/state/{}",
            self.server_url.trim_end_matches('/'),
            self.state_id
        )
    }
}

/// Player-driven inputs.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Flip,
    Buy(UpgradeKind),
    ToggleAutoFlip,
    DismissWin,
    /// Free-text `/` command; anything unrecognized is ignored.
    Cheat(String),
    Stats,
    Shutdown,
}

/// What happened, for whoever is rendering.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Bootstrap finished; `restored` is true when a server snapshot applied.
    Loaded { restored: bool },
    Flipped(FlipOutcome),
    Purchased { kind: UpgradeKind, price_cents: u64 },
    PurchaseRefused { kind: UpgradeKind, reason: PurchaseError },
    AutoFlip { enabled: bool },
    CheatApplied(CheatCommand),
    WinPrompt,
    Stats(Snapshot),
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<PlayerCommand>,
}

impl SessionHandle {
    pub fn command(&self, cmd: PlayerCommand) {
        let _ = self.cmd_tx.send(cmd);
    }
}

/// Spawn the session actor. Returns a handle for commands and the stream of
/// updates; the actor exits on [`PlayerCommand::Shutdown`] or when the handle
/// is dropped, sending one best-effort final put if loaded.
pub fn spawn(cfg: SyncConfig) -> (SessionHandle, mpsc::UnboundedReceiver<SessionUpdate>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let channel = spawn_channel(
        cfg.endpoint(),
        cfg.state_id.clone(),
        cfg.reconnect_delay,
        inbound_tx,
    );

    let session = Session {
        scheduler: PersistScheduler::new(cfg.debounce, cfg.max_wait),
        load_deadline: Some(Instant::now() + cfg.load_timeout),
        cfg,
        state: GameState::new(),
        channel,
        rng: StdRng::from_entropy(),
        updates: update_tx,
        flip_deadline: None,
        flip_prev: None,
        auto_deadline: None,
    };
    tokio::spawn(session.run(cmd_rx, inbound_rx));

    (SessionHandle { cmd_tx }, update_rx)
}

struct Session {
    cfg: SyncConfig,
    state: GameState,
    scheduler: PersistScheduler,
    channel: ChannelHandle,
    rng: StdRng,
    updates: mpsc::UnboundedSender<SessionUpdate>,

    /// When the in-flight flip lands.
    flip_deadline: Option<Instant>,
    /// Snapshot taken before the in-flight flip, for change comparison.
    flip_prev: Option<Snapshot>,
    /// Next auto-flip attempt.
    auto_deadline: Option<Instant>,
    /// Bootstrap fallback: proceed with defaults when this passes.
    load_deadline: Option<Instant>,
}

impl Session {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<PlayerCommand>,
        mut inbound_rx: mpsc::UnboundedReceiver<WireMessage>,
    ) {
        let mut inbound_open = true;
        loop {
            let next = self.next_deadline();
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                msg = inbound_rx.recv(), if inbound_open => match msg {
                    Some(msg) => self.handle_inbound(msg),
                    // Channel task gone; keep playing offline.
                    None => inbound_open = false,
                },
                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                    self.on_tick(Instant::now());
                }
            }
        }

        // Best-effort final sync, mirroring a page unload. Only once the load
        // handshake completed: never overwrite the server with boot defaults.
        if self.scheduler.is_loaded() {
            self.persist_now();
        }
        debug!("session actor exiting");
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.flip_deadline,
            self.auto_deadline,
            self.load_deadline,
            self.scheduler.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_tick(&mut self, now: Instant) {
        if self.load_deadline.map(|d| d <= now).unwrap_or(false) {
            self.load_deadline = None;
            if !self.scheduler.is_loaded() {
                // Offline or slow server: the game must be playable anyway.
                info!("no server response; starting with in-memory state");
                self.scheduler.mark_loaded();
                self.emit(SessionUpdate::Loaded { restored: false });
            }
        }

        if self.flip_deadline.map(|d| d <= now).unwrap_or(false) {
            self.flip_deadline = None;
            self.resolve_flip(now);
        }

        if self.auto_deadline.map(|d| d <= now).unwrap_or(false) {
            self.arm_auto_flip(now);
            // A flip already in the air makes this attempt a safe no-op.
            self.try_begin_flip(now);
        }

        if self.scheduler.take_due(now) {
            self.persist_now();
        }
    }

    fn handle_command(&mut self, cmd: PlayerCommand) {
        let now = Instant::now();
        match cmd {
            PlayerCommand::Flip => {
                self.try_begin_flip(now);
            }
            PlayerCommand::Buy(kind) => self.handle_buy(kind, now),
            PlayerCommand::ToggleAutoFlip => self.handle_toggle_auto(now),
            PlayerCommand::DismissWin => self.state.dismiss_win(),
            PlayerCommand::Cheat(text) => self.handle_cheat(&text, now),
            PlayerCommand::Stats => self.emit(SessionUpdate::Stats(self.state.snapshot())),
            PlayerCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_buy(&mut self, kind: UpgradeKind, now: Instant) {
        let prev = self.state.snapshot();
        match self.state.purchase(kind) {
            Ok(price_cents) => {
                self.emit(SessionUpdate::Purchased { kind, price_cents });
                match kind {
                    UpgradeKind::AutoFlip => {
                        self.arm_auto_flip(now);
                        self.emit(SessionUpdate::AutoFlip { enabled: true });
                    }
                    // A faster coin changes the cadence of a running auto-flip.
                    UpgradeKind::FlipTime if self.auto_deadline.is_some() => {
                        self.arm_auto_flip(now);
                    }
                    _ => {}
                }
                self.request_persist(now, &prev);
            }
            Err(reason) => self.emit(SessionUpdate::PurchaseRefused { kind, reason }),
        }
    }

    fn handle_toggle_auto(&mut self, now: Instant) {
        // Meaningless until owned.
        if self.state.upgrades.auto_flip < 1 {
            return;
        }
        let prev = self.state.snapshot();
        if self.state.auto_flip_enabled {
            self.state.auto_flip_enabled = false;
            self.auto_deadline = None;
        } else {
            self.state.auto_flip_enabled = true;
            self.arm_auto_flip(now);
        }
        self.emit(SessionUpdate::AutoFlip {
            enabled: self.state.auto_flip_enabled,
        });
        self.request_persist(now, &prev);
    }

    fn handle_cheat(&mut self, text: &str, now: Instant) {
        // Byte-bounded, kept on a char boundary.
        let mut cut = text.len().min(COMMAND_BUFFER_MAX);
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let Some(cheat) = CheatCommand::parse(&text[..cut]) else {
            return;
        };
        let prev = self.state.snapshot();
        match cheat {
            CheatCommand::GrantAutoFlip => {
                self.state.grant_auto_flip();
                self.arm_auto_flip(now);
                self.emit(SessionUpdate::AutoFlip { enabled: true });
            }
            CheatCommand::GrantCash => self.state.grant_cash(CHEAT_CASH_CENTS),
        }
        self.emit(SessionUpdate::CheatApplied(cheat));
        self.request_persist(now, &prev);
    }

    fn handle_inbound(&mut self, msg: WireMessage) {
        let WireMessage::Get { id, state } = msg else {
            return; // clients never receive puts
        };
        if id != self.cfg.state_id {
            return;
        }

        let restored = matches!(&state, Some(v) if v.is_object());
        if let Some(raw) = state {
            // Field-by-field merge over live state: malformed fields fall
            // back to current values. Applying a remote snapshot is a pure
            // local mutation and must never schedule a persist of its own.
            let mut snap = self.state.snapshot();
            snap.merge_value(&raw);
            self.state.apply_snapshot(&snap);
            if snap.wants_auto_flip() && self.auto_deadline.is_none() {
                self.arm_auto_flip(Instant::now());
            }
        }

        if !self.scheduler.is_loaded() {
            self.scheduler.mark_loaded();
            self.load_deadline = None;
            self.emit(SessionUpdate::Loaded { restored });
        }
    }

    fn try_begin_flip(&mut self, now: Instant) {
        if !self.state.begin_flip() {
            return;
        }
        self.flip_prev = Some(self.state.snapshot());
        self.flip_deadline = Some(now + Duration::from_millis(self.state.flip_time_ms));
    }

    fn resolve_flip(&mut self, now: Instant) {
        let prev = self.flip_prev.take().unwrap_or_else(|| self.state.snapshot());
        let outcome = self.state.resolve_flip(&mut self.rng);

        if let FlipOutcome::Heads { celebration: true, .. } = outcome {
            // Pause a running auto-flip for the celebration, keeping
            // ownership; the player re-enables it afterwards.
            if self.auto_deadline.is_some() {
                self.state.auto_flip_enabled = false;
                self.auto_deadline = None;
                self.emit(SessionUpdate::AutoFlip { enabled: false });
            }
            self.emit(SessionUpdate::WinPrompt);
        }

        self.emit(SessionUpdate::Flipped(outcome));
        self.request_persist(now, &prev);
    }

    fn arm_auto_flip(&mut self, now: Instant) {
        self.auto_deadline =
            Some(now + Duration::from_millis(self.state.auto_flip_period_ms()));
    }

    fn request_persist(&mut self, now: Instant, prev: &Snapshot) {
        let next = self.state.snapshot();
        self.scheduler.on_state_changed(now, prev, &next);
    }

    fn persist_now(&self) {
        debug!(id = %self.cfg.state_id, "persisting snapshot");
        self.channel.send(WireMessage::put(
            &self.cfg.state_id,
            self.state.snapshot().to_value(),
        ));
    }

    fn emit(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }
}
