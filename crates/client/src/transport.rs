//! The state channel: one persistent, auto-reconnecting WebSocket per
//! game-state id.
//!
//! [`ChannelCore`] is the sans-IO state machine — connection states, the
//! FIFO queue of frames written while disconnected, and the single-reconnect
//! rule — so the interesting behavior is testable without a socket.
//! [`spawn_channel`] wraps it in a background task that owns the real
//! connection and interprets the core's commands.
//!
//! Connection loss is never fatal: the simulation keeps running on in-memory
//! state and the channel retries forever at a fixed delay (a deliberate
//! simplification over capped exponential backoff).

use std::collections::VecDeque;
use std::time::Duration;

use coinstreak_protocol::WireMessage;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Delay before a reconnect attempt after the channel closes or errors.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// What the IO driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCmd {
    Transmit(String),
    ScheduleReconnect,
}

/// Connection state machine: `Idle -> Connecting -> Open -> Closed ->
/// Connecting (after a fixed delay)`.
#[derive(Debug)]
pub struct ChannelCore {
    id: String,
    state: ChannelState,
    queue: VecDeque<String>,
    reconnect_pending: bool,
}

impl ChannelCore {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ChannelState::Idle,
            queue: VecDeque::new(),
            reconnect_pending: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Begin connecting. A re-entrant call while `Connecting` or `Open` is a
    /// no-op; returns whether an attempt should actually start.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ChannelState::Connecting | ChannelState::Open => false,
            ChannelState::Idle | ChannelState::Closed => {
                self.state = ChannelState::Connecting;
                true
            }
        }
    }

    /// Send a message: transmit while open, otherwise queue it in FIFO order
    /// for replay on the next successful open.
    pub fn send(&mut self, msg: &WireMessage) -> Option<ChannelCmd> {
        let frame = msg.encode();
        if self.state == ChannelState::Open {
            Some(ChannelCmd::Transmit(frame))
        } else {
            self.queue.push_back(frame);
            None
        }
    }

    /// The connection opened: flush the queue in order, then ask the server
    /// for the current snapshot of our id.
    pub fn on_open(&mut self) -> Vec<ChannelCmd> {
        self.state = ChannelState::Open;
        self.reconnect_pending = false;

        let mut cmds: Vec<ChannelCmd> = self
            .queue
            .drain(..)
            .map(ChannelCmd::Transmit)
            .collect();
        cmds.push(ChannelCmd::Transmit(
            WireMessage::get_request(&self.id).encode(),
        ));
        cmds
    }

    /// The connection closed or failed. Schedules exactly one reconnect no
    /// matter how many close/error signals arrive.
    pub fn on_closed(&mut self) -> Option<ChannelCmd> {
        self.state = ChannelState::Closed;
        if self.reconnect_pending {
            None
        } else {
            self.reconnect_pending = true;
            Some(ChannelCmd::ScheduleReconnect)
        }
    }

    /// The reconnect delay elapsed; move back into `Connecting`.
    pub fn reconnect_elapsed(&mut self) -> bool {
        self.reconnect_pending = false;
        self.connect()
    }
}

/// Cheap cloneable handle; `send` is fire-and-forget.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    out_tx: mpsc::UnboundedSender<WireMessage>,
}

impl ChannelHandle {
    pub fn send(&self, msg: WireMessage) {
        // The driver task only exits when this handle is gone.
        let _ = self.out_tx.send(msg);
    }

    /// Handle with no driver behind it; the receiver sees every frame the
    /// owner tries to send.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<WireMessage>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (Self { out_tx }, out_rx)
    }
}

/// Spawn the channel driver for `url` (the full per-id endpoint). Inbound
/// frames that parse as [`WireMessage`] are forwarded to `inbound_tx`;
/// malformed frames are dropped silently.
pub fn spawn_channel(
    url: String,
    id: String,
    reconnect_delay: Duration,
    inbound_tx: mpsc::UnboundedSender<WireMessage>,
) -> ChannelHandle {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    tokio::spawn(drive(
        ChannelCore::new(id),
        url,
        reconnect_delay,
        out_rx,
        inbound_tx,
    ));
    ChannelHandle { out_tx }
}

async fn drive(
    mut core: ChannelCore,
    url: String,
    reconnect_delay: Duration,
    mut out_rx: mpsc::UnboundedReceiver<WireMessage>,
    inbound_tx: mpsc::UnboundedSender<WireMessage>,
) {
    loop {
        // Anything the session sent while we were between attempts joins the
        // queue before the next open, preserving FIFO order.
        while let Ok(msg) = out_rx.try_recv() {
            core.send(&msg);
        }
        core.connect();

        match connect_async(url.as_str()).await {
            Ok((socket, _resp)) => {
                debug!(queued = core.queued(), "state channel open");
                let (mut sink, mut stream) = socket.split();

                let mut alive = true;
                for cmd in core.on_open() {
                    if let ChannelCmd::Transmit(frame) = cmd {
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            alive = false;
                            break;
                        }
                    }
                }

                while alive {
                    tokio::select! {
                        out = out_rx.recv() => match out {
                            Some(msg) => {
                                if let Some(ChannelCmd::Transmit(frame)) = core.send(&msg) {
                                    if sink.send(Message::Text(frame.into())).await.is_err() {
                                        alive = false;
                                    }
                                }
                            }
                            // Session dropped its handle; nothing left to do.
                            None => return,
                        },
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(msg) = WireMessage::parse(text.as_str()) {
                                    if inbound_tx.send(msg).is_err() {
                                        return;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => alive = false,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("state channel read error: {e}");
                                alive = false;
                            }
                        },
                    }
                }
            }
            Err(e) => {
                warn!("state channel connect failed: {e}");
            }
        }

        if core.on_closed().is_some() {
            // Fixed delay, retry forever. Sends arriving during the wait are
            // queued for the next open.
            let sleep = tokio::time::sleep(reconnect_delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    out = out_rx.recv() => match out {
                        Some(msg) => { core.send(&msg); }
                        None => return,
                    },
                }
            }
        }
        core.reconnect_elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(n: u64) -> WireMessage {
        WireMessage::put("gs-1", json!({ "heads": n }))
    }

    fn transmitted(cmds: &[ChannelCmd]) -> Vec<&str> {
        cmds.iter()
            .map(|c| match c {
                ChannelCmd::Transmit(f) => f.as_str(),
                other => panic!("unexpected command: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn sends_while_closed_flush_in_order_before_the_get() {
        let mut core = ChannelCore::new("gs-1");
        assert!(core.connect());

        assert!(core.send(&put(1)).is_none());
        assert!(core.send(&put(2)).is_none());
        assert_eq!(core.queued(), 2);

        let cmds = core.on_open();
        let frames = transmitted(&cmds);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], put(1).encode());
        assert_eq!(frames[1], put(2).encode());
        assert_eq!(frames[2], WireMessage::get_request("gs-1").encode());
        assert_eq!(core.queued(), 0);
    }

    #[test]
    fn open_channel_transmits_directly() {
        let mut core = ChannelCore::new("gs-1");
        core.connect();
        core.on_open();

        match core.send(&put(9)) {
            Some(ChannelCmd::Transmit(frame)) => assert_eq!(frame, put(9).encode()),
            other => panic!("expected transmit, got {other:?}"),
        }
        assert_eq!(core.queued(), 0);
    }

    #[test]
    fn reentrant_connect_is_a_no_op() {
        let mut core = ChannelCore::new("gs-1");
        assert!(core.connect());
        assert!(!core.connect(), "second connect while Connecting");
        core.on_open();
        assert!(!core.connect(), "connect while Open");
        assert_eq!(core.state(), ChannelState::Open);
    }

    #[test]
    fn close_schedules_exactly_one_reconnect() {
        let mut core = ChannelCore::new("gs-1");
        core.connect();
        core.on_open();

        assert_eq!(core.on_closed(), Some(ChannelCmd::ScheduleReconnect));
        // A trailing error signal after close must not double-schedule.
        assert_eq!(core.on_closed(), None);

        assert!(core.reconnect_elapsed());
        assert_eq!(core.state(), ChannelState::Connecting);
    }

    #[test]
    fn queue_survives_a_failed_attempt() {
        let mut core = ChannelCore::new("gs-1");
        core.connect();
        core.send(&put(1));
        core.on_closed();
        core.send(&put(2));
        core.reconnect_elapsed();

        let cmds = core.on_open();
        let frames = transmitted(&cmds);
        assert_eq!(frames[0], put(1).encode());
        assert_eq!(frames[1], put(2).encode());
    }
}
