//! Armband sessions: connection state machine, streaming, keep-alive.

use crate::feeder::SlidingWindowFeeder;
use crate::firmware;
use crate::protocol::Decoder;
use crate::queue::OperationQueue;
use crate::registry::PreferenceStore;
use crate::transport::{LinkEvent, LinkEventReceiver, PendingOperation, TransportLink};
use uuid::Uuid;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Lifecycle of a streaming peripheral. `Available` covers both "never
/// connected" and "torn down"; a fresh `connect()` is always legal there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Available,
    Connecting,
    Streaming,
}

/// A known streaming peripheral, whatever its current state.
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;
    fn address(&self) -> &str;
    fn state(&self) -> ConnectionState;
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;
    fn connect(&self);
    fn disconnect(&self);

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }
}

#[derive(Debug, Clone, Copy)]
pub enum VibrationLength {
    Short,
    Medium,
    Long,
}

/// Timing knobs, defaulting to what the armband firmware expects.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub settle_delay: Duration,
    pub keep_alive_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: firmware::COMMAND_SETTLE_DELAY,
            keep_alive_interval: firmware::KEEP_ALIVE_INTERVAL,
        }
    }
}

enum SessionCmd {
    Connect,
    Disconnect,
    SettleElapsed,
    Vibrate(VibrationLength),
}

/// Handle to one armband's session task.
///
/// `connect()` and `disconnect()` only post a message and return; the state
/// machine advances on the session task as the link reports events. State
/// is observable through a snapshot-on-change watch channel.
pub struct DeviceSession {
    name: String,
    address: String,
    cmd: mpsc::UnboundedSender<SessionCmd>,
    state: watch::Receiver<ConnectionState>,
}

impl DeviceSession {
    /// Spawn the session task over a link and its event channel. Decoded
    /// batches are forwarded to `feeder` tagged with the session name; the
    /// preference store, when given, learns the name once streaming starts.
    pub fn spawn(
        name: impl Into<String>,
        address: impl Into<String>,
        link: Arc<dyn TransportLink>,
        events: LinkEventReceiver,
        feeder: SlidingWindowFeeder,
        prefs: Option<Arc<dyn PreferenceStore>>,
        config: SessionConfig,
    ) -> Self {
        let name = name.into();
        let address = address.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Available);

        let driver = SessionDriver {
            name: name.clone(),
            link,
            queue: OperationQueue::new(),
            feeder,
            prefs,
            decoder: Decoder::new(
                firmware::EMG_CHANNEL_COUNT,
                firmware::EMG_SAMPLES_PER_NOTIFICATION,
            ),
            config,
            cmd_tx: cmd_tx.clone(),
            state_tx,
            phase: Phase::Idle,
        };
        tokio::spawn(driver.run(cmd_rx, events));

        Self {
            name,
            address,
            cmd: cmd_tx,
            state: state_rx,
        }
    }

    pub fn connect(&self) {
        let _ = self.cmd.send(SessionCmd::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.cmd.send(SessionCmd::Disconnect);
    }

    /// Queue a vibration feedback command. Ignored unless streaming.
    pub fn vibrate(&self, length: VibrationLength) {
        let _ = self.cmd.send(SessionCmd::Vibrate(length));
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl Sensor for DeviceSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> ConnectionState {
        DeviceSession::state(self)
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        DeviceSession::watch_state(self)
    }

    fn connect(&self) {
        DeviceSession::connect(self)
    }

    fn disconnect(&self) {
        DeviceSession::disconnect(self)
    }
}

enum Phase {
    Idle,
    AwaitLink,
    Discovering,
    /// Notifications enabled, wake sent, waiting out the settle delay.
    Arming { settle: JoinHandle<()> },
    Streaming { last_keep_alive: Instant },
}

struct SessionDriver {
    name: String,
    link: Arc<dyn TransportLink>,
    queue: OperationQueue,
    feeder: SlidingWindowFeeder,
    prefs: Option<Arc<dyn PreferenceStore>>,
    decoder: Decoder,
    config: SessionConfig,
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    state_tx: watch::Sender<ConnectionState>,
    phase: Phase,
}

impl SessionDriver {
    async fn run(mut self, mut cmds: mpsc::UnboundedReceiver<SessionCmd>, mut events: LinkEventReceiver) {
        loop {
            tokio::select! {
                cmd = cmds.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd),
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        self.teardown();
    }

    fn handle_cmd(&mut self, cmd: SessionCmd) {
        match cmd {
            SessionCmd::Connect => {
                if !matches!(self.phase, Phase::Idle) {
                    debug!("{}: connect ignored, session already active", self.name);
                    return;
                }
                info!("{}: connecting", self.name);
                self.phase = Phase::AwaitLink;
                self.set_state(ConnectionState::Connecting);
                self.link.connect();
            }
            SessionCmd::Disconnect => {
                if matches!(self.phase, Phase::Idle) {
                    debug!("{}: disconnect ignored, already idle", self.name);
                    return;
                }
                info!("{}: disconnecting", self.name);
                self.teardown();
            }
            SessionCmd::SettleElapsed => {
                // A timer from an aborted attempt may still fire; only the
                // arming phase honors it.
                if !matches!(self.phase, Phase::Arming { .. }) {
                    return;
                }
                self.queue.enqueue(
                    self.link.as_ref(),
                    PendingOperation::WriteCharacteristic {
                        characteristic: firmware::COMMAND_CHARACTERISTIC,
                        value: firmware::CMD_START_STREAMING.to_vec(),
                    },
                );
                info!("{}: streaming", self.name);
                self.phase = Phase::Streaming {
                    last_keep_alive: Instant::now(),
                };
                self.set_state(ConnectionState::Streaming);
                if let Some(prefs) = &self.prefs {
                    prefs.set_last_known_source_name(&self.name);
                }
            }
            SessionCmd::Vibrate(length) => {
                if !matches!(self.phase, Phase::Streaming { .. }) {
                    debug!("{}: vibrate ignored while not streaming", self.name);
                    return;
                }
                let value = match length {
                    VibrationLength::Short => firmware::CMD_VIBRATE_SHORT,
                    VibrationLength::Medium => firmware::CMD_VIBRATE_MEDIUM,
                    VibrationLength::Long => firmware::CMD_VIBRATE_LONG,
                };
                self.queue.enqueue(
                    self.link.as_ref(),
                    PendingOperation::WriteCharacteristic {
                        characteristic: firmware::COMMAND_CHARACTERISTIC,
                        value: value.to_vec(),
                    },
                );
            }
        }
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up => {
                if matches!(self.phase, Phase::AwaitLink) {
                    debug!("{}: link up, discovering services", self.name);
                    self.phase = Phase::Discovering;
                    self.link.discover();
                }
            }
            LinkEvent::Down => {
                if !matches!(self.phase, Phase::Idle) {
                    warn!("{}: link lost", self.name);
                    self.teardown();
                }
            }
            LinkEvent::Discovered(result) => {
                if !matches!(self.phase, Phase::Discovering) {
                    return;
                }
                match result {
                    Ok(characteristics) => self.arm(&characteristics),
                    Err(e) => {
                        warn!("{}: {e}", self.name);
                        self.teardown();
                    }
                }
            }
            LinkEvent::Completed {
                kind,
                characteristic,
                status,
            } => {
                let done = self.queue.on_complete(self.link.as_ref(), kind, characteristic);
                match status {
                    Ok(value) => {
                        if let Some(PendingOperation::ReadCharacteristic { characteristic }) = done
                        {
                            if characteristic == firmware::INFO_CHARACTERISTIC {
                                debug!("{}: device info {:02x?}", self.name, value);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("{}: {e}", self.name);
                        self.teardown();
                    }
                }
            }
            LinkEvent::Notified {
                characteristic,
                value,
            } => self.on_notification(characteristic, &value),
        }
    }

    /// Successful discovery: enable data notifications, read the device
    /// info, wake the band, and let the settle timer trigger streaming.
    fn arm(&mut self, characteristics: &[Uuid]) {
        if !characteristics.contains(&firmware::COMMAND_CHARACTERISTIC) {
            warn!("{}: command characteristic missing, giving up", self.name);
            self.teardown();
            return;
        }
        let data: Vec<Uuid> = firmware::EMG_CHARACTERISTICS
            .iter()
            .copied()
            .filter(|id| characteristics.contains(id))
            .collect();
        if data.is_empty() {
            warn!("{}: no data characteristics found, giving up", self.name);
            self.teardown();
            return;
        }

        for id in data {
            self.link.set_notify(id, true);
            self.queue.enqueue(
                self.link.as_ref(),
                PendingOperation::WriteDescriptor {
                    characteristic: id,
                    value: firmware::ENABLE_NOTIFICATIONS.to_vec(),
                },
            );
        }
        if characteristics.contains(&firmware::INFO_CHARACTERISTIC) {
            self.queue.enqueue(
                self.link.as_ref(),
                PendingOperation::ReadCharacteristic {
                    characteristic: firmware::INFO_CHARACTERISTIC,
                },
            );
        }
        self.queue.enqueue(
            self.link.as_ref(),
            PendingOperation::WriteCharacteristic {
                characteristic: firmware::COMMAND_CHARACTERISTIC,
                value: firmware::CMD_NEVER_SLEEP.to_vec(),
            },
        );

        let tx = self.cmd_tx.clone();
        let delay = self.config.settle_delay;
        let settle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionCmd::SettleElapsed);
        });
        self.phase = Phase::Arming { settle };
    }

    fn on_notification(&mut self, characteristic: Uuid, value: &[u8]) {
        let Phase::Streaming { last_keep_alive } = &mut self.phase else {
            debug!("{}: notification outside streaming, dropped", self.name);
            return;
        };

        if firmware::EMG_CHARACTERISTICS.contains(&characteristic) {
            match self.decoder.decode(value) {
                Ok(samples) => self.feeder.on_data(&self.name, samples),
                Err(e) => warn!("{}: {e}", self.name),
            }
        }

        // Liveness is only re-evaluated on traffic. A band that goes silent
        // stops receiving wake commands, matching its firmware's own idea
        // of an idle link.
        if last_keep_alive.elapsed() >= self.config.keep_alive_interval {
            *last_keep_alive = Instant::now();
            self.queue.enqueue(
                self.link.as_ref(),
                PendingOperation::WriteCharacteristic {
                    characteristic: firmware::COMMAND_CHARACTERISTIC,
                    value: firmware::CMD_NEVER_SLEEP.to_vec(),
                },
            );
        }
    }

    /// Drop back to `Available` from anywhere. Safe to call repeatedly;
    /// feeder buffers are deliberately left alone.
    fn teardown(&mut self) {
        if matches!(self.phase, Phase::Idle) {
            return;
        }
        if let Phase::Arming { settle } = &self.phase {
            settle.abort();
        }
        self.phase = Phase::Idle;
        self.queue.clear();
        self.link.disconnect();
        self.set_state(ConnectionState::Available);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
