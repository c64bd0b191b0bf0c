//! Output-only peripheral sessions (motor shields).
//!
//! Unlike the armband there is no streaming and no windowing, just a value
//! vector written out through the same half-duplex queue. The shield echoes
//! its applied values over a state characteristic.

use crate::firmware;
use crate::queue::OperationQueue;
use crate::transport::{LinkEvent, LinkEventReceiver, PendingOperation, TransportLink};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Disconnected,
    Connecting,
    Connected,
}

/// What observers see: the state and the channel values as last commanded
/// or as last echoed by the shield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorSnapshot {
    pub state: ActuatorState,
    pub values: Vec<u8>,
}

enum ActuatorCmd {
    Connect,
    Disconnect,
    Issue { channel: usize, value: u8 },
    IssueAll(Vec<u8>),
    StopAll,
}

/// Handle to one motor peripheral's session task.
///
/// `issue` buffers the newest value per channel and writes the whole vector.
/// While a write is outstanding further calls only update the buffer; one
/// trailing write with the final values goes out when the link frees up, so
/// rapid calls coalesce last-write-wins.
pub struct ActuatorSession {
    name: String,
    cmd: mpsc::UnboundedSender<ActuatorCmd>,
    snapshot: watch::Receiver<ActuatorSnapshot>,
}

impl ActuatorSession {
    pub fn spawn(
        name: impl Into<String>,
        link: Arc<dyn TransportLink>,
        events: LinkEventReceiver,
        channels: usize,
    ) -> Self {
        let name = name.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ActuatorSnapshot {
            state: ActuatorState::Disconnected,
            values: vec![0; channels],
        });

        let driver = ActuatorDriver {
            name: name.clone(),
            link,
            queue: OperationQueue::new(),
            state: ActuatorState::Disconnected,
            values: vec![0; channels],
            write_in_flight: false,
            dirty: false,
            snapshot_tx,
        };
        tokio::spawn(driver.run(cmd_rx, events));

        Self {
            name,
            cmd: cmd_tx,
            snapshot: snapshot_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connect(&self) {
        let _ = self.cmd.send(ActuatorCmd::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.cmd.send(ActuatorCmd::Disconnect);
    }

    /// Set one channel, keeping the others at their buffered values.
    pub fn issue(&self, channel: usize, value: u8) {
        let _ = self.cmd.send(ActuatorCmd::Issue { channel, value });
    }

    /// Replace the whole value vector.
    pub fn issue_all(&self, values: Vec<u8>) {
        let _ = self.cmd.send(ActuatorCmd::IssueAll(values));
    }

    /// Drive every channel to neutral.
    pub fn stop_all(&self) {
        let _ = self.cmd.send(ActuatorCmd::StopAll);
    }

    pub fn state(&self) -> ActuatorState {
        self.snapshot.borrow().state
    }

    pub fn values(&self) -> Vec<u8> {
        self.snapshot.borrow().values.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ActuatorState::Connected
    }

    pub fn watch(&self) -> watch::Receiver<ActuatorSnapshot> {
        self.snapshot.clone()
    }
}

struct ActuatorDriver {
    name: String,
    link: Arc<dyn TransportLink>,
    queue: OperationQueue,
    state: ActuatorState,
    values: Vec<u8>,
    write_in_flight: bool,
    dirty: bool,
    snapshot_tx: watch::Sender<ActuatorSnapshot>,
}

impl ActuatorDriver {
    async fn run(
        mut self,
        mut cmds: mpsc::UnboundedReceiver<ActuatorCmd>,
        mut events: LinkEventReceiver,
    ) {
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

    fn handle_cmd(&mut self, cmd: ActuatorCmd) {
        match cmd {
            ActuatorCmd::Connect => {
                if self.state != ActuatorState::Disconnected {
                    debug!("{}: connect ignored, already {:?}", self.name, self.state);
                    return;
                }
                info!("{}: connecting", self.name);
                self.state = ActuatorState::Connecting;
                self.publish();
                self.link.connect();
            }
            ActuatorCmd::Disconnect => {
                if self.state == ActuatorState::Disconnected {
                    debug!("{}: disconnect ignored, already disconnected", self.name);
                    return;
                }
                info!("{}: disconnecting", self.name);
                self.teardown();
            }
            ActuatorCmd::Issue { channel, value } => {
                if self.state != ActuatorState::Connected {
                    debug!("{}: issue ignored while {:?}", self.name, self.state);
                    return;
                }
                if channel >= self.values.len() {
                    warn!("{}: channel {channel} out of range", self.name);
                    return;
                }
                self.values[channel] = value;
                self.push_vector();
            }
            ActuatorCmd::IssueAll(values) => {
                if self.state != ActuatorState::Connected {
                    debug!("{}: issue ignored while {:?}", self.name, self.state);
                    return;
                }
                if values.len() != self.values.len() {
                    warn!(
                        "{}: expected {} channel values, got {}",
                        self.name,
                        self.values.len(),
                        values.len()
                    );
                    return;
                }
                self.values = values;
                self.push_vector();
            }
            ActuatorCmd::StopAll => {
                if self.state != ActuatorState::Connected {
                    return;
                }
                self.values.fill(0);
                self.push_vector();
            }
        }
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up => {
                if self.state == ActuatorState::Connecting {
                    debug!("{}: link up, discovering services", self.name);
                    self.link.discover();
                }
            }
            LinkEvent::Down => {
                if self.state != ActuatorState::Disconnected {
                    warn!("{}: link lost", self.name);
                    self.teardown();
                }
            }
            LinkEvent::Discovered(result) => {
                if self.state != ActuatorState::Connecting {
                    return;
                }
                match result {
                    Ok(characteristics) => self.finish_connect(&characteristics),
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
                let was_vector_write = matches!(
                    done,
                    Some(PendingOperation::WriteCharacteristic { characteristic, .. })
                        if characteristic == firmware::MOTOR_CONTROL_CHARACTERISTIC
                );
                if was_vector_write {
                    self.write_in_flight = false;
                }
                match status {
                    Ok(_) => {
                        if was_vector_write && self.dirty {
                            self.dirty = false;
                            self.push_vector();
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
            } => {
                if characteristic != firmware::MOTOR_STATE_CHARACTERISTIC {
                    return;
                }
                if value.len() == self.values.len() {
                    self.values = value;
                    self.publish();
                } else {
                    warn!(
                        "{}: state echo of {} bytes for {} channels, dropped",
                        self.name,
                        value.len(),
                        self.values.len()
                    );
                }
            }
        }
    }

    fn finish_connect(&mut self, characteristics: &[Uuid]) {
        if !characteristics.contains(&firmware::MOTOR_CONTROL_CHARACTERISTIC) {
            warn!("{}: control characteristic missing, giving up", self.name);
            self.teardown();
            return;
        }
        if characteristics.contains(&firmware::MOTOR_STATE_CHARACTERISTIC) {
            self.link
                .set_notify(firmware::MOTOR_STATE_CHARACTERISTIC, true);
            self.queue.enqueue(
                self.link.as_ref(),
                PendingOperation::WriteDescriptor {
                    characteristic: firmware::MOTOR_STATE_CHARACTERISTIC,
                    value: firmware::ENABLE_NOTIFICATIONS.to_vec(),
                },
            );
        }
        info!("{}: connected", self.name);
        self.state = ActuatorState::Connected;
        self.publish();
    }

    /// Queue a write of the current vector unless one is already pending,
    /// in which case the completion handler sends the freshest values.
    fn push_vector(&mut self) {
        self.publish();
        if self.write_in_flight {
            self.dirty = true;
            return;
        }
        self.write_in_flight = true;
        self.queue.enqueue(
            self.link.as_ref(),
            PendingOperation::WriteCharacteristic {
                characteristic: firmware::MOTOR_CONTROL_CHARACTERISTIC,
                value: self.values.clone(),
            },
        );
    }

    /// Neutralize every channel, then tell observers. Safe to repeat.
    fn teardown(&mut self) {
        if self.state == ActuatorState::Disconnected {
            return;
        }
        self.state = ActuatorState::Disconnected;
        self.values.fill(0);
        self.write_in_flight = false;
        self.dirty = false;
        self.queue.clear();
        self.link.disconnect();
        self.publish();
    }

    fn publish(&self) {
        let snapshot = ActuatorSnapshot {
            state: self.state,
            values: self.values.clone(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
