// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueZ pairing agent that answers passkey requests automatically.
//!
//! The agent registers on the system bus, becomes the default agent and
//! then answers every `RequestPasskey` call with one configured passkey.
//! It runs on its own thread, processing one bus call at a time.

use dbus::blocking::Connection;
use dbus::channel::{MatchingReceiver, Sender};
use dbus::message::{MatchRule, MessageType};
use dbus::{Message, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::error::LinkError;

/// BlueZ service name.
const BLUEZ_SERVICE: &str = "org.bluez";

/// Object implementing the agent manager.
const BLUEZ_ROOT: &str = "/org/bluez";

const AGENT_MANAGER_INTERFACE: &str = "org.bluez.AgentManager1";

/// Interface BlueZ calls on registered agents.
pub const AGENT_INTERFACE: &str = "org.bluez.Agent1";

/// Capability announced at registration.
pub const AGENT_CAPABILITY: &str = "DisplayYesNo";

const REQUEST_PASSKEY: &str = "RequestPasskey";

/// How long one dispatch iteration waits before re-checking the stop flag.
const DISPATCH_INTERVAL: Duration = Duration::from_millis(500);

/// A passkey request for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub device_path: String,
}

/// Outcome of offering a bus message to the agent.
#[derive(Debug)]
pub enum Dispatch {
    /// The call was answered with this reply.
    Handled(Message),
    /// Not ours; left for other listeners.
    NotYetHandled,
}

/// Passkey responder.
#[derive(Debug, Clone)]
pub struct PairingAgent {
    passkey: u32,
    object_path: String,
}

impl PairingAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            passkey: config.passkey,
            object_path: config.object_path.clone(),
        }
    }

    pub fn passkey(&self) -> u32 {
        self.passkey
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    /// Passkey for `request`. The device is not consulted.
    pub fn respond(&self, request: &PairingRequest) -> u32 {
        info!("RequestPasskey from {}", request.device_path);
        self.passkey
    }

    /// Answer `msg` if it is a passkey request.
    pub fn handle(&self, msg: &Message) -> Dispatch {
        if msg.msg_type() != MessageType::MethodCall {
            return Dispatch::NotYetHandled;
        }
        let interface = msg.interface();
        let member = msg.member();
        if interface.as_deref() != Some(AGENT_INTERFACE)
            || member.as_deref() != Some(REQUEST_PASSKEY)
        {
            debug!(
                "Leaving {}.{} unhandled",
                interface.as_deref().unwrap_or("?"),
                member.as_deref().unwrap_or("?")
            );
            return Dispatch::NotYetHandled;
        }

        let device: Path = match msg.read1() {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to parse RequestPasskey arguments: {}", e);
                return Dispatch::NotYetHandled;
            }
        };

        let passkey = self.respond(&PairingRequest {
            device_path: String::from(&*device),
        });
        Dispatch::Handled(msg.method_return().append1(passkey))
    }

    /// Register on the system bus and run the dispatch loop on a dedicated
    /// thread.
    ///
    /// Returns once registration has either completed or failed; failure
    /// means the platform pairing service is unusable.
    pub fn spawn(config: &AgentConfig) -> Result<AgentHandle, LinkError> {
        let agent = Self::new(config);
        let timeout = Duration::from_secs(config.call_timeout_secs);
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("pairing-agent".to_string())
            .spawn(move || {
                let conn = match agent.register(timeout) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                agent.dispatch(&conn, &thread_stop);
            })
            .map_err(|e| LinkError::AgentRegistrationFailed {
                step: "spawn",
                message: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(AgentHandle {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(LinkError::AgentRegistrationFailed {
                step: "spawn",
                message: "agent thread exited before registering".to_string(),
            }),
        }
    }

    fn register(&self, timeout: Duration) -> Result<Connection, LinkError> {
        let conn = Connection::new_system().map_err(|e| {
            error!("DBus connection error: {}", e);
            LinkError::BusConnectionFailed(e.to_string())
        })?;

        let path = Path::new(self.object_path.clone()).map_err(|message| {
            LinkError::AgentRegistrationFailed {
                step: "export",
                message,
            }
        })?;

        let mut rule = MatchRule::new_method_call();
        rule.path = Some(path.clone());
        let responder = self.clone();
        conn.start_receive(
            rule,
            Box::new(move |msg: Message, conn: &Connection| {
                if let Dispatch::Handled(reply) = responder.handle(&msg) {
                    if conn.send(reply).is_err() {
                        warn!("Failed to send passkey reply");
                    }
                }
                true
            }),
        );

        let manager = conn.with_proxy(BLUEZ_SERVICE, BLUEZ_ROOT, timeout);
        manager
            .method_call::<(), _, _, _>(
                AGENT_MANAGER_INTERFACE,
                "RegisterAgent",
                (path.clone(), AGENT_CAPABILITY),
            )
            .map_err(|e| {
                error!("Failed to register agent: {}", e);
                LinkError::AgentRegistrationFailed {
                    step: "RegisterAgent",
                    message: e.to_string(),
                }
            })?;
        info!("Agent registered with passkey: {:06}", self.passkey);

        manager
            .method_call::<(), _, _, _>(AGENT_MANAGER_INTERFACE, "RequestDefaultAgent", (path,))
            .map_err(|e| {
                error!("Failed to set default agent: {}", e);
                LinkError::AgentRegistrationFailed {
                    step: "RequestDefaultAgent",
                    message: e.to_string(),
                }
            })?;
        info!("Default agent set at {}", self.object_path);

        Ok(conn)
    }

    fn dispatch(&self, conn: &Connection, stop: &AtomicBool) {
        info!("Pairing agent dispatch loop running");
        while !stop.load(Ordering::Acquire) {
            if let Err(e) = conn.process(DISPATCH_INTERVAL) {
                error!("Pairing agent lost the system bus: {}", e);
                return;
            }
        }
        info!("Pairing agent stopped");
    }
}

/// Running pairing agent.
pub struct AgentHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AgentHandle {
    /// Whether the dispatch thread is still alive.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the dispatch loop and wait for the thread to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Pairing agent thread panicked");
            }
        }
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> PairingAgent {
        PairingAgent::new(&AgentConfig::default())
    }

    fn call(member: &str) -> Message {
        let mut msg =
            Message::new_method_call(BLUEZ_SERVICE, "/com/btlink/agent", AGENT_INTERFACE, member)
                .unwrap();
        msg.set_serial(7);
        msg
    }

    #[test]
    fn test_passkey_request_answered() {
        let msg =
            call(REQUEST_PASSKEY).append1(Path::from("/org/bluez/hci0/dev_12_34_56_78_9A_BC"));

        match agent().handle(&msg) {
            Dispatch::Handled(reply) => {
                assert_eq!(reply.msg_type(), MessageType::MethodReturn);
                assert_eq!(reply.read1::<u32>().unwrap(), 123456);
            }
            Dispatch::NotYetHandled => panic!("RequestPasskey was not handled"),
        }
    }

    #[test]
    fn test_device_path_is_ignored() {
        let agent = PairingAgent::new(&AgentConfig {
            passkey: 713,
            ..AgentConfig::default()
        });
        for device in ["/org/bluez/hci0/dev_00_00_00_00_00_01", "/org/bluez/hci1/dev_FF"] {
            let request = PairingRequest {
                device_path: String::from(&*device),
            };
            assert_eq!(agent.respond(&request), 713);
        }
    }

    #[test]
    fn test_other_methods_left_unhandled() {
        for member in ["RequestConfirmation", "Release", "Cancel", "AuthorizeService"] {
            let msg = call(member);
            assert!(matches!(agent().handle(&msg), Dispatch::NotYetHandled));
        }
    }

    #[test]
    fn test_malformed_passkey_request_left_unhandled() {
        let msg = call(REQUEST_PASSKEY);
        assert!(matches!(agent().handle(&msg), Dispatch::NotYetHandled));
    }

    #[test]
    fn test_foreign_interface_left_unhandled() {
        let mut msg = Message::new_method_call(
            BLUEZ_SERVICE,
            "/com/btlink/agent",
            "org.freedesktop.DBus.Introspectable",
            "Introspect",
        )
        .unwrap();
        msg.set_serial(3);
        assert!(matches!(agent().handle(&msg), Dispatch::NotYetHandled));
    }

    #[test]
    fn test_signal_left_unhandled() {
        let msg = Message::new_signal("/com/btlink/agent", AGENT_INTERFACE, REQUEST_PASSKEY)
            .unwrap()
            .append1(Path::from("/org/bluez/hci0/dev_00_11_22_33_44_55"));
        assert!(matches!(agent().handle(&msg), Dispatch::NotYetHandled));
    }
}
