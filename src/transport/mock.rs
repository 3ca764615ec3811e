//! In-memory transport with scripted controller firmware, for tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::encode_line;
use crate::transport::{LineReader, Transport};
use crate::types::{Direction, PowerState, PumpInfo, SamplerDirection};

/// Scripted device behaviour: one received line in, reply lines out.
pub(crate) trait Firmware: Send {
    fn respond(&mut self, line: &str) -> Vec<String>;
}

const RTC_REPLY: &str = "RTC Time: 2024-9-26 11:47:39";

/// Routes `tracing` output to the test harness. Honors `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pump controller simulator.
pub(crate) struct PumpFirmware {
    pub pumps: BTreeMap<u32, PumpInfo>,
    pub banner: String,
    /// When set, only the handshake is answered.
    pub mute: bool,
}

impl PumpFirmware {
    pub fn new() -> Self {
        Self {
            pumps: BTreeMap::new(),
            banner: "Pico Pump Control Version 2.0".into(),
            mute: false,
        }
    }

    pub fn with_pump(mut self, id: u32, power: PowerState, direction: Direction) -> Self {
        self.pumps.insert(
            id,
            PumpInfo {
                power_pin: i32::try_from(id * 2).unwrap(),
                direction_pin: i32::try_from(id * 2 + 1).unwrap(),
                initial_power_value: 0,
                initial_direction_value: 0,
                power,
                direction,
            },
        );
        self
    }

    fn info_line(&self) -> String {
        let blocks: Vec<String> = self
            .pumps
            .iter()
            .map(|(id, p)| {
                format!(
                    "Pump{id} Info: Power Pin: {}, Direction Pin: {}, Initial Power Pin Value: {}, \
                     Initial Direction Pin Value: {}, Current Power Status: {}, \
                     Current Direction Status: {}",
                    p.power_pin,
                    p.direction_pin,
                    p.initial_power_value,
                    p.initial_direction_value,
                    p.power,
                    p.direction
                )
            })
            .collect();
        if blocks.is_empty() {
            "Pump Info: none".into()
        } else {
            blocks.join(", ")
        }
    }

    fn status_line(&self) -> String {
        let blocks: Vec<String> = self
            .pumps
            .iter()
            .map(|(id, p)| format!("Pump{id} Status: Power: {}, Direction: {}", p.power, p.direction))
            .collect();
        if blocks.is_empty() {
            "Pump Status: none".into()
        } else {
            blocks.join(", ")
        }
    }
}

impl Firmware for PumpFirmware {
    fn respond(&mut self, line: &str) -> Vec<String> {
        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            ["0", "ping"] => return vec![self.banner.clone()],
            ["0", "stime", ..] => return vec!["Success: RTC synchronized".into()],
            _ if self.mute => return Vec::new(),
            _ => {}
        }

        let reply = match parts.as_slice() {
            ["0", "time"] => RTC_REPLY.to_string(),
            ["0", "info"] => self.info_line(),
            ["0", "st"] => self.status_line(),
            ["0", "shutdown"] => {
                for pump in self.pumps.values_mut() {
                    pump.power = PowerState::Off;
                }
                "Success: All pumps shut down".into()
            }
            ["0", "reset"] => "Success: Resetting".into(),
            [id, "pw"] | [id, "di"] => {
                let id: u32 = id.parse().unwrap_or(u32::MAX);
                match self.pumps.get_mut(&id) {
                    Some(pump) if parts[1] == "pw" => {
                        pump.power = pump.power.toggled();
                        format!("Success: Pump {id} power toggled")
                    }
                    Some(pump) => {
                        pump.direction = pump.direction.toggled();
                        format!("Success: Pump {id} direction toggled")
                    }
                    None => format!("Error: Pump {id} not found"),
                }
            }
            [id, "reg", pp, dp, ipv, idv, ip, id_state] => {
                let id: u32 = id.parse().unwrap_or(u32::MAX);
                self.pumps.insert(
                    id,
                    PumpInfo {
                        power_pin: pp.parse().unwrap_or(-1),
                        direction_pin: dp.parse().unwrap_or(-1),
                        initial_power_value: ipv.parse().unwrap_or(0),
                        initial_direction_value: idv.parse().unwrap_or(0),
                        power: ip.parse().unwrap_or(PowerState::Off),
                        direction: id_state.parse().unwrap_or(Direction::Cw),
                    },
                );
                format!("Success: Pump {id} registered")
            }
            ["0", "clr"] => {
                self.pumps.clear();
                "Success: All pumps removed".into()
            }
            [id, "clr"] => {
                let id: u32 = id.parse().unwrap_or(u32::MAX);
                match self.pumps.remove(&id) {
                    Some(_) => format!("Success: Pump {id} removed"),
                    None => format!("Error: Pump {id} not found"),
                }
            }
            [_, "save"] => "Success: Configuration saved".into(),
            _ => "Error: Invalid command".into(),
        };
        vec![reply]
    }
}

/// Autosampler simulator.
pub(crate) struct AutosamplerFirmware {
    pub slots: BTreeMap<String, i64>,
    pub position: i64,
    pub direction: SamplerDirection,
}

impl AutosamplerFirmware {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            position: 0,
            direction: SamplerDirection::Left,
        }
    }

    pub fn with_slot(mut self, name: &str, position: i64) -> Self {
        self.slots.insert(name.into(), position);
        self
    }

    fn move_to(&mut self, target: i64) -> String {
        let relative = (target - self.position).abs();
        if target != self.position {
            self.direction = if target > self.position {
                SamplerDirection::Right
            } else {
                SamplerDirection::Left
            };
        }
        self.position = target;
        format!(
            "Info: moved to position {target} in 0.004037 seconds. relative position: {relative}"
        )
    }
}

impl Firmware for AutosamplerFirmware {
    fn respond(&mut self, line: &str) -> Vec<String> {
        let parts: Vec<&str> = line.split(':').collect();
        let reply = match parts.as_slice() {
            ["0", "ping"] => "Pico Autosampler Control Version 1.3".into(),
            ["0", "stime", ..] => "Success: RTC synchronized".into(),
            ["time"] => RTC_REPLY.into(),
            ["config"] => format!(
                "Autosampler Configuration: {}",
                serde_json::to_string(&self.slots).unwrap()
            ),
            ["status"] => format!(
                "Autosampler Status: position: {}, direction: {}",
                self.position, self.direction
            ),
            ["position", n] => match n.parse() {
                Ok(target) => self.move_to(target),
                Err(_) => "Error: Invalid position".into(),
            },
            ["slot", name] => match self.slots.get(*name).copied() {
                Some(target) => self.move_to(target),
                None => format!("Error: Slot {name} not found"),
            },
            ["addslot", name, pos] => match pos.parse() {
                Ok(pos) => {
                    self.slots.insert((*name).to_string(), pos);
                    format!("Success: Slot {name} added")
                }
                Err(_) => "Error: Invalid position".into(),
            },
            ["removeslot", name] => match self.slots.remove(*name) {
                Some(_) => format!("Success: Slot {name} removed"),
                None => format!("Error: Slot {name} not found"),
            },
            ["move", "left"] => self.move_to(self.position - 100),
            ["move", "right"] => self.move_to(self.position + 100),
            _ => "Error: Invalid command".into(),
        };
        vec![reply]
    }
}

/// Test-side view of a mock link.
pub(crate) struct MockHandle<F> {
    pub firmware: Arc<StdMutex<F>>,
    sent: Arc<StdMutex<Vec<String>>>,
    inject: Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>,
    device: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl<F> MockHandle<F> {
    /// Lines the device received, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Forgets the lines received so far.
    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Makes the device emit an unsolicited line.
    pub fn inject(&self, line: &str) {
        if let Some(tx) = self.inject.lock().unwrap().as_ref() {
            let _ = tx.send(line.to_string());
        }
    }

    /// Kills the device side, as if the cable were pulled.
    pub fn drop_link(&self) {
        if let Some(task) = self.device.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Transport over an in-memory duplex pipe to a simulated device.
pub(crate) struct MockTransport {
    port: String,
    firmware: Arc<StdMutex<dyn Firmware>>,
    sent: Arc<StdMutex<Vec<String>>>,
    inject: Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>,
    device: Arc<StdMutex<Option<JoinHandle<()>>>>,
    writer: Option<Arc<Mutex<WriteHalf<DuplexStream>>>>,
    reader: Option<ReadHalf<DuplexStream>>,
}

impl MockTransport {
    pub fn new<F: Firmware + 'static>(port: &str, firmware: F) -> (Self, MockHandle<F>) {
        let firmware = Arc::new(StdMutex::new(firmware));
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let inject = Arc::new(StdMutex::new(None));
        let device = Arc::new(StdMutex::new(None));

        let handle = MockHandle {
            firmware: Arc::clone(&firmware),
            sent: Arc::clone(&sent),
            inject: Arc::clone(&inject),
            device: Arc::clone(&device),
        };
        let transport = Self {
            port: port.into(),
            firmware,
            sent,
            inject,
            device,
            writer: None,
            reader: None,
        };
        (transport, handle)
    }
}

fn record_and_respond(
    firmware: &StdMutex<dyn Firmware>,
    sent: &StdMutex<Vec<String>>,
    line: String,
) -> Vec<String> {
    let replies = firmware.lock().unwrap().respond(&line);
    sent.lock().unwrap().push(line);
    replies
}

async fn run_device(
    stream: DuplexStream,
    firmware: Arc<StdMutex<dyn Firmware>>,
    sent: Arc<StdMutex<Vec<String>>>,
    mut inject_rx: mpsc::UnboundedReceiver<String>,
) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = LineReader::new(read_half);

    loop {
        let replies = tokio::select! {
            line = reader.read_line() => {
                let Ok(line) = line else { return };
                record_and_respond(&firmware, &sent, line)
            }
            Some(line) = inject_rx.recv() => vec![line],
        };
        for reply in replies {
            if write_half.write_all(&encode_line(&reply)).await.is_err() {
                return;
            }
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }
            let (host, device) = tokio::io::duplex(4096);
            let (inject_tx, inject_rx) = mpsc::unbounded_channel();
            *self.inject.lock().unwrap() = Some(inject_tx);

            let task = tokio::spawn(run_device(
                device,
                Arc::clone(&self.firmware),
                Arc::clone(&self.sent),
                inject_rx,
            ));
            *self.device.lock().unwrap() = Some(task);

            let (reader, writer) = tokio::io::split(host);
            self.reader = Some(reader);
            self.writer = Some(Arc::new(Mutex::new(writer)));
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.writer = None;
            self.reader = None;
            if let Some(task) = self.device.lock().unwrap().take() {
                task.abort();
            }
            Ok(())
        })
    }

    fn send_line(&mut self, line: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let writer = self.writer.clone();
        Box::pin(async move {
            let writer = writer.ok_or(Error::NotConnected)?;
            let mut writer = writer.lock().await;
            writer.write_all(&encode_line(&line)).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn take_reader(&mut self) -> Option<LineReader> {
        self.reader.take().map(LineReader::new)
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}
