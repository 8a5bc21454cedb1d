//! TP-Link Kasa local protocol
//!
//! Payloads are JSON obfuscated with an autokey XOR cipher. Discovery uses
//! bare ciphertext over UDP broadcast; commands go over TCP with a 4-byte
//! big-endian length prefix, one connection per request.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info};

use super::{DeviceError, DeviceLink};
use crate::color::DeviceHsv;
use crate::constants::kasa;

const TRANSITION_LIGHT_STATE: &str = "transition_light_state";

pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = kasa::INITIAL_KEY;
    plain
        .iter()
        .map(|&byte| {
            key ^= byte;
            key
        })
        .collect()
}

pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = kasa::INITIAL_KEY;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

/// Write length-prefixed, encrypted message to stream
async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, msg: &Value) -> Result<()> {
    let json = serde_json::to_vec(msg).context("Failed to serialize request to JSON")?;
    let len = u32::try_from(json.len()).context("Request does not fit a frame")?;

    stream
        .write_all(&len.to_be_bytes())
        .await
        .context("Failed to write frame length")?;
    stream
        .write_all(&encrypt(&json))
        .await
        .context("Failed to write frame payload")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}

/// Read length-prefixed, encrypted message from stream
async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Value> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read frame length")?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > kasa::MAX_RESPONSE_SIZE {
        bail!("Frame too large: {} bytes (max: {})", len, kasa::MAX_RESPONSE_SIZE);
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .context("Failed to read frame payload")?;

    serde_json::from_slice(&decrypt(&payload)).context("Failed to deserialize frame from JSON")
}

/// One request/response exchange, bounded by `limit` end to end
async fn request(addr: SocketAddr, msg: &Value, limit: Duration) -> Result<Value> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .context(format!("Failed to connect to {}", addr))?;
        write_frame(&mut stream, msg).await?;
        read_frame(&mut stream).await
    };

    timeout(limit, exchange)
        .await
        .map_err(|_| anyhow!("No answer from {} within {}ms", addr, limit.as_millis()))?
}

fn sysinfo_query() -> Value {
    json!({ "system": { "get_sysinfo": {} } })
}

/// `{service: {method: params}}`
fn service_call(service: &str, method: &str, params: Value) -> Value {
    let mut call = Map::new();
    call.insert(method.to_string(), params);
    let mut request = Map::new();
    request.insert(service.to_string(), Value::Object(call));
    Value::Object(request)
}

fn check_err_code(response: &Value, service: &str, method: &str) -> Result<()> {
    let result = response
        .get(service)
        .and_then(|s| s.get(method))
        .with_context(|| format!("Response carries no {}.{}", service, method))?;
    let code = result.get("err_code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let msg = result.get("err_msg").and_then(Value::as_str).unwrap_or("no message");
        bail!("{}.{} failed with err_code {}: {}", service, method, code, msg);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct SysInfo {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    mic_type: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    is_color: u8,
}

impl SysInfo {
    fn is_light_strip(&self) -> bool {
        [&self.mic_type, &self.kind]
            .iter()
            .any(|t| t.to_ascii_uppercase().contains("LIGHTSTRIP"))
    }

    fn service(&self) -> &'static str {
        if self.is_light_strip() {
            kasa::LIGHTSTRIP_SERVICE
        } else {
            kasa::BULB_SERVICE
        }
    }
}

fn parse_sysinfo(response: &Value) -> Result<SysInfo> {
    let info = response
        .pointer("/system/get_sysinfo")
        .context("Response carries no system.get_sysinfo")?;
    SysInfo::deserialize(info).context("Malformed get_sysinfo response")
}

fn parse_discovery_reply(datagram: &[u8]) -> Result<SysInfo> {
    let response: Value =
        serde_json::from_slice(&decrypt(datagram)).context("Discovery reply is not JSON")?;
    parse_sysinfo(&response)
}

/// A light that answered discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KasaDevice {
    pub addr: SocketAddr,
    pub alias: String,
    pub model: String,
}

impl fmt::Display for KasaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({}) at {}", self.alias, self.model, self.addr)
    }
}

/// An activated color light
#[derive(Debug, Clone)]
pub struct KasaLight {
    addr: SocketAddr,
    alias: String,
    service: &'static str,
}

/// Kasa implementation of [`DeviceLink`]
#[derive(Debug, Clone)]
pub struct KasaLink {
    discovery_target: SocketAddr,
    command_port: u16,
    discovery_timeout: Duration,
    command_timeout: Duration,
}

impl Default for KasaLink {
    fn default() -> Self {
        Self {
            discovery_target: SocketAddr::from((kasa::BROADCAST_ADDR, kasa::PORT)),
            command_port: kasa::PORT,
            discovery_timeout: Duration::from_millis(kasa::DISCOVERY_TIMEOUT_MS),
            command_timeout: Duration::from_millis(kasa::COMMAND_TIMEOUT_MS),
        }
    }
}

// Test hooks: point discovery at a local responder and shorten timeouts
#[cfg(test)]
impl KasaLink {
    fn with_discovery_target(mut self, target: SocketAddr) -> Self {
        self.discovery_target = target;
        self
    }

    fn with_command_port(mut self, port: u16) -> Self {
        self.command_port = port;
        self
    }

    fn with_timeouts(mut self, discovery: Duration, command: Duration) -> Self {
        self.discovery_timeout = discovery;
        self.command_timeout = command;
        self
    }
}

impl KasaLink {
    pub fn new() -> Self {
        Self::default()
    }

    async fn send_probes(&self) -> Result<UdpSocket> {
        let bind = if self.discovery_target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind)
            .await
            .context("Failed to bind discovery socket")?;
        socket
            .set_broadcast(true)
            .context("Failed to enable broadcast on discovery socket")?;

        let probe = encrypt(&serde_json::to_vec(&sysinfo_query())?);
        for _ in 0..kasa::DISCOVERY_PACKETS {
            socket
                .send_to(&probe, self.discovery_target)
                .await
                .context(format!("Failed to send discovery probe to {}", self.discovery_target))?;
        }
        Ok(socket)
    }
}

impl DeviceLink for KasaLink {
    type Device = KasaDevice;
    type Ready = KasaLight;

    async fn discover(&mut self) -> Result<KasaDevice, DeviceError> {
        info!(addr = %self.discovery_target, "Discovering lights");
        let socket = self
            .send_probes()
            .await
            .map_err(|e| DeviceError::Connect(format!("{:#}", e)))?;

        let deadline = Instant::now() + self.discovery_timeout;
        let mut buf = vec![0u8; kasa::MAX_RESPONSE_SIZE];
        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => return Err(DeviceError::NoDeviceFound),
                Ok(Err(e)) => return Err(DeviceError::Connect(format!("Discovery receive failed: {}", e))),
                Ok(Ok(received)) => received,
            };

            match parse_discovery_reply(&buf[..len]) {
                Ok(info) => {
                    let device = KasaDevice {
                        addr: SocketAddr::new(from.ip(), self.command_port),
                        alias: info.alias,
                        model: info.model,
                    };
                    info!(device = %device, "Found light");
                    return Ok(device);
                }
                Err(e) => debug!(from = %from, error = %e, "Ignoring discovery reply"),
            }
        }
    }

    async fn connect_and_activate(&mut self, device: KasaDevice) -> Result<KasaLight, DeviceError> {
        let connect_err = |e: anyhow::Error| DeviceError::Connect(format!("{:#}", e));

        let response = request(device.addr, &sysinfo_query(), self.command_timeout)
            .await
            .map_err(connect_err)?;
        let info = parse_sysinfo(&response).map_err(connect_err)?;
        if info.is_color != 1 {
            return Err(DeviceError::Connect(format!("{} is not a color light", device)));
        }

        let light = KasaLight {
            addr: device.addr,
            alias: info.alias.clone(),
            service: info.service(),
        };

        let turn_on = service_call(
            light.service,
            TRANSITION_LIGHT_STATE,
            json!({ "on_off": 1, "transition_period": 0 }),
        );
        let response = request(light.addr, &turn_on, self.command_timeout)
            .await
            .map_err(connect_err)?;
        check_err_code(&response, light.service, TRANSITION_LIGHT_STATE).map_err(connect_err)?;

        info!(
            alias = %light.alias,
            addr = %light.addr,
            service = light.service,
            "Light is on"
        );
        Ok(light)
    }

    async fn push_hsv(
        &mut self,
        ready: &mut KasaLight,
        hsv: DeviceHsv,
        transition_ms: u32,
    ) -> Result<(), DeviceError> {
        let link_lost = |e: anyhow::Error| DeviceError::LinkLost(format!("{:#}", e));

        let params = json!({
            "hue": hsv.hue,
            "saturation": hsv.saturation,
            "brightness": hsv.value,
            "color_temp": 0,
            "on_off": 1,
            "transition_period": transition_ms,
            "ignore_default": 1,
        });
        let command = service_call(ready.service, TRANSITION_LIGHT_STATE, params);
        let response = request(ready.addr, &command, self.command_timeout)
            .await
            .map_err(link_lost)?;
        check_err_code(&response, ready.service, TRANSITION_LIGHT_STATE).map_err(link_lost)?;

        debug!(hsv = %hsv, transition_ms = transition_ms, "Pushed color");
        Ok(())
    }
}
