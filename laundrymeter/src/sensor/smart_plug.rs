//! TP-Link HS1xx smart plug client.

use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use super::codec::SmartPlugCodec;
use super::{Reading, Sensor, SensorError};
use crate::tracing::prelude::*;

const REALTIME_COMMAND: &str = r#"{"emeter":{"get_realtime":{}}}"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmartPlugConfig {
    /// Hostname or IP address of the plug.
    pub host: String,

    /// Plugs listen on 9999; only change this when tunnelling.
    pub port: u16,

    /// Applied separately to connect, send and receive.
    pub timeout_ms: u64,
}

impl Default for SmartPlugConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 9999,
            timeout_ms: 2000,
        }
    }
}

impl SmartPlugConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Energy meter of a smart plug, queried over a fresh TCP connection
/// per reading.
#[derive(Debug, Clone)]
pub struct SmartPlug {
    config: SmartPlugConfig,
}

impl SmartPlug {
    pub fn new(config: SmartPlugConfig) -> Self {
        Self { config }
    }

    /// Send one command and wait for its reply.
    async fn request(&self, command: &str) -> Result<String, SensorError> {
        let timeout = self.config.timeout();
        let address = (self.config.host.as_str(), self.config.port);

        let stream = bounded(timeout, "connect", TcpStream::connect(address)).await?;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, SmartPlugCodec);

        trace!(host = %self.config.host, command, "Sending smart plug command");
        bounded(timeout, "send", framed.send(command.to_string())).await?;

        let reply = time::timeout(timeout, framed.next())
            .await
            .map_err(|_| timed_out("receive"))?;

        match reply {
            Some(Ok(json)) => {
                trace!(host = %self.config.host, reply = %json, "Smart plug replied");
                Ok(json)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by plug before reply",
            )
            .into()),
        }
    }
}

#[async_trait]
impl Sensor for SmartPlug {
    async fn read_realtime(&self) -> Result<Reading, SensorError> {
        let reply = self.request(REALTIME_COMMAND).await?;
        parse_realtime(&reply)
    }
}

async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    future: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    time::timeout(timeout, future)
        .await
        .map_err(|_| timed_out(operation))?
}

fn timed_out(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("smart plug {operation} timed out"),
    )
}

#[derive(Debug, Deserialize)]
struct RealtimeReply {
    emeter: EmeterReply,
}

#[derive(Debug, Deserialize)]
struct EmeterReply {
    get_realtime: Realtime,
}

/// Older firmware reports base units (`voltage`, `total` in kWh), newer
/// firmware reports milli-units (`voltage_mv`, `total_wh` in Wh).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Realtime {
    err_code: i64,
    err_msg: Option<String>,

    voltage_mv: Option<f64>,
    current_ma: Option<f64>,
    power_mw: Option<f64>,
    total_wh: Option<f64>,

    voltage: Option<f64>,
    current: Option<f64>,
    power: Option<f64>,
    total: Option<f64>,
}

fn parse_realtime(json: &str) -> Result<Reading, SensorError> {
    let reply: RealtimeReply = serde_json::from_str(json)
        .map_err(|e| SensorError::Protocol(format!("malformed realtime reply: {e}")))?;
    let rt = reply.emeter.get_realtime;

    if rt.err_code != 0 {
        return Err(SensorError::Protocol(format!(
            "plug reported error {}: {}",
            rt.err_code,
            rt.err_msg.as_deref().unwrap_or("no message")
        )));
    }

    let milli = |value: Option<f64>| value.map(|v| v / 1000.0);

    let power_w = milli(rt.power_mw)
        .or(rt.power)
        .ok_or_else(|| SensorError::Protocol("realtime reply without power".to_string()))?;
    let voltage_v = milli(rt.voltage_mv).or(rt.voltage).unwrap_or(0.0);
    let current_a = milli(rt.current_ma).or(rt.current).unwrap_or(0.0);
    let total_energy_wh = rt.total_wh.or(rt.total.map(|kwh| kwh * 1000.0)).unwrap_or(0.0);

    let values = [voltage_v, current_a, power_w, total_energy_wh];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SensorError::Protocol(
            "realtime reply contains non-finite values".to_string(),
        ));
    }

    // The meter occasionally reports tiny negative currents around zero load.
    Ok(Reading {
        voltage_v: voltage_v.max(0.0),
        current_a: current_a.max(0.0),
        power_w: power_w.max(0.0),
        total_energy_wh: total_energy_wh.max(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const HS110_V2_REPLY: &str = r#"{"emeter":{"get_realtime":{"voltage_mv":230512,"current_ma":2051,"power_mw":452310,"total_wh":18230,"err_code":0}}}"#;
    const HS110_V1_REPLY: &str = r#"{"emeter":{"get_realtime":{"voltage":229.8,"current":0.012,"power":1.5,"total":18.23,"err_code":0}}}"#;

    /// Accept one connection, check the command and answer with `reply`.
    async fn fake_plug(reply: &'static str) -> (SmartPlugConfig, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, SmartPlugCodec);
            let command = framed.next().await.unwrap().unwrap();
            assert_eq!(command, REALTIME_COMMAND);
            framed.send(reply.to_string()).await.unwrap();
        });

        let config = SmartPlugConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms: 500,
        };
        (config, handle)
    }

    #[test]
    fn parses_milli_unit_reply() {
        let reading = parse_realtime(HS110_V2_REPLY).unwrap();

        assert!((reading.voltage_v - 230.512).abs() < 1e-9);
        assert!((reading.current_a - 2.051).abs() < 1e-9);
        assert!((reading.power_w - 452.31).abs() < 1e-9);
        assert!((reading.total_energy_wh - 18230.0).abs() < 1e-9);
    }

    #[test]
    fn parses_base_unit_reply() {
        let reading = parse_realtime(HS110_V1_REPLY).unwrap();

        assert!((reading.voltage_v - 229.8).abs() < 1e-9);
        assert!((reading.power_w - 1.5).abs() < 1e-9);
        assert!((reading.total_energy_wh - 18230.0).abs() < 1e-6);
    }

    #[test]
    fn plug_error_code_is_protocol_error() {
        let reply = r#"{"emeter":{"get_realtime":{"err_code":-1,"err_msg":"module not support"}}}"#;

        match parse_realtime(reply) {
            Err(SensorError::Protocol(msg)) => assert!(msg.contains("module not support")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn reply_without_power_is_protocol_error() {
        let reply = r#"{"emeter":{"get_realtime":{"voltage_mv":230000,"err_code":0}}}"#;
        assert!(matches!(parse_realtime(reply), Err(SensorError::Protocol(_))));
    }

    #[test]
    fn garbage_is_protocol_error() {
        assert!(matches!(
            parse_realtime("not json"),
            Err(SensorError::Protocol(_))
        ));
    }

    #[test]
    fn negative_values_are_clamped() {
        let reply = r#"{"emeter":{"get_realtime":{"voltage_mv":230000,"current_ma":-3,"power_mw":-120,"total_wh":10,"err_code":0}}}"#;
        let reading = parse_realtime(reply).unwrap();

        assert_eq!(reading.current_a, 0.0);
        assert_eq!(reading.power_w, 0.0);
    }

    #[tokio::test]
    async fn reads_realtime_over_tcp() {
        let (config, plug) = fake_plug(HS110_V2_REPLY).await;

        let reading = SmartPlug::new(config).read_realtime().await.unwrap();

        assert!((reading.power_w - 452.31).abs() < 1e-9);
        plug.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_communication_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let plug = SmartPlug::new(SmartPlugConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms: 500,
        });

        assert!(matches!(
            plug.read_realtime().await,
            Err(SensorError::Communication(_))
        ));
    }

    #[tokio::test]
    async fn silent_plug_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept and hold the connection open without answering.
        let hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let plug = SmartPlug::new(SmartPlugConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms: 100,
        });

        match plug.read_realtime().await {
            Err(SensorError::Communication(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
        hold.abort();
    }
}
