use clap::{Args, Parser};
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::engine::EngineConfig;
use crate::media::{CaptureProfile, VideoCodecConfig};
use crate::telemetry::logging::{LogConfig, LogLevel};

pub const DEFAULT_ADDR: &str = "localhost:7000";
pub const DEFAULT_SID: &str = "test room";
pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Parser)]
#[command(
    name = "broadcast",
    version,
    about = "Publish a send-only video track to an SFU over JSON-RPC signaling"
)]
pub struct Cli {
    /// Signaling server address; the client connects to ws://<addr>/ws.
    #[arg(short = 'a', long = "addr", env = "BROADCAST_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Session (room) to join.
    #[arg(long, env = "BROADCAST_SID", default_value = DEFAULT_SID)]
    pub sid: String,

    /// VP8 IVF file to stream. Without it an idle video track is published.
    #[arg(long, value_name = "PATH", env = "BROADCAST_VIDEO")]
    pub video: Option<PathBuf>,

    /// STUN server handed to the ICE agent.
    #[arg(long, env = "BROADCAST_STUN", default_value = DEFAULT_STUN)]
    pub stun: String,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BROADCAST_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BROADCAST_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server address {addr:?}: {reason}")]
    InvalidAddr { addr: String, reason: &'static str },
    #[error("invalid signaling url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub signaling_url: Url,
    pub sid: String,
    pub video: Option<PathBuf>,
    pub engine: EngineConfig,
    pub capture: CaptureProfile,
    pub log: LogConfig,
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        Ok(Config {
            signaling_url: signaling_url(&cli.addr)?,
            sid: cli.sid,
            video: cli.video,
            engine: EngineConfig {
                stun_url: cli.stun,
                codec: VideoCodecConfig::default(),
            },
            capture: CaptureProfile::default(),
            log: cli.logging.to_config(),
        })
    }
}

/// Turns `host:port` into the server's websocket endpoint.
pub fn signaling_url(addr: &str) -> Result<Url, ConfigError> {
    let invalid = |reason| ConfigError::InvalidAddr {
        addr: addr.to_string(),
        reason,
    };
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
    Ok(Url::parse(&format!("ws://{addr}/ws"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Cli parsing reads BROADCAST_* variables; keep env-touching tests apart.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn defaults_target_local_sfu() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let cli = Cli::try_parse_from(["broadcast"]).unwrap();
        let config = Config::try_from(cli).unwrap();
        assert_eq!(config.signaling_url.as_str(), "ws://localhost:7000/ws");
        assert_eq!(config.sid, "test room");
        assert_eq!(config.engine.stun_url, DEFAULT_STUN);
        assert_eq!(config.engine.codec, VideoCodecConfig::default());
        assert_eq!(config.log.level, LogLevel::Info);
        assert!(config.video.is_none());
    }

    #[test]
    fn short_addr_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let cli = Cli::try_parse_from(["broadcast", "-a", "10.1.2.3:7001", "--sid", "lobby"]).unwrap();
        let config = Config::try_from(cli).unwrap();
        assert_eq!(config.signaling_url.as_str(), "ws://10.1.2.3:7001/ws");
        assert_eq!(config.sid, "lobby");
    }

    #[test]
    fn addr_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("BROADCAST_ADDR", "sfu.internal:9000");
        }
        let cli = Cli::try_parse_from(["broadcast"]);
        unsafe {
            std::env::remove_var("BROADCAST_ADDR");
        }
        assert_eq!(cli.unwrap().addr, "sfu.internal:9000");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for addr in ["localhost", ":7000", "localhost:http", "host:70000"] {
            assert!(
                matches!(signaling_url(addr), Err(ConfigError::InvalidAddr { .. })),
                "{addr} should be rejected"
            );
        }
        assert_eq!(
            signaling_url("[::1]:7000").unwrap().as_str(),
            "ws://[::1]:7000/ws"
        );
    }
}
