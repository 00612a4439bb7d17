//! Proxy configuration.
//!
//! Environment variables are the sole config source; every value has a
//! fixed default so the proxy runs with no configuration at all.
//!
//! | Variable             | Default            |
//! |----------------------|--------------------|
//! | `WFDBG_LISTEN_PORT`  | `60000`            |
//! | `WFDBG_BACKEND_PORT` | `2345`             |
//! | `WFDBG_HISTORY_PORT` | `54578`            |
//! | `WFDBG_WORKDIR`      | process cwd        |
//! | `WFDBG_DATA_DIR`     | platform data dir  |
//!
//! All three listeners bind loopback only; the proxy imposes no
//! authentication.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_LISTEN_PORT: u16 = 60_000;
const DEFAULT_BACKEND_PORT: u16 = 2_345;
const DEFAULT_HISTORY_PORT: u16 = 54_578;

/// Resolved proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Debug-client entry point.
    pub listen_addr: SocketAddr,
    /// The language-native stepping backend.
    pub backend_addr: SocketAddr,
    /// The history/breakpoint coordination HTTP server.
    pub coordination_addr: SocketAddr,
    /// Root of the user's workflow sources; the path classifier treats
    /// files outside it as adapter code.
    pub working_dir: PathBuf,
    /// Where the coordination server persists its state files.
    pub data_dir: PathBuf,
}

impl ProxyConfig {
    /// Build the configuration from the environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let working_dir = std::env::var_os("WFDBG_WORKDIR")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let data_dir = std::env::var_os("WFDBG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        ProxyConfig {
            listen_addr: loopback(port_from_env("WFDBG_LISTEN_PORT", DEFAULT_LISTEN_PORT)),
            backend_addr: loopback(port_from_env("WFDBG_BACKEND_PORT", DEFAULT_BACKEND_PORT)),
            coordination_addr: loopback(port_from_env("WFDBG_HISTORY_PORT", DEFAULT_HISTORY_PORT)),
            working_dir,
            data_dir,
        }
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn port_from_env(var: &str, default: u16) -> u16 {
    match std::env::var(var) {
        Ok(raw) => match raw.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                warn!(var, value = %raw, default, "unparseable port, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("wfdbg"))
        .unwrap_or_else(|| PathBuf::from(".wfdbg"))
}
