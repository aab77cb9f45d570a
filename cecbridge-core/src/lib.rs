//! Core library for the CEC-Sonos bridge appliance.
//! This crate defines the capability traits (network profiles, speakers,
//! CEC transport, system control) and the components built on top of them:
//! boot-time mode selection, hotspot provisioning, the CEC command bridge
//! and the connectivity watchdog. Concrete adapters live in `backends`.

pub mod backends;
pub mod cec;
pub mod config;
pub mod frontends;
pub mod hotspot;
pub mod mode;
pub mod provisioner;
pub mod store;
pub mod structs;
pub mod traits;
pub mod watchdog;
pub mod web_server;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external tool exited unsuccessfully. Holds the tool's own output.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("Speaker error: {0}")]
    Speaker(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Web server error: {0}")]
    WebServer(#[from] axum::BoxError),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("No speaker configured")]
    NotConfigured,

    /// The operator put the device into a state it cannot run in.
    #[error("Operator error: {0}")]
    OperatorError(String),
}

impl Error {
    /// The message to hand back to the setup UI: raw tool output for tool
    /// failures, the display form for everything else.
    pub fn detail(&self) -> String {
        match self {
            Error::CommandFailed(raw) => raw.clone(),
            Error::Timeout(what) => what.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Speaker(e.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e.to_string())
    }
}

impl From<quick_xml::DeError> for Error {
    fn from(e: quick_xml::DeError) -> Self {
        Error::Xml(e.to_string())
    }
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
