pub mod cec_client;
pub mod nmcli;
pub mod sonos;
pub mod systemd;

#[cfg(any(test, feature = "backend_mock"))]
pub mod mock;
