//! Network availability as seen by scheduling constraints.
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    #[default]
    Unmetered,
    Metered,
    Disconnected,
}

pub trait Connectivity: Send + Sync {
    fn state(&self) -> NetworkState;
}

/// Reports a fixed state, typically taken from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticConnectivity(pub NetworkState);

impl Connectivity for StaticConnectivity {
    fn state(&self) -> NetworkState {
        self.0
    }
}
