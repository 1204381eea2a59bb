use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Snapshot reported by the wallbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallboxTelemetry {
    pub car_connected: bool,
    /// Lifetime energy counter, Wh.
    pub eto_wh: f64,
    /// Charging-allowed flag as reported by the firmware; `None` when the
    /// device could not tell.
    pub allow: Option<bool>,
}

/// EV wallbox control surface.
#[async_trait]
pub trait Wallbox: Send + Sync {
    async fn telemetry(&self) -> Result<WallboxTelemetry>;
    async fn set_allow_charging(&self, allow: bool) -> Result<()>;
    async fn is_online(&self) -> bool;
}

#[derive(Debug)]
struct SimulatedWallboxState {
    telemetry: WallboxTelemetry,
    online: bool,
    allow_commands: Vec<bool>,
}

/// Simulated wallbox for development and testing
#[derive(Debug)]
pub struct SimulatedWallbox {
    state: RwLock<SimulatedWallboxState>,
}

impl SimulatedWallbox {
    pub fn new(initial: WallboxTelemetry) -> Self {
        Self {
            state: RwLock::new(SimulatedWallboxState {
                telemetry: initial,
                online: true,
                allow_commands: Vec::new(),
            }),
        }
    }

    pub async fn connect_car(&self) {
        self.state.write().await.telemetry.car_connected = true;
    }

    pub async fn disconnect_car(&self) {
        self.state.write().await.telemetry.car_connected = false;
    }

    /// Advance the lifetime counter as if energy had been delivered.
    pub async fn add_energy_wh(&self, wh: f64) {
        self.state.write().await.telemetry.eto_wh += wh;
    }

    pub async fn set_online(&self, online: bool) {
        self.state.write().await.online = online;
    }

    /// Override the reported allow flag, e.g. to mimic firmware that
    /// resets it on its own.
    pub async fn set_reported_allow(&self, allow: Option<bool>) {
        self.state.write().await.telemetry.allow = allow;
    }

    pub async fn allow_commands(&self) -> Vec<bool> {
        self.state.read().await.allow_commands.clone()
    }
}

impl Default for SimulatedWallbox {
    fn default() -> Self {
        Self::new(WallboxTelemetry {
            car_connected: false,
            eto_wh: 0.0,
            allow: Some(false),
        })
    }
}

#[async_trait]
impl Wallbox for SimulatedWallbox {
    async fn telemetry(&self) -> Result<WallboxTelemetry> {
        let st = self.state.read().await;
        if !st.online {
            anyhow::bail!("wallbox status request timed out");
        }
        Ok(st.telemetry.clone())
    }

    async fn set_allow_charging(&self, allow: bool) -> Result<()> {
        let mut st = self.state.write().await;
        if !st.online {
            anyhow::bail!("wallbox command request timed out");
        }
        st.telemetry.allow = Some(allow);
        st.allow_commands.push(allow);
        Ok(())
    }

    async fn is_online(&self) -> bool {
        self.state.read().await.online
    }
}
