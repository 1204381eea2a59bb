use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BoilerAction {
    On,
    Off,
    Toggle,
}

impl BoilerAction {
    pub fn switch_to(on: bool) -> Self {
        if on {
            BoilerAction::On
        } else {
            BoilerAction::Off
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoilerCommandResult {
    pub action: BoilerAction,
    /// Relay state after the command.
    pub heating: bool,
}

/// Heating relay of the water boiler.
#[async_trait]
pub trait BoilerRelay: Send + Sync {
    async fn is_on(&self) -> Result<bool>;
    async fn control(&self, action: BoilerAction) -> Result<BoilerCommandResult>;
}

#[derive(Debug)]
struct SimulatedBoilerState {
    on: bool,
    online: bool,
    commands: Vec<BoilerAction>,
}

/// In-process relay used when no GPIO driver is attached.
#[derive(Debug)]
pub struct SimulatedBoiler {
    state: RwLock<SimulatedBoilerState>,
}

impl SimulatedBoiler {
    pub fn new(on: bool) -> Self {
        Self {
            state: RwLock::new(SimulatedBoilerState {
                on,
                online: true,
                commands: Vec::new(),
            }),
        }
    }

    /// Make every call fail as if the relay driver were gone.
    pub async fn set_online(&self, online: bool) {
        self.state.write().await.online = online;
    }

    /// Commands received so far, oldest first.
    pub async fn commands(&self) -> Vec<BoilerAction> {
        self.state.read().await.commands.clone()
    }
}

impl Default for SimulatedBoiler {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl BoilerRelay for SimulatedBoiler {
    async fn is_on(&self) -> Result<bool> {
        let st = self.state.read().await;
        if !st.online {
            anyhow::bail!("boiler relay not responding");
        }
        Ok(st.on)
    }

    async fn control(&self, action: BoilerAction) -> Result<BoilerCommandResult> {
        let mut st = self.state.write().await;
        if !st.online {
            anyhow::bail!("boiler relay not responding");
        }
        st.on = match action {
            BoilerAction::On => true,
            BoilerAction::Off => false,
            BoilerAction::Toggle => !st.on,
        };
        st.commands.push(action);
        Ok(BoilerCommandResult {
            action,
            heating: st.on,
        })
    }
}
