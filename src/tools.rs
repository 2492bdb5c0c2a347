use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schema::{ListToolsResult, Tool, ToolInputSchema};

/// Name of the single tool this server exposes.
pub const GET_WEATHER: &str = "get-weather";

/// Input parameters of the `get-weather` tool.
#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GetWeatherParams {
    /// Latitude of the location, in decimal degrees
    pub latitude: String,
    /// Longitude of the location, in decimal degrees
    pub longitude: String,
}

/// Static set of tools offered to clients.
///
/// Descriptors never change after construction. `republish` only bumps a
/// revision counter so list-changed notifications have something to report.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Arc<[Tool]>,
    revision: Arc<AtomicU64>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let weather = Tool::new(
            GET_WEATHER,
            ToolInputSchema::from_json_schema::<GetWeatherParams>(),
        )
        .with_description("Get current weather and wind data for a latitude/longitude pair");
        Self {
            tools: Arc::from(vec![weather]),
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn list(&self) -> ListToolsResult {
        ListToolsResult::new().with_tools(self.tools.iter().cloned())
    }

    /// Re-issue the tool list and return the new revision.
    pub fn republish(&self) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Republished {} tool(s), revision {}", self.tools.len(), revision);
        revision
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}
