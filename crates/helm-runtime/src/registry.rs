use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use helm_core::{Event, EventBus, HelmError, Result, ToolAdapter, ToolResult, ToolSpec};

/// Name-keyed table of tool adapters, built at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolAdapter>>,
    events: Option<EventBus>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Add an adapter. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn ToolAdapter>) -> Result<()> {
        let name = tool.describe().name;
        if self.tools.contains_key(&name) {
            return Err(HelmError::Config(format!("tool '{name}' registered twice")));
        }
        debug!(tool = %name, surface = %tool.surface(), "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Capability list sent to the model, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.describe()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run the named tool.
    ///
    /// Unknown names, a missing `action` and declared tool errors all come
    /// back as a result with `error` set. Only undeclared faults are returned
    /// as `Err`.
    pub async fn dispatch(&self, name: &str, parameters: &Map<String, Value>) -> Result<ToolResult> {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = %name, "invalid tool requested");
            return Ok(self.finish(name, ToolResult::failure(format!("Invalid tool: {name}"))));
        };
        let Some(action) = parameters.get("action").and_then(Value::as_str) else {
            return Ok(self.finish(
                name,
                ToolResult::failure(format!("missing 'action' parameter for tool '{name}'")),
            ));
        };

        debug!(tool = %name, action, "dispatching");
        match tool.execute(action, parameters).await {
            Ok(result) => Ok(self.finish(name, result)),
            Err(HelmError::Tool(e)) => {
                warn!(tool = %name, action, error = %e, "tool error");
                Ok(self.finish(name, ToolResult::failure(e.to_string())))
            }
            Err(e) => {
                error!(tool = %name, action, error = %e, "unexpected fault in tool");
                Err(e)
            }
        }
    }

    fn finish(&self, name: &str, result: ToolResult) -> ToolResult {
        if let Some(ref events) = self.events {
            events.publish(Event::ToolDispatched {
                name: name.to_string(),
                is_error: result.is_error(),
            });
        }
        result
    }
}
