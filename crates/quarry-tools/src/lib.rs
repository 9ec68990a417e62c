use async_trait::async_trait;
use quarry_core::Result;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// A tool implemented by the host itself, callable by the model or by
/// protocol clients through the in-process server.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn execute(&self, args: Value) -> Result<Value>;
}

pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(&self, tool: impl Tool + 'static) -> Result<()> {
        let mut tools = self.tools.write().unwrap();
        let name = tool.name().to_string();
        tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut tools = self.tools.write().unwrap();
        tools.remove(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap();
        tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap();
        tools.keys().cloned().collect()
    }

    pub fn get_all(&self) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap();
        tools.values().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability gate applied by the in-process server before listing or
/// executing a host tool. `allow_all` permits every registered tool;
/// `allow_only` restricts to an explicit set of names.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGate {
    allowed: Option<HashSet<String>>,
}

impl CapabilityGate {
    pub fn allow_all() -> Self {
        Self { allowed: None }
    }

    pub fn allow_only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn permits(&self, name: &str) -> bool {
        match &self.allowed {
            None => true,
            Some(set) => set.contains(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MockTool {
        name: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "A mock tool for testing"
        }

        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {}
            })
        }

        async fn execute(&self, _args: Value) -> Result<Value> {
            Ok(json!({"result": "success"}))
        }
    }

    #[test]
    fn test_tool_registry() {
        let registry = ToolRegistry::new();
        let tool = MockTool {
            name: "test_tool".to_string(),
        };

        registry.register(tool).unwrap();
        assert!(registry.get("test_tool").is_some());
        assert_eq!(registry.list().len(), 1);

        registry.unregister("test_tool").unwrap();
        assert!(registry.get("test_tool").is_none());
    }

    #[test]
    fn test_capability_gate() {
        let gate = CapabilityGate::allow_all();
        assert!(gate.permits("anything"));

        let gate = CapabilityGate::allow_only(["search", "extract"]);
        assert!(gate.permits("search"));
        assert!(gate.permits("extract"));
        assert!(!gate.permits("delete_everything"));
    }
}
