//! Lookup of stored scripts by identifier.
//!
//! Script persistence lives outside the engine; the registry only needs the
//! text of a script when a client asks to run it by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves an opaque script id to script text.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn script_text(&self, id: &str) -> anyhow::Result<String>;
}

/// In-memory script table.
#[derive(Debug, Default)]
pub struct MemoryScriptSource {
    scripts: RwLock<HashMap<String, String>>,
}

impl MemoryScriptSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, text: impl Into<String>) {
        if let Ok(mut scripts) = self.scripts.write() {
            scripts.insert(id.into(), text.into());
        }
    }
}

#[async_trait]
impl ScriptSource for MemoryScriptSource {
    async fn script_text(&self, id: &str) -> anyhow::Result<String> {
        let scripts = self
            .scripts
            .read()
            .map_err(|_| anyhow::anyhow!("script table lock poisoned"))?;
        scripts
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Script not found: {}", id))
    }
}
