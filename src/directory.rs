// live-sessions-service/src/directory.rs
//! Extension / DID metadata used to classify the numbers of a session.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Extension row. Flags are the textual `"0"`/`"1"` the platform stores;
/// `None` means the column was NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtensionRecord {
    pub is_agent: Option<String>,
    pub is_logged: Option<String>,
    pub user_id: Option<String>,
    pub before_call_ivr_args: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DidRecord {
    pub sda: String,
    pub label: Option<String>,
}

/// Synchronous, side-effect free number lookup.
pub trait NumberDirectory: Send + Sync {
    fn extension(&self, number: &str) -> Option<ExtensionRecord>;
    fn did(&self, number: &str) -> Option<DidRecord>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumberClass {
    Extension(ExtensionRecord),
    Did(DidRecord),
    External,
}

impl NumberClass {
    /// Type code pushed as `CALLER_TYPE` / `CALLEE_TYPE`.
    pub fn type_code(&self) -> &'static str {
        let ext = match self {
            NumberClass::Extension(ext) => ext,
            NumberClass::Did(_) | NumberClass::External => return "0",
        };
        let is = |flag: &Option<String>, value: &str| flag.as_deref() == Some(value);
        let set_and_not_zero = |flag: &Option<String>| matches!(flag.as_deref(), Some(v) if v != "0");

        if is(&ext.is_agent, "0") && set_and_not_zero(&ext.is_logged) && set_and_not_zero(&ext.user_id) {
            "2"
        } else if is(&ext.is_agent, "1") {
            "1"
        } else if ext
            .before_call_ivr_args
            .as_deref()
            .map_or(false, |args| args.chars().count() > 7)
        {
            "4"
        } else {
            "3"
        }
    }
}

pub fn classify(directory: &dyn NumberDirectory, number: &str) -> NumberClass {
    if let Some(ext) = directory.extension(number) {
        NumberClass::Extension(ext)
    } else if let Some(did) = directory.did(number) {
        NumberClass::Did(did)
    } else {
        NumberClass::External
    }
}

/// `CALLER_TYPE` / `CALLEE_TYPE` for a caller/callee number pair.
pub fn caller_callee_types(
    directory: &dyn NumberDirectory,
    caller_num: &str,
    callee_num: &str,
) -> HashMap<String, String> {
    HashMap::from([
        (
            "CALLER_TYPE".to_string(),
            classify(directory, caller_num).type_code().to_string(),
        ),
        (
            "CALLEE_TYPE".to_string(),
            classify(directory, callee_num).type_code().to_string(),
        ),
    ])
}

/// Directory loaded once from a JSON document:
/// `{"extensions": {"1001": {...}}, "dids": {"0155...": {...}}}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StaticDirectory {
    extensions: HashMap<String, ExtensionRecord>,
    dids: HashMap<String, DidRecord>,
}

impl StaticDirectory {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Invalid number directory document")
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read number directory {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.extensions.len() + self.dids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NumberDirectory for StaticDirectory {
    fn extension(&self, number: &str) -> Option<ExtensionRecord> {
        self.extensions.get(number).cloned()
    }

    fn did(&self, number: &str) -> Option<DidRecord> {
        self.dids.get(number).cloned()
    }
}
