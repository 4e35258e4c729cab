use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// One execution of a pipeline step: identity, project and the configuration
/// it was started with. Passed explicitly to everything that logs artifacts.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub id: Uuid,
    pub project: String,
    pub job_type: String,
    pub started_at: DateTime<Utc>,
    config: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Finished,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunContext {
    pub fn new(project: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project: project.into(),
            job_type: job_type.into(),
            started_at: Utc::now(),
            config: Map::new(),
        }
    }

    /// Merges the serialized fields of `values` into the run config. Non-object
    /// values are stored under the `value` key.
    pub fn update_config<T: Serialize>(&mut self, values: &T) -> serde_json::Result<()> {
        match serde_json::to_value(values)? {
            Value::Object(map) => self.config.extend(map),
            other => {
                self.config.insert("value".to_string(), other);
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_config_merges_fields() {
        let mut run = RunContext::new("default", "basic_cleaning");
        run.update_config(&json!({"min_price": 10.0, "max_price": 350.0})).unwrap();
        run.update_config(&json!({"max_price": 400.0})).unwrap();

        assert_eq!(run.config()["min_price"], json!(10.0));
        assert_eq!(run.config()["max_price"], json!(400.0));
    }

    #[test]
    fn runs_get_distinct_ids() {
        let a = RunContext::new("p", "j");
        let b = RunContext::new("p", "j");
        assert_ne!(a.id, b.id);
    }
}
