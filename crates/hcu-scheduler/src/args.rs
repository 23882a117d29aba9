//! Job payloads, the typed arguments handed to a worker.

use serde::{Deserialize, Serialize};

/// Arguments carried by a queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum JobArgs {
    #[default]
    None,
    /// Limit a sync pass to one provider; `None` means every provider.
    Sync { provider_id: Option<String> },
    /// Repeater payload: invoke `worker` with `args`, then come back after
    /// `repeat_secs`.
    Repeat {
        worker: String,
        args: Box<JobArgs>,
        repeat_secs: u64,
    },
    Custom(serde_json::Value),
}

impl JobArgs {
    pub fn sync(provider_id: Option<String>) -> Self {
        Self::Sync { provider_id }
    }

    /// Provider filter of a sync job. Anything else syncs every provider.
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Self::Sync { provider_id } => provider_id.as_deref(),
            _ => None,
        }
    }
}

/// A job ready for the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub worker: String,
    pub args: JobArgs,
}

impl Job {
    pub fn new(worker: impl Into<String>, args: JobArgs) -> Self {
        Self {
            worker: worker.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_payload_json() {
        let args = JobArgs::Repeat {
            worker: "worker.ResourceSync".into(),
            args: Box::new(JobArgs::sync(Some("p1".into()))),
            repeat_secs: 86400,
        };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["kind"], "repeat");
        assert_eq!(json["args"]["args"]["args"]["provider_id"], "p1");
        let back: JobArgs = serde_json::from_value(json).unwrap();
        assert_eq!(back, args);
    }

    #[test]
    fn test_provider_filter() {
        assert_eq!(JobArgs::sync(Some("p1".into())).provider_id(), Some("p1"));
        assert_eq!(JobArgs::sync(None).provider_id(), None);
        assert_eq!(JobArgs::Custom(serde_json::json!([1, 2])).provider_id(), None);
    }
}
