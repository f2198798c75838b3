use std::fmt::{Display, Formatter};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tickvault_core::EnvelopeMeta;
use uuid::Uuid;

/// Request identifier (UUID v4) for end-to-end request tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Per-request bookkeeping turned into envelope metadata once the command
/// has produced its result.
#[derive(Debug)]
pub struct Metadata {
    request_id: RequestId,
    started: Instant,
    warnings: Vec<String>,
}

impl Metadata {
    pub fn start() -> Self {
        Self {
            request_id: RequestId::new_v4(),
            started: Instant::now(),
            warnings: Vec::new(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn into_envelope_meta(self, count: usize) -> EnvelopeMeta {
        let latency_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut meta = EnvelopeMeta::new(self.request_id.to_string(), count, latency_ms);
        for warning in self.warnings {
            meta.push_warning(warning);
        }
        meta
    }
}
