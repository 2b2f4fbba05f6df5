use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Candidate,
    Job,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Candidate => "candidate",
            EntityKind::Job => "job",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(EntityKind::Candidate),
            "job" => Ok(EntityKind::Job),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Cache identity: one record per (entity_id, entity_kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub entity_id: i64,
    pub kind: EntityKind,
}

impl CacheKey {
    pub fn new(entity_id: i64, kind: EntityKind) -> Self {
        Self { entity_id, kind }
    }
}

/// Rendered as `candidate:42`; used as the checkpoint map key.
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.entity_id)
    }
}

impl FromStr for CacheKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed cache key: {s}"))?;
        let entity_id = id
            .parse::<i64>()
            .map_err(|err| format!("malformed entity id in {s}: {err}"))?;
        Ok(Self {
            entity_id,
            kind: kind.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub entity_id: i64,
    pub entity_kind: EntityKind,
    pub vector: Vec<f32>,
    /// SHA-256 of the normalized skill set the vector was computed from
    pub content_fingerprint: String,
    pub provider: String,
    pub provider_version: String,
    pub computed_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.entity_id, self.entity_kind)
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn is_fresh_for(&self, fingerprint: &str) -> bool {
        self.content_fingerprint == fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_round_trips_through_display() {
        let key = CacheKey::new(42, EntityKind::Candidate);
        assert_eq!(key.to_string(), "candidate:42");
        assert_eq!("candidate:42".parse::<CacheKey>(), Ok(key));
        assert_eq!("job:-7".parse::<CacheKey>(), Ok(CacheKey::new(-7, EntityKind::Job)));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("candidate".parse::<CacheKey>().is_err());
        assert!("robot:1".parse::<CacheKey>().is_err());
        assert!("job:abc".parse::<CacheKey>().is_err());
    }

    #[test]
    fn entity_kind_serializes_lowercase() {
        let json = serde_json::to_string(&EntityKind::Job).expect("serialize");
        assert_eq!(json, "\"job\"");
    }
}
