//! Feature Layout - Feature Schema Definition
//!
//! **CRITICAL: this file controls the feature order the models expect**
//!
//! ## Rules (NEVER break these):
//! 1. Index `i` of every vector is the feature at `schema[i]`
//! 2. The schema is replaced wholesale at deployment, never edited in place
//! 3. A vector whose length differs from the schema is rejected, never padded
//!
//! The deployed schema comes from the model metadata (`expected_features.json`).
//! `REFERENCE_LAYOUT` is the layout the reference models were trained with and
//! is used when no schema file is configured.

use std::collections::HashSet;
use std::path::Path;

use crc32fast::Hasher;
use thiserror::Error;

// ============================================================================
// REFERENCE LAYOUT
// ============================================================================

/// Feature names in the exact order the binary/attack classifiers expect
pub const REFERENCE_LAYOUT: &[&str] = &[
    // === Ports & volumes (0-5) ===
    "destinationport",
    "flowduration",
    "totalfwdpackets",
    "totalbackwardpackets",
    "totallengthoffwdpackets",
    "totallengthofbwdpackets",
    // === Packet length stats (6-13) ===
    "fwdpacketlengthmax",
    "fwdpacketlengthmin",
    "fwdpacketlengthmean",
    "fwdpacketlengthstd",
    "bwdpacketlengthmax",
    "bwdpacketlengthmin",
    "bwdpacketlengthmean",
    "bwdpacketlengthstd",
    // === Rates (14-15) ===
    "flowbytess",
    "flowpacketss",
    // === Inter-arrival times (16-29) ===
    "flowiatmean",
    "flowiatstd",
    "flowiatmax",
    "flowiatmin",
    "fwdiattotal",
    "fwdiatmean",
    "fwdiatstd",
    "fwdiatmax",
    "fwdiatmin",
    "bwdiattotal",
    "bwdiatmean",
    "bwdiatstd",
    "bwdiatmax",
    "bwdiatmin",
    // === Flags & headers (30-37) ===
    "fwdpshflags",
    "bwdpshflags",
    "fwdurgflags",
    "bwdurgflags",
    "fwdheaderlength",
    "bwdheaderlength",
    "fwdpacketss",
    "bwdpacketss",
    // === Packet length distribution (38-42) ===
    "minpacketlength",
    "maxpacketlength",
    "packetlengthmean",
    "packetlengthstd",
    "packetlengthvariance",
    // === Flag counts (43-50) ===
    "finflagcount",
    "synflagcount",
    "rstflagcount",
    "pshflagcount",
    "ackflagcount",
    "urgflagcount",
    "cweflagcount",
    "eceflagcount",
    // === Ratios & segment sizes (51-54) ===
    "downupratio",
    "averagepacketsize",
    "avgfwdsegmentsize",
    "avgbwdsegmentsize",
    // === Bulk (55-60) ===
    "fwdavgbytesbulk",
    "fwdavgpacketsbulk",
    "fwdavgbulkrate",
    "bwdavgbytesbulk",
    "bwdavgpacketsbulk",
    "bwdavgbulkrate",
    // === Subflows (61-64) ===
    "subflowfwdpackets",
    "subflowfwdbytes",
    "subflowbwdpackets",
    "subflowbwdbytes",
    // === Windows & segments (65-68) ===
    "initwinbytesforward",
    "initwinbytesbackward",
    "actdatapktfwd",
    "minsegsizemin",
    // === Active / idle (69-76) ===
    "activemean",
    "activestd",
    "activemax",
    "activemin",
    "idlemean",
    "idlestd",
    "idlemax",
    "idlemin",
];

/// Total number of reference features
/// IMPORTANT: Must match REFERENCE_LAYOUT.len()!
pub const REFERENCE_FEATURE_COUNT: usize = 77;

/// Feature appended for the application classifier (77 -> 78)
pub const PROTOCOL_FEATURE: &str = "l7protocol";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read feature schema {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("feature schema {path} is not a JSON array of strings: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("feature schema is empty")]
    Empty,

    #[error("duplicate feature name in schema: {0}")]
    Duplicate(String),

    #[error("feature vector has {actual} entries, schema expects {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

// ============================================================================
// FEATURE SCHEMA
// ============================================================================

/// Ordered set of unique feature names
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    names: Vec<String>,
    hash: u32,
}

impl FeatureSchema {
    /// Build a schema from ordered names
    pub fn from_names(names: Vec<String>) -> Result<Self, SchemaError> {
        if names.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(SchemaError::Duplicate(name.clone()));
            }
        }

        let hash = compute_layout_hash(&names);
        Ok(Self { names, hash })
    }

    /// The built-in 77 feature layout
    pub fn reference() -> Self {
        let names = REFERENCE_LAYOUT.iter().map(|s| s.to_string()).collect();
        Self::from_names(names).unwrap_or_else(|_| unreachable!("reference layout is unique"))
    }

    /// Load from a JSON array of names
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let names: Vec<String> =
            serde_json::from_str(&content).map_err(|source| SchemaError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        Self::from_names(names)
    }

    /// Derive a new schema with one more feature at the end
    pub fn with_appended(&self, name: &str) -> Result<Self, SchemaError> {
        let mut names = self.names.clone();
        names.push(name.to_string());
        Self::from_names(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Get feature index by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Get feature name by index
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// CRC32 over the ordered names
    pub fn layout_hash(&self) -> u32 {
        self.hash
    }

    /// Reject any length other than the schema's
    pub fn check_len(&self, actual: usize) -> Result<(), SchemaError> {
        if actual != self.names.len() {
            return Err(SchemaError::LengthMismatch {
                expected: self.names.len(),
                actual,
            });
        }
        Ok(())
    }
}

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// Compute CRC32 hash of an ordered feature list
pub fn compute_layout_hash(names: &[String]) -> u32 {
    let mut hasher = Hasher::new();

    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]); // Separator
    }

    hasher.finalize()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_count() {
        assert_eq!(REFERENCE_LAYOUT.len(), REFERENCE_FEATURE_COUNT);
        assert_eq!(FeatureSchema::reference().len(), 77);
    }

    #[test]
    fn test_protocol_feature_not_in_reference() {
        assert!(!REFERENCE_LAYOUT.contains(&PROTOCOL_FEATURE));
    }

    #[test]
    fn test_layout_hash_consistency() {
        let a = FeatureSchema::reference();
        let b = FeatureSchema::reference();
        assert_eq!(a.layout_hash(), b.layout_hash());
        assert_ne!(a.layout_hash(), 0);
    }

    #[test]
    fn test_layout_hash_depends_on_order() {
        let ab = FeatureSchema::from_names(vec!["a".into(), "b".into()]).unwrap();
        let ba = FeatureSchema::from_names(vec!["b".into(), "a".into()]).unwrap();
        assert_ne!(ab.layout_hash(), ba.layout_hash());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = FeatureSchema::from_names(vec!["a".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, SchemaError::Duplicate(name) if name == "a"));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(FeatureSchema::from_names(vec![]), Err(SchemaError::Empty)));
    }

    #[test]
    fn test_with_appended() {
        let base = FeatureSchema::reference();
        let app = base.with_appended(PROTOCOL_FEATURE).unwrap();
        assert_eq!(app.len(), 78);
        assert_eq!(app.name(77), Some(PROTOCOL_FEATURE));
        assert_eq!(&app.names()[..77], base.names());
        assert!(app.with_appended(PROTOCOL_FEATURE).is_err());
    }

    #[test]
    fn test_index_lookup() {
        let schema = FeatureSchema::reference();
        assert_eq!(schema.index_of("destinationport"), Some(0));
        assert_eq!(schema.index_of("idlemin"), Some(76));
        assert_eq!(schema.index_of("nonexistent"), None);
        assert_eq!(schema.name(100), None);
    }

    #[test]
    fn test_check_len() {
        let schema = FeatureSchema::reference();
        assert!(schema.check_len(77).is_ok());
        assert!(matches!(
            schema.check_len(78),
            Err(SchemaError::LengthMismatch { expected: 77, actual: 78 })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expected_features.json");
        std::fs::write(&path, r#"["flowduration", "destinationport", "extra"]"#).unwrap();

        let schema = FeatureSchema::load(&path).unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.name(0), Some("flowduration"));

        std::fs::write(&path, r#"{"not": "an array"}"#).unwrap();
        assert!(matches!(FeatureSchema::load(&path), Err(SchemaError::Parse { .. })));
    }
}
