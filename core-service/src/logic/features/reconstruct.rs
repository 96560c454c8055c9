//! Feature Reconstruction - flow record -> partial feature vector
//!
//! Group A: computed from conn.log counters with guarded arithmetic.
//! Group C: left missing for the imputer.
//!
//! The mapping is a table (feature name -> extraction). Any schema entry
//! without a rule is Group C, so a grown schema degrades to "more imputed"
//! instead of failing.

use std::sync::Arc;

use super::layout::FeatureSchema;
use super::record::{
    FlowRecord, FIELD_DURATION, FIELD_ORIG_BYTES, FIELD_ORIG_PKTS, FIELD_ORIG_WINDOW,
    FIELD_RESP_BYTES, FIELD_RESP_PKTS, FIELD_RESP_PORT, FIELD_RESP_WINDOW,
};
use super::vector::PartialVector;

// ============================================================================
// GUARDED ARITHMETIC
// ============================================================================

/// Division that yields 0.0 whenever the denominator is not > 0
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Narrow to f32 without producing Inf/NaN
fn to_feature(value: f64) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(f32::MIN as f64, f32::MAX as f64) as f32
}

// ============================================================================
// COUNTERS
// ============================================================================

/// Counters read from one flow, zero when absent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowCounters {
    pub duration: f64,
    pub dst_port: f64,
    pub fwd_packets: f64,
    pub bwd_packets: f64,
    pub fwd_bytes: f64,
    pub bwd_bytes: f64,
    pub fwd_window: f64,
    pub bwd_window: f64,
}

impl FlowCounters {
    pub fn from_record(record: &FlowRecord) -> Self {
        Self {
            duration: record.float_field(FIELD_DURATION),
            dst_port: record.int_field(FIELD_RESP_PORT) as f64,
            fwd_packets: record.int_field(FIELD_ORIG_PKTS) as f64,
            bwd_packets: record.int_field(FIELD_RESP_PKTS) as f64,
            fwd_bytes: record.int_field(FIELD_ORIG_BYTES) as f64,
            bwd_bytes: record.int_field(FIELD_RESP_BYTES) as f64,
            fwd_window: record.float_field(FIELD_ORIG_WINDOW),
            bwd_window: record.float_field(FIELD_RESP_WINDOW),
        }
    }

    pub fn total_packets(&self) -> f64 {
        self.fwd_packets + self.bwd_packets
    }

    pub fn total_bytes(&self) -> f64 {
        self.fwd_bytes + self.bwd_bytes
    }
}

// ============================================================================
// GROUP A RULES
// ============================================================================

pub type Extractor = fn(&FlowCounters) -> f64;

/// One directly computable feature
pub struct GroupARule {
    pub feature: &'static str,
    pub extract: Extractor,
}

const fn direct(feature: &'static str, extract: Extractor) -> GroupARule {
    GroupARule { feature, extract }
}

pub const GROUP_A_RULES: &[GroupARule] = &[
    direct("destinationport", |c| c.dst_port),
    direct("flowduration", |c| c.duration),
    direct("totalfwdpackets", |c| c.fwd_packets),
    direct("totalbackwardpackets", |c| c.bwd_packets),
    direct("totallengthoffwdpackets", |c| c.fwd_bytes),
    direct("totallengthofbwdpackets", |c| c.bwd_bytes),
    direct("flowbytess", |c| c.total_bytes()),
    direct("flowpacketss", |c| c.total_packets()),
    direct("averagepacketsize", |c| safe_div(c.total_bytes(), c.total_packets())),
    direct("avgfwdsegmentsize", |c| safe_div(c.fwd_bytes, c.fwd_packets)),
    direct("avgbwdsegmentsize", |c| safe_div(c.bwd_bytes, c.bwd_packets)),
    direct("downupratio", |c| safe_div(c.bwd_bytes, c.fwd_bytes)),
    direct("subflowfwdpackets", |c| c.fwd_packets),
    direct("subflowfwdbytes", |c| c.fwd_bytes),
    direct("subflowbwdpackets", |c| c.bwd_packets),
    direct("subflowbwdbytes", |c| c.bwd_bytes),
    direct("initwinbytesforward", |c| c.fwd_window),
    direct("initwinbytesbackward", |c| c.bwd_window),
];

/// Features that need learned imputation
pub const GROUP_C_FEATURES: &[&str] = &[
    "fwdpacketlengthmax", "fwdpacketlengthmin", "fwdpacketlengthmean", "fwdpacketlengthstd",
    "bwdpacketlengthmax", "bwdpacketlengthmin", "bwdpacketlengthmean", "bwdpacketlengthstd",
    "flowiatmean", "flowiatstd", "flowiatmax", "flowiatmin",
    "fwdiattotal", "fwdiatmean", "fwdiatstd", "fwdiatmax", "fwdiatmin",
    "bwdiattotal", "bwdiatmean", "bwdiatstd", "bwdiatmax", "bwdiatmin",
    "fwdpshflags", "bwdpshflags", "fwdurgflags", "bwdurgflags",
    "fwdheaderlength", "bwdheaderlength", "fwdpacketss", "bwdpacketss",
    "minpacketlength", "maxpacketlength", "packetlengthmean", "packetlengthstd", "packetlengthvariance",
    "finflagcount", "synflagcount", "rstflagcount", "pshflagcount",
    "ackflagcount", "urgflagcount", "cweflagcount", "eceflagcount",
    "fwdavgbytesbulk", "fwdavgpacketsbulk", "fwdavgbulkrate",
    "bwdavgbytesbulk", "bwdavgpacketsbulk", "bwdavgbulkrate",
    "actdatapktfwd", "minsegsizemin",
    "activemean", "activestd", "activemax", "activemin",
    "idlemean", "idlestd", "idlemax", "idlemin",
    "l7protocol",
];

/// Rule for a feature name, if it is Group A
pub fn group_a_rule(feature: &str) -> Option<&'static GroupARule> {
    GROUP_A_RULES.iter().find(|r| r.feature == feature)
}

// ============================================================================
// RECONSTRUCTOR
// ============================================================================

/// Maps a flow record onto a schema
///
/// The per-index plan is resolved once when the schema is loaded.
pub struct FeatureReconstructor {
    schema: Arc<FeatureSchema>,
    plan: Vec<Option<Extractor>>,
}

impl FeatureReconstructor {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        let plan: Vec<Option<Extractor>> = schema
            .names()
            .iter()
            .map(|name| group_a_rule(name).map(|rule| rule.extract))
            .collect();

        let computed = plan.iter().filter(|p| p.is_some()).count();
        let unknown = schema
            .names()
            .iter()
            .filter(|n| group_a_rule(n).is_none() && !GROUP_C_FEATURES.contains(&n.as_str()))
            .count();
        log::info!(
            "Feature plan: {} computed, {} imputed ({} not in the known lists)",
            computed,
            schema.len() - computed,
            unknown
        );

        Self { schema, plan }
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// Indices filled by Group A rules
    pub fn computed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.plan
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|_| i))
    }

    /// Build the schema-ordered vector for one flow
    pub fn reconstruct(&self, record: &FlowRecord) -> PartialVector {
        let counters = FlowCounters::from_record(record);
        self.reconstruct_counters(&counters)
    }

    pub fn reconstruct_counters(&self, counters: &FlowCounters) -> PartialVector {
        let values = self
            .plan
            .iter()
            .map(|rule| rule.map(|extract| to_feature(extract(counters))))
            .collect();
        PartialVector::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_div_guards() {
        assert_eq!(safe_div(10.0, 0.0), 0.0);
        assert_eq!(safe_div(10.0, -3.0), 0.0);
        assert_eq!(safe_div(10.0, f64::NAN), 0.0);
        assert_eq!(safe_div(10.0, 4.0), 2.5);
    }

    #[test]
    fn test_group_lists_are_disjoint() {
        for rule in GROUP_A_RULES {
            assert!(!GROUP_C_FEATURES.contains(&rule.feature), "{}", rule.feature);
        }
        assert_eq!(GROUP_A_RULES.len(), 18);
        assert_eq!(GROUP_C_FEATURES.len(), 60);
    }

    #[test]
    fn test_lists_cover_reference_layout() {
        for name in super::super::layout::REFERENCE_LAYOUT {
            assert!(
                group_a_rule(name).is_some() || GROUP_C_FEATURES.contains(name),
                "{} is in neither group",
                name
            );
        }
    }

    #[test]
    fn test_to_feature_saturates() {
        assert_eq!(to_feature(1e300), f32::MAX);
        assert_eq!(to_feature(-1e300), f32::MIN);
        assert_eq!(to_feature(f64::NAN), 0.0);
    }
}
