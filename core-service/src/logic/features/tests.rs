//! Integration Tests for Feature Reconstruction
//!
//! Schema order, Group A arithmetic and Group C sentinels working together.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use crate::logic::features::{
        layout::FeatureSchema,
        reconstruct::{FeatureReconstructor, FlowCounters, GROUP_A_RULES, GROUP_C_FEATURES},
        record::FlowRecord,
    };

    fn reference() -> FeatureReconstructor {
        FeatureReconstructor::new(Arc::new(FeatureSchema::reference()))
    }

    fn value(rec: &FeatureReconstructor, v: &crate::logic::features::PartialVector, name: &str) -> Option<f32> {
        let index = rec.schema().index_of(name).unwrap();
        v.get(index).unwrap()
    }

    /// Zero counters: every ratio is exactly 0.0, every Group C entry is missing
    #[test]
    fn test_zero_flow_scenario() {
        let rec = reference();
        let flow = FlowRecord::parse(r#"{"duration":0,"orig_pkts":0,"resp_pkts":0}"#).unwrap();
        let v = rec.reconstruct(&flow);

        assert_eq!(v.len(), 77);
        for name in ["averagepacketsize", "avgfwdsegmentsize", "avgbwdsegmentsize", "downupratio"] {
            assert_eq!(value(&rec, &v, name), Some(0.0), "{}", name);
        }
        for name in GROUP_C_FEATURES.iter().filter(|n| **n != "l7protocol") {
            assert_eq!(value(&rec, &v, name), None, "{} should be missing", name);
        }
        assert_eq!(v.missing_count(), 59);
    }

    #[test]
    fn test_group_a_values() {
        let rec = reference();
        let flow = FlowRecord::parse(
            r#"{"id.resp_p":80,"duration":2.5,"orig_pkts":4,"resp_pkts":6,
                "orig_ip_bytes":400,"resp_ip_bytes":1200,"orig_window":64240,"resp_window":65535}"#,
        )
        .unwrap();
        let v = rec.reconstruct(&flow);

        assert_eq!(value(&rec, &v, "destinationport"), Some(80.0));
        assert_eq!(value(&rec, &v, "flowduration"), Some(2.5));
        assert_eq!(value(&rec, &v, "flowbytess"), Some(1600.0));
        assert_eq!(value(&rec, &v, "flowpacketss"), Some(10.0));
        assert_eq!(value(&rec, &v, "averagepacketsize"), Some(160.0));
        assert_eq!(value(&rec, &v, "avgfwdsegmentsize"), Some(100.0));
        assert_eq!(value(&rec, &v, "avgbwdsegmentsize"), Some(200.0));
        assert_eq!(value(&rec, &v, "downupratio"), Some(3.0));
        assert_eq!(value(&rec, &v, "subflowbwdbytes"), Some(1200.0));
        assert_eq!(value(&rec, &v, "initwinbytesforward"), Some(64240.0));
        assert_eq!(value(&rec, &v, "initwinbytesbackward"), Some(65535.0));
    }

    #[test]
    fn test_empty_record_matches_schema() {
        let rec = reference();
        let v = rec.reconstruct(&FlowRecord::default());
        assert_eq!(v.len(), rec.schema().len());
        assert_eq!(v.missing_count(), 77 - GROUP_A_RULES.len());
    }

    /// Schema order is followed even when shuffled or extended with unknown names
    #[test]
    fn test_custom_schema_order_and_unknowns() {
        let schema = FeatureSchema::from_names(vec![
            "brand_new_feature".into(),
            "downupratio".into(),
            "destinationport".into(),
        ])
        .unwrap();
        let rec = FeatureReconstructor::new(Arc::new(schema));
        let flow = FlowRecord::parse(r#"{"id.resp_p":53,"orig_ip_bytes":10,"resp_ip_bytes":30}"#).unwrap();

        let v = rec.reconstruct(&flow);
        assert_eq!(v.values(), &[None, Some(3.0), Some(53.0)]);
        assert_eq!(rec.computed_indices().collect::<Vec<_>>(), vec![1, 2]);
    }

    proptest! {
        /// A ratio whose denominator is <= 0 is exactly 0.0, and nothing is ever NaN/Inf
        #[test]
        fn ratios_are_guarded(
            fwd_packets in -5i64..5,
            bwd_packets in -5i64..5,
            fwd_bytes in -1_000i64..1_000_000,
            bwd_bytes in -1_000i64..1_000_000,
            duration in -10.0f64..1e6,
        ) {
            let counters = FlowCounters {
                duration,
                dst_port: 443.0,
                fwd_packets: fwd_packets as f64,
                bwd_packets: bwd_packets as f64,
                fwd_bytes: fwd_bytes as f64,
                bwd_bytes: bwd_bytes as f64,
                fwd_window: 0.0,
                bwd_window: 0.0,
            };
            let rec = reference();
            let v = rec.reconstruct_counters(&counters);

            for entry in v.values().iter().flatten() {
                prop_assert!(entry.is_finite());
            }

            let check = |name: &str, denominator: f64| -> Result<(), TestCaseError> {
                let got = value(&rec, &v, name).unwrap();
                if denominator <= 0.0 {
                    prop_assert_eq!(got, 0.0);
                }
                Ok(())
            };
            check("averagepacketsize", counters.total_packets())?;
            check("avgfwdsegmentsize", counters.fwd_packets)?;
            check("avgbwdsegmentsize", counters.bwd_packets)?;
            check("downupratio", counters.fwd_bytes)?;
        }

        /// Any JSON object, any schema size: the vector length is the schema length
        #[test]
        fn length_always_matches_schema(
            extra in proptest::collection::vec("[a-z]{3,12}", 0..20),
            pkts in proptest::option::of(0u32..10_000),
        ) {
            let mut names: Vec<String> = FeatureSchema::reference().names().to_vec();
            for name in extra {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            let schema = FeatureSchema::from_names(names).unwrap();
            let rec = FeatureReconstructor::new(Arc::new(schema.clone()));

            let line = match pkts {
                Some(p) => format!(r#"{{"orig_pkts":{}}}"#, p),
                None => "{}".to_string(),
            };
            let v = rec.reconstruct(&FlowRecord::parse(&line).unwrap());
            prop_assert_eq!(v.len(), schema.len());
        }
    }
}
