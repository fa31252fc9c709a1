//! Destination table lookup by composite key.
//!
//! Keys are `#`-separated. The first segment of `pk` and the first segment of
//! `sk` select the table; a few tables further dispatch on the last `sk`
//! segment (the suffix) or the second one (the sub-type).

/// Classify a record into its destination table, or `None` to omit it.
pub fn classify(pk: &str, sk: &str) -> Option<String> {
    let pk_prefix = pk.split('#').next().unwrap_or_default();
    let sk_parts: Vec<&str> = sk.split('#').collect();
    let sk_prefix = sk_parts.first().copied().unwrap_or_default();
    let sk_suffix = sk_parts.last().copied().unwrap_or_default();
    let sk_type = sk_parts.get(1).copied();

    let table = match (pk_prefix, sk_prefix) {
        ("patient", "appointment") => "appointments",
        ("patient", "assessment") => {
            return match (sk_suffix, sk_type) {
                ("result", Some(sub_type)) => Some(format!("assessment_{sub_type}_results")),
                // definitions, in-flight assessments and anything else are omitted
                _ => None,
            };
        }
        ("patient", "journey") => "journeys",
        ("userProfile", "patientGoalsDef") => "patientgoalsdefs",
        ("userProfile", "patient") => "patients",
        ("userProfile", "userProfile") => "userprofiles",
        ("ruleCollection", "ruleCollection") if sk_suffix == "state" => "rulecollection_state",
        _ => return None,
    };

    Some(table.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assessment_results_are_parameterized_by_sub_type() {
        assert_eq!(
            classify("patient#123", "assessment#qol#result").as_deref(),
            Some("assessment_qol_results")
        );
    }

    #[test]
    fn test_assessment_definitions_and_in_flight_are_omitted() {
        assert_eq!(classify("patient#123", "assessment#qol#definition"), None);
        assert_eq!(classify("patient#123", "assessment#qol#inFlight"), None);
        assert_eq!(classify("patient#123", "assessment#qol#draft"), None);
        assert_eq!(classify("patient#123", "assessment"), None);
    }

    #[test]
    fn test_static_tables() {
        let cases = [
            ("patient#1", "appointment#2021", "appointments"),
            ("patient#1", "journey#x", "journeys"),
            ("userProfile#1", "patientGoalsDef#g", "patientgoalsdefs"),
            ("userProfile#1", "patient#1", "patients"),
            ("userProfile#1", "userProfile#1", "userprofiles"),
        ];
        for (pk, sk, table) in cases {
            assert_eq!(classify(pk, sk).as_deref(), Some(table), "{pk} / {sk}");
        }
    }

    #[test]
    fn test_rule_collection_state() {
        assert_eq!(
            classify("ruleCollection#x", "ruleCollection#x#state").as_deref(),
            Some("rulecollection_state")
        );
        assert_eq!(classify("ruleCollection#x", "ruleCollection#x#rules"), None);
    }

    #[test]
    fn test_unrecognized_prefixes_are_omitted() {
        assert_eq!(classify("device#1", "patient#1"), None);
        assert_eq!(classify("", ""), None);
    }
}
