use proptest::prelude::*;
use serde_json::{Value, json};

use hystore::Filter;
use hystore::filter::{SqlParam, compile};
use hystore::search::{LEXICAL_SCORE_SHIFT, transform_score};

fn meta_field() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,10}".prop_map(|key| format!("meta.{key}"))
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        ".*".prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn test_shifted_lexical_scores_are_non_negative(raw in -1.0e6f64..=0.0) {
        prop_assert!(transform_score(Some(raw)) >= LEXICAL_SCORE_SHIFT);
    }

    #[test]
    fn test_better_raw_scores_stay_ahead(a in -50.0f64..=0.0, b in -50.0f64..=0.0) {
        prop_assume!(a < b);
        prop_assert!(transform_score(Some(a)) >= transform_score(Some(b)));
    }

    #[test]
    fn test_values_never_reach_sql_text(field in meta_field(), value in ".{0,40}") {
        let compiled = compile(&Filter::eq(field.clone(), value.clone())).unwrap();
        let reference = compile(&Filter::eq(field, "x")).unwrap();
        prop_assert_eq!(compiled.predicate, reference.predicate);
        prop_assert_eq!(compiled.params, vec![SqlParam::Text(value)]);
    }

    #[test]
    fn test_placeholders_match_params(
        fields in proptest::collection::vec(meta_field(), 1..6),
        values in proptest::collection::vec(scalar(), 6),
    ) {
        let conditions: Vec<Filter> = fields
            .into_iter()
            .zip(values)
            .map(|(field, value)| Filter::eq(field, value))
            .collect();
        let expected = conditions.len();
        let compiled = compile(&Filter::and(conditions)).unwrap();
        prop_assert_eq!(compiled.params.len(), expected);
        for n in 1..=expected {
            let placeholder = format!("${n}");
            prop_assert!(compiled.predicate.contains(&placeholder));
        }
        let next = format!("${}", expected + 1);
        prop_assert!(!compiled.predicate.contains(&next));
    }

    #[test]
    fn test_unknown_top_level_fields_are_rejected(field in "[a-z]{1,12}") {
        prop_assume!(!["id", "content", "blob_mime_type"].contains(&field.as_str()));
        let parsed = Filter::from_json(&json!({"field": field, "operator": "==", "value": 1}))
            .unwrap();
        prop_assert!(compile(&parsed).is_err());
    }
}
