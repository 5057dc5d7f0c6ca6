use proptest::prelude::*;

use hystore::Document;
use hystore::search::{RrfConfig, fuse};

fn ranked(ids: &[u8]) -> Vec<Document> {
    ids.iter()
        .map(|id| Document {
            id: format!("doc-{id}"),
            ..Document::default()
        })
        .collect()
}

fn unique(ids: Vec<u8>) -> Vec<u8> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

proptest! {
    #[test]
    fn test_fusion_is_deterministic(
        a in proptest::collection::vec(0u8..40, 0..20),
        b in proptest::collection::vec(0u8..40, 0..20),
        top_k in 0usize..30,
    ) {
        let (a, b) = (ranked(&unique(a)), ranked(&unique(b)));
        let config = RrfConfig::default();
        prop_assert_eq!(fuse(&a, &b, top_k, &config), fuse(&a, &b, top_k, &config));
    }

    #[test]
    fn test_fused_output_is_sorted_and_bounded(
        a in proptest::collection::vec(0u8..40, 0..20),
        b in proptest::collection::vec(0u8..40, 0..20),
        top_k in 0usize..30,
    ) {
        let (a, b) = (ranked(&unique(a)), ranked(&unique(b)));
        let fused = fuse(&a, &b, top_k, &RrfConfig::default());

        let mut distinct: Vec<&str> = a.iter().chain(&b).map(|d| d.id.as_str()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(fused.len(), top_k.min(distinct.len()));

        for pair in fused.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            prop_assert!(
                first.score > second.score
                    || (first.score == second.score && first.id < second.id)
            );
        }
    }

    #[test]
    fn test_document_in_both_lists_outranks_its_single_list_rank(
        a in proptest::collection::vec(0u8..40, 1..20),
    ) {
        let a = ranked(&unique(a));
        let fused = fuse(&a, &a[..1], 1, &RrfConfig::default());
        prop_assert_eq!(&fused[0].id, &a[0].id);
    }
}
