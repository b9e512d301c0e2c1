//! Linear merges over posting lists sorted by document key

/// Internal integer key of a document record
pub type DocKey = i64;

/// A matching document and its accumulated score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub doc: DocKey,
    pub score: f64,
}

impl ScoredDoc {
    pub fn new(doc: DocKey, score: f64) -> Self {
        Self { doc, score }
    }
}

/// Documents present in both lists; scores add up
pub fn intersect(a: &[ScoredDoc], b: &[ScoredDoc]) -> Vec<ScoredDoc> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        match a[i].doc.cmp(&b[j].doc) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(ScoredDoc::new(a[i].doc, a[i].score + b[j].score));
                i += 1;
                j += 1;
            }
        }
    }

    out
}

/// Documents present in either list; scores of shared documents add up
pub fn union(a: &[ScoredDoc], b: &[ScoredDoc]) -> Vec<ScoredDoc> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        match a[i].doc.cmp(&b[j].doc) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(ScoredDoc::new(a[i].doc, a[i].score + b[j].score));
                i += 1;
                j += 1;
            }
        }
    }

    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Documents of `a` absent from `b`, keeping their `a` score
pub fn difference(a: &[ScoredDoc], b: &[ScoredDoc]) -> Vec<ScoredDoc> {
    let mut out = Vec::with_capacity(a.len());
    let mut j = 0;

    for item in a {
        while j < b.len() && b[j].doc < item.doc {
            j += 1;
        }
        if j >= b.len() || b[j].doc != item.doc {
            out.push(*item);
        }
    }

    out
}

/// Count the starts at which every term sits at its relative offset
///
/// Each entry is a term's sorted positions in one field and the term's offset
/// inside the phrase.
pub fn phrase_occurrences(terms: &[(&[u32], u32)]) -> u32 {
    let Some(((first, first_offset), rest)) = terms.split_first() else {
        return 0;
    };

    let mut count = 0;
    for &position in first.iter() {
        let Some(start) = position.checked_sub(*first_offset) else {
            continue;
        };

        let aligned = rest.iter().all(|(positions, offset)| {
            start
                .checked_add(*offset)
                .is_some_and(|wanted| positions.binary_search(&wanted).is_ok())
        });
        if aligned {
            count += 1;
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn docs(keys: &[i64]) -> Vec<ScoredDoc> {
        keys.iter().map(|&k| ScoredDoc::new(k, 1.0)).collect()
    }

    fn keys(list: &[ScoredDoc]) -> Vec<i64> {
        list.iter().map(|d| d.doc).collect()
    }

    #[test]
    fn test_intersect_adds_scores() {
        let out = intersect(&docs(&[1, 2, 5]), &docs(&[2, 3, 5]));
        assert_eq!(keys(&out), vec![2, 5]);
        assert!(out.iter().all(|d| d.score == 2.0));
    }

    #[test]
    fn test_union() {
        let out = union(&docs(&[1, 4]), &docs(&[2, 4, 9]));
        assert_eq!(keys(&out), vec![1, 2, 4, 9]);
        assert_eq!(out[2].score, 2.0);
        assert_eq!(out[0].score, 1.0);
    }

    #[test]
    fn test_difference_keeps_left_score() {
        let left = vec![ScoredDoc::new(1, 0.5), ScoredDoc::new(2, 0.7), ScoredDoc::new(3, 0.9)];
        let out = difference(&left, &docs(&[2]));
        assert_eq!(out, vec![ScoredDoc::new(1, 0.5), ScoredDoc::new(3, 0.9)]);
    }

    #[test]
    fn test_empty_operands() {
        assert!(intersect(&docs(&[1]), &[]).is_empty());
        assert_eq!(keys(&union(&[], &docs(&[3]))), vec![3]);
        assert_eq!(keys(&difference(&docs(&[3]), &[])), vec![3]);
    }

    #[test]
    fn test_phrase_occurrences() {
        let quick: &[u32] = &[1, 7];
        let fox: &[u32] = &[2, 4, 9];
        assert_eq!(phrase_occurrences(&[(quick, 0), (fox, 1)]), 1);
        assert_eq!(phrase_occurrences(&[(quick, 0), (fox, 2)]), 1);
        assert_eq!(phrase_occurrences(&[(fox, 0), (quick, 1)]), 0);
        assert_eq!(phrase_occurrences(&[]), 0);
    }

    #[test]
    fn test_phrase_requires_every_term() {
        let a: &[u32] = &[0, 5];
        let b: &[u32] = &[1, 6];
        let c: &[u32] = &[7];
        assert_eq!(phrase_occurrences(&[(a, 0), (b, 1), (c, 2)]), 1);
    }

    fn doc_set() -> impl Strategy<Value = BTreeSet<i64>> {
        proptest::collection::btree_set(0i64..40, 0..20)
    }

    proptest! {
        #[test]
        fn merges_match_set_algebra(a in doc_set(), b in doc_set()) {
            let la = docs(&a.iter().copied().collect::<Vec<_>>());
            let lb = docs(&b.iter().copied().collect::<Vec<_>>());

            prop_assert_eq!(keys(&intersect(&la, &lb)), a.intersection(&b).copied().collect::<Vec<_>>());
            prop_assert_eq!(keys(&union(&la, &lb)), a.union(&b).copied().collect::<Vec<_>>());
            prop_assert_eq!(keys(&difference(&la, &lb)), a.difference(&b).copied().collect::<Vec<_>>());
        }
    }
}
