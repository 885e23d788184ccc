//! Term-overlap keyword scoring

use ahash::AHashSet;

/// Split text into lowercase alphanumeric terms
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Distinct terms of a text
pub fn term_set(text: &str) -> AHashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Fraction of query terms present in the document's term set
///
/// Repeated query terms count once per occurrence, so the score is
/// `matching occurrences / query term count`, in `[0, 1]`.
pub fn keyword_score(query_terms: &[String], document_terms: &AHashSet<String>) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }

    let matched = query_terms
        .iter()
        .filter(|term| document_terms.contains(term.as_str()))
        .count();

    matched as f32 / query_terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_splits_punctuation() {
        assert_eq!(
            tokenize("Azure-Functions: deploy, v2!"),
            vec!["azure", "functions", "deploy", "v2"]
        );
        assert!(tokenize("  ... ").is_empty());
    }

    #[test]
    fn test_tokenize_unicode_letters() {
        assert_eq!(tokenize("Crème brûlée"), vec!["crème", "brûlée"]);
    }

    #[test]
    fn test_full_and_partial_overlap() {
        let doc = term_set("Azure Functions deployment guide");

        assert_eq!(keyword_score(&tokenize("azure functions"), &doc), 1.0);
        assert_eq!(keyword_score(&tokenize("azure bread"), &doc), 0.5);
        assert_eq!(keyword_score(&tokenize("bread"), &doc), 0.0);
    }

    #[test]
    fn test_repeated_query_terms_counted_per_occurrence() {
        let doc = term_set("azure");
        assert!((keyword_score(&tokenize("azure azure bread"), &doc) - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_within_unit_interval() {
        let doc = term_set("one two three");
        for query in ["one", "one two three four", "four five", "one one one"] {
            let score = keyword_score(&tokenize(query), &doc);
            assert!((0.0..=1.0).contains(&score), "{} -> {}", query, score);
        }
    }

    #[test]
    fn test_empty_query_scores_zero() {
        assert_eq!(keyword_score(&[], &term_set("anything")), 0.0);
    }
}
