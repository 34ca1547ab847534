use crate::verification::domain::{MatchType, Severity};

/// Edit distance between two strings, counted in chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Normalized similarity in `[0, 100]`:
/// `round((max_len - distance) / max_len * 100)`, and 100 for two empty strings.
pub fn name_similarity(a: &str, b: &str) -> u8 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 100;
    }

    let distance = levenshtein(a, b);
    let ratio = (longest - distance) as f64 / longest as f64;
    (ratio * 100.0).round() as u8
}

pub fn match_type_for(confidence: u8) -> MatchType {
    if confidence > 90 {
        MatchType::Exact
    } else {
        MatchType::Fuzzy
    }
}

/// Sanctions severity ladder: high above 90, medium above 80, low otherwise.
pub fn watchlist_severity(confidence: u8) -> Severity {
    match confidence {
        c if c > 90 => Severity::High,
        c if c > 80 => Severity::Medium,
        _ => Severity::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_vectors() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        assert_eq!(levenshtein("john smith", "john smith"), 0);
    }

    #[test]
    fn similarity_vectors() {
        assert_eq!(name_similarity("john smith", "john smith"), 100);
        assert_eq!(name_similarity("jon smith", "john smith"), 90);
        assert_eq!(name_similarity("kitten", "sitting"), 57);
        assert_eq!(name_similarity("emanuel macron", "emmanuel macron"), 93);
        assert_eq!(name_similarity("", ""), 100);
        assert_eq!(name_similarity("abc", ""), 0);
    }

    #[test]
    fn exact_only_above_ninety() {
        assert_eq!(match_type_for(91), MatchType::Exact);
        assert_eq!(match_type_for(90), MatchType::Fuzzy);
    }

    #[test]
    fn severity_ladder() {
        assert_eq!(watchlist_severity(95), Severity::High);
        assert_eq!(watchlist_severity(85), Severity::Medium);
        assert_eq!(watchlist_severity(80), Severity::Low);
    }
}
