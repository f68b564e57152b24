// Fuzzy string matching on a 0-100 scale.
//
// Used both for loose column-name matching and for matching free-text
// organization names against reference tables.
use strsim::normalized_levenshtein;

/// Scoring function comparing two strings, 0 (no similarity) to 100.
pub type Scorer = fn(&str, &str) -> f64;

/// Lowercase, replace everything that is not alphanumeric with spaces and
/// collapse whitespace.
pub fn full_process(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plain similarity of two already processed strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b) * 100.0
}

/// Similarity with tokens sorted, so word order does not matter.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let processed = full_process(s);
    let mut tokens: Vec<&str> = processed.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Best scoring choice for `query`. Ties keep the earliest choice. Returns
/// `None` for a blank query or an empty choice list.
pub fn extract_one<'a, I>(query: &str, choices: I, scorer: Scorer) -> Option<(&'a str, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    if full_process(query).is_empty() {
        return None;
    }
    let mut best: Option<(&'a str, f64)> = None;
    for choice in choices {
        let score = scorer(query, choice);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((choice, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processes_strings() {
        assert_eq!(full_process("  Summa. "), "summa");
        assert_eq!(full_process("Kunnan_nimi"), "kunnan nimi");
        assert_eq!(full_process("Kokko.summa"), "kokko summa");
    }

    #[test]
    fn token_sort_ignores_order_and_punctuation() {
        assert_eq!(token_sort_ratio("nimi Kunnan", "kunnan nimi"), 100.0);
        assert_eq!(token_sort_ratio("Summa.", "summa"), 100.0);
        assert!(token_sort_ratio("Turku", "Espoo") < 50.0);
    }

    #[test]
    fn extracts_best_choice() {
        let choices = ["Espoo", "Turku", "Tampere"];
        let (best, score) =
            extract_one("Turkuu", choices.iter().copied(), token_sort_ratio).unwrap();
        assert_eq!(best, "Turku");
        assert!(score > 80.0);
        assert!(extract_one("  ", choices.iter().copied(), token_sort_ratio).is_none());
        assert!(extract_one("x", std::iter::empty(), token_sort_ratio).is_none());
    }
}
