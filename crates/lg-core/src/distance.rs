//! Edit distance for near-whitelist (MED) detection

/// Classic Levenshtein distance over chars.
///
/// Full `(|a|+1) x (|b|+1)` table, unit costs for insert/delete/substitute.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let cols = b.len() + 1;

    let mut table = vec![0usize; (a.len() + 1) * cols];
    for i in 0..=a.len() {
        table[i * cols] = i;
    }
    for j in 0..=b.len() {
        table[j] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let delete = table[(i - 1) * cols + j] + 1;
            let insert = table[i * cols + j - 1] + 1;
            let substitute = table[(i - 1) * cols + j - 1] + cost;
            table[i * cols + j] = delete.min(insert).min(substitute);
        }
    }

    table[a.len() * cols + b.len()]
}

/// Edit distance divided by the longer length (floor 1), in `[0, 1]`.
pub fn normalized_distance(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count()).max(1);
    levenshtein(a, b) as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("example.com", "examp1e.com"), 1);
        assert_eq!(levenshtein("paypal.com", "paypa1.co"), 2);
    }

    #[test]
    fn test_normalized() {
        assert_eq!(normalized_distance("", ""), 0.0);
        assert_eq!(normalized_distance("same", "same"), 0.0);
        let d = normalized_distance("example.com", "examp1e.com");
        assert!((d - 1.0 / 11.0).abs() < 1e-9);
        assert_eq!(normalized_distance("ab", "cd"), 1.0);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        assert_eq!(levenshtein("пример", "пример"), 0);
        assert_eq!(levenshtein("пример", "приmер"), 1);
    }
}
