//! Similarity ranking for autocompletion.
//!
//! Candidates are ordered by how well their key fits the partially typed
//! query: exact match, then prefix, then substring, then edit distance.
//! Equal scores keep their input order.

/// Sorts `candidates` by descending similarity of `key(candidate)` to `query`.
///
/// Comparison is case-insensitive. An empty query leaves the order as is.
pub fn rank<T, F>(query: &str, mut candidates: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return candidates;
    }
    // sort_by_cached_key is stable, which keeps ties in input order.
    candidates.sort_by_cached_key(|candidate| score(&query, &key(candidate).to_lowercase()));
    candidates
}

fn score(query: &str, key: &str) -> (u8, usize) {
    let tier = if key == query {
        0
    } else if key.starts_with(query) {
        1
    } else if key.contains(query) {
        2
    } else {
        3
    };
    (tier, damerau_levenshtein(query, key))
}

/// Edit distance where swapping two adjacent characters counts as one edit.
fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut matrix = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in matrix[0].iter_mut().enumerate() {
        *cell = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(matrix[i - 2][j - 2] + 1);
            }
            matrix[i][j] = best;
        }
    }
    matrix[a.len()][b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_counts_transposition_once() {
        assert_eq!(damerau_levenshtein("gm", "gm"), 0);
        assert_eq!(damerau_levenshtein("gm", "mg"), 1);
        assert_eq!(damerau_levenshtein("hello", "helo"), 1);
        assert_eq!(damerau_levenshtein("", "abc"), 3);
    }

    #[test]
    fn exact_then_prefix_then_substring() {
        let ranked = rank(
            "gm",
            vec!["ogm", "gn", "gm!", "gm", "bonjour"],
            |k| *k,
        );
        assert_eq!(ranked, vec!["gm", "gm!", "ogm", "gn", "bonjour"]);
    }

    #[test]
    fn ranking_ignores_case() {
        let ranked = rank("HEL", vec!["bye", "hello"], |k| *k);
        assert_eq!(ranked, vec!["hello", "bye"]);
    }

    #[test]
    fn empty_query_keeps_order() {
        let ranked = rank("  ", vec![(3, "c"), (1, "a")], |(_, k)| *k);
        assert_eq!(ranked, vec![(3, "c"), (1, "a")]);
    }

    #[test]
    fn ties_keep_input_order() {
        let ranked = rank("zz", vec![(1, "ab"), (2, "cd")], |(_, k)| *k);
        assert_eq!(ranked, vec![(1, "ab"), (2, "cd")]);
    }
}
