//! Selection parsing
//!
//! Turns free-form tokens ("1 3 5-7", "all") into 1-based indices against a
//! displayed list. Bad tokens never abort the selection: zero, out-of-bounds
//! and malformed tokens each produce a distinct error entry and parsing
//! moves on.

use std::collections::BTreeSet;

/// Parsed selection: deduplicated 1-based indices in first-seen order,
/// plus the distinct errors encountered along the way.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub indices: Vec<usize>,
    pub errors: BTreeSet<String>,
}

/// Parse selection tokens against a list of `list_len` displayed items.
///
/// Accepted forms: single indices ("5"), inclusive ranges ("2-6", reversed
/// ranges select in descending order), and "all".
pub fn parse_selection(tokens: &[String], list_len: usize) -> Selection {
    let mut selection = Selection::default();
    let mut chosen = BTreeSet::new();

    for token in tokens {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if token.eq_ignore_ascii_case("all") {
            for index in 1..=list_len {
                if chosen.insert(index) {
                    selection.indices.push(index);
                }
            }
            continue;
        }

        if let Some((start, end)) = token.split_once('-') {
            match parse_range(start, end, list_len) {
                Ok(range) => {
                    for index in range {
                        if chosen.insert(index) {
                            selection.indices.push(index);
                        }
                    }
                }
                Err(error) => {
                    selection.errors.insert(error);
                }
            }
            continue;
        }

        match parse_index(token, list_len) {
            Ok(index) => {
                if chosen.insert(index) {
                    selection.indices.push(index);
                }
            }
            Err(error) => {
                selection.errors.insert(error);
            }
        }
    }

    selection
}

fn parse_index(token: &str, list_len: usize) -> Result<usize, String> {
    let index: usize = token
        .parse()
        .map_err(|_| format!("invalid selection: '{token}'"))?;
    if index == 0 {
        return Err("index '0' does not exist".to_string());
    }
    if index > list_len {
        return Err(format!("index '{index}' does not exist"));
    }
    Ok(index)
}

/// Parse both ends of a range token; either end failing poisons the whole
/// token with one error. A reversed range ("7-3") selects descending.
fn parse_range(start: &str, end: &str, list_len: usize) -> Result<Vec<usize>, String> {
    if start.is_empty() || end.is_empty() || end.contains('-') {
        return Err(format!("invalid range: '{start}-{end}'"));
    }
    let (start_num, end_num) = match (start.parse::<usize>(), end.parse::<usize>()) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return Err(format!("invalid range: '{start}-{end}'")),
    };
    if start_num == 0 || end_num == 0 {
        return Err("index '0' does not exist".to_string());
    }
    if start_num > list_len || end_num > list_len {
        return Err(format!(
            "invalid range: '{start_num}-{end_num}' does not align with the list"
        ));
    }

    Ok(if start_num <= end_num {
        (start_num..=end_num).collect()
    } else {
        (end_num..=start_num).rev().collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_singles_and_ranges() {
        let sel = parse_selection(&tokens(&["1", "3", "5-7"]), 10);
        assert_eq!(sel.indices, vec![1, 3, 5, 6, 7]);
        assert!(sel.errors.is_empty());
    }

    #[test]
    fn all_selects_everything() {
        let sel = parse_selection(&tokens(&["all"]), 4);
        assert_eq!(sel.indices, vec![1, 2, 3, 4]);
    }

    #[test]
    fn reversed_range_selects_descending() {
        let sel = parse_selection(&tokens(&["5-2"]), 10);
        assert_eq!(sel.indices, vec![5, 4, 3, 2]);
    }

    #[test]
    fn duplicates_collapse() {
        let sel = parse_selection(&tokens(&["2", "2", "1-3"]), 5);
        assert_eq!(sel.indices, vec![2, 1, 3]);
    }

    #[test]
    fn zero_is_rejected() {
        let sel = parse_selection(&tokens(&["0"]), 5);
        assert!(sel.indices.is_empty());
        assert!(sel.errors.contains("index '0' does not exist"));
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let sel = parse_selection(&tokens(&["9"]), 5);
        assert!(sel.indices.is_empty());
        assert!(sel.errors.contains("index '9' does not exist"));
    }

    #[test]
    fn malformed_tokens_each_get_a_distinct_error() {
        let sel = parse_selection(&tokens(&["x", "1-", "2-3-4", "1"]), 5);
        assert_eq!(sel.indices, vec![1]);
        assert_eq!(sel.errors.len(), 3);
    }

    #[test]
    fn bad_tokens_do_not_abort_good_ones() {
        let sel = parse_selection(&tokens(&["99", "2", "0", "4-5"]), 5);
        assert_eq!(sel.indices, vec![2, 4, 5]);
        assert_eq!(sel.errors.len(), 2);
    }

    #[test]
    fn repeated_bad_tokens_collapse_to_one_error() {
        let sel = parse_selection(&tokens(&["0", "0", "0"]), 5);
        assert_eq!(sel.errors.len(), 1);
    }
}
