use std::cell::RefCell;
use std::collections::HashMap;

use tracing::debug;

use crate::error::ColumnNotFound;

/// Minimum similarity a fuzzy candidate needs before it is accepted.
pub const FUZZY_CUTOFF: f64 = 0.6;

/// Maps a canonical rubric term to the header actually present in a table.
pub trait ColumnResolver {
    fn resolve(&self, term: &str) -> Result<String, ColumnNotFound>;
}

impl<F> ColumnResolver for F
where
    F: Fn(&str) -> Result<String, ColumnNotFound>,
{
    fn resolve(&self, term: &str) -> Result<String, ColumnNotFound> {
        self(term)
    }
}

/// Resolve `term` against `columns`, tolerating the spacing drift and small
/// typos that appear when a rubric item is edited after export.
pub fn resolve_column(term: &str, columns: &[String]) -> Result<String, ColumnNotFound> {
    known_variant(term, columns)
        .or_else(|| closest_match(term, columns))
        .ok_or_else(|| ColumnNotFound {
            term: term.to_string(),
        })
}

/// The exact term or one of its spacing variants. Colon variants are only
/// tried for terms with a single colon.
fn known_variant(term: &str, columns: &[String]) -> Option<String> {
    let present = |candidate: &str| columns.iter().any(|c| c == candidate);

    if present(term) {
        return Some(term.to_string());
    }

    let trailing = format!("{term} ");
    if present(&trailing) {
        return Some(trailing);
    }

    let leading = format!(" {term}");
    if present(&leading) {
        return Some(leading);
    }

    let parts: Vec<&str> = term.split(':').collect();
    if let [left, right] = parts.as_slice() {
        for candidate in [format!("{left} :{right}"), format!("{left}: {right}")] {
            if present(&candidate) {
                return Some(candidate);
            }
        }
    }

    None
}

fn closest_match(term: &str, columns: &[String]) -> Option<String> {
    let mut best: Option<(&String, f64)> = None;
    for column in columns {
        let score = strsim::normalized_levenshtein(term, column);
        if score < FUZZY_CUTOFF {
            continue;
        }
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((column, score));
        }
    }
    best.map(|(column, _)| column.clone())
}

/// Resolver bound to one table's header row. Resolutions are memoised since
/// every row of a table asks for the same terms.
#[derive(Debug)]
pub struct HeaderResolver {
    columns: Vec<String>,
    cache: RefCell<HashMap<String, Result<String, ColumnNotFound>>>,
    fuzzy: RefCell<Vec<(String, String)>>,
}

impl HeaderResolver {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            cache: RefCell::new(HashMap::new()),
            fuzzy: RefCell::new(Vec::new()),
        }
    }

    /// `(term, column)` pairs that were only resolved by spelling similarity.
    /// A missing sub-item column can land on a sibling this way.
    pub fn fuzzy_matches(&self) -> Vec<(String, String)> {
        self.fuzzy.borrow().clone()
    }
}

impl ColumnResolver for HeaderResolver {
    fn resolve(&self, term: &str) -> Result<String, ColumnNotFound> {
        if let Some(hit) = self.cache.borrow().get(term) {
            return hit.clone();
        }
        let resolved = match known_variant(term, &self.columns) {
            Some(column) => Ok(column),
            None => match closest_match(term, &self.columns) {
                Some(column) => {
                    self.fuzzy
                        .borrow_mut()
                        .push((term.to_string(), column.clone()));
                    Ok(column)
                }
                None => {
                    debug!(term, "no column matches rubric term");
                    Err(ColumnNotFound {
                        term: term.to_string(),
                    })
                }
            },
        };
        self.cache
            .borrow_mut()
            .insert(term.to_string(), resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn exact_match_beats_trailing_space_variant() {
        let columns = cols(&["Foo ", "Foo"]);
        assert_eq!(resolve_column("Foo", &columns).unwrap(), "Foo");
    }

    #[test]
    fn tolerates_single_space_padding() {
        assert_eq!(resolve_column("Foo", &cols(&["Foo "])).unwrap(), "Foo ");
        assert_eq!(resolve_column("Foo", &cols(&[" Foo"])).unwrap(), " Foo");
    }

    #[test]
    fn tolerates_spacing_around_colon() {
        let columns = cols(&["Analysis : Strong", "Other"]);
        assert_eq!(
            resolve_column("Analysis: Strong", &columns).unwrap(),
            "Analysis : Strong"
        );
        let columns = cols(&["Analysis:  Strong"]);
        assert_eq!(
            resolve_column("Analysis: Strong", &columns).unwrap(),
            "Analysis:  Strong"
        );
    }

    #[test]
    fn colon_variants_need_a_single_colon() {
        let columns = cols(&["A: bx", "A : b"]);
        assert_eq!(resolve_column("A: b", &columns).unwrap(), "A : b");

        // Both columns are one edit away; only the similarity tie-break applies.
        let columns = cols(&["Q: A: bx", "Q: A : b"]);
        assert_eq!(resolve_column("Q: A: b", &columns).unwrap(), "Q: A: bx");
    }

    #[test]
    fn falls_back_to_closest_spelling() {
        let columns = cols(&["Score", "Analysis: Strongg", "Summary"]);
        assert_eq!(
            resolve_column("Analysis: Strong", &columns).unwrap(),
            "Analysis: Strongg"
        );
    }

    #[test]
    fn unrelated_columns_do_not_match() {
        let columns = cols(&["Score", "Grader"]);
        let err = resolve_column("Analysis: Strong", &columns).unwrap_err();
        assert_eq!(err.term, "Analysis: Strong");
        assert!(resolve_column("Summary", &[]).is_err());
    }

    #[test]
    fn header_resolver_memoises() {
        let resolver = HeaderResolver::new(cols(&["Summary "]));
        assert_eq!(resolver.resolve("Summary").unwrap(), "Summary ");
        assert_eq!(resolver.resolve("Summary").unwrap(), "Summary ");
        assert_eq!(resolver.cache.borrow().len(), 1);
    }

    #[test]
    fn header_resolver_records_fuzzy_fallbacks() {
        let resolver = HeaderResolver::new(cols(&["Analysis: Strong", "Summary "]));
        assert_eq!(resolver.resolve("Summary").unwrap(), "Summary ");
        assert_eq!(resolver.resolve("Analysis: Weak").unwrap(), "Analysis: Strong");
        assert_eq!(resolver.resolve("Analysis: Weak").unwrap(), "Analysis: Strong");
        assert_eq!(
            resolver.fuzzy_matches(),
            vec![("Analysis: Weak".to_string(), "Analysis: Strong".to_string())]
        );
    }

    #[test]
    fn closures_can_stand_in_for_a_resolver() {
        let resolver = |term: &str| -> Result<String, ColumnNotFound> { Ok(term.to_uppercase()) };
        assert_eq!(resolver.resolve("abc").unwrap(), "ABC");
    }
}
