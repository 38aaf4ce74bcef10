//! Free-text search predicates.
//!
//! Turns a user's search box input into a parameterized `WHERE` fragment.
//! Every whitespace-separated word becomes an OR-group across the searchable
//! columns; the groups are then combined with AND or OR depending on the
//! record type. Matching is a case-insensitive substring test via SQLite
//! `LIKE`, which folds ASCII case.

use rusqlite::types::Value;

/// How per-word groups combine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordJoin {
    /// Every word must match somewhere.
    All,
    /// Any word matching somewhere is enough.
    Any,
}

impl WordJoin {
    fn keyword(&self) -> &'static str {
        match self {
            WordJoin::All => " AND ",
            WordJoin::Any => " OR ",
        }
    }
}

/// A `WHERE` fragment plus its positional parameters, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchPredicate {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Build a multi-word, multi-column predicate.
///
/// Returns `None` when the term is blank or there are no columns, which the
/// caller treats as "no filter".
pub fn build(term: &str, columns: &[&'static str], join: WordJoin) -> Option<SearchPredicate> {
    if columns.is_empty() {
        return None;
    }

    let mut groups = Vec::new();
    let mut params = Vec::new();
    for word in term.split_whitespace() {
        let pattern = like_pattern(word);
        let ors: Vec<String> = columns
            .iter()
            .map(|col| {
                params.push(Value::Text(pattern.clone()));
                format!("{} LIKE ? ESCAPE '\\'", col)
            })
            .collect();
        groups.push(format!("({})", ors.join(" OR ")));
    }

    if groups.is_empty() {
        return None;
    }

    Some(SearchPredicate {
        sql: format!("({})", groups.join(join.keyword())),
        params,
    })
}

/// Single-column predicate: the whole trimmed term is one substring.
pub fn build_single(term: &str, column: &'static str) -> Option<SearchPredicate> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    Some(SearchPredicate {
        sql: format!("{} LIKE ? ESCAPE '\\'", column),
        params: vec![Value::Text(like_pattern(term))],
    })
}

/// `%word%` with `%`, `_` and `\` escaped so they match literally.
pub fn like_pattern(word: &str) -> String {
    format!("%{}%", escape_like(word))
}

/// `prefix%`, escaped the same way as [`like_pattern`].
pub fn like_prefix(prefix: &str) -> String {
    format!("{}%", escape_like(prefix))
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
