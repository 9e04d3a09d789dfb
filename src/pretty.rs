//! Human-readable query rendering for log output.
//!
//! Substitutes `$1`, `$2`, ... placeholders with rendered literals. Output is
//! for observability only and is best-effort: placeholders without a matching
//! parameter are left as-is, and rendering never fails.

use crate::query::QueryParam;

/// Render `sql` with its positional placeholders substituted.
pub fn pretty(sql: &str, params: &[QueryParam]) -> String {
    if params.is_empty() {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + 16 * params.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits_len = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits_len]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(param) => out.push_str(&param.render()),
            None => {
                out.push('$');
                out.push_str(&after[..digits_len]);
            }
        }
        rest = &after[digits_len..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_in_order() {
        let rendered = pretty(
            "INSERT INTO users (id, name) VALUES ($1, $2)",
            &[QueryParam::Int(7), QueryParam::from("alice")],
        );
        assert_eq!(rendered, "INSERT INTO users (id, name) VALUES (7, 'alice')");
    }

    #[test]
    fn test_double_digit_placeholders() {
        let params: Vec<QueryParam> = (1..=12).map(QueryParam::from).collect();
        let rendered = pretty("SELECT $1, $10, $12", &params);
        assert_eq!(rendered, "SELECT 1, 10, 12");
    }

    #[test]
    fn test_unmatched_placeholder_left_alone() {
        let rendered = pretty("SELECT $1, $9", &[QueryParam::Bool(true)]);
        assert_eq!(rendered, "SELECT true, $9");
    }

    #[test]
    fn test_bare_dollar_preserved() {
        let rendered = pretty("SELECT '$', $1", &[QueryParam::Null]);
        assert_eq!(rendered, "SELECT '$', NULL");
    }

    #[test]
    fn test_no_params_returns_input() {
        assert_eq!(pretty("SELECT now()", &[]), "SELECT now()");
    }
}
