use crate::errors::ExecutionError;

/// Leading keywords a submission may start with.
const ALLOWED: &[&str] = &["SELECT", "WITH", "VALUES"];

/// Rejects anything that is not a single read-only query, without touching
/// the dataset. The prepared statement is checked again by the engine
/// (`sqlite3_stmt_readonly`), so a `WITH ... DELETE` that passes here still
/// never runs.
pub fn check(sql: &str) -> Result<(), ExecutionError> {
    let code = strip_comments_and_literals(sql);

    let mut statements = code.split(';').filter(|s| !s.trim().is_empty());
    let first = match statements.next() {
        Some(s) => s,
        None => return Err(ExecutionError::Query("empty query".into())),
    };
    if statements.next().is_some() {
        return Err(ExecutionError::Forbidden(
            "only a single statement may be submitted".into(),
        ));
    }

    let keyword = leading_keyword(first);
    if ALLOWED.iter().any(|k| keyword.eq_ignore_ascii_case(k)) {
        Ok(())
    } else {
        Err(ExecutionError::Forbidden(format!(
            "{} statements are not allowed; submit a SELECT query",
            keyword.to_ascii_uppercase()
        )))
    }
}

fn leading_keyword(stmt: &str) -> String {
    stmt.trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect()
}

/// Blanks out comments and quoted text so keywords and `;` inside them are
/// not mistaken for code.
fn strip_comments_and_literals(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                i += 1;
                while i < chars.len() {
                    if chars[i] == close {
                        // doubled quote is an escaped quote
                        if close != ']' && chars.get(i + 1) == Some(&close) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
                out.push_str(" x ");
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
