/// Split a script into individual statements on `;`.
///
/// Semicolons inside single-quoted strings, double-quoted or bracketed
/// identifiers, `--` line comments and `/* */` block comments do not split.
/// Fragments that hold nothing but whitespace and comments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                current.push(c);
                has_code = true;
                while let Some(inner) = chars.next() {
                    current.push(inner);
                    if inner == close {
                        // doubled quote is an escape
                        if close != ']' && chars.peek() == Some(&close) {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                current.push(c);
                for inner in chars.by_ref() {
                    current.push(inner);
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                current.push(c);
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    current.push(inner);
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            ';' => {
                if has_code {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_code = false;
            }
            _ => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                current.push(c);
            }
        }
    }

    if has_code {
        statements.push(current.trim().to_string());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_statement_without_semicolon() {
        assert_eq!(split_statements("SELECT 1"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_multiple_statements() {
        let parts = split_statements("SELECT 1;\n  SELECT 2 ;\n\n");
        assert_eq!(parts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_semicolons_in_literals_and_comments() {
        let sql = "SELECT 'a;b', \"we;ird\" FROM t -- trailing; comment\nWHERE x = 'it''s;'; /* c; */ SELECT 2";
        let parts = split_statements(sql);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("SELECT 'a;b'"));
        assert!(parts[0].ends_with("'it''s;'"));
        assert_eq!(parts[1], "/* c; */ SELECT 2");
    }

    #[test]
    fn test_comment_only_fragments_dropped() {
        assert!(split_statements("-- nothing here;\n ; ;").is_empty());
        assert!(split_statements("").is_empty());
        assert_eq!(split_statements("-- head\nSELECT 3;"), vec!["-- head\nSELECT 3"]);
    }
}
