//! # CREATE TABLE Parsing
//!
//! Extracts column definitions from the SQL text stored in sqlite_master.
//! This is not a SQL parser; it is the narrow slice a carver needs: column
//! names, declared types, the affinity each type resolves to, NOT NULL,
//! and the rowid-alias and WITHOUT ROWID properties that change how
//! records are stored.
//!
//! ## Affinity Resolution
//!
//! Applied to the declared type, first match wins:
//!
//! 1. contains "INT" -> INTEGER
//! 2. contains "CHAR", "CLOB" or "TEXT" -> TEXT
//! 3. contains "BLOB" or no type -> BLOB (historically "NONE")
//! 4. contains "REAL", "FLOA" or "DOUB" -> REAL
//! 5. otherwise -> NUMERIC
//!
//! ## Rowid Aliasing
//!
//! A column declared exactly `INTEGER PRIMARY KEY` (directly or through a
//! single-column table-level PRIMARY KEY) aliases the rowid in a rowid
//! table; its record value is always stored as NULL. The carver leans on
//! this: a schema signature for such a column admits only serial type 0.

use crate::errors::ParsingError;

/// SQLite's five type affinities. `Blob` is the "NONE" affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeAffinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl TypeAffinity {
    /// Resolves a declared type to its affinity.
    pub fn from_declared_type(declared: Option<&str>) -> Self {
        let Some(declared) = declared else {
            return TypeAffinity::Blob;
        };
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            TypeAffinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            TypeAffinity::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            TypeAffinity::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            TypeAffinity::Real
        } else {
            TypeAffinity::Numeric
        }
    }
}

/// One parsed column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub index: usize,
    pub name: String,
    pub declared_type: Option<String>,
    pub affinity: TypeAffinity,
    /// Raw constraint text after name and type.
    pub constraints: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// True when this column aliases the rowid.
    pub rowid_alias: bool,
}

/// Parsed shape of one CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub columns: Vec<ColumnDefinition>,
    /// Table-level constraint segments, verbatim.
    pub table_constraints: Vec<String>,
    pub without_rowid: bool,
}

/// Parsed shape of a CREATE VIRTUAL TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualModule {
    pub module_name: String,
    pub module_arguments: Vec<String>,
}

const TABLE_CONSTRAINT_KEYWORDS: [&str; 5] =
    ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// Parses the column/constraint list of a CREATE TABLE statement.
pub fn parse_create_table(sql: &str) -> Result<TableDefinition, ParsingError> {
    let sql = strip_comments(sql);
    let schema_error = |detail: String| ParsingError::MasterSchemaRow {
        name: first_line(&sql),
        detail,
    };

    let open = find_top_level_open_paren(&sql)
        .ok_or_else(|| schema_error("no column list in CREATE TABLE".into()))?;
    let close = find_matching_paren(&sql, open)
        .ok_or_else(|| schema_error("unbalanced parentheses in CREATE TABLE".into()))?;

    let body = &sql[open + 1..close];
    let tail = sql[close + 1..].to_ascii_uppercase();
    let without_rowid = tail
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .contains("WITHOUT ROWID");

    let mut columns = Vec::new();
    let mut table_constraints = Vec::new();
    let mut table_level_integer_pk: Option<String> = None;

    for segment in split_top_level_commas(body) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let leading = leading_keyword(segment);
        if TABLE_CONSTRAINT_KEYWORDS.contains(&leading.as_str()) {
            if let Some(column) = single_column_primary_key(segment) {
                table_level_integer_pk = Some(column);
            }
            table_constraints.push(segment.to_string());
            continue;
        }

        let column = parse_column_segment(segment, columns.len())
            .map_err(|detail| schema_error(detail))?;
        columns.push(column);
    }

    // A table-level PRIMARY KEY (col) promotes a lone INTEGER column to
    // rowid alias just like the column-level form.
    if let Some(pk_column) = table_level_integer_pk {
        for column in &mut columns {
            if column.name.eq_ignore_ascii_case(&pk_column) {
                column.primary_key = true;
            }
        }
    }
    if !without_rowid {
        for column in &mut columns {
            column.rowid_alias = column.primary_key
                && column
                    .declared_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case("INTEGER"));
        }
    }

    Ok(TableDefinition {
        columns,
        table_constraints,
        without_rowid,
    })
}

/// Parses a CREATE VIRTUAL TABLE statement's module and arguments.
pub fn parse_create_virtual_table(sql: &str) -> Result<VirtualModule, ParsingError> {
    let sql = strip_comments(sql);
    let schema_error = |detail: String| ParsingError::MasterSchemaRow {
        name: first_line(&sql),
        detail,
    };

    let upper = sql.to_ascii_uppercase();
    let using = upper
        .find(" USING ")
        .ok_or_else(|| schema_error("virtual table without USING clause".into()))?;
    let after_using = sql[using + 7..].trim();

    match find_top_level_open_paren(after_using) {
        None => Ok(VirtualModule {
            module_name: after_using.trim_end_matches(';').trim().to_string(),
            module_arguments: Vec::new(),
        }),
        Some(open) => {
            let close = find_matching_paren(after_using, open)
                .ok_or_else(|| schema_error("unbalanced module arguments".into()))?;
            let module_name = after_using[..open].trim().to_string();
            let module_arguments = split_top_level_commas(&after_using[open + 1..close])
                .into_iter()
                .map(|argument| argument.trim().to_string())
                .filter(|argument| !argument.is_empty())
                .collect();
            Ok(VirtualModule {
                module_name,
                module_arguments,
            })
        }
    }
}

/// Removes `/* */` and `--` comments, preserving all four quote forms.
pub fn strip_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                let quote = bytes[i];
                let end = scan_quoted(bytes, i, quote, quote);
                out.push_str(&sql[i..end]);
                i = end;
            }
            b'[' => {
                let end = scan_quoted(bytes, i, b'[', b']');
                out.push_str(&sql[i..end]);
                i = end;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            _ => {
                out.push(bytes[i] as char);
                i += 1;
            }
        }
    }
    out
}

/// End offset (exclusive) of a quoted span starting at `start`.
///
/// Single and double quotes escape by doubling; bracket quoting does not
/// nest.
fn scan_quoted(bytes: &[u8], start: usize, _open: u8, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn find_top_level_open_paren(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = scan_quoted(bytes, i, bytes[i], bytes[i]),
            b'[' => i = scan_quoted(bytes, i, b'[', b']'),
            b'(' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn find_matching_paren(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = scan_quoted(bytes, i, bytes[i], bytes[i]);
                continue;
            }
            b'[' => {
                i = scan_quoted(bytes, i, b'[', b']');
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn split_top_level_commas(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = scan_quoted(bytes, i, bytes[i], bytes[i]);
                continue;
            }
            b'[' => {
                i = scan_quoted(bytes, i, b'[', b']');
                continue;
            }
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                segments.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(&body[start..]);
    segments
}

fn leading_keyword(segment: &str) -> String {
    segment
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Recognizes `PRIMARY KEY (col)` with exactly one bare column.
fn single_column_primary_key(segment: &str) -> Option<String> {
    let upper = segment.to_ascii_uppercase();
    if !upper.starts_with("PRIMARY") {
        return None;
    }
    let open = segment.find('(')?;
    let close = segment.rfind(')')?;
    let inner = segment[open + 1..close].trim();
    if inner.contains(',') {
        return None;
    }
    // Trailing ASC/DESC is legal in the key list.
    let column = inner.split_whitespace().next()?;
    Some(unquote_identifier(column))
}

/// Splits one column segment into name, declared type and constraints.
fn parse_column_segment(segment: &str, index: usize) -> Result<ColumnDefinition, String> {
    let tokens = tokenize(segment);
    if tokens.is_empty() {
        return Err("empty column definition".into());
    }

    let name = unquote_identifier(&tokens[0]);

    // Tokens after the name up to the first constraint keyword form the
    // declared type (which may itself be several words, e.g. UNSIGNED BIG
    // INT, with an optional parameter list).
    const COLUMN_CONSTRAINT_KEYWORDS: [&str; 9] = [
        "PRIMARY", "NOT", "NULL", "UNIQUE", "CHECK", "DEFAULT", "COLLATE", "REFERENCES",
        "GENERATED",
    ];

    let mut type_tokens = Vec::new();
    let mut cursor = 1;
    while cursor < tokens.len() {
        let upper = tokens[cursor].to_ascii_uppercase();
        if COLUMN_CONSTRAINT_KEYWORDS.contains(&upper.as_str()) {
            break;
        }
        type_tokens.push(tokens[cursor].clone());
        cursor += 1;
    }

    let declared_type = if type_tokens.is_empty() {
        None
    } else {
        let mut joined = type_tokens.join(" ");
        // TYPE(N) / TYPE(N,M) parameters do not affect affinity.
        if let Some(paren) = joined.find('(') {
            joined.truncate(paren);
        }
        let joined = joined.trim().to_string();
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    };

    let constraints = tokens[cursor..].join(" ");
    let constraints_upper = constraints.to_ascii_uppercase();
    let not_null = constraints_upper.contains("NOT NULL");
    let primary_key = constraints_upper.contains("PRIMARY KEY");
    let affinity = TypeAffinity::from_declared_type(declared_type.as_deref());

    Ok(ColumnDefinition {
        index,
        name,
        declared_type,
        affinity,
        constraints,
        not_null,
        primary_key,
        rowid_alias: false,
    })
}

/// Whitespace tokenization keeping quoted identifiers and parenthesized
/// parameter lists attached to their token.
fn tokenize(segment: &str) -> Vec<String> {
    let bytes = segment.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match bytes[i] {
            b'\'' | b'"' | b'`' => i = scan_quoted(bytes, i, bytes[i], bytes[i]),
            b'[' => i = scan_quoted(bytes, i, b'[', b']'),
            _ => {
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    if bytes[i] == b'(' {
                        let mut depth = 0;
                        while i < bytes.len() {
                            match bytes[i] {
                                b'(' => depth += 1,
                                b')' => {
                                    depth -= 1;
                                    if depth == 0 {
                                        i += 1;
                                        break;
                                    }
                                }
                                _ => {}
                            }
                            i += 1;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
        }
        tokens.push(segment[start..i].to_string());
    }
    tokens
}

/// Strips one level of identifier quoting and unescapes doubled quotes.
pub fn unquote_identifier(identifier: &str) -> String {
    let bytes = identifier.as_bytes();
    if bytes.len() >= 2 {
        let (open, close) = (bytes[0], bytes[bytes.len() - 1]);
        let matched = matches!(
            (open, close),
            (b'\'', b'\'') | (b'"', b'"') | (b'`', b'`') | (b'[', b']')
        );
        if matched {
            let inner = &identifier[1..identifier.len() - 1];
            return match open {
                b'\'' => inner.replace("''", "'"),
                b'"' => inner.replace("\"\"", "\""),
                b'`' => inner.replace("``", "`"),
                _ => inner.to_string(),
            };
        }
    }
    identifier.to_string()
}

fn first_line(sql: &str) -> String {
    sql.lines().next().unwrap_or("").chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_rules_in_order() {
        assert_eq!(
            TypeAffinity::from_declared_type(Some("INTEGER")),
            TypeAffinity::Integer
        );
        assert_eq!(
            TypeAffinity::from_declared_type(Some("TINYINT")),
            TypeAffinity::Integer
        );
        assert_eq!(
            TypeAffinity::from_declared_type(Some("VARCHAR")),
            TypeAffinity::Text
        );
        assert_eq!(
            TypeAffinity::from_declared_type(Some("CLOB")),
            TypeAffinity::Text
        );
        assert_eq!(
            TypeAffinity::from_declared_type(Some("BLOB")),
            TypeAffinity::Blob
        );
        assert_eq!(TypeAffinity::from_declared_type(None), TypeAffinity::Blob);
        assert_eq!(
            TypeAffinity::from_declared_type(Some("DOUBLE")),
            TypeAffinity::Real
        );
        assert_eq!(
            TypeAffinity::from_declared_type(Some("DECIMAL")),
            TypeAffinity::Numeric
        );
        // INT beats CHAR: "character varying int" is contrived, but
        // POINT is real and resolves INTEGER by rule order.
        assert_eq!(
            TypeAffinity::from_declared_type(Some("POINT")),
            TypeAffinity::Integer
        );
    }

    #[test]
    fn parses_a_simple_table() {
        let table =
            parse_create_table("CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT)").unwrap();
        assert_eq!(table.columns.len(), 2);
        assert!(!table.without_rowid);

        let a = &table.columns[0];
        assert_eq!(a.name, "a");
        assert_eq!(a.declared_type.as_deref(), Some("INTEGER"));
        assert_eq!(a.affinity, TypeAffinity::Integer);
        assert!(a.primary_key);
        assert!(a.rowid_alias);

        let b = &table.columns[1];
        assert_eq!(b.name, "b");
        assert_eq!(b.affinity, TypeAffinity::Text);
        assert!(!b.rowid_alias);
    }

    #[test]
    fn parses_parameterized_types_and_constraints() {
        let table = parse_create_table(
            "CREATE TABLE t(name VARCHAR(30) NOT NULL, score DECIMAL(10,2) DEFAULT 0)",
        )
        .unwrap();
        assert_eq!(table.columns[0].declared_type.as_deref(), Some("VARCHAR"));
        assert!(table.columns[0].not_null);
        assert_eq!(table.columns[1].declared_type.as_deref(), Some("DECIMAL"));
        assert_eq!(table.columns[1].affinity, TypeAffinity::Numeric);
    }

    #[test]
    fn table_constraints_are_separated() {
        let table = parse_create_table(
            "CREATE TABLE t(a INTEGER, b TEXT, PRIMARY KEY (a), UNIQUE (b), FOREIGN KEY (b) REFERENCES u(x))",
        )
        .unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.table_constraints.len(), 3);
        // Single-column table-level PRIMARY KEY promotes the rowid alias.
        assert!(table.columns[0].rowid_alias);
    }

    #[test]
    fn without_rowid_suffix() {
        let table =
            parse_create_table("CREATE TABLE t(k TEXT PRIMARY KEY, v INTEGER) WITHOUT ROWID")
                .unwrap();
        assert!(table.without_rowid);
        assert!(!table.columns[0].rowid_alias);
    }

    #[test]
    fn integer_pk_in_without_rowid_table_is_not_an_alias() {
        let table =
            parse_create_table("CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT) WITHOUT ROWID")
                .unwrap();
        assert!(!table.columns[0].rowid_alias);
    }

    #[test]
    fn int_typed_primary_key_is_not_an_alias() {
        // Only the exact INTEGER type aliases the rowid.
        let table = parse_create_table("CREATE TABLE t(a INT PRIMARY KEY)").unwrap();
        assert!(table.columns[0].primary_key);
        assert!(!table.columns[0].rowid_alias);
    }

    #[test]
    fn comments_are_stripped_but_quotes_preserved() {
        let table = parse_create_table(
            "CREATE TABLE t( -- trailing comment, with a comma\n  a INTEGER, /* block, comment */ \"b -- not a comment\" TEXT)",
        )
        .unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[1].name, "b -- not a comment");
    }

    #[test]
    fn quoted_identifiers_unescape() {
        let table = parse_create_table(
            r#"CREATE TABLE "odd ""name""" ([first col] TEXT, `second` INTEGER, 'third' BLOB)"#,
        )
        .unwrap();
        assert_eq!(table.columns[0].name, "first col");
        assert_eq!(table.columns[1].name, "second");
        assert_eq!(table.columns[2].name, "third");
    }

    #[test]
    fn quoted_table_name_with_paren_does_not_confuse_the_scanner() {
        let table = parse_create_table(r#"CREATE TABLE "t (weird)" (a TEXT)"#).unwrap();
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.columns[0].name, "a");
    }

    #[test]
    fn virtual_table_module_and_arguments() {
        let module = parse_create_virtual_table(
            "CREATE VIRTUAL TABLE docs USING fts5(title, body, tokenize = 'porter')",
        )
        .unwrap();
        assert_eq!(module.module_name, "fts5");
        assert_eq!(
            module.module_arguments,
            vec!["title", "body", "tokenize = 'porter'"]
        );
    }

    #[test]
    fn virtual_table_without_arguments() {
        let module =
            parse_create_virtual_table("CREATE VIRTUAL TABLE sp USING spellfix").unwrap();
        assert_eq!(module.module_name, "spellfix");
        assert!(module.module_arguments.is_empty());
    }
}
