//! Structured diagnosis of tool failures.
//!
//! [`extract_error_info`] turns a free-text error into an [`ErrorInfo`] the
//! model can act on: a category, the resources involved, what depends on
//! them, and concrete next steps. Detection is first-match over lowercase
//! phrase lists, in a fixed priority order, so a message mentioning both a
//! foreign key and "does not exist" is treated as a foreign-key problem.
//! Name extraction covers MySQL- and Postgres-style phrasings and degrades
//! to empty lists when nothing matches.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Failure category, in detection priority order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ForeignKeyConstraint,
    SyntaxError,
    PermissionDenied,
    ResourceNotFound,
    ResourceExists,
    ConnectionError,
    Timeout,
    #[default]
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ForeignKeyConstraint => "foreign_key_constraint",
            ErrorType::SyntaxError => "syntax_error",
            ErrorType::PermissionDenied => "permission_denied",
            ErrorType::ResourceNotFound => "resource_not_found",
            ErrorType::ResourceExists => "resource_exists",
            ErrorType::ConnectionError => "connection_error",
            ErrorType::Timeout => "timeout",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured diagnosis embedded into error tool results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub error_code: String,
    pub error_type: ErrorType,
    pub affected_resources: Vec<String>,
    pub dependencies: Vec<String>,
    pub suggested_actions: Vec<String>,
}

// ── Detection ──────────────────────────────────────────────────────

const CATEGORY_PHRASES: &[(ErrorType, &[&str])] = &[
    (
        ErrorType::ForeignKeyConstraint,
        &[
            "foreign key",
            "referenced by",
            "is still referenced",
            "other objects depend on it",
        ],
    ),
    (
        ErrorType::SyntaxError,
        &[
            "syntax error",
            "error in your sql syntax",
            "parse error",
            "unexpected token",
            "unterminated",
        ],
    ),
    (
        ErrorType::PermissionDenied,
        &[
            "permission denied",
            "access denied",
            "command denied",
            "insufficient privilege",
            "not authorized",
            "unauthorized",
            "forbidden",
            "operation not permitted",
        ],
    ),
    (
        ErrorType::ResourceNotFound,
        &[
            "doesn't exist",
            "does not exist",
            "not found",
            "no such",
            "unknown table",
            "unknown column",
            "unknown database",
        ],
    ),
    (
        ErrorType::ResourceExists,
        &["already exists", "duplicate entry", "duplicate key"],
    ),
    (
        ErrorType::ConnectionError,
        &[
            "connection refused",
            "could not connect",
            "can't connect",
            "cannot connect",
            "connection reset",
            "lost connection",
            "server has gone away",
            "no route to host",
            "could not resolve host",
            "broken pipe",
        ],
    ),
    (
        ErrorType::Timeout,
        &[
            "timed out",
            "timeout",
            "deadline exceeded",
            "statement cancelled",
        ],
    ),
];

fn detect(lower: &str) -> ErrorType {
    CATEGORY_PHRASES
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| lower.contains(p)))
        .map_or(ErrorType::Unknown, |(t, _)| *t)
}

// ── Extraction patterns ────────────────────────────────────────────

/// Optional quote around an identifier: `'x'`, `"x"` or `` `x` ``.
const Q: &str = r#"['"`]?"#;

/// Compile case-insensitive patterns, expanding `{q}` to [`Q`].
fn compile(templates: &[&str]) -> Vec<Regex> {
    templates
        .iter()
        .filter_map(|t| Regex::new(&format!("(?i){}", t.replace("{q}", Q))).ok())
        .collect()
}

static FK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // Cannot drop table 'users' referenced by foreign key constraint 'fk_x' on table 'sales'
        r"drop table {q}(?P<affected>[\w.$]+){q} referenced by (?:a )?foreign key constraint {q}(?P<constraint>[\w.$]+){q} on table {q}(?P<dependency>[\w.$]+){q}",
        // Postgres DETAIL: constraint fk_x on table sales depends on table users
        r"constraint {q}(?P<constraint>[\w.$]+){q} on table {q}(?P<dependency>[\w.$]+){q} depends on table {q}(?P<affected>[\w.$]+){q}",
        // Postgres: update or delete on table "users" violates foreign key constraint "fk_x" on table "sales"
        r"(?:update or delete|delete) on table {q}(?P<affected>[\w.$]+){q} violates foreign key constraint {q}(?P<constraint>[\w.$]+){q} on table {q}(?P<dependency>[\w.$]+){q}",
        // Postgres: insert or update on table "sales" violates foreign key constraint "fk_x" ... is not present in table "users"
        r#"insert or update on table {q}(?P<affected>[\w.$]+){q} violates foreign key constraint {q}(?P<constraint>[\w.$]+){q}(?:.*?is not present in table {q}(?P<dependency>[\w.$]+){q})?"#,
        // MySQL: Cannot delete or update a parent row: a foreign key constraint fails (`db`.`sales`, CONSTRAINT `fk_x` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`))
        r"parent row: a foreign key constraint fails \((?:`\w+`\.)?{q}(?P<dependency>\w+){q}, constraint {q}(?P<constraint>\w+){q} foreign key \([^)]*\) references {q}(?P<affected>\w+){q}",
        // MySQL: Cannot add or update a child row: a foreign key constraint fails (`db`.`sales`, CONSTRAINT `fk_x` ... REFERENCES `users` ...)
        r"child row: a foreign key constraint fails \((?:`\w+`\.)?{q}(?P<affected>\w+){q}, constraint {q}(?P<constraint>\w+){q} foreign key \([^)]*\) references {q}(?P<dependency>\w+){q}",
        // Postgres: cannot drop table users because other objects depend on it
        r"cannot drop (?:table|view) {q}(?P<affected>[\w.$]+){q} because other objects depend on it",
    ])
});

static SYNTAX_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // MySQL: ... right syntax to use near 'FORM users' at line 1
        r"near '(?P<near>[^']*)' at line (?P<line>\d+)",
        // Postgres: syntax error at or near "FORM"
        r#"syntax error at or near "(?P<near>[^"]*)""#,
        r"syntax error (?:at|near) (?:line (?P<line>\d+))?",
    ])
});

static PERMISSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // MySQL: DROP command denied to user 'app'@'localhost' for table 'users'
        r"command denied to user '(?P<user>[^']+)'@'[^']*' for table {q}(?P<resource>[\w.$]+){q}",
        // Postgres: permission denied for table users
        r"permission denied for (?:table|relation|schema|database|sequence|view|function) {q}(?P<resource>[\w.$]+){q}",
        // MySQL: Access denied for user 'app'@'localhost' to database 'shop'
        r"access denied for user '(?P<user>[^']+)'@'[^']*'(?: to database '(?P<resource>[^']+)')?",
        // Shell / OS: open /etc/shadow: permission denied
        r"(?P<resource>/[^\s:]+): permission denied",
    ])
});

static NOT_FOUND_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // MySQL: Table 'shop.orders' doesn't exist
        r"table '(?:\w+\.)?(?P<resource>[\w$]+)' doesn't exist",
        // MySQL: Unknown column 'foo' in 'field list'
        r"unknown (?:table|column|database) '(?P<resource>[^']+)'",
        // Postgres: relation "orders" does not exist
        r#"(?:relation|table|column|database|schema|role|function|view) "?(?P<resource>[\w.$]+)"? does not exist"#,
        // Shell: cat: foo.txt: No such file or directory
        r"(?P<resource>[^\s:]+): no such file or directory",
        // Generic: file not found: path
        r"not found:? {q}(?P<resource>[^\s'`]+){q}",
    ])
});

static EXISTS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // MySQL: Table 'users' already exists
        r"(?:table|database|view|index) {q}(?P<resource>[\w.$]+){q} already exists",
        // Postgres: relation "users" already exists
        r#"relation "(?P<resource>[\w.$]+)" already exists"#,
        // MySQL: Duplicate entry 'a@b.c' for key 'users.email'
        r"duplicate entry '(?P<value>[^']*)' for key '(?P<resource>[^']+)'",
        // Postgres: duplicate key value violates unique constraint "users_email_key"
        r#"duplicate key value violates unique constraint "(?P<resource>[^"]+)""#,
        r"(?P<resource>[^\s:]+): file exists",
    ])
});

static CONNECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        // MySQL: Can't connect to MySQL server on 'db.internal:3306' (111)
        r"connect to (?:mysql )?server on '(?P<resource>[^']+)'",
        // Postgres: connection to server at "db.internal" (10.0.0.5), port 5432 failed
        r#"connection to server (?:at|on) "(?P<resource>[^"]+)""#,
        // Go/HTTP style: dial tcp 10.0.0.5:5432: connect: connection refused
        r"dial tcp (?P<resource>[\w.\-:\[\]]+)",
        r"could not resolve host:? (?P<resource>[\w.\-]+)",
    ])
});

/// Bare error codes: `ERROR 1451 (23000)` / `Error 1451:` and `SQLSTATE 23503`.
static CODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\berror:? (?P<code>\d{3,5})\b",
        r"sqlstate\s*[\[(:]?\s*(?P<code>[0-9a-z]{5})\b",
    ])
});

// ── Public entry point ─────────────────────────────────────────────

/// Classify an error message. `None` yields [`ErrorInfo::default()`].
pub fn extract_error_info(err: Option<&str>) -> ErrorInfo {
    let Some(message) = err else {
        return ErrorInfo::default();
    };
    let error_type = detect(&message.to_lowercase());
    let mut info = ErrorInfo {
        error_code: extract_code(message),
        error_type,
        ..Default::default()
    };

    match error_type {
        ErrorType::ForeignKeyConstraint => foreign_key(message, &mut info),
        ErrorType::SyntaxError => syntax(message, &mut info),
        ErrorType::PermissionDenied => {
            let resource = first_capture(&PERMISSION_PATTERNS, message, "resource");
            push_unique(&mut info.affected_resources, resource.clone());
            info.suggested_actions.push(match resource {
                Some(r) => format!(
                    "Grant the required privilege on '{r}' or use an account that has it."
                ),
                None => "Check the account's privileges or use an account that has access.".into(),
            });
        }
        ErrorType::ResourceNotFound => {
            let resource = first_capture(&NOT_FOUND_PATTERNS, message, "resource");
            push_unique(&mut info.affected_resources, resource.clone());
            info.suggested_actions.push(match resource {
                Some(r) => format!(
                    "Verify that '{r}' exists and is spelled correctly; list the available resources first."
                ),
                None => "List the available resources and check the name before retrying.".into(),
            });
        }
        ErrorType::ResourceExists => {
            let resource = first_capture(&EXISTS_PATTERNS, message, "resource");
            push_unique(&mut info.affected_resources, resource.clone());
            info.suggested_actions.push(match resource {
                Some(r) => format!(
                    "'{r}' already exists: use IF NOT EXISTS, pick a different name, or remove the existing one first."
                ),
                None => "The target already exists; reuse it or choose a different name.".into(),
            });
        }
        ErrorType::ConnectionError => {
            let resource = first_capture(&CONNECTION_PATTERNS, message, "resource");
            push_unique(&mut info.affected_resources, resource.clone());
            info.suggested_actions.push(match resource {
                Some(r) => format!("Check that the service at {r} is running and reachable."),
                None => "Check that the service is running and reachable, then retry.".into(),
            });
            info.suggested_actions
                .push("Verify host, port and credentials in the connection settings.".into());
        }
        ErrorType::Timeout => {
            info.suggested_actions.push(
                "Retry once; if it times out again, narrow the operation (filters, LIMIT, smaller batches)."
                    .into(),
            );
        }
        ErrorType::Unknown => {
            info.suggested_actions
                .push("Review the error message and adjust the request before retrying.".into());
        }
    }
    info
}

fn foreign_key(message: &str, info: &mut ErrorInfo) {
    let mut constraint = None;
    for re in FK_PATTERNS.iter() {
        if let Some(caps) = re.captures(message) {
            push_unique(&mut info.affected_resources, capture(&caps, "affected"));
            push_unique(&mut info.dependencies, capture(&caps, "dependency"));
            constraint = capture(&caps, "constraint");
            break;
        }
    }

    let target = info
        .affected_resources
        .first()
        .cloned()
        .unwrap_or_else(|| "the referenced table".into());
    match (info.dependencies.first(), constraint) {
        (Some(dep), Some(c)) => {
            info.suggested_actions.push(format!(
                "Drop dependency '{dep}' or constraint '{c}' on '{dep}' first, then retry the operation on '{target}'."
            ));
            info.suggested_actions.push(format!(
                "Alternatively delete or update the rows in '{dep}' that reference '{target}'."
            ));
        }
        (Some(dep), None) => info.suggested_actions.push(format!(
            "Remove or update the rows in '{dep}' that reference '{target}' first, then retry."
        )),
        (None, Some(c)) => info.suggested_actions.push(format!(
            "Drop constraint '{c}' or remove the referencing rows first, then retry."
        )),
        (None, None) => info.suggested_actions.push(
            "Find the foreign key constraint that references this resource and drop it or its dependent rows first."
                .into(),
        ),
    }
}

fn syntax(message: &str, info: &mut ErrorInfo) {
    let mut near = None;
    let mut line = None;
    for re in SYNTAX_PATTERNS.iter() {
        if let Some(caps) = re.captures(message) {
            near = capture(&caps, "near");
            line = capture(&caps, "line");
            break;
        }
    }
    let location = match (near, line) {
        (Some(n), Some(l)) => format!(" near '{n}' (line {l})"),
        (Some(n), None) => format!(" near '{n}'"),
        (None, Some(l)) => format!(" on line {l}"),
        (None, None) => String::new(),
    };
    info.suggested_actions.push(format!(
        "Fix the statement syntax{location}; check keywords, quoting and commas."
    ));
}

fn extract_code(message: &str) -> String {
    CODE_PATTERNS
        .iter()
        .find_map(|re| re.captures(message).and_then(|c| capture(&c, "code")))
        .map(|c| c.to_uppercase())
        .unwrap_or_default()
}

fn first_capture(patterns: &[Regex], message: &str, group: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(message).and_then(|c| capture(&c, group)))
}

fn capture(caps: &regex::Captures<'_>, group: &str) -> Option<String> {
    caps.name(group)
        .map(|m| m.as_str().trim_matches(['\'', '"', '`']).to_string())
        .filter(|s| !s.is_empty())
}

fn push_unique(list: &mut Vec<String>, value: Option<String>) {
    if let Some(v) = value
        && !list.contains(&v)
    {
        list.push(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        assert_eq!(FK_PATTERNS.len(), 7);
        assert_eq!(SYNTAX_PATTERNS.len(), 3);
        assert_eq!(PERMISSION_PATTERNS.len(), 4);
        assert_eq!(NOT_FOUND_PATTERNS.len(), 5);
        assert_eq!(EXISTS_PATTERNS.len(), 5);
        assert_eq!(CONNECTION_PATTERNS.len(), 4);
        assert_eq!(CODE_PATTERNS.len(), 2);
    }

    #[test]
    fn none_input_is_zero_value() {
        let info = extract_error_info(None);
        assert_eq!(info, ErrorInfo::default());
        assert_eq!(info.error_type, ErrorType::Unknown);
        assert!(info.error_code.is_empty());
        assert!(info.suggested_actions.is_empty());
    }

    #[test]
    fn generic_foreign_key_drop() {
        let info = extract_error_info(Some(
            "Cannot drop table 'users' referenced by foreign key constraint 'fk_x' on table 'sales'",
        ));
        assert_eq!(info.error_type, ErrorType::ForeignKeyConstraint);
        assert_eq!(info.affected_resources, vec!["users"]);
        assert_eq!(info.dependencies, vec!["sales"]);
        assert!(
            info.suggested_actions
                .iter()
                .any(|a| a.contains("sales") || a.contains("constraint"))
        );
    }

    #[test]
    fn mysql_parent_row_foreign_key() {
        let info = extract_error_info(Some(
            "ERROR 1451 (23000): Cannot delete or update a parent row: a foreign key constraint fails \
             (`shop`.`orders`, CONSTRAINT `orders_ibfk_1` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`))",
        ));
        assert_eq!(info.error_type, ErrorType::ForeignKeyConstraint);
        assert_eq!(info.error_code, "1451");
        assert_eq!(info.affected_resources, vec!["users"]);
        assert_eq!(info.dependencies, vec!["orders"]);
        assert!(info.suggested_actions[0].contains("orders_ibfk_1"));
    }

    #[test]
    fn postgres_foreign_key_detail() {
        let info = extract_error_info(Some(
            "ERROR:  cannot drop table users because other objects depend on it\n\
             DETAIL:  constraint sales_user_id_fkey on table sales depends on table users\n\
             HINT:  Use DROP ... CASCADE to drop the dependent objects too.",
        ));
        assert_eq!(info.error_type, ErrorType::ForeignKeyConstraint);
        assert_eq!(info.affected_resources, vec!["users"]);
        assert_eq!(info.dependencies, vec!["sales"]);
    }

    #[test]
    fn postgres_violates_on_delete() {
        let info = extract_error_info(Some(
            r#"update or delete on table "users" violates foreign key constraint "fk_x" on table "sales" (SQLSTATE 23503)"#,
        ));
        assert_eq!(info.error_type, ErrorType::ForeignKeyConstraint);
        assert_eq!(info.error_code, "23503");
        assert_eq!(info.dependencies, vec!["sales"]);
    }

    #[test]
    fn syntax_errors_in_both_dialects() {
        let mysql = extract_error_info(Some(
            "ERROR 1064 (42000): You have an error in your SQL syntax; check the manual that \
             corresponds to your MySQL server version for the right syntax to use near 'FORM users' at line 1",
        ));
        assert_eq!(mysql.error_type, ErrorType::SyntaxError);
        assert_eq!(mysql.error_code, "1064");
        assert!(mysql.suggested_actions[0].contains("FORM users"));

        let pg = extract_error_info(Some(r#"ERROR: syntax error at or near "FORM""#));
        assert_eq!(pg.error_type, ErrorType::SyntaxError);
        assert!(pg.suggested_actions[0].contains("FORM"));
    }

    #[test]
    fn permission_denied_extracts_resource() {
        let pg = extract_error_info(Some("ERROR: permission denied for table payroll"));
        assert_eq!(pg.error_type, ErrorType::PermissionDenied);
        assert_eq!(pg.affected_resources, vec!["payroll"]);

        let mysql = extract_error_info(Some(
            "ERROR 1142 (42000): DROP command denied to user 'app'@'localhost' for table 'users'",
        ));
        assert_eq!(mysql.error_type, ErrorType::PermissionDenied);
        assert_eq!(mysql.affected_resources, vec!["users"]);
    }

    #[test]
    fn not_found_in_both_dialects() {
        let mysql = extract_error_info(Some("ERROR 1146 (42S02): Table 'shop.orders' doesn't exist"));
        assert_eq!(mysql.error_type, ErrorType::ResourceNotFound);
        assert_eq!(mysql.affected_resources, vec!["orders"]);

        let pg = extract_error_info(Some(r#"ERROR: relation "orders" does not exist"#));
        assert_eq!(pg.error_type, ErrorType::ResourceNotFound);
        assert_eq!(pg.affected_resources, vec!["orders"]);
    }

    #[test]
    fn exists_and_duplicates() {
        let info = extract_error_info(Some("ERROR 1050 (42S01): Table 'users' already exists"));
        assert_eq!(info.error_type, ErrorType::ResourceExists);
        assert_eq!(info.affected_resources, vec!["users"]);

        let dup = extract_error_info(Some(
            r#"duplicate key value violates unique constraint "users_email_key""#,
        ));
        assert_eq!(dup.error_type, ErrorType::ResourceExists);
        assert_eq!(dup.affected_resources, vec!["users_email_key"]);
    }

    #[test]
    fn connection_and_timeout() {
        let conn = extract_error_info(Some(
            "ERROR 2003 (HY000): Can't connect to MySQL server on 'db.internal:3306' (111)",
        ));
        assert_eq!(conn.error_type, ErrorType::ConnectionError);
        assert_eq!(conn.affected_resources, vec!["db.internal:3306"]);

        let timeout = extract_error_info(Some("request timed out after 30s"));
        assert_eq!(timeout.error_type, ErrorType::Timeout);
        assert!(!timeout.suggested_actions.is_empty());
    }

    #[test]
    fn priority_prefers_foreign_key_over_not_found() {
        let info = extract_error_info(Some(
            "foreign key check failed: referenced row does not exist",
        ));
        assert_eq!(info.error_type, ErrorType::ForeignKeyConstraint);
    }

    #[test]
    fn unknown_degrades_to_empty_lists() {
        let info = extract_error_info(Some("something odd happened"));
        assert_eq!(info.error_type, ErrorType::Unknown);
        assert!(info.affected_resources.is_empty());
        assert!(info.dependencies.is_empty());
        assert_eq!(info.error_code, "");
    }

    #[test]
    fn error_type_serializes_snake_case() {
        let json = serde_json::to_value(ErrorType::ForeignKeyConstraint).unwrap();
        assert_eq!(json, "foreign_key_constraint");
    }
}
