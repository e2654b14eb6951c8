// SQL Text Helpers
// Literal quoting, naming conventions and statements shared by every backend

use sha2::{Digest, Sha256};

/// Suffix that marks the object backing a table's id sequence
pub const SEQUENCE_SUFFIX: &str = "_pk_seq";

/// Longest index name accepted as is; longer names are shortened with a hash
pub const MAX_INDEX_NAME_LEN: usize = 40;

const INDEX_NAME_PREFIX_LEN: usize = 20;
const INDEX_NAME_HASH_LEN: usize = 32;

/// ANSI string literal: single quotes doubled, `None` becomes `NULL`
pub fn quote_literal(value: Option<&str>) -> String {
    match value {
        None => "NULL".to_string(),
        Some(value) => format!("'{}'", value.replace('\'', "''")),
    }
}

pub fn sequence_name(table_name: &str) -> String {
    format!("{}{}", table_name, SEQUENCE_SUFFIX)
}

/// Whether a table only exists to emulate a sequence
pub fn is_sequence_table(table_name: &str) -> bool {
    table_name.ends_with(SEQUENCE_SUFFIX)
}

/// Name for an index. An explicit name wins over `IDX_<table>_<cols>`;
/// either one, past [`MAX_INDEX_NAME_LEN`] characters, is shortened to its
/// first 20 characters plus a SHA-256 digest of the full name.
pub fn index_name(table_name: &str, columns: &[&str], explicit: Option<&str>) -> String {
    let full = explicit
        .map(str::to_string)
        .unwrap_or_else(|| format!("IDX_{}_{}", table_name, columns.join("_")));
    if full.chars().count() <= MAX_INDEX_NAME_LEN {
        return full;
    }

    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    let prefix: String = full.chars().take(INDEX_NAME_PREFIX_LEN).collect();
    format!("{}_{}", prefix, &digest[..INDEX_NAME_HASH_LEN])
}

pub fn create_index_sql(
    table_name: &str,
    columns: &[&str],
    is_unique: bool,
    explicit_name: Option<&str>,
) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        if is_unique { "UNIQUE " } else { "" },
        index_name(table_name, columns, explicit_name),
        table_name,
        columns.join(", ")
    )
}

/// Shortened statement text for log lines
pub fn preview(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.chars().count() > 100 {
        format!("{}...", trimmed.chars().take(100).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal(None), "NULL");
        assert_eq!(quote_literal(Some("")), "''");
        assert_eq!(quote_literal(Some("it's")), "'it''s'");
    }

    #[test]
    fn test_sequence_names() {
        assert_eq!(sequence_name("users"), "users_pk_seq");
        assert!(is_sequence_table("users_pk_seq"));
        assert!(!is_sequence_table("users"));
    }

    #[test]
    fn test_short_index_name_is_kept() {
        assert_eq!(index_name("users", &["email"], None), "IDX_users_email");
        assert_eq!(index_name("users", &["a", "b"], Some("my_idx")), "my_idx");
    }

    #[test]
    fn test_long_index_name_is_shortened() {
        let columns = ["first_name", "last_name", "birth_date"];
        let name = index_name("customer_addresses", &columns, None);

        // "IDX_customer_addresses_first_name_last_name_birth_date" is too long
        assert_eq!(name.len(), INDEX_NAME_PREFIX_LEN + 1 + INDEX_NAME_HASH_LEN);
        assert!(name.starts_with("IDX_customer_address_"));
        assert_eq!(name, index_name("customer_addresses", &columns, None));
        assert_ne!(name, index_name("customer_addresses", &["first_name", "last_name"], None));
    }

    #[test]
    fn test_index_name_at_limit() {
        // exactly 40 characters
        let name = index_name("abcdefghijklmnopqrstuvwxyz", &["abcdefghi"], None);
        assert_eq!(name.len(), MAX_INDEX_NAME_LEN);
        assert_eq!(name, "IDX_abcdefghijklmnopqrstuvwxyz_abcdefghi");
    }

    #[test]
    fn test_create_index_sql() {
        assert_eq!(
            create_index_sql("users", &["last", "first"], false, None),
            "CREATE INDEX IDX_users_last_first ON users (last, first);"
        );
        assert_eq!(
            create_index_sql("users", &["email"], true, Some("uq_email")),
            "CREATE UNIQUE INDEX uq_email ON users (email);"
        );
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(150);
        assert_eq!(preview(&long).len(), 103);
        assert_eq!(preview("  SELECT 1 "), "SELECT 1");
    }

    #[test]
    fn test_long_explicit_index_name_is_shortened() {
        let supplied = "my_really_long_supplied_index_name_over_forty_chars";
        let name = index_name("t", &["c"], Some(supplied));
        assert_ne!(name, supplied);
        assert_eq!(name.len(), INDEX_NAME_PREFIX_LEN + 1 + INDEX_NAME_HASH_LEN);
        assert!(name.starts_with("my_really_long_suppl_"));
        assert_eq!(index_name("t", &["c"], Some("idx_short")), "idx_short");
    }
}
