//! DuckDB statement rendering
//!
//! Identifiers are always double-quoted. Row values are bound as positional
//! parameters; only column DEFAULT clauses render literals inline.

use serde_json::Value;

use crate::domain::{ColumnSpec, IndexOptions, Predicate};

/// A statement and the values bound to its `?` placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn plain(sql: String) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a JSON value as a SQL literal
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn column_definition(column: &ColumnSpec, inline_not_null: bool) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.column_type.sql());
    if column.primary_key {
        def.push_str(" PRIMARY KEY");
    } else if !column.nullable && inline_not_null {
        def.push_str(" NOT NULL");
    }
    if column.unique && !column.primary_key {
        def.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT {}", render_literal(default)));
    }
    if let Some(fk) = &column.references {
        def.push_str(&format!(
            " REFERENCES {}({})",
            quote_ident(&fk.table),
            quote_ident(&fk.column)
        ));
    }
    def
}

pub fn create_table(table: &str, columns: &[ColumnSpec]) -> Statement {
    let defs: Vec<String> = columns.iter().map(|c| column_definition(c, true)).collect();
    Statement::plain(format!(
        "CREATE TABLE {} ({})",
        quote_ident(table),
        defs.join(", ")
    ))
}

pub fn drop_table(table: &str) -> Statement {
    Statement::plain(format!("DROP TABLE {}", quote_ident(table)))
}

/// Statements for `add_column`
///
/// DuckDB does not accept constraints on ADD COLUMN, so NOT NULL becomes a
/// second statement. Key, unique and foreign-key columns are rejected by
/// `Operation::validate` and would fail here if rendered.
pub fn add_column(table: &str, column: &ColumnSpec) -> Vec<Statement> {
    let mut statements = vec![Statement::plain(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column_definition(column, false)
    ))];
    if !column.nullable {
        statements.push(change_nullability(table, &column.name, false));
    }
    statements
}

pub fn remove_column(table: &str, column: &str) -> Statement {
    Statement::plain(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(column)
    ))
}

pub fn rename_column(table: &str, from: &str, to: &str) -> Statement {
    Statement::plain(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(from),
        quote_ident(to)
    ))
}

pub fn change_nullability(table: &str, column: &str, nullable: bool) -> Statement {
    let action = if nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
    Statement::plain(format!(
        "ALTER TABLE {} ALTER COLUMN {} {}",
        quote_ident(table),
        quote_ident(column),
        action
    ))
}

pub fn add_index(table: &str, columns: &[String], options: &IndexOptions) -> Statement {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    Statement::plain(format!(
        "CREATE {}INDEX {} ON {} ({})",
        if options.unique { "UNIQUE " } else { "" },
        quote_ident(&options.resolved_name(table, columns)),
        quote_ident(table),
        cols.join(", ")
    ))
}

/// DuckDB index names are schema-wide, so the table is not part of the statement.
pub fn remove_index(name: &str) -> Statement {
    Statement::plain(format!("DROP INDEX {}", quote_ident(name)))
}

pub fn insert(table: &str, row: &serde_json::Map<String, Value>) -> Statement {
    let columns: Vec<String> = row.keys().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; row.len()].join(", ");
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders
        ),
        params: row.values().cloned().collect(),
    }
}

pub fn delete(table: &str, predicate: &Predicate) -> Statement {
    let mut params = Vec::new();
    let condition = render_predicate(predicate, &mut params);
    Statement {
        sql: format!("DELETE FROM {} WHERE {}", quote_ident(table), condition),
        params,
    }
}

pub fn update(table: &str, set: &[(String, Value)], predicate: &Predicate) -> Statement {
    let mut params = Vec::new();
    let assignments: Vec<String> = set
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = ?", quote_ident(column))
        })
        .collect();
    let condition = render_predicate(predicate, &mut params);
    Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            assignments.join(", "),
            condition
        ),
        params,
    }
}

/// Render a predicate, pushing its values onto `params` in placeholder order
pub fn render_predicate(predicate: &Predicate, params: &mut Vec<Value>) -> String {
    match predicate {
        Predicate::All => "TRUE".to_string(),
        Predicate::Eq { column, value } if value.is_null() => {
            format!("{} IS NULL", quote_ident(column))
        }
        Predicate::Eq { column, value } => {
            params.push(value.clone());
            format!("{} = ?", quote_ident(column))
        }
        Predicate::IsNull { column } => format!("{} IS NULL", quote_ident(column)),
        Predicate::NotNull { column } => format!("{} IS NOT NULL", quote_ident(column)),
        Predicate::In { values, .. } if values.is_empty() => "FALSE".to_string(),
        Predicate::In { column, values } => {
            params.extend(values.iter().cloned());
            format!(
                "{} IN ({})",
                quote_ident(column),
                vec!["?"; values.len()].join(", ")
            )
        }
        Predicate::And { all } if all.is_empty() => "TRUE".to_string(),
        Predicate::And { all } => {
            let parts: Vec<String> = all
                .iter()
                .map(|p| format!("({})", render_predicate(p, params)))
                .collect();
            parts.join(" AND ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ColumnType;
    use serde_json::json;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("jeune"), "\"jeune\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_render_literal() {
        assert_eq!(render_literal(&json!(null)), "NULL");
        assert_eq!(render_literal(&json!(false)), "FALSE");
        assert_eq!(render_literal(&json!(30)), "30");
        assert_eq!(render_literal(&json!("l'agence")), "'l''agence'");
    }

    #[test]
    fn test_create_table_renders_constraints() {
        let stmt = create_table(
            "jeune",
            &[
                ColumnSpec::new("id", ColumnType::Varchar(None)).primary_key(),
                ColumnSpec::new("nom", ColumnType::Varchar(None)).not_null(),
                ColumnSpec::new("id_conseiller", ColumnType::Varchar(None))
                    .references("conseiller", "id"),
                ColumnSpec::new("actif", ColumnType::Boolean).default_value(true),
            ],
        );

        assert_eq!(
            stmt.sql,
            "CREATE TABLE \"jeune\" (\"id\" VARCHAR PRIMARY KEY, \"nom\" VARCHAR NOT NULL, \
             \"id_conseiller\" VARCHAR REFERENCES \"conseiller\"(\"id\"), \
             \"actif\" BOOLEAN DEFAULT TRUE)"
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_add_not_null_column_splits_constraint() {
        let statements = add_column(
            "action",
            &ColumnSpec::new("statut", ColumnType::Varchar(None))
                .not_null()
                .default_value("not_started"),
        );

        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].sql,
            "ALTER TABLE \"action\" ADD COLUMN \"statut\" VARCHAR DEFAULT 'not_started'"
        );
        assert_eq!(
            statements[1].sql,
            "ALTER TABLE \"action\" ALTER COLUMN \"statut\" SET NOT NULL"
        );
    }

    #[test]
    fn test_add_index_default_name() {
        let stmt = add_index(
            "action",
            &["id_jeune".to_string(), "statut".to_string()],
            &IndexOptions::default(),
        );
        assert_eq!(
            stmt.sql,
            "CREATE INDEX \"action_id_jeune_statut\" ON \"action\" (\"id_jeune\", \"statut\")"
        );

        let unique = add_index(
            "jeune",
            &["email".to_string()],
            &IndexOptions {
                name: Some("jeune_email_unique".to_string()),
                unique: true,
            },
        );
        assert!(unique.sql.starts_with("CREATE UNIQUE INDEX \"jeune_email_unique\""));
    }

    #[test]
    fn test_insert_binds_values_in_column_order() {
        let row = json!({ "id": "41", "nom": "Tavernier", "prenom": "Nils" });
        let stmt = insert("conseiller", row.as_object().unwrap());

        assert_eq!(
            stmt.sql,
            "INSERT INTO \"conseiller\" (\"id\", \"nom\", \"prenom\") VALUES (?, ?, ?)"
        );
        assert_eq!(stmt.params, vec![json!("41"), json!("Tavernier"), json!("Nils")]);
    }

    #[test]
    fn test_delete_with_compound_predicate() {
        let stmt = delete(
            "evenement_engagement",
            &Predicate::and(vec![
                Predicate::eq("categorie", "Action"),
                Predicate::is_null("code"),
                Predicate::In {
                    column: "action".to_string(),
                    values: vec![json!("Création"), json!("Modification")],
                },
            ]),
        );

        assert_eq!(
            stmt.sql,
            "DELETE FROM \"evenement_engagement\" WHERE (\"categorie\" = ?) AND (\"code\" IS NULL) \
             AND (\"action\" IN (?, ?))"
        );
        assert_eq!(
            stmt.params,
            vec![json!("Action"), json!("Création"), json!("Modification")]
        );
    }

    #[test]
    fn test_eq_null_renders_is_null() {
        let mut params = Vec::new();
        let sql = render_predicate(&Predicate::eq("nom", Value::Null), &mut params);
        assert_eq!(sql, "\"nom\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_update_orders_set_params_before_filter() {
        let stmt = update(
            "agence",
            &[("code_departement".to_string(), json!("01"))],
            &Predicate::eq("code_departement", "1"),
        );
        assert_eq!(
            stmt.sql,
            "UPDATE \"agence\" SET \"code_departement\" = ? WHERE \"code_departement\" = ?"
        );
        assert_eq!(stmt.params, vec![json!("01"), json!("1")]);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let stmt = delete(
            "t",
            &Predicate::In {
                column: "id".to_string(),
                values: vec![],
            },
        );
        assert_eq!(stmt.sql, "DELETE FROM \"t\" WHERE FALSE");
    }
}
