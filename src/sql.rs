use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        user: String,
        from: NaiveDate,
        to: NaiveDate,
    },
    UpdateReservation {
        id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    DeleteReservation {
        id: Ulid,
    },
    /// All reservations still relevant today.
    SelectReservations,
    SelectReservationsByUser {
        user: String,
    },
    SelectReservationById {
        id: Ulid,
    },
    /// Free intervals of the booking horizon.
    SelectAvailability,
    /// Whether any reservation overlaps the given range.
    SelectTaken {
        from: NaiveDate,
        to: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// `INSERT INTO reservations ("user", "from", "to") VALUES ('alice', '2021-07-08', '2021-07-10')`
/// Values are positional; the id is assigned by the engine, never supplied.
fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let values = extract_insert_values(insert)?;
    if values.len() < 3 {
        return Err(SqlError::WrongArity("reservations", 3, values.len()));
    }
    Ok(Command::InsertReservation {
        user: parse_string(&values[0])?,
        from: parse_date(&values[1])?,
        to: parse_date(&values[2])?,
    })
}

/// `UPDATE reservations SET "from" = '...', "to" = '...' WHERE id = '...'`
fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let (mut from, mut to) = (None, None);
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        };
        match col.as_deref() {
            Some("from") => from = Some(parse_date(&assignment.value)?),
            Some("to") => to = Some(parse_date(&assignment.value)?),
            Some(other) => {
                return Err(SqlError::Unsupported(format!("cannot assign column {other}")))
            }
            None => return Err(SqlError::Parse("unsupported assignment target".into())),
        }
    }

    Ok(Command::UpdateReservation {
        id: extract_where_id(selection)?,
        from: from.ok_or(SqlError::MissingFilter("from"))?,
        to: to.ok_or(SqlError::MissingFilter("to"))?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    Ok(Command::DeleteReservation {
        id: extract_where_id(&delete.selection)?,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "reservations" => parse_select_reservations(&select.selection),
        "availability" => {
            if select.selection.is_some() {
                return Err(SqlError::Unsupported("availability takes no filter".into()));
            }
            Ok(Command::SelectAvailability)
        }
        "taken" => parse_select_taken(&select.selection),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select_reservations(selection: &Option<Expr>) -> Result<Command, SqlError> {
    let Some(selection) = selection else {
        return Ok(Command::SelectReservations);
    };
    match selection {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left).as_deref() {
            Some("id") => Ok(Command::SelectReservationById {
                id: parse_ulid(right)?,
            }),
            Some("user") => Ok(Command::SelectReservationsByUser {
                user: parse_string(right)?,
            }),
            _ => Err(SqlError::Unsupported("filter must be id or user".into())),
        },
        _ => Err(SqlError::Unsupported("filter must be id or user".into())),
    }
}

/// `SELECT * FROM taken WHERE "from" = '...' AND "to" = '...'`
fn parse_select_taken(selection: &Option<Expr>) -> Result<Command, SqlError> {
    let selection = selection.as_ref().ok_or(SqlError::MissingFilter("from"))?;
    let (mut from, mut to) = (None, None);
    extract_taken_filters(selection, &mut from, &mut to)?;
    Ok(Command::SelectTaken {
        from: from.ok_or(SqlError::MissingFilter("from"))?,
        to: to.ok_or(SqlError::MissingFilter("to"))?,
    })
}

fn extract_taken_filters(
    expr: &Expr,
    from: &mut Option<NaiveDate>,
    to: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_taken_filters(left, from, to)?;
                extract_taken_filters(right, from, to)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("from") => *from = Some(parse_date(right)?),
                Some("to") => *to = Some(parse_date(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Dates travel as ISO-8601 strings: `'2021-07-08'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = r#"INSERT INTO reservations ("user", "from", "to") VALUES ('alice', '2021-07-08', '2021-07-10')"#;
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertReservation {
                user: "alice".into(),
                from: d(2021, 7, 8),
                to: d(2021, 7, 10),
            }
        );
    }

    #[test]
    fn parse_insert_without_column_list() {
        let sql = "INSERT INTO reservations VALUES ('alice', '2021-07-08', '2021-07-10')";
        let cmd = parse_sql(sql).unwrap();
        assert!(matches!(cmd, Command::InsertReservation { .. }));
    }

    #[test]
    fn parse_insert_too_few_values() {
        let sql = "INSERT INTO reservations VALUES ('alice', '2021-07-08')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity(_, 3, 2))));
    }

    #[test]
    fn parse_insert_bad_date() {
        let sql = "INSERT INTO reservations VALUES ('alice', '08/07/2021', '2021-07-10')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_reservation() {
        let sql = r#"UPDATE reservations SET "from" = '2021-07-10', "to" = '2021-07-12' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'"#;
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::UpdateReservation { id, from, to } => {
                assert_eq!(id.to_string(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
                assert_eq!(from, d(2021, 7, 10));
                assert_eq!(to, d(2021, 7, 12));
            }
            _ => panic!("expected UpdateReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_without_id_errors() {
        let sql = r#"UPDATE reservations SET "from" = '2021-07-10', "to" = '2021-07-12'"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_update_missing_assignment_errors() {
        let sql = r#"UPDATE reservations SET "from" = '2021-07-10' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("to"))));
    }

    #[test]
    fn parse_update_unknown_column_errors() {
        let sql = r#"UPDATE reservations SET "user" = 'mallory' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_delete_reservation() {
        let sql = "DELETE FROM reservations WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::DeleteReservation { id } => {
                assert_eq!(id.to_string(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
            }
            _ => panic!("expected DeleteReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_without_id_errors() {
        let sql = "DELETE FROM reservations";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_select_all_reservations() {
        let cmd = parse_sql("SELECT * FROM reservations").unwrap();
        assert_eq!(cmd, Command::SelectReservations);
    }

    #[test]
    fn parse_select_reservations_by_user() {
        let sql = r#"SELECT * FROM reservations WHERE "user" = 'alice'"#;
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectReservationsByUser {
                user: "alice".into()
            }
        );
    }

    #[test]
    fn parse_select_reservation_by_id() {
        let sql = "SELECT * FROM reservations WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        let cmd = parse_sql(sql).unwrap();
        assert!(matches!(cmd, Command::SelectReservationById { .. }));
    }

    #[test]
    fn parse_select_availability() {
        let cmd = parse_sql("SELECT * FROM availability").unwrap();
        assert_eq!(cmd, Command::SelectAvailability);
    }

    #[test]
    fn parse_select_taken() {
        let sql = r#"SELECT * FROM taken WHERE "from" = '2021-07-08' AND "to" = '2021-07-10'"#;
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectTaken {
                from: d(2021, 7, 8),
                to: d(2021, 7, 10),
            }
        );
    }

    #[test]
    fn parse_select_taken_missing_filter_errors() {
        let sql = r#"SELECT * FROM taken WHERE "from" = '2021-07-08'"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("to"))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "SELECT * FROM rooms";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
