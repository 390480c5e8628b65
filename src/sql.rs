use std::collections::HashMap;

use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertAgency {
        id: Ulid,
        name: String,
    },
    InsertSite {
        id: Ulid,
        agency_id: Ulid,
        name: String,
    },
    InsertBed {
        id: Ulid,
        site_id: Ulid,
        name: String,
        room: Option<String>,
        bed_type: Option<String>,
    },
    InsertCase {
        id: Ulid,
        name: String,
    },
    InsertRequest {
        draft: NewRequest,
    },
    SelectRequest {
        id: Ulid,
    },
    SelectRequests {
        filter: RequestFilter,
    },
    /// Allocate a bed to a pending request.
    InsertOccupancy {
        request_id: Ulid,
        bed_id: Option<Ulid>,
        check_in_date: Option<String>,
        notes: Option<String>,
    },
    InsertWalkIn {
        case_id: Ulid,
        bed_id: Ulid,
        check_in_date: String,
        notes: Option<String>,
    },
    /// Check-out.
    DeleteOccupancy {
        id: Ulid,
    },
    InsertDenial {
        request_id: Ulid,
        reason: String,
    },
    DeleteRequest {
        id: Ulid,
    },
    SelectConflicts {
        case_id: Ulid,
        agency_id: Ulid,
    },
    SelectAvailableBeds {
        site_id: Ulid,
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
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Insert,
    Delete,
    Select,
}

/// Statement verb and target table, without interpreting any values. Lets a
/// prepared statement be described while its parameters are still `$n`.
pub fn statement_target(sql: &str) -> Option<(Verb, String)> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => Some((Verb::Insert, insert_table_name(insert).ok()?)),
        Statement::Delete(delete) => Some((Verb::Delete, delete_table_name(delete).ok()?)),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => {
                let table = table_factor_name(&select.from.first()?.relation).ok()?;
                Some((Verb::Select, table))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Default column order per table, used when the INSERT names no columns.
fn insert_columns(table: &str) -> Option<&'static [&'static str]> {
    Some(match table {
        "agencies" => &["id", "name"],
        "sites" => &["id", "agency_id", "name"],
        "beds" => &["id", "site_id", "name", "room", "bed_type"],
        "cases" => &["id", "name"],
        "requests" => &["id", "case_id", "agency_id", "site_id", "date_of_arrival", "notes"],
        "occupancies" => &["request_id", "bed_id", "check_in_date", "notes"],
        "walk_ins" => &["case_id", "bed_id", "check_in_date", "notes"],
        "denials" => &["request_id", "reason"],
        _ => return None,
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = insert_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let row = Row::from_insert(insert, defaults)?;

    match table.as_str() {
        "agencies" => Ok(Command::InsertAgency {
            id: row.ulid("id")?,
            name: row.string("name")?,
        }),
        "sites" => Ok(Command::InsertSite {
            id: row.ulid("id")?,
            agency_id: row.ulid("agency_id")?,
            name: row.string("name")?,
        }),
        "beds" => Ok(Command::InsertBed {
            id: row.ulid("id")?,
            site_id: row.ulid("site_id")?,
            name: row.string("name")?,
            room: row.opt_string("room")?,
            bed_type: row.opt_string("bed_type")?,
        }),
        "cases" => Ok(Command::InsertCase {
            id: row.ulid("id")?,
            name: row.string("name")?,
        }),
        "requests" => Ok(Command::InsertRequest {
            draft: NewRequest {
                id: row.opt_ulid("id")?,
                case_id: row.opt_ulid("case_id")?,
                agency_id: row.opt_ulid("agency_id")?,
                site_id: row.opt_ulid("site_id")?,
                date_of_arrival: row.opt_string("date_of_arrival")?,
                notes: row.opt_string("notes")?,
            },
        }),
        "occupancies" => Ok(Command::InsertOccupancy {
            request_id: row.ulid("request_id")?,
            bed_id: row.opt_ulid("bed_id")?,
            check_in_date: row.opt_string("check_in_date")?,
            notes: row.opt_string("notes")?,
        }),
        "walk_ins" => Ok(Command::InsertWalkIn {
            case_id: row.ulid("case_id")?,
            bed_id: row.ulid("bed_id")?,
            check_in_date: row.opt_string("check_in_date")?.unwrap_or_default(),
            notes: row.opt_string("notes")?,
        }),
        // A NULL or absent reason reaches the engine as blank and is rejected there.
        "denials" => Ok(Command::InsertDenial {
            request_id: row.ulid("request_id")?,
            reason: row.opt_string("reason")?.unwrap_or_default(),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "requests" => Ok(Command::DeleteRequest { id }),
        "occupancies" => Ok(Command::DeleteOccupancy { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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

    let mut filters = HashMap::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter_ulid = |col: &'static str| -> Result<Ulid, SqlError> {
        filters
            .get(col)
            .ok_or(SqlError::MissingFilter(col))
            .and_then(parse_ulid_expr)
    };

    match table.as_str() {
        "requests" => {
            if filters.contains_key("id") {
                return Ok(Command::SelectRequest { id: filter_ulid("id")? });
            }
            let mut filter = if filters.contains_key("site_id") {
                RequestFilter::site(filter_ulid("site_id")?)
            } else if filters.contains_key("agency_id") {
                RequestFilter::agency(filter_ulid("agency_id")?)
            } else {
                return Err(SqlError::MissingFilter("site_id or agency_id"));
            };
            if let Some(expr) = filters.get("status") {
                let status = parse_string_expr(expr)?;
                filter.status = Some(status.parse().map_err(SqlError::Parse)?);
            }
            if let Some(expr) = filters.get("page") {
                filter.page = parse_usize_expr(expr)?;
            }
            if let Some(expr) = filters.get("page_size") {
                filter.page_size = Some(parse_usize_expr(expr)?);
            }
            Ok(Command::SelectRequests { filter })
        }
        "conflicts" => Ok(Command::SelectConflicts {
            case_id: filter_ulid("case_id")?,
            agency_id: filter_ulid("agency_id")?,
        }),
        "available_beds" => Ok(Command::SelectAvailableBeds {
            site_id: filter_ulid("site_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Walk an AND-chain of `column = value` predicates.
fn collect_eq_filters(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.insert(col, right.as_ref().clone());
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row {
    table: String,
    values: HashMap<String, Expr>,
}

impl Row {
    fn from_insert(insert: &ast::Insert, defaults: &[&str]) -> Result<Self, SqlError> {
        let table = insert_table_name(insert)?;
        let values = extract_insert_values(insert)?;
        let columns: Vec<String> = if insert.columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() > columns.len() || (!insert.columns.is_empty() && values.len() != columns.len()) {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(unknown.clone()));
        }
        Ok(Self {
            table,
            values: columns.into_iter().zip(values).collect(),
        })
    }

    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.values
            .get(col)
            .ok_or_else(|| SqlError::MissingColumn(self.table.clone(), col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.required(col)?)
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.values.get(col).map_or(Ok(None), parse_ulid_or_null)
    }

    fn string(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.required(col)?)
    }

    fn opt_string(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.values.get(col).map_or(Ok(None), parse_string_or_null)
    }
}

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
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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
                parse_ulid_expr(right)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_usize_expr(expr: &Expr) -> Result<usize, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad number {s}: {e}"))),
        _ => Err(SqlError::Parse(format!("expected number, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(String, &'static str),
    WrongArity(String, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
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

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_agency() {
        let sql = format!("INSERT INTO agencies (id, name) VALUES ('{ID}', 'Harbor Light')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAgency {
                id: ulid(ID),
                name: "Harbor Light".into()
            }
        );
    }

    #[test]
    fn parse_insert_bed_without_column_list() {
        let sql = format!("INSERT INTO beds VALUES ('{ID}', '{OTHER}', 'B1', 'Dorm A', NULL)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBed {
                id: ulid(ID),
                site_id: ulid(OTHER),
                name: "B1".into(),
                room: Some("Dorm A".into()),
                bed_type: None,
            }
        );
    }

    #[test]
    fn parse_insert_bed_named_columns_any_order() {
        let sql = format!("INSERT INTO beds (name, site_id, id) VALUES ('B2', '{OTHER}', '{ID}')");
        match parse_sql(&sql).unwrap() {
            Command::InsertBed { id, site_id, room, .. } => {
                assert_eq!(id, ulid(ID));
                assert_eq!(site_id, ulid(OTHER));
                assert_eq!(room, None);
            }
            cmd => panic!("expected InsertBed, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_request_leaves_missing_fields_to_engine() {
        let sql = format!("INSERT INTO requests (case_id, site_id, date_of_arrival) VALUES ('{ID}', NULL, '2024-11-04')");
        match parse_sql(&sql).unwrap() {
            Command::InsertRequest { draft } => {
                assert_eq!(draft.id, None);
                assert_eq!(draft.case_id, Some(ulid(ID)));
                assert_eq!(draft.agency_id, None);
                assert_eq!(draft.site_id, None);
                assert_eq!(draft.date_of_arrival.as_deref(), Some("2024-11-04"));
            }
            cmd => panic!("expected InsertRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_allocation() {
        let sql = format!("INSERT INTO occupancies (request_id, bed_id) VALUES ('{ID}', '{OTHER}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertOccupancy {
                request_id: ulid(ID),
                bed_id: Some(ulid(OTHER)),
                check_in_date: None,
                notes: None,
            }
        );
    }

    #[test]
    fn parse_walk_in() {
        let sql = format!("INSERT INTO walk_ins VALUES ('{ID}', '{OTHER}', '2024-11-04', 'police drop-off')");
        match parse_sql(&sql).unwrap() {
            Command::InsertWalkIn { check_in_date, notes, .. } => {
                assert_eq!(check_in_date, "2024-11-04");
                assert_eq!(notes.as_deref(), Some("police drop-off"));
            }
            cmd => panic!("expected InsertWalkIn, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_denial_with_null_reason() {
        let sql = format!("INSERT INTO denials (request_id, reason) VALUES ('{ID}', NULL)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertDenial {
                request_id: ulid(ID),
                reason: String::new()
            }
        );
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM requests WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteRequest { id: ulid(ID) });
        let sql = format!("DELETE FROM occupancies WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteOccupancy { id: ulid(ID) });
        let sql = format!("DELETE FROM beds WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_select_request_by_id() {
        let sql = format!("SELECT * FROM requests WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectRequest { id: ulid(ID) });
    }

    #[test]
    fn parse_list_with_status_and_paging() {
        let sql = format!(
            "SELECT * FROM requests WHERE site_id = '{ID}' AND status = 'pending' AND page = 2 AND page_size = 10"
        );
        let mut expected = RequestFilter::site(ulid(ID)).with_status(RequestStatus::Pending);
        expected.page = 2;
        expected.page_size = Some(10);
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectRequests { filter: expected });
    }

    #[test]
    fn parse_list_by_agency() {
        let sql = format!("SELECT * FROM requests WHERE agency_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectRequests {
                filter: RequestFilter::agency(ulid(ID))
            }
        );
    }

    #[test]
    fn list_needs_a_scope() {
        let sql = "SELECT * FROM requests WHERE status = 'PENDING'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter(_))));
        let sql = format!("SELECT * FROM requests WHERE site_id = '{ID}' AND status = 'OPEN'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_conflicts_query() {
        let sql = format!("SELECT * FROM conflicts WHERE case_id = '{ID}' AND agency_id = '{OTHER}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectConflicts {
                case_id: ulid(ID),
                agency_id: ulid(OTHER)
            }
        );
        let sql = format!("SELECT * FROM conflicts WHERE case_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("agency_id"))));
    }

    #[test]
    fn parse_available_beds() {
        let sql = format!("SELECT * FROM available_beds WHERE site_id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailableBeds { site_id: ulid(ID) }
        );
    }

    #[test]
    fn unknown_column_is_rejected() {
        let sql = format!("INSERT INTO cases (id, name, dob) VALUES ('{ID}', 'X', '1990-01-01')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "dob"));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let sql = format!("INSERT INTO cases (id, name) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(..))));
    }

    #[test]
    fn bad_ulid_is_a_parse_error() {
        let sql = "SELECT * FROM requests WHERE id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn statement_target_ignores_placeholders() {
        assert_eq!(
            statement_target("INSERT INTO occupancies (request_id, bed_id) VALUES ($1, $2)"),
            Some((Verb::Insert, "occupancies".into()))
        );
        assert_eq!(
            statement_target("SELECT * FROM Requests WHERE site_id = $1"),
            Some((Verb::Select, "requests".into()))
        );
        assert_eq!(statement_target("not sql"), None);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
