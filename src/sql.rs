use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{AttendanceEvent, ClearRequest};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug)]
pub enum Command {
    InsertPc {
        id: Ulid,
        code: String,
        row: u8,
        status: PcStatus,
        specs: PcSpecs,
    },
    UpdatePc {
        id: Ulid,
        patch: PcPatch,
    },
    DeletePc {
        id: Ulid,
    },
    SelectPcs {
        filter: PcFilter,
    },
    InsertStudent {
        student: StudentRecord,
    },
    InsertBatch {
        batch: BatchRecord,
    },
    /// `booked_by` is filled in from the session, never from SQL.
    InsertBooking {
        draft: BookingDraft,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    ClearBookings {
        request: ClearRequest,
    },
    SelectBookings {
        id: Option<Ulid>,
        filter: BookingFilter,
    },
    SelectAvailability {
        date: NaiveDate,
    },
    SelectPreviousBookings {
        date: Option<NaiveDate>,
    },
    Replicate {
        target: NaiveDate,
        source: Option<NaiveDate>,
    },
    MarkAttendance {
        event: AttendanceEvent,
    },
}

/// The first statement of `sql`.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    parse_batch(sql)?.into_iter().next().ok_or(SqlError::Empty)
}

/// Parse every `;`-separated statement, as a simple query may carry several.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
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

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressed by column name.
struct Row<'a> {
    table: &'static str,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn new(table: &'static str, pairs: impl IntoIterator<Item = (String, &'a Expr)>, allowed: &[&str]) -> Result<Self, SqlError> {
        let mut values = HashMap::new();
        for (col, expr) in pairs {
            if !allowed.contains(&col.as_str()) {
                return Err(SqlError::UnknownColumn(table, col));
            }
            values.insert(col, expr);
        }
        Ok(Self { table, values })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.get(col).copied()
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.require(col)?)
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map_or(Ok(None), parse_ulid_or_null)
    }

    fn string(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string(self.require(col)?)
    }

    fn opt_string(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.get(col).map_or(Ok(None), parse_string_or_null)
    }

    fn date(&self, col: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date(self.require(col)?)
    }

    fn opt_date(&self, col: &str) -> Result<Option<NaiveDate>, SqlError> {
        match self.get(col) {
            Some(expr) if !is_null(expr) => parse_date(expr).map(Some),
            _ => Ok(None),
        }
    }

    fn slot(&self, col: &'static str) -> Result<Slot, SqlError> {
        parse_slot(self.require(col)?)
    }

    fn opt_slot(&self, col: &str) -> Result<Option<Slot>, SqlError> {
        match self.get(col) {
            Some(expr) if !is_null(expr) => parse_slot(expr).map(Some),
            _ => Ok(None),
        }
    }

    fn specs(&self) -> Result<PcSpecs, SqlError> {
        Ok(PcSpecs {
            processor: self.opt_string("processor")?,
            ram: self.opt_string("ram")?,
            storage: self.opt_string("storage")?,
            os: self.opt_string("os")?,
            notes: self.opt_string("notes")?,
        })
    }
}

const PC_COLUMNS: &[&str] = &["id", "code", "row_no", "status", "processor", "ram", "storage", "os", "notes"];
const BOOKING_INSERT_COLUMNS: &[&str] = &[
    "id",
    "pc_id",
    "date",
    "slot",
    "person_name",
    "student_id",
    "batch_id",
    "teacher_id",
    "priority",
    "purpose",
    "notes",
];
const BOOKING_UPDATE_COLUMNS: &[&str] = &[
    "pc_id",
    "date",
    "slot",
    "person_name",
    "status",
    "priority",
    "purpose",
    "notes",
    "is_active",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!("INSERT INTO {table} needs a column list")));
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
    }
    let pairs = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(values.iter());

    match table.as_str() {
        "pcs" => {
            let row = Row::new("pcs", pairs, PC_COLUMNS)?;
            Ok(Command::InsertPc {
                id: row.ulid("id")?,
                code: row.string("code")?,
                row: parse_u8(row.require("row_no")?)?,
                status: match row.get("status") {
                    Some(expr) => parse_pc_status(expr)?,
                    None => PcStatus::Active,
                },
                specs: row.specs()?,
            })
        }
        "students" => {
            let row = Row::new("students", pairs, &["id", "name", "batch_id"])?;
            Ok(Command::InsertStudent {
                student: StudentRecord {
                    id: row.ulid("id")?,
                    name: row.string("name")?,
                    batch_id: row.opt_ulid("batch_id")?,
                },
            })
        }
        "batches" => {
            let row = Row::new("batches", pairs, &["id", "name", "timing"])?;
            Ok(Command::InsertBatch {
                batch: BatchRecord {
                    id: row.ulid("id")?,
                    name: row.string("name")?,
                    timing: row.slot("timing")?,
                },
            })
        }
        "bookings" => {
            let row = Row::new("bookings", pairs, BOOKING_INSERT_COLUMNS)?;
            let mut draft = BookingDraft::new(
                row.ulid("id")?,
                row.ulid("pc_id")?,
                row.date("date")?,
                row.slot("slot")?,
                row.opt_string("person_name")?.unwrap_or_default(),
            );
            draft.student_id = row.opt_ulid("student_id")?;
            draft.batch_id = row.opt_ulid("batch_id")?;
            draft.teacher_id = row.opt_ulid("teacher_id")?;
            if let Some(expr) = row.get("priority") {
                draft.priority = parse_priority(expr)?;
            }
            draft.purpose = row.opt_string("purpose")?;
            draft.notes = row.opt_string("notes")?.unwrap_or_default();
            Ok(Command::InsertBooking { draft })
        }
        "replications" => {
            let row = Row::new("replications", pairs, &["target_date", "source_date"])?;
            Ok(Command::Replicate {
                target: row.date("target_date")?,
                source: row.opt_date("source_date")?,
            })
        }
        "attendance" => {
            let row = Row::new("attendance", pairs, &["student_id", "status", "date", "slot"])?;
            Ok(Command::MarkAttendance {
                event: AttendanceEvent {
                    student_id: row.ulid("student_id")?,
                    status: parse_attendance_status(row.require("status")?)?,
                    date: row.date("date")?,
                    slot: row.opt_slot("slot")?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut pairs = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        pairs.push((col, &a.value));
    }

    match name.as_str() {
        "pcs" => {
            let row = Row::new("pcs", pairs, &PC_COLUMNS[1..])?;
            Ok(Command::UpdatePc {
                id,
                patch: PcPatch {
                    code: row.get("code").map(parse_string).transpose()?,
                    row: row.get("row_no").map(parse_u8).transpose()?,
                    status: row.get("status").map(parse_pc_status).transpose()?,
                    specs: spec_patch(&row)?,
                },
            })
        }
        "bookings" => {
            let row = Row::new("bookings", pairs, BOOKING_UPDATE_COLUMNS)?;
            Ok(Command::UpdateBooking {
                id,
                patch: BookingPatch {
                    pc_id: row.get("pc_id").map(parse_ulid).transpose()?,
                    date: row.get("date").map(parse_date).transpose()?,
                    slot: row.get("slot").map(parse_slot).transpose()?,
                    person_name: row
                        .get("person_name")
                        .map(parse_string_or_null)
                        .transpose()?
                        .map(Option::unwrap_or_default),
                    status: row.get("status").map(parse_booking_status).transpose()?,
                    priority: row.get("priority").map(parse_priority).transpose()?,
                    purpose: row
                        .get("purpose")
                        .map(parse_string_or_null)
                        .transpose()?
                        .map(Option::unwrap_or_default),
                    notes: row
                        .get("notes")
                        .map(parse_string_or_null)
                        .transpose()?
                        .map(Option::unwrap_or_default),
                    is_active: row.get("is_active").map(parse_bool).transpose()?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(name)),
    }
}

/// Spec columns named in an UPDATE. `NULL` becomes an empty string, which
/// `PcSpecs::merge` treats as "clear".
fn spec_patch(row: &Row<'_>) -> Result<Option<PcSpecs>, SqlError> {
    let field = |col: &str| -> Result<Option<String>, SqlError> {
        row.get(col)
            .map(|expr| parse_string_or_null(expr).map(Option::unwrap_or_default))
            .transpose()
    };
    let specs = PcSpecs {
        processor: field("processor")?,
        ram: field("ram")?,
        storage: field("storage")?,
        os: field("os")?,
        notes: field("notes")?,
    };
    Ok((specs != PcSpecs::default()).then_some(specs))
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "pcs" => Ok(Command::DeletePc {
            id: extract_where_id(&delete.selection)?,
        }),
        "bookings" => {
            let filters = Filters::collect(delete.selection.as_ref())?;
            if let Some(id) = filters.eq("id") {
                if filters.len() > 1 {
                    return Err(SqlError::Unsupported("id combined with other filters".into()));
                }
                return Ok(Command::DeleteBooking { id: parse_ulid(id)? });
            }
            filters.only(&["date", "slot", "pc_id", "confirm"])?;
            let slot = match filters.eq("slot") {
                Some(expr) if parse_string(expr)?.eq_ignore_ascii_case("all") => None,
                Some(expr) => Some(parse_slot(expr)?),
                None => None,
            };
            let pc_ids = match (filters.eq("pc_id"), filters.in_list("pc_id")) {
                (Some(expr), _) => Some(vec![parse_ulid(expr)?]),
                (None, Some(list)) => Some(list.iter().map(parse_ulid).collect::<Result<_, _>>()?),
                (None, None) => None,
            };
            Ok(Command::ClearBookings {
                request: ClearRequest {
                    date: filters.eq("date").map(parse_date).transpose()?,
                    slot,
                    pc_ids,
                    confirm: filters.eq("confirm").map(parse_bool).transpose()?.unwrap_or(false),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "pcs" => {
            filters.only(&["row_no", "status"])?;
            Ok(Command::SelectPcs {
                filter: PcFilter {
                    row: filters.eq("row_no").map(parse_u8).transpose()?,
                    status: filters.eq("status").map(parse_pc_status).transpose()?,
                },
            })
        }
        "bookings" => {
            filters.only(&["id", "date", "slot", "pc_id", "status"])?;
            Ok(Command::SelectBookings {
                id: filters.eq("id").map(parse_ulid).transpose()?,
                filter: BookingFilter {
                    date: filters.eq("date").map(parse_date).transpose()?,
                    slot: filters.eq("slot").map(parse_slot).transpose()?,
                    pc_id: filters.eq("pc_id").map(parse_ulid).transpose()?,
                    status: filters.eq("status").map(parse_booking_status).transpose()?,
                },
            })
        }
        "availability" => {
            filters.only(&["date"])?;
            Ok(Command::SelectAvailability {
                date: parse_date(filters.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
            })
        }
        "previous_bookings" => {
            filters.only(&["date"])?;
            Ok(Command::SelectPreviousBookings {
                date: filters.eq("date").map(parse_date).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Conjunctive `col = value` and `col IN (...)` predicates of a WHERE clause.
#[derive(Default)]
struct Filters<'a> {
    eq: HashMap<String, &'a Expr>,
    in_lists: HashMap<String, &'a [Expr]>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.visit(expr)?;
        }
        Ok(filters)
    }

    fn visit(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.visit(inner),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                self.visit(left)?;
                self.visit(right)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                self.eq.insert(col, right);
                Ok(())
            }
            Expr::InList {
                expr: col,
                list,
                negated: false,
            } => {
                let col = expr_column_name(col)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {col}")))?;
                if list.len() > crate::limits::MAX_IN_CLAUSE_IDS {
                    return Err(SqlError::Parse(format!("IN list longer than {}", crate::limits::MAX_IN_CLAUSE_IDS)));
                }
                self.in_lists.insert(col, list.as_slice());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
        }
    }

    fn eq(&self, col: &str) -> Option<&'a Expr> {
        self.eq.get(col).copied()
    }

    fn in_list(&self, col: &str) -> Option<&'a [Expr]> {
        self.in_lists.get(col).copied()
    }

    fn len(&self) -> usize {
        self.eq.len() + self.in_lists.len()
    }

    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self
            .eq
            .keys()
            .chain(self.in_lists.keys())
            .find(|c| !allowed.contains(&c.as_str()))
        {
            Some(col) => Err(SqlError::Unsupported(format!("filter on {col}"))),
            None => Ok(()),
        }
    }
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
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
    if is_null(expr) {
        Ok(None)
    } else {
        parse_ulid(expr).map(Some)
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// Any label parses; the engine decides whether it may be written.
fn parse_slot(expr: &Expr) -> Result<Slot, SqlError> {
    Ok(Slot::from_label(parse_string(expr)?.trim()))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.parse().map_err(|e| SqlError::Parse(format!("bad integer: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => Ok(-parse_i64(expr)?),
            _ => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
        },
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_label<T>(expr: &Expr, what: &'static str, parse: fn(&str) -> Option<T>) -> Result<T, SqlError> {
    let s = parse_string(expr)?;
    parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown {what}: {s}")))
}

fn parse_pc_status(expr: &Expr) -> Result<PcStatus, SqlError> {
    parse_label(expr, "pc status", PcStatus::parse)
}

fn parse_booking_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    parse_label(expr, "booking status", BookingStatus::parse)
}

fn parse_priority(expr: &Expr) -> Result<Priority, SqlError> {
    parse_label(expr, "priority", Priority::parse)
}

fn parse_attendance_status(expr: &Expr) -> Result<AttendanceStatus, SqlError> {
    parse_label(expr, "attendance status", AttendanceStatus::parse)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
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
    const PC: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn parse_insert_pc_defaults() {
        let sql = format!("INSERT INTO pcs (id, code, row_no) VALUES ('{ID}', 'CS-01', 1)");
        match parse_sql(&sql).unwrap() {
            Command::InsertPc { id: pc_id, code, row, status, specs } => {
                assert_eq!(pc_id, id());
                assert_eq!(code, "CS-01");
                assert_eq!(row, 1);
                assert_eq!(status, PcStatus::Active);
                assert_eq!(specs, PcSpecs::default());
            }
            cmd => panic!("expected InsertPc, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_pc_with_specs() {
        let sql = format!(
            "INSERT INTO pcs (id, code, row_no, status, processor, ram, os) \
             VALUES ('{ID}', 'CS-02', 3, 'maintenance', 'i7-12700', '16GB', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertPc { status, specs, .. } => {
                assert_eq!(status, PcStatus::Maintenance);
                assert_eq!(specs.processor.as_deref(), Some("i7-12700"));
                assert_eq!(specs.ram.as_deref(), Some("16GB"));
                assert_eq!(specs.os, None);
            }
            cmd => panic!("expected InsertPc, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_columns_in_any_order() {
        let sql = format!("INSERT INTO pcs (row_no, code, id) VALUES (2, 'CS-09', '{ID}')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertPc { row: 2, .. }));
    }

    #[test]
    fn parse_insert_requires_column_list() {
        let sql = format!("INSERT INTO pcs VALUES ('{ID}', 'CS-01', 1)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_unknown_and_missing_columns() {
        let sql = format!("INSERT INTO pcs (id, code, row_no, colour) VALUES ('{ID}', 'CS-01', 1, 'red')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("pcs", c)) if c == "colour"));

        let sql = format!("INSERT INTO pcs (id, code) VALUES ('{ID}', 'CS-01')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("pcs", "row_no"))));
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, pc_id, date, slot, person_name, priority, purpose) \
             VALUES ('{ID}', '{PC}', '2025-01-10', '09:00-10:30', 'Alice', 'high', 'Thesis')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { draft } => {
                assert_eq!(draft.id, id());
                assert_eq!(draft.pc_id.to_string(), PC);
                assert_eq!(draft.date, date(10));
                assert_eq!(draft.slot, Slot::First);
                assert_eq!(draft.person_name, "Alice");
                assert_eq!(draft.priority, Priority::High);
                assert_eq!(draft.purpose.as_deref(), Some("Thesis"));
                assert!(draft.booked_by.is_none());
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_for_student() {
        let sql = format!(
            "INSERT INTO bookings (id, pc_id, date, slot, student_id) \
             VALUES ('{ID}', '{PC}', '2025-01-10', '14:00-15:30', '{ID}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { draft } => {
                assert_eq!(draft.person_name, "");
                assert_eq!(draft.student_id, Some(id()));
                assert_eq!(draft.slot, Slot::Fourth);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn nonstandard_slot_is_left_to_the_engine() {
        let sql = format!(
            "INSERT INTO bookings (id, pc_id, date, slot, person_name) \
             VALUES ('{ID}', '{PC}', '2025-01-10', '08:00-09:00', 'Alice')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { draft } => assert!(!draft.slot.is_standard()),
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_bad_date_errors() {
        let sql = format!(
            "INSERT INTO bookings (id, pc_id, date, slot, person_name) \
             VALUES ('{ID}', '{PC}', '10/01/2025', '09:00-10:30', 'Alice')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_directory_feed() {
        let sql = format!("INSERT INTO batches (id, name, timing) VALUES ('{ID}', 'Morning A', '10:30-12:00')");
        match parse_sql(&sql).unwrap() {
            Command::InsertBatch { batch } => assert_eq!(batch.timing, Slot::Second),
            cmd => panic!("expected InsertBatch, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO students (id, name, batch_id) VALUES ('{PC}', 'Alice', '{ID}')");
        match parse_sql(&sql).unwrap() {
            Command::InsertStudent { student } => {
                assert_eq!(student.name, "Alice");
                assert_eq!(student.batch_id, Some(id()));
            }
            cmd => panic!("expected InsertStudent, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_pc() {
        let sql = format!("UPDATE pcs SET status = 'inactive', ram = '32GB' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdatePc { id: pc_id, patch } => {
                assert_eq!(pc_id, id());
                assert_eq!(patch.status, Some(PcStatus::Inactive));
                assert_eq!(patch.code, None);
                assert_eq!(patch.specs.unwrap().ram.as_deref(), Some("32GB"));
            }
            cmd => panic!("expected UpdatePc, got {cmd:?}"),
        }

        let sql = format!("UPDATE pcs SET code = 'CS-10' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdatePc { patch, .. } => {
                assert_eq!(patch.code.as_deref(), Some("CS-10"));
                assert!(patch.specs.is_none());
            }
            cmd => panic!("expected UpdatePc, got {cmd:?}"),
        }
    }

    #[test]
    fn update_pc_null_spec_clears() {
        let sql = format!("UPDATE pcs SET os = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdatePc { patch, .. } => {
                let specs = patch.specs.unwrap();
                assert_eq!(specs.os.as_deref(), Some(""));
                assert_eq!(specs.ram, None);
            }
            cmd => panic!("expected UpdatePc, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking() {
        let sql = format!(
            "UPDATE bookings SET status = 'cancelled', notes = 'sick', is_active = false, date = '2025-01-11' \
             WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { id: booking_id, patch } => {
                assert_eq!(booking_id, id());
                assert_eq!(patch.status, Some(BookingStatus::Cancelled));
                assert_eq!(patch.notes.as_deref(), Some("sick"));
                assert_eq!(patch.is_active, Some(false));
                assert_eq!(patch.date, Some(date(11)));
                assert_eq!(patch.pc_id, None);
            }
            cmd => panic!("expected UpdateBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET status = 'cancelled' WHERE date = '2025-01-10'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_by_id() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteBooking { id: x } if x == id()));

        let sql = format!("DELETE FROM pcs WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeletePc { id: x } if x == id()));
    }

    #[test]
    fn parse_clear_bookings() {
        let sql = format!(
            "DELETE FROM bookings WHERE date = '2025-01-10' AND slot = '09:00-10:30' \
             AND pc_id IN ('{ID}', '{PC}') AND confirm = true"
        );
        match parse_sql(&sql).unwrap() {
            Command::ClearBookings { request } => {
                assert_eq!(request.date, Some(date(10)));
                assert_eq!(request.slot, Some(Slot::First));
                assert_eq!(request.pc_ids.unwrap().len(), 2);
                assert!(request.confirm);
            }
            cmd => panic!("expected ClearBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_clear_all_slots_without_confirm() {
        let sql = "DELETE FROM bookings WHERE date = '2025-01-10' AND slot = 'all'";
        match parse_sql(sql).unwrap() {
            Command::ClearBookings { request } => {
                assert_eq!(request.slot, None);
                assert_eq!(request.pc_ids, None);
                assert!(!request.confirm);
            }
            cmd => panic!("expected ClearBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings() {
        let sql = format!("SELECT * FROM bookings WHERE date = '2025-01-10' AND pc_id = '{PC}' AND status = 'confirmed'");
        match parse_sql(&sql).unwrap() {
            Command::SelectBookings { id, filter } => {
                assert_eq!(id, None);
                assert_eq!(filter.date, Some(date(10)));
                assert_eq!(filter.pc_id.map(|p| p.to_string()).as_deref(), Some(PC));
                assert_eq!(filter.status, Some(BookingStatus::Confirmed));
                assert_eq!(filter.slot, None);
            }
            cmd => panic!("expected SelectBookings, got {cmd:?}"),
        }

        assert!(matches!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { id: None, .. }
        ));
    }

    #[test]
    fn parse_select_rejects_unknown_filter() {
        let sql = "SELECT * FROM bookings WHERE person_name = 'Alice'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
        let sql = "SELECT * FROM bookings WHERE date > '2025-01-10'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_pcs() {
        match parse_sql("SELECT * FROM pcs WHERE row_no = 2 AND status = 'active'").unwrap() {
            Command::SelectPcs { filter } => {
                assert_eq!(filter.row, Some(2));
                assert_eq!(filter.status, Some(PcStatus::Active));
            }
            cmd => panic!("expected SelectPcs, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability() {
        match parse_sql("SELECT * FROM availability WHERE date = '2025-01-10'").unwrap() {
            Command::SelectAvailability { date: d } => assert_eq!(d, date(10)),
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
        assert!(matches!(
            parse_sql("SELECT * FROM availability"),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn parse_previous_bookings() {
        assert!(matches!(
            parse_sql("SELECT * FROM previous_bookings").unwrap(),
            Command::SelectPreviousBookings { date: None }
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM previous_bookings WHERE date = '2025-01-10'").unwrap(),
            Command::SelectPreviousBookings { date: Some(d) } if d == date(10)
        ));
    }

    #[test]
    fn parse_replication() {
        match parse_sql("INSERT INTO replications (target_date) VALUES ('2025-01-11')").unwrap() {
            Command::Replicate { target, source } => {
                assert_eq!(target, date(11));
                assert_eq!(source, None);
            }
            cmd => panic!("expected Replicate, got {cmd:?}"),
        }
        match parse_sql("INSERT INTO replications (target_date, source_date) VALUES ('2025-01-11', '2025-01-03')")
            .unwrap()
        {
            Command::Replicate { source, .. } => assert_eq!(source, Some(date(3))),
            cmd => panic!("expected Replicate, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_attendance() {
        let sql = format!("INSERT INTO attendance (student_id, status, date) VALUES ('{ID}', 'absent', '2025-01-10')");
        match parse_sql(&sql).unwrap() {
            Command::MarkAttendance { event } => {
                assert_eq!(event.student_id, id());
                assert_eq!(event.status, AttendanceStatus::Absent);
                assert_eq!(event.slot, None);
            }
            cmd => panic!("expected MarkAttendance, got {cmd:?}"),
        }

        let sql = format!(
            "INSERT INTO attendance (student_id, status, date, slot) VALUES ('{ID}', 'excused', '2025-01-10', '09:00-10:30')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "foobar"));
    }

    #[test]
    fn parse_multi_row_insert_errors() {
        let sql = format!("INSERT INTO pcs (id, code, row_no) VALUES ('{ID}', 'CS-01', 1), ('{PC}', 'CS-02', 1)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn batch_parses_every_statement() {
        let sql = format!(
            "INSERT INTO batches (id, name, timing) VALUES ('{ID}', 'Evening', '15:30-17:00'); \
             SELECT * FROM pcs"
        );
        let cmds = parse_batch(&sql).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], Command::InsertBatch { .. }));
        assert!(matches!(cmds[1], Command::SelectPcs { .. }));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
