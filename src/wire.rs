use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::auth::LabDeskAuthSource;
use crate::engine::{AvailabilityGrid, Engine, EngineError, ReplicationReport};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct LabDeskHandler {
    engine: Arc<Engine>,
    query_parser: Arc<LabDeskQueryParser>,
    compact_threshold: u64,
}

impl LabDeskHandler {
    pub fn new(engine: Arc<Engine>, compact_threshold: u64) -> Self {
        Self {
            engine,
            query_parser: Arc::new(LabDeskQueryParser),
            compact_threshold,
        }
    }

    /// Run and meter one statement.
    async fn run(&self, principal: Option<String>, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let writes = !matches!(
            cmd,
            Command::SelectPcs { .. }
                | Command::SelectBookings { .. }
                | Command::SelectAvailability { .. }
                | Command::SelectPreviousBookings { .. }
        );

        let start = Instant::now();
        let result = self.execute_command(principal, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());

        if writes && result.is_ok() {
            self.maybe_compact().await;
        }
        result
    }

    async fn maybe_compact(&self) {
        let appends = self.engine.wal_appends_since_compact().await;
        if appends < self.compact_threshold {
            return;
        }
        match self.engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compaction triggered"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }

    async fn execute_command(
        &self,
        principal: Option<String>,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertPc {
                id,
                code,
                row,
                status,
                specs,
            } => {
                engine
                    .create_pc(PcDraft {
                        id,
                        code,
                        row,
                        status,
                        specs,
                        created_by: principal,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdatePc { id, patch } => {
                engine.update_pc(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeletePc { id } => {
                engine.delete_pc(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectPcs { filter } => {
                let pcs = engine.list_pcs(&filter);
                let schema = Arc::new(pc_schema(format));
                let rows: Vec<PgWireResult<DataRow>> = pcs
                    .iter()
                    .map(|pc| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&pc.id.to_string())?;
                        encoder.encode_field(&pc.code)?;
                        encoder.encode_field(&i32::from(pc.row))?;
                        encoder.encode_field(&pc.status.as_str())?;
                        encoder.encode_field(&pc.specs.processor)?;
                        encoder.encode_field(&pc.specs.ram)?;
                        encoder.encode_field(&pc.specs.storage)?;
                        encoder.encode_field(&pc.specs.os)?;
                        encoder.encode_field(&pc.specs.notes)?;
                        encoder.encode_field(&pc.created_by)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::InsertStudent { student } => {
                engine.register_student(student).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertBatch { batch } => {
                engine.register_batch(batch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertBooking { mut draft } => {
                draft.booked_by = principal;
                engine.create_booking(draft).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateBooking { id, patch } => {
                engine.update_booking(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::ClearBookings { request } => {
                let report = engine.clear_booked_slots(request).await.map_err(engine_err)?;
                Ok(summary_response(&report.cleared_bookings, format))
            }
            Command::SelectBookings { id, filter } => {
                let bookings = match id {
                    Some(id) => match engine.get_booking(&id).await {
                        Ok(b) if b.is_active && filter.matches(&b) => vec![b],
                        Ok(_) | Err(EngineError::NotFound(_)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_bookings(&filter).await,
                };
                Ok(booking_response(engine, &bookings, format))
            }
            Command::SelectAvailability { date } => {
                let grid = engine.get_availability(date).await.map_err(engine_err)?;
                Ok(availability_response(&grid, format))
            }
            Command::SelectPreviousBookings { date } => {
                let previous = engine.get_previous_bookings(date).await.map_err(engine_err)?;
                Ok(booking_response(engine, &previous.bookings, format))
            }
            Command::Replicate { target, source } => {
                let report = engine
                    .apply_previous_bookings(target, source)
                    .await
                    .map_err(engine_err)?;
                Ok(replication_response(engine, &report, format))
            }
            Command::MarkAttendance { event } => {
                let outcome = engine.on_attendance_marked(event).await;
                if let Some(message) = &outcome.message {
                    debug!(updated = outcome.updated_count, "attendance sync: {message}");
                }
                Ok(summary_response(&outcome.affected_bookings, format))
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, (name, ty))| FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(idx)))
        .collect()
}

fn pc_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("code", Type::VARCHAR),
            ("row_no", Type::INT4),
            ("status", Type::VARCHAR),
            ("processor", Type::VARCHAR),
            ("ram", Type::VARCHAR),
            ("storage", Type::VARCHAR),
            ("os", Type::VARCHAR),
            ("notes", Type::VARCHAR),
            ("created_by", Type::VARCHAR),
        ],
        format,
    )
}

fn booking_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("pc_id", Type::VARCHAR),
            ("pc_code", Type::VARCHAR),
            ("date", Type::VARCHAR),
            ("slot", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("person_name", Type::VARCHAR),
            ("student_id", Type::VARCHAR),
            ("batch_id", Type::VARCHAR),
            ("teacher_id", Type::VARCHAR),
            ("priority", Type::VARCHAR),
            ("purpose", Type::VARCHAR),
            ("notes", Type::VARCHAR),
            ("booked_by", Type::VARCHAR),
        ],
        format,
    )
}

/// Cleared bookings and attendance-sync results.
fn summary_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::VARCHAR),
            ("pc_id", Type::VARCHAR),
            ("pc_code", Type::VARCHAR),
            ("date", Type::VARCHAR),
            ("slot", Type::VARCHAR),
            ("person_name", Type::VARCHAR),
            ("purpose", Type::VARCHAR),
            ("status", Type::VARCHAR),
        ],
        format,
    )
}

fn availability_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("pc_id", Type::VARCHAR),
            ("code", Type::VARCHAR),
            ("row_no", Type::INT4),
            ("slot", Type::VARCHAR),
            ("available", Type::BOOL),
            ("booking_id", Type::VARCHAR),
            ("person_name", Type::VARCHAR),
            ("purpose", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("recently_freed", Type::BOOL),
            ("last_person_name", Type::VARCHAR),
        ],
        format,
    )
}

fn replication_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("outcome", Type::VARCHAR),
            ("booking_id", Type::VARCHAR),
            ("pc_code", Type::VARCHAR),
            ("slot", Type::VARCHAR),
            ("person_name", Type::VARCHAR),
            ("held_by", Type::VARCHAR),
        ],
        format,
    )
}

/// Result columns for a statement, judged from its text alone since
/// placeholders are still unbound at describe time.
fn schema_for(stmt: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = stmt.trim_start().to_uppercase();
    if upper.starts_with("SELECT") {
        if upper.contains("AVAILABILITY") {
            availability_schema(format)
        } else if upper.contains("BOOKINGS") {
            booking_schema(format)
        } else if upper.contains("PCS") {
            pc_schema(format)
        } else {
            vec![]
        }
    } else if upper.starts_with("INSERT") && upper.contains("REPLICATIONS") {
        replication_schema(format)
    } else if (upper.starts_with("INSERT") && upper.contains("ATTENDANCE"))
        || (upper.starts_with("DELETE") && upper.contains("CONFIRM"))
    {
        summary_schema(format)
    } else {
        vec![]
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn ulid_text(id: Option<ulid::Ulid>) -> Option<String> {
    id.map(|id| id.to_string())
}

fn booking_response(engine: &Engine, bookings: &[Booking], format: &Format) -> Response {
    let schema = Arc::new(booking_schema(format));
    let rows = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.pc_id.to_string())?;
            encoder.encode_field(&engine.get_pc(&b.pc_id).map(|pc| pc.code))?;
            encoder.encode_field(&b.date.to_string())?;
            encoder.encode_field(&b.slot.as_str())?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.person_name)?;
            encoder.encode_field(&ulid_text(b.student_id))?;
            encoder.encode_field(&ulid_text(b.batch_id))?;
            encoder.encode_field(&ulid_text(b.teacher_id))?;
            encoder.encode_field(&b.priority.as_str())?;
            encoder.encode_field(&b.purpose)?;
            encoder.encode_field(&b.notes)?;
            encoder.encode_field(&b.booked_by)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

fn summary_response(summaries: &[BookingSummary], format: &Format) -> Response {
    let schema = Arc::new(summary_schema(format));
    let rows = summaries
        .iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&s.id.to_string())?;
            encoder.encode_field(&s.pc_id.to_string())?;
            encoder.encode_field(&s.pc_code)?;
            encoder.encode_field(&s.date.to_string())?;
            encoder.encode_field(&s.slot.as_str())?;
            encoder.encode_field(&s.person_name)?;
            encoder.encode_field(&s.purpose)?;
            encoder.encode_field(&s.status.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(schema, rows)
}

/// One row per (PC, slot) cell, PCs in grid order.
fn availability_response(grid: &AvailabilityGrid, format: &Format) -> Response {
    let schema = Arc::new(availability_schema(format));
    let mut rows = Vec::new();
    for pc in &grid.pcs {
        let pc_id = pc.pc_id.to_string();
        for (slot, cell) in &pc.cells {
            let mut encoder = DataRowEncoder::new(schema.clone());
            let row = (|| -> PgWireResult<DataRow> {
                encoder.encode_field(&pc_id)?;
                encoder.encode_field(&pc.code)?;
                encoder.encode_field(&i32::from(pc.row))?;
                encoder.encode_field(&slot.as_str())?;
                encoder.encode_field(&cell.available)?;
                let holder = cell.booking.as_ref();
                encoder.encode_field(&holder.map(|b| b.id.to_string()))?;
                encoder.encode_field(&holder.map(|b| b.person_name.clone()))?;
                encoder.encode_field(&holder.and_then(|b| b.purpose.clone()))?;
                encoder.encode_field(&holder.map(|b| b.status.as_str()))?;
                encoder.encode_field(&cell.recently_freed)?;
                encoder.encode_field(&cell.last_booking.as_ref().map(|b| b.person_name.clone()))?;
                Ok(encoder.take_row())
            })();
            rows.push(row);
        }
    }
    query_response(schema, rows)
}

fn replication_response(engine: &Engine, report: &ReplicationReport, format: &Format) -> Response {
    let schema = Arc::new(replication_schema(format));
    let mut rows: Vec<PgWireResult<DataRow>> = Vec::with_capacity(report.applied.len() + report.skipped());

    let mut push = |outcome: &str, booking: &BookingSummary, holder: Option<&BookingSummary>| {
        let mut encoder = DataRowEncoder::new(schema.clone());
        let row = (|| -> PgWireResult<DataRow> {
            encoder.encode_field(&outcome)?;
            encoder.encode_field(&booking.id.to_string())?;
            encoder.encode_field(&booking.pc_code)?;
            encoder.encode_field(&booking.slot.as_str())?;
            encoder.encode_field(&booking.person_name)?;
            encoder.encode_field(&holder.map(|h| h.person_name.clone()))?;
            Ok(encoder.take_row())
        })();
        rows.push(row);
    };

    for booking in &report.applied {
        push("applied", &engine.summarize(booking), None);
    }
    for (outcome, skipped) in [
        ("conflict", &report.conflicts),
        ("student_conflict", &report.student_conflicts),
        ("unavailable_pc", &report.unavailable_pcs),
    ] {
        for s in skipped {
            push(outcome, &s.source, s.holder.as_ref());
        }
    }
    query_response(schema, rows)
}

fn principal<C: ClientInfo>(client: &C) -> Option<String> {
    client.metadata().get("user").cloned()
}

#[async_trait]
impl SimpleQueryHandler for LabDeskHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let principal = principal(client);
        let cmds = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run(principal.clone(), cmd, &Format::UnifiedText).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LabDeskQueryParser;

#[async_trait]
impl QueryParser for LabDeskQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LabDeskHandler {
    type Statement = String;
    type QueryParser = LabDeskQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(principal(client), cmd, &portal.result_column_format).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement, &Format::UnifiedText),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
/// Byte ranges and 1-based indexes of every `$N` placeholder outside quoted
/// literals and identifiers.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            // A doubled quote is an escaped one and keeps us inside.
            if c == q {
                if bytes.get(i + 1) == Some(&q) {
                    i += 1;
                } else {
                    quote = None;
                }
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' => {
                quote = Some(c);
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>()
                    && n > 0
                {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Splice bound text-format values into `sql`, in one pass, so a value that
/// itself contains `$N` is never rewritten.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = params.get(n - 1) else {
            continue;
        };
        result.push_str(&sql[last..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        last = range.end;
    }
    result.push_str(&sql[last..]);
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LabDeskFactory {
    handler: Arc<LabDeskHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LabDeskAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LabDeskFactory {
    pub fn new(engine: Arc<Engine>, password: String, compact_threshold: u64) -> Self {
        let auth_source = LabDeskAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LabDeskHandler::new(engine, compact_threshold)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LabDeskFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
    compact_threshold: u64,
) -> io::Result<()> {
    let factory = Arc::new(LabDeskFactory::new(engine, password, compact_threshold));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) | EngineError::DuplicateCode(_) | EngineError::AlreadyExists(_) => "23505",
        EngineError::NotFound(_) => "P0002",
        EngineError::ConfirmationRequired => "55000",
        EngineError::Validation(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::ResourceInactive(_) => "55006",
        EngineError::WalError(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(count_params("SELECT * FROM bookings WHERE date = $1 AND slot = $2"), 2);
        assert_eq!(count_params("UPDATE bookings SET notes = $12 WHERE id = $3"), 12);
        assert_eq!(count_params("SELECT '$' FROM pcs"), 0);
    }

    #[test]
    fn placeholders_inside_literals_are_ignored() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE notes = 'fee $4' AND date = $1"), 1);
        assert_eq!(count_params("SELECT * FROM bookings WHERE notes = 'it''s $9' AND id = $2"), 2);
    }

    #[test]
    fn bound_values_are_spliced_once() {
        let sql = "INSERT INTO bookings (pc_id, person_name, notes) VALUES ($1, $2, $3)";
        let bound = bind_params(sql, &[Some("pc"), Some("O'Neil $3"), Some("fee $1 paid")]);
        assert_eq!(
            bound,
            "INSERT INTO bookings (pc_id, person_name, notes) VALUES ('pc', 'O''Neil $3', 'fee $1 paid')"
        );
    }

    #[test]
    fn null_and_two_digit_placeholders() {
        let params: Vec<Option<&str>> = (1..=10).map(|i| (i != 2).then(|| "x")).collect();
        let bound = bind_params("VALUES ($1, $2, $10)", &params);
        assert_eq!(bound, "VALUES ('x', NULL, 'x')");
    }

    #[test]
    fn schema_follows_statement() {
        let text = Format::UnifiedText;
        assert_eq!(schema_for("SELECT * FROM availability WHERE date = $1", &text).len(), 11);
        assert_eq!(schema_for("select * from previous_bookings", &text).len(), 14);
        assert_eq!(schema_for("SELECT * FROM pcs", &text).len(), 10);
        assert_eq!(schema_for("INSERT INTO replications (target_date) VALUES ($1)", &text).len(), 6);
        assert_eq!(schema_for("DELETE FROM bookings WHERE confirm = true", &text).len(), 8);
        assert!(schema_for("DELETE FROM bookings WHERE id = $1", &text).is_empty());
        assert!(schema_for("INSERT INTO bookings (id) VALUES ($1)", &text).is_empty());
    }

    #[test]
    fn sqlstates_by_error_kind() {
        assert_eq!(sqlstate(&EngineError::ConfirmationRequired), "55000");
        assert_eq!(sqlstate(&EngineError::NotFound(ulid::Ulid::nil())), "P0002");
        assert_eq!(sqlstate(&EngineError::DuplicateCode("CS-01".into())), "23505");
        assert_eq!(sqlstate(&EngineError::Validation("bad slot".into())), "22023");
        assert_eq!(sqlstate(&EngineError::ResourceInactive(ulid::Ulid::nil())), "55006");
        assert_eq!(sqlstate(&EngineError::WalError("disk".into())), "P0001");
    }
}
