use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::stream;
use futures::Sink;
use pgwire::api::auth::noop::NoopStartupHandler;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;

use crate::engine::{Engine, EngineError, UpdateOutcome};
use crate::limits::MAX_STAY_DAYS;
use crate::model::{days_between, DateRange, Horizon, Reservation, AVAILABLE_LABEL};
use crate::observability;
use crate::sql::{self, Command};

pub struct CasitaHandler {
    engine: Arc<Engine>,
    query_parser: Arc<CasitaQueryParser>,
}

impl CasitaHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(CasitaQueryParser),
        }
    }

    async fn handle_query(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        // One clock reading per request: policy checks, the horizon, and the
        // active-set filter all observe the same `today`, even across a
        // midnight rollover mid-request.
        let today = Utc::now().date_naive();

        let start = Instant::now();
        let result = self.execute_command(cmd, today).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, today: NaiveDate) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertReservation { user, from, to } => {
                validate_user(&user)?;
                validate_stay(from, to, today)?;
                let reservation = self
                    .engine
                    .create_reservation(&user, DateRange::new(from, to))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![reservation_rows(vec![reservation])])
            }
            Command::UpdateReservation { id, from, to } => {
                validate_stay(from, to, today)?;
                let outcome = self
                    .engine
                    .update_reservation(id, DateRange::new(from, to))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![update_row(&outcome)?])
            }
            Command::DeleteReservation { id } => {
                let removed = self.engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(vec![reservation_rows(vec![removed])])
            }
            Command::SelectReservations => {
                let active = self.engine.active_reservations(today).await;
                Ok(vec![reservation_rows(active)])
            }
            Command::SelectReservationsByUser { user } => {
                let found = self.engine.reservations_for_user(&user).await;
                Ok(vec![reservation_rows(found)])
            }
            Command::SelectReservationById { id } => {
                let found = self.engine.reservation_by_id(id).await;
                Ok(vec![reservation_rows(found.into_iter().collect())])
            }
            Command::SelectAvailability => {
                let free = self.engine.available_intervals(today).await;
                Ok(vec![availability_rows(free)])
            }
            Command::SelectTaken { from, to } => {
                if from > to {
                    return Err(policy_err("\"from\" must not be after \"to\""));
                }
                let taken = self
                    .engine
                    .is_taken(&DateRange::new(from, to))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![taken_row(taken)?])
            }
        }
    }
}

/// Booking policy, enforced at the edge so the engine only ever sees ranges
/// a guest is allowed to book. Replays from the WAL bypass this on purpose:
/// a reservation that was legal when made stays in the timeline even after
/// the horizon has moved past it.
fn validate_stay(from: NaiveDate, to: NaiveDate, today: NaiveDate) -> PgWireResult<()> {
    if from > to {
        return Err(policy_err("\"from\" must not be after \"to\""));
    }
    let horizon = Horizon::from_today(today);
    let range = DateRange::new(from, to);
    if !horizon.contains(&range) {
        return Err(policy_err(format!(
            "stay must start no earlier than {} and end no later than {}",
            horizon.first, horizon.last
        )));
    }
    if days_between(from, to) > MAX_STAY_DAYS {
        return Err(policy_err(format!(
            "stay must not span more than {} days",
            MAX_STAY_DAYS + 1
        )));
    }
    Ok(())
}

fn validate_user(user: &str) -> PgWireResult<()> {
    if user.trim().is_empty() {
        return Err(policy_err("\"user\" must not be empty"));
    }
    if user == AVAILABLE_LABEL {
        return Err(policy_err(format!("\"{AVAILABLE_LABEL}\" is a reserved label")));
    }
    if user.len() > crate::limits::MAX_USER_LEN {
        return Err(policy_err("\"user\" is too long"));
    }
    Ok(())
}

// ── Row encoding ─────────────────────────────────────────────────

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("user".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("from".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("to".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

/// Reservation row plus a status column: `accepted` or `rejected`.
fn update_schema() -> Vec<FieldInfo> {
    let mut schema = reservation_schema();
    schema.push(FieldInfo::new(
        "status".into(),
        None,
        None,
        Type::VARCHAR,
        FieldFormat::Text,
    ));
    schema
}

fn taken_schema() -> Vec<FieldInfo> {
    vec![FieldInfo::new(
        "taken".into(),
        None,
        None,
        Type::VARCHAR,
        FieldFormat::Text,
    )]
}

fn encode_reservation(
    encoder: &mut DataRowEncoder,
    reservation: &Reservation,
) -> PgWireResult<()> {
    encoder.encode_field(&reservation.id.to_string())?;
    encoder.encode_field(&reservation.user)?;
    encoder.encode_field(&reservation.range.from.to_string())?;
    encoder.encode_field(&reservation.range.to.to_string())?;
    Ok(())
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_reservation(&mut encoder, r)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Free intervals render as pseudo-reservations held by nobody: NULL id and
/// the `available` label.
fn availability_rows(free: Vec<DateRange>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = free
        .iter()
        .map(|range| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&None::<String>)?;
            encoder.encode_field(&AVAILABLE_LABEL)?;
            encoder.encode_field(&range.from.to_string())?;
            encoder.encode_field(&range.to.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// The row is always the reservation's true state after the call: the moved
/// state when accepted, the untouched original when rejected.
fn update_row(outcome: &UpdateOutcome) -> PgWireResult<Response> {
    let schema = Arc::new(update_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encode_reservation(&mut encoder, outcome.reservation())?;
    let status = match outcome {
        UpdateOutcome::Accepted(_) => "accepted",
        UpdateOutcome::Rejected(_) => "rejected",
    };
    encoder.encode_field(&status)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn taken_row(taken: bool) -> PgWireResult<Response> {
    let schema = Arc::new(taken_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&if taken { "true" } else { "false" })?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for CasitaHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.handle_query(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CasitaQueryParser;

#[async_trait]
impl QueryParser for CasitaQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema_for(stmt))
    }
}

/// Pick the result schema from the statement text. Every command returns rows.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("TAKEN") {
        taken_schema()
    } else if upper.trim_start().starts_with("UPDATE") {
        update_schema()
    } else {
        reservation_schema()
    }
}

#[async_trait]
impl ExtendedQueryHandler for CasitaHandler {
    type Statement = String;
    type QueryParser = CasitaQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        let mut responses = self.handle_query(&sql).await?;
        Ok(responses.remove(0))
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CasitaStartup;

impl NoopStartupHandler for CasitaStartup {}

pub struct CasitaFactory {
    handler: Arc<CasitaHandler>,
    startup: Arc<CasitaStartup>,
    noop: Arc<NoopHandler>,
}

impl CasitaFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(CasitaHandler::new(engine)),
            startup: Arc::new(CasitaStartup),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CasitaFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.startup.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection over the Postgres wire protocol.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    engine: Arc<Engine>,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(CasitaFactory::new(engine));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn policy_err(msg: impl Into<String>) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "22023".into(),
        msg.into(),
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Conflict(_) => "23P01",        // exclusion_violation
        EngineError::NotFound(_) => "P0002",        // no_data_found
        EngineError::InvalidRange { .. } => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",        // io_error
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
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
