use std::fmt::Debug;
use std::io;
use std::ops::Range;
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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::ShelterBedAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::network::NetworkManager;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Verb};

pub struct ShelterBedHandler {
    networks: Arc<NetworkManager>,
    query_parser: Arc<ShelterBedQueryParser>,
}

impl ShelterBedHandler {
    pub fn new(networks: Arc<NetworkManager>) -> Self {
        Self {
            networks,
            query_parser: Arc::new(ShelterBedQueryParser),
        }
    }

    /// The connection's database name selects the shelter network.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let network = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.networks
            .get_or_open(&network)
            .map_err(|e| user_error("08006", format!("network error: {e}")))
    }

    /// The login user is the acting user for every mutation on the connection.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        client
            .metadata()
            .get("user")
            .map(|user| Actor::from_login(user))
            .ok_or_else(|| user_error("28000", "a login user name is required".into()))
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, cmd, actor).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        actor: Actor,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertAgency { id, name } => {
                engine.register_agency(id, name).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertSite {
                id,
                agency_id,
                name,
            } => {
                engine
                    .register_site(id, agency_id, name)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertBed {
                id,
                site_id,
                name,
                room,
                bed_type,
            } => {
                engine
                    .register_bed(id, site_id, name, room, bed_type)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertCase { id, name } => {
                engine.register_case(id, name).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertRequest { draft } => {
                let request = engine
                    .create_request(draft, actor)
                    .await
                    .map_err(engine_err)?;
                mutation_response(&request)
            }
            Command::SelectRequest { id } => {
                let view = engine.describe_request(id).await.map_err(engine_err)?;
                request_views_response(vec![view])
            }
            Command::SelectRequests { filter } => {
                let page = engine.list_requests(&filter).await.map_err(engine_err)?;
                request_views_response(page.items)
            }
            Command::InsertOccupancy {
                request_id,
                bed_id,
                check_in_date,
                notes,
            } => {
                let occupancy = engine
                    .allocate(request_id, bed_id, check_in_date.as_deref(), notes, actor)
                    .await
                    .map_err(engine_err)?;
                occupancy_response(&occupancy)
            }
            Command::InsertWalkIn {
                case_id,
                bed_id,
                check_in_date,
                notes,
            } => {
                let occupancy = engine
                    .check_in_walk_in(case_id, bed_id, &check_in_date, notes, actor)
                    .await
                    .map_err(engine_err)?;
                occupancy_response(&occupancy)
            }
            Command::DeleteOccupancy { id } => {
                engine
                    .release_occupancy(id, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertDenial { request_id, reason } => {
                let request = engine
                    .deny(request_id, &reason, actor)
                    .await
                    .map_err(engine_err)?;
                mutation_response(&request)
            }
            Command::DeleteRequest { id } => {
                let request = engine.remove(id, actor).await.map_err(engine_err)?;
                mutation_response(&request)
            }
            Command::SelectConflicts { case_id, agency_id } => {
                let report = engine
                    .detect_conflict(case_id, agency_id)
                    .await
                    .map_err(engine_err)?;
                conflict_response(case_id, &report)
            }
            Command::SelectAvailableBeds { site_id } => {
                let beds = engine
                    .list_available_beds(site_id)
                    .await
                    .map_err(engine_err)?;
                beds_response(beds)
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn mutation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("request_id", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("occupancy_id", Type::VARCHAR),
    ]
}

fn request_view_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("case_id", Type::VARCHAR),
        text_field("case_name", Type::VARCHAR),
        text_field("agency_id", Type::VARCHAR),
        text_field("agency_name", Type::VARCHAR),
        text_field("site_id", Type::VARCHAR),
        text_field("site_name", Type::VARCHAR),
        text_field("date_of_arrival", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("denial_reason", Type::VARCHAR),
        text_field("occupancy_id", Type::VARCHAR),
        text_field("notes", Type::VARCHAR),
        text_field("created_by", Type::VARCHAR),
        text_field("created_at", Type::INT8),
        text_field("has_allocated_bed", Type::BOOL),
        text_field("is_cross_agency", Type::BOOL),
        text_field("current_bed_id", Type::VARCHAR),
        text_field("current_agency_id", Type::VARCHAR),
    ]
}

/// Leads with the same three columns as request mutations. `status` is the
/// request's status, NULL for walk-ins.
fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        text_field("request_id", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("occupancy_id", Type::VARCHAR),
        text_field("case_id", Type::VARCHAR),
        text_field("bed_id", Type::VARCHAR),
        text_field("site_id", Type::VARCHAR),
        text_field("agency_id", Type::VARCHAR),
        text_field("check_in_date", Type::VARCHAR),
        text_field("notes", Type::VARCHAR),
        text_field("created_by", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        text_field("case_id", Type::VARCHAR),
        text_field("has_allocated_bed", Type::BOOL),
        text_field("is_cross_agency", Type::BOOL),
        text_field("occupancy_id", Type::VARCHAR),
        text_field("bed_id", Type::VARCHAR),
        text_field("site_id", Type::VARCHAR),
        text_field("agency_id", Type::VARCHAR),
        text_field("check_in_date", Type::VARCHAR),
    ]
}

fn bed_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("site_id", Type::VARCHAR),
        text_field("agency_id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("room", Type::VARCHAR),
        text_field("bed_type", Type::VARCHAR),
    ]
}

/// Result columns for a statement, known before its parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::statement_target(sql) {
        Some((Verb::Insert, table)) => match table.as_str() {
            "requests" | "denials" => mutation_schema(),
            "occupancies" | "walk_ins" => occupancy_schema(),
            _ => vec![],
        },
        Some((Verb::Delete, table)) if table == "requests" => mutation_schema(),
        Some((Verb::Select, table)) => match table.as_str() {
            "requests" => request_view_schema(),
            "conflicts" => conflict_schema(),
            "available_beds" => bed_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn ulid_text(id: Option<Ulid>) -> Option<String> {
    id.map(|id| id.to_string())
}

fn mutation_response(request: &BedCheckInRequest) -> PgWireResult<Response> {
    let schema = Arc::new(mutation_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&request.id.to_string())?;
    encoder.encode_field(&request.status.as_str())?;
    encoder.encode_field(&ulid_text(request.occupancy_id))?;
    let row = encoder.take_row();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(vec![Ok(row)]),
    )))
}

fn request_views_response(views: Vec<RequestView>) -> PgWireResult<Response> {
    let schema = Arc::new(request_view_schema());
    let rows: Vec<PgWireResult<_>> = views
        .into_iter()
        .map(|view| {
            let request = &view.request;
            let current = view.conflict.current_bed_assignment.as_ref();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&request.id.to_string())?;
            encoder.encode_field(&request.case_id.to_string())?;
            encoder.encode_field(&view.case_name)?;
            encoder.encode_field(&request.agency_id.to_string())?;
            encoder.encode_field(&view.agency_name)?;
            encoder.encode_field(&request.site_id.to_string())?;
            encoder.encode_field(&view.site_name)?;
            encoder.encode_field(&request.date_of_arrival.to_string())?;
            encoder.encode_field(&request.status.as_str())?;
            encoder.encode_field(&request.denial_reason)?;
            encoder.encode_field(&ulid_text(request.occupancy_id))?;
            encoder.encode_field(&request.notes)?;
            encoder.encode_field(&request.created_by.user_id)?;
            encoder.encode_field(&request.created_at)?;
            encoder.encode_field(&view.conflict.has_allocated_bed)?;
            encoder.encode_field(&view.conflict.is_cross_agency)?;
            encoder.encode_field(&ulid_text(current.map(|o| o.bed_id)))?;
            encoder.encode_field(&ulid_text(current.map(|o| o.agency_id)))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn occupancy_response(occupancy: &Occupancy) -> PgWireResult<Response> {
    let schema = Arc::new(occupancy_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    let status = occupancy
        .request_id
        .map(|_| RequestStatus::Allocated.as_str().to_string());
    encoder.encode_field(&ulid_text(occupancy.request_id))?;
    encoder.encode_field(&status)?;
    encoder.encode_field(&occupancy.id.to_string())?;
    encoder.encode_field(&occupancy.case_id.to_string())?;
    encoder.encode_field(&occupancy.bed_id.to_string())?;
    encoder.encode_field(&occupancy.site_id.to_string())?;
    encoder.encode_field(&occupancy.agency_id.to_string())?;
    encoder.encode_field(&occupancy.check_in_date.to_string())?;
    encoder.encode_field(&occupancy.notes)?;
    encoder.encode_field(&occupancy.created_by.user_id)?;
    encoder.encode_field(&occupancy.created_at)?;
    let row = encoder.take_row();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(vec![Ok(row)]),
    )))
}

fn conflict_response(case_id: Ulid, report: &ConflictReport) -> PgWireResult<Response> {
    let schema = Arc::new(conflict_schema());
    let current = report.current_bed_assignment.as_ref();
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&case_id.to_string())?;
    encoder.encode_field(&report.has_allocated_bed)?;
    encoder.encode_field(&report.is_cross_agency)?;
    encoder.encode_field(&ulid_text(current.map(|o| o.id)))?;
    encoder.encode_field(&ulid_text(current.map(|o| o.bed_id)))?;
    encoder.encode_field(&ulid_text(current.map(|o| o.site_id)))?;
    encoder.encode_field(&ulid_text(current.map(|o| o.agency_id)))?;
    encoder.encode_field(&current.map(|o| o.check_in_date.to_string()))?;
    let row = encoder.take_row();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(vec![Ok(row)]),
    )))
}

fn beds_response(beds: Vec<Bed>) -> PgWireResult<Response> {
    let schema = Arc::new(bed_schema());
    let rows: Vec<PgWireResult<_>> = beds
        .into_iter()
        .map(|bed| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&bed.id.to_string())?;
            encoder.encode_field(&bed.site_id.to_string())?;
            encoder.encode_field(&bed.agency_id.to_string())?;
            encoder.encode_field(&bed.name)?;
            encoder.encode_field(&bed.room)?;
            encoder.encode_field(&bed.bed_type)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for ShelterBedHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        tracing::debug!(query, "simple query");
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ShelterBedQueryParser;

#[async_trait]
impl QueryParser for ShelterBedQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ShelterBedHandler {
    type Statement = String;
    type QueryParser = ShelterBedQueryParser;

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
        tracing::debug!(query = %sql, "extended query");
        self.run(client, &sql).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// `$n` placeholders outside quoted literals and identifiers, as the byte
/// range of the token and its 1-based index.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
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
            None => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

fn param_literal(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

/// Replace each placeholder with its bound value as a quoted literal, in one
/// pass over the statement. Inserted values are never scanned again.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut bound = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = params.get(n - 1) else {
            continue;
        };
        bound.push_str(&sql[copied..range.start]);
        bound.push_str(&param_literal(param.as_ref().map(|p| AsRef::<[u8]>::as_ref(p))));
        copied = range.end;
    }
    bound.push_str(&sql[copied..]);
    bound
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ShelterBedFactory {
    handler: Arc<ShelterBedHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ShelterBedAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ShelterBedFactory {
    pub fn new(networks: Arc<NetworkManager>, password: String) -> Self {
        let auth_source = ShelterBedAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ShelterBedHandler::new(networks)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ShelterBedFactory {
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
    networks: Arc<NetworkManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = ShelterBedFactory::new(networks, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine error. Conflicts use `40001` so clients treat
/// them like serialization failures: re-read, then decide.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::NotFound(..) => "P0002",
        EngineError::AlreadyExists(..) => "23505",
        EngineError::Conflict(_) => "40001",
        EngineError::WalError(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
