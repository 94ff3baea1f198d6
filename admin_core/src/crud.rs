//! Generic controller operations over any registered handler.
//!
//! Every operation authorizes through the handler policy, records metrics,
//! and mutations dispatch one audit entry per affected record after commit.

use std::collections::HashSet;
use std::time::Instant;

use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection};
use serde_json::{json, Value};

use crate::cast::parse_id_list;
use crate::db::{self, DbConnection};
use crate::error::{AdminError, ValidationErrors};
use crate::events::{AuditEntry, AuditEvent};
use crate::field::{FieldKind, RelationKind, View};
use crate::files::FileStore;
use crate::handler::{ActionContext, ModelHandler, SaveContext, SaveMode};
use crate::params::ListParams;
use crate::payload::Payload;
use crate::persist::{self, ChildrenWrite, PivotWrite, PreparedWrite};
use crate::policy::{Ability, Principal};
use crate::query;
use crate::rules::required_message;
use crate::sql::{execute, fetch_count, fetch_ids, load_records, BindValue, Record};
use crate::state::AdminState;
use crate::transform::{record_id, RelationData, Transformer};

fn finish(handler: &ModelHandler, operation: &str, started: Instant) {
    crate::metrics::admin_request(&handler.slug, operation, started.elapsed().as_millis() as u64);
}

fn audit(state: &AdminState, principal: &Principal, event: AuditEvent) {
    state.audit.dispatch(AuditEntry::new(principal, event));
}

async fn find(
    conn: &mut AsyncPgConnection,
    handler: &ModelHandler,
    principal: &Principal,
    id: i64,
) -> Result<Record, AdminError> {
    load_records(conn, query::find_statement(handler, principal, &[id]))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AdminError::not_found(&handler.slug, id))
}

async fn reload(conn: &mut AsyncPgConnection, handler: &ModelHandler, id: i64) -> Result<Record, AdminError> {
    load_records(conn, query::reload_statement(handler, id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AdminError::not_found(&handler.slug, id))
}

async fn render_detail(
    conn: &mut AsyncPgConnection,
    files: &FileStore,
    handler: &ModelHandler,
    record: &Record,
    with: &[String],
) -> Result<Value, AdminError> {
    let transformer = Transformer::new(handler, View::Detail, with, files);
    let relations = RelationData::load(
        conn,
        handler,
        &transformer.expanded_fields(),
        std::slice::from_ref(record),
    )
    .await?;
    Ok(transformer.transform(record, &relations))
}

/// Paths of stored files referenced by `records`.
fn stored_files(handler: &ModelHandler, records: &[Record]) -> Vec<String> {
    handler
        .fields
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::File))
        .flat_map(|f| records.iter().filter_map(move |r| r.get(&f.name)?.as_str()))
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stored files that a pending write replaces or clears.
fn replaced_files(handler: &ModelHandler, before: &Record, prepared: &PreparedWrite) -> Vec<String> {
    handler
        .fields
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::File) && prepared.attributes.contains(&f.name))
        .filter_map(|f| before.get(&f.name)?.as_str())
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

fn prepare_or_reject(
    state: &AdminState,
    handler: &ModelHandler,
    payload: &Payload,
    mode: SaveMode,
) -> Result<PreparedWrite, AdminError> {
    persist::prepare(handler, payload, mode, state.files.max_size_bytes()).map_err(|errors| {
        tracing::debug!(model = %handler.slug, fields = ?errors.fields().collect::<Vec<_>>(), "Validation failed");
        crate::metrics::validation_failed(&handler.slug);
        AdminError::Validation(errors)
    })
}

/// Store pending uploads and point their columns at the stored paths.
async fn store_uploads(
    files: &FileStore,
    handler: &ModelHandler,
    prepared: &mut PreparedWrite,
) -> Result<Vec<String>, AdminError> {
    let mut stored = Vec::with_capacity(prepared.uploads.len());
    for (field, file) in &prepared.uploads {
        match files.store(&handler.slug, field, file).await {
            Ok(path) => {
                prepared.attributes.set(field, Some(BindValue::Text(path.clone())));
                stored.push(path);
            }
            Err(e) => {
                files.remove_all(&stored).await;
                return Err(e);
            }
        }
    }
    Ok(stored)
}

struct Saved {
    id: i64,
    record: Record,
    changed: Vec<String>,
}

async fn sync_pivots(
    conn: &mut AsyncPgConnection,
    handler: &ModelHandler,
    owner: i64,
    pivots: &[PivotWrite],
) -> Result<Vec<String>, AdminError> {
    let mut changed = Vec::new();
    for write in pivots {
        let Some(pivot) = handler
            .field(&write.field)
            .and_then(|f| f.relation_config())
            .and_then(|rel| rel.pivot.as_ref())
        else {
            continue;
        };
        let current = fetch_ids(conn, persist::pivot_current_statement(pivot, owner)).await?;
        let plan = persist::plan_pivot_sync(&current, &write.ids);
        if !plan.detach.is_empty() {
            execute(conn, persist::pivot_detach_statement(pivot, owner, plan.detach.clone())).await?;
        }
        if !plan.attach.is_empty() {
            execute(conn, persist::pivot_attach_statement(pivot, owner, plan.attach.clone())).await?;
        }
        if !plan.is_empty() {
            changed.push(write.field.clone());
        }
    }
    Ok(changed)
}

async fn sync_children(
    conn: &mut AsyncPgConnection,
    handler: &ModelHandler,
    owner: i64,
    children: &[ChildrenWrite],
) -> Result<Vec<String>, AdminError> {
    let mut changed = Vec::new();
    for write in children {
        let Some(rel) = handler
            .field(&write.field)
            .and_then(|f| f.relation_config())
            .filter(|rel| rel.kind == RelationKind::HasMany)
        else {
            continue;
        };
        let owned = fetch_ids(conn, persist::children_owned_statement(rel, owner)).await?;
        let plan = persist::plan_children_sync(write, rel, &owned).map_err(AdminError::Validation)?;

        for (id, attributes) in &plan.updates {
            let owner_filter = Some((rel.foreign_key.as_str(), owner));
            if let Some(statement) = persist::update_statement(&rel.table, &rel.primary_key, *id, attributes, owner_filter) {
                execute(conn, statement).await?;
            }
        }
        for attributes in &plan.inserts {
            let mut attributes = attributes.clone();
            attributes.set(&rel.foreign_key, Some(BindValue::BigInt(owner)));
            execute(conn, persist::insert_statement(&rel.table, &rel.primary_key, &attributes)).await?;
        }
        if !plan.deletes.is_empty() {
            execute(conn, persist::children_delete_statement(rel, owner, plan.deletes.clone())).await?;
        }
        if !plan.is_empty() {
            changed.push(write.field.clone());
        }
    }
    Ok(changed)
}

/// Transaction body: rules, hooks, parent write, pivots, children, reload.
async fn save(
    conn: &mut AsyncPgConnection,
    handler: &ModelHandler,
    principal: &Principal,
    mode: SaveMode,
    before: Option<(i64, &Record)>,
    mut prepared: PreparedWrite,
) -> Result<Saved, AdminError> {
    let id = before.map(|(id, _)| id);
    persist::check_database_rules(conn, handler, &prepared, id)
        .await?
        .into_result()?;

    if handler.audit_columns {
        persist::apply_audit_columns(&mut prepared.attributes, mode, principal);
    }
    let ctx = SaveContext {
        handler,
        principal,
        mode,
        id,
    };
    for hook in &handler.hooks {
        hook.before_save(conn, &ctx, &mut prepared.attributes).await?;
    }

    let mut changed = before
        .map(|(_, record)| persist::changed_fields(handler, record, &prepared.attributes))
        .unwrap_or_default();

    let id = match id {
        Some(id) => {
            let statement = persist::update_statement(&handler.table, &handler.primary_key, id, &prepared.attributes, None);
            if let Some(statement) = statement {
                execute(conn, statement).await?;
            }
            id
        }
        None => {
            let statement = persist::insert_statement(&handler.table, &handler.primary_key, &prepared.attributes);
            fetch_ids(conn, statement)
                .await?
                .into_iter()
                .next()
                .ok_or(AdminError::Database(diesel::result::Error::NotFound))?
        }
    };

    changed.extend(sync_pivots(conn, handler, id, &prepared.pivots).await?);
    changed.extend(sync_children(conn, handler, id, &prepared.children).await?);

    let record = reload(conn, handler, id).await?;
    let ctx = SaveContext {
        handler,
        principal,
        mode,
        id: Some(id),
    };
    for hook in &handler.hooks {
        hook.after_save(conn, &ctx, &record).await?;
    }

    Ok(Saved { id, record, changed })
}

/// Run [`save`] in one transaction; stored uploads are removed when it fails.
#[allow(clippy::too_many_arguments)]
async fn save_in_transaction(
    conn: &mut DbConnection,
    files: &FileStore,
    handler: &ModelHandler,
    principal: &Principal,
    mode: SaveMode,
    before: Option<(i64, &Record)>,
    prepared: PreparedWrite,
    stored: &[String],
) -> Result<Saved, AdminError> {
    let result = conn
        .transaction::<_, AdminError, _>(|conn| {
            async move { save(conn, handler, principal, mode, before, prepared).await }.scope_boxed()
        })
        .await;

    if let Err(e) = &result {
        files.remove_all(stored).await;
        match e {
            AdminError::Validation(_) => crate::metrics::validation_failed(&handler.slug),
            other => tracing::warn!(model = %handler.slug, error = %other, "Save rolled back"),
        }
    }
    result
}

pub async fn list(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    params: &ListParams,
) -> Result<Value, AdminError> {
    let started = Instant::now();
    handler.authorize(principal, &Ability::ViewAny, None)?;
    let per_page = params.per_page(state.pagination);
    let statements = query::list_statements(handler, principal, params, per_page)?;

    let mut conn = db::connection(&state.pool).await?;
    let records = load_records(&mut conn, statements.select).await?;
    let total = fetch_count(&mut conn, statements.count).await?;

    let transformer = Transformer::new(handler, View::List, &params.with, &state.files);
    let relations = RelationData::load(&mut conn, handler, &transformer.expanded_fields(), &records).await?;
    let data = transformer.transform_all(&records, &relations);

    let last_page = (total.max(0) as u64).div_ceil(per_page).max(1);
    finish(handler, "list", started);
    Ok(json!({
        "data": data,
        "meta": {
            "total": total,
            "page": params.page,
            "per_page": per_page,
            "last_page": last_page,
        },
    }))
}

pub async fn show(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    id: i64,
    with: &[String],
) -> Result<Value, AdminError> {
    let started = Instant::now();
    let mut conn = db::connection(&state.pool).await?;
    let record = find(&mut conn, handler, principal, id).await?;
    handler.authorize(principal, &Ability::View, Some(&record))?;

    let data = render_detail(&mut conn, &state.files, handler, &record, with).await?;
    finish(handler, "show", started);
    Ok(json!({ "data": data }))
}

pub async fn create(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    payload: Payload,
) -> Result<Value, AdminError> {
    let started = Instant::now();
    handler.authorize(principal, &Ability::Create, None)?;
    let mut prepared = prepare_or_reject(state, handler, &payload, SaveMode::Create)?;

    let mut conn = db::connection(&state.pool).await?;
    let stored = store_uploads(&state.files, handler, &mut prepared).await?;
    let saved = save_in_transaction(
        &mut conn,
        &state.files,
        handler,
        principal,
        SaveMode::Create,
        None,
        prepared,
        &stored,
    )
    .await?;

    tracing::info!(model = %handler.slug, id = saved.id, operation = "create", "Record created");
    crate::metrics::records_written(&handler.slug, "create", 1);
    audit(
        state,
        principal,
        AuditEvent::RecordCreated {
            model: handler.slug.clone(),
            id: saved.id,
        },
    );

    let data = render_detail(&mut conn, &state.files, handler, &saved.record, &[]).await?;
    finish(handler, "create", started);
    Ok(json!({ "data": data }))
}

pub async fn update(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    id: i64,
    payload: Payload,
) -> Result<Value, AdminError> {
    let started = Instant::now();
    let mut conn = db::connection(&state.pool).await?;
    let before = find(&mut conn, handler, principal, id).await?;
    handler.authorize(principal, &Ability::Update, Some(&before))?;
    let mut prepared = prepare_or_reject(state, handler, &payload, SaveMode::Update)?;

    let stored = store_uploads(&state.files, handler, &mut prepared).await?;
    let replaced = replaced_files(handler, &before, &prepared);
    let saved = save_in_transaction(
        &mut conn,
        &state.files,
        handler,
        principal,
        SaveMode::Update,
        Some((id, &before)),
        prepared,
        &stored,
    )
    .await?;
    state.files.remove_all(&replaced).await;

    tracing::info!(
        model = %handler.slug,
        id,
        operation = "update",
        changed = ?saved.changed,
        "Record updated"
    );
    crate::metrics::records_written(&handler.slug, "update", 1);
    audit(
        state,
        principal,
        AuditEvent::RecordUpdated {
            model: handler.slug.clone(),
            id,
            changed: saved.changed,
        },
    );

    let data = render_detail(&mut conn, &state.files, handler, &saved.record, &[]).await?;
    finish(handler, "update", started);
    Ok(json!({ "data": data }))
}

pub async fn delete(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    id: i64,
) -> Result<(), AdminError> {
    let started = Instant::now();
    let mut conn = db::connection(&state.pool).await?;
    let record = find(&mut conn, handler, principal, id).await?;
    handler.authorize(principal, &Ability::Delete, Some(&record))?;

    execute(&mut conn, persist::delete_statement(handler, &[id])).await?;
    let soft = handler.archive_column.is_some();
    if !soft {
        state.files.remove_all(&stored_files(handler, &[record])).await;
    }

    tracing::info!(model = %handler.slug, id, operation = "delete", soft, "Record deleted");
    crate::metrics::records_written(&handler.slug, "delete", 1);
    audit(
        state,
        principal,
        AuditEvent::RecordDeleted {
            model: handler.slug.clone(),
            id,
            soft,
        },
    );
    finish(handler, "delete", started);
    Ok(())
}

/// Ids from an `ids` input value; missing or empty lists are validation errors.
pub fn require_ids(input: &Record) -> Result<Vec<i64>, AdminError> {
    let mut errors = ValidationErrors::new();
    match input.get("ids").map(parse_id_list) {
        Some(Ok(ids)) if !ids.is_empty() => return Ok(ids),
        Some(Err(e)) => errors.add("ids", e.message("ids")),
        _ => errors.add("ids", required_message("ids")),
    }
    Err(AdminError::Validation(errors))
}

/// Drop repeated ids, keeping first-seen order.
fn unique_ids(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Load `ids` and fail with 404 on the first one the principal cannot see.
async fn find_all(
    conn: &mut AsyncPgConnection,
    handler: &ModelHandler,
    principal: &Principal,
    ids: &[i64],
) -> Result<Vec<Record>, AdminError> {
    let records = load_records(conn, query::find_statement(handler, principal, ids)).await?;
    let found: Vec<i64> = records
        .iter()
        .filter_map(|r| record_id(r, &handler.primary_key))
        .collect();
    if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
        return Err(AdminError::not_found(&handler.slug, *missing));
    }
    Ok(records)
}

/// Delete every id or none: all records must exist and pass the policy first.
pub async fn bulk_delete(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    ids: Vec<i64>,
) -> Result<usize, AdminError> {
    let started = Instant::now();
    let ids = unique_ids(ids);
    let mut conn = db::connection(&state.pool).await?;
    let records = find_all(&mut conn, handler, principal, &ids).await?;
    for record in &records {
        handler.authorize(principal, &Ability::Delete, Some(record))?;
    }

    let deleted = execute(&mut conn, persist::delete_statement(handler, &ids)).await?;
    let soft = handler.archive_column.is_some();
    if !soft {
        state.files.remove_all(&stored_files(handler, &records)).await;
    }

    tracing::info!(model = %handler.slug, count = deleted, operation = "bulk_delete", soft, "Records deleted");
    crate::metrics::records_written(&handler.slug, "delete", deleted);
    for id in &ids {
        audit(
            state,
            principal,
            AuditEvent::RecordDeleted {
                model: handler.slug.clone(),
                id: *id,
                soft,
            },
        );
    }
    finish(handler, "bulk_delete", started);
    Ok(deleted)
}

/// Run a named action on one record (`id`) or on the `ids` listed in `input`.
pub async fn run_action(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    name: &str,
    id: Option<i64>,
    input: Record,
) -> Result<Value, AdminError> {
    let started = Instant::now();
    let action = handler.action(name).ok_or_else(|| AdminError::UnknownAction {
        model: handler.slug.clone(),
        action: name.to_string(),
    })?;

    let ids = match id {
        Some(id) if action.target.allows_record() => vec![id],
        None if action.target.allows_bulk() => require_ids(&input)?,
        Some(_) => {
            return Err(AdminError::BadRequest(format!("action {name} cannot run on a single record")));
        }
        None => {
            return Err(AdminError::BadRequest(format!("action {name} cannot run in bulk")));
        }
    };

    let ids = unique_ids(ids);
    let ability = Ability::Action(name.to_string());
    let mut conn = db::connection(&state.pool).await?;
    let records = find_all(&mut conn, handler, principal, &ids).await?;
    for record in &records {
        handler.authorize(principal, &ability, Some(record))?;
    }

    let ctx = ActionContext {
        handler,
        principal,
        ids: &ids,
        input: &input,
    };
    let runner = &action.action;
    let result = conn
        .transaction::<_, AdminError, _>(|conn| async move { runner.run(conn, &ctx).await }.scope_boxed())
        .await?;

    tracing::info!(model = %handler.slug, action = name, ids = ?ids, "Action performed");
    audit(
        state,
        principal,
        AuditEvent::ActionPerformed {
            model: handler.slug.clone(),
            action: name.to_string(),
            ids: ids.clone(),
        },
    );
    finish(handler, "action", started);
    Ok(json!({
        "action": name,
        "ids": ids,
        "result": result,
    }))
}

/// `[{id, label}]` choices for a BelongsTo or BelongsToMany field.
pub async fn relation_options(
    state: &AdminState,
    handler: &ModelHandler,
    principal: &Principal,
    field: &str,
    search: Option<&str>,
) -> Result<Value, AdminError> {
    let started = Instant::now();
    handler.authorize(principal, &Ability::ViewAny, None)?;
    let rel = handler
        .field(field)
        .and_then(|f| f.relation_config())
        .filter(|rel| rel.kind != RelationKind::HasMany)
        .ok_or_else(|| AdminError::UnknownRelation {
            model: handler.slug.clone(),
            field: field.to_string(),
        })?;

    let mut conn = db::connection(&state.pool).await?;
    let rows = load_records(&mut conn, query::options_statement(rel, search)).await?;
    let options: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "id": row.get(&rel.primary_key).cloned().unwrap_or(Value::Null),
                "label": row.get(&rel.label_column).cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    finish(handler, "relation_options", started);
    Ok(Value::Array(options))
}
