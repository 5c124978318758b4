//! Per-entity CRUD and list service.
//!
//! # Responsibility
//! - Lazily connect and seed before the first table call.
//! - Validate candidates, run one table operation and wrap the outcome.
//!
//! # Invariants
//! - Each call resolves only its own future; no state is shared between
//!   in-flight calls except the cached binding.
//! - Invalid create candidates issue zero store calls.
//! - An entity's `id` is never part of an update patch.
//! - The binding is torn down only by `close`.

use super::seed::seed_if_empty;
use super::{Operation, ServiceError, ServiceResult};
use crate::config::ServiceConfig;
use crate::db::schema::KeyspaceSchema;
use crate::db::ConnectionBootstrapper;
use crate::model::entity::{from_record, to_record, Entity, ENTITY_KEY};
use crate::model::envelope::{PageResult, Response};
use crate::model::validation::{ValidationErrors, Validator};
use crate::store::{
    count_from_rows, with_deadline, Binding, Filter, FindOptions, Record, Statement,
    StoreConnector, StoreError, StoreResult, TableStore, UpdateOptions,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Identifies one entity for read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub id: String,
}

/// Identifies one entity for delete; echoed back on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: String,
}

/// List paging parameters; absent values fall back to the service config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListParams {
    pub page_index: Option<u32>,
    pub page_size: Option<u32>,
    pub id: Option<String>,
}

pub struct EntityService<E: Entity> {
    config: ServiceConfig,
    bootstrapper: ConnectionBootstrapper,
    validator: Arc<dyn Validator<E>>,
    binding: Mutex<Option<Binding>>,
    seed_lock: Mutex<()>,
    _entity: PhantomData<fn() -> E>,
}

fn require_id(id: Option<&str>) -> ServiceResult<String> {
    match id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ServiceError::Validation(ValidationErrors::single(
            ENTITY_KEY,
            "is required",
        ))),
    }
}

impl<E: Entity> EntityService<E> {
    /// Creates a service over the combined keyspace schema and the entity's
    /// default validator. Nothing is opened until the first operation.
    pub fn new(config: ServiceConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            config,
            bootstrapper: ConnectionBootstrapper::new(connector, KeyspaceSchema::smartpark()),
            validator: E::default_validator(),
            binding: Mutex::new(None),
            seed_lock: Mutex::new(()),
            _entity: PhantomData,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator<E>>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_schema(mut self, schema: KeyspaceSchema) -> Self {
        self.bootstrapper = ConnectionBootstrapper::new(self.bootstrapper.connector(), schema);
        self
    }

    /// Validates and persists a new entity built from `input`.
    pub async fn create(&self, input: E::Input) -> Response<E> {
        self.observe(Operation::Create, async {
            let entity = E::from_input(input);
            self.validator.validate(&entity)?;

            let table = self.ready().await?;
            let record = to_record(&entity).map_err(ServiceError::query(Operation::Create))?;
            self.call(Operation::Create, "save", table.save(record))
                .await?;
            Ok(entity)
        })
        .await
    }

    /// Returns the first entity matching `filter`.
    pub async fn read(&self, filter: Filter) -> Response<E> {
        self.observe(Operation::Read, async {
            let table = self.ready().await?;
            let row = self
                .call(Operation::Read, "find_one", table.find_one(&filter))
                .await?;
            match row {
                Some(record) => from_record(record).map_err(ServiceError::query(Operation::Read)),
                None => Err(ServiceError::NotFound {
                    entity: E::NAME,
                    target: filter.to_string(),
                }),
            }
        })
        .await
    }

    pub async fn read_by_id(&self, request: ReadRequest) -> Response<E> {
        if let Err(err) = require_id(Some(&request.id)) {
            return err.into_response();
        }
        self.read(Filter::by(ENTITY_KEY, request.id)).await
    }

    /// Applies the supplied fields to an existing entity.
    ///
    /// The stored row merged with `input` is materialized and validated; the
    /// resulting entity without `id` is then sent as the patch with
    /// `if_exists`, so the stored row equals the returned entity.
    pub async fn update(&self, input: E::Input) -> Response<E> {
        self.observe(Operation::Update, async {
            let id = require_id(E::input_id(&input))?;
            let to_query_err = ServiceError::query(Operation::Update);
            let mut supplied = match serde_json::to_value(&input) {
                Ok(Value::Object(fields)) => fields,
                Ok(other) => {
                    return Err(to_query_err(StoreError::InvalidData(format!(
                        "{} input serialized to non-object {other}",
                        E::NAME
                    ))))
                }
                Err(err) => return Err(to_query_err(StoreError::from(err))),
            };
            supplied.remove(ENTITY_KEY);

            let table = self.ready().await?;
            let existing = self
                .call(
                    Operation::Update,
                    "find_one",
                    table.find_one(&Filter::by(ENTITY_KEY, id.as_str())),
                )
                .await?
                .ok_or_else(|| ServiceError::NotFound {
                    entity: E::NAME,
                    target: id.clone(),
                })?;

            let mut merged: Record = existing;
            merged.extend(supplied);
            merged.insert(ENTITY_KEY.to_string(), Value::String(id.clone()));
            let candidate: E =
                from_record(merged).map_err(ServiceError::query(Operation::Update))?;
            self.validator.validate(&candidate)?;

            let mut patch = to_record(&candidate).map_err(ServiceError::query(Operation::Update))?;
            patch.remove(ENTITY_KEY);
            let outcome = self
                .call(
                    Operation::Update,
                    "update",
                    table.update(&id, patch, UpdateOptions { if_exists: true }),
                )
                .await?;
            if !outcome.applied {
                return Err(ServiceError::NotFound {
                    entity: E::NAME,
                    target: id,
                });
            }
            Ok(candidate)
        })
        .await
    }

    /// Deletes by id and echoes the request, whether or not a row existed.
    pub async fn delete(&self, request: DeleteRequest) -> Response<DeleteRequest> {
        self.observe(Operation::Delete, async {
            let id = require_id(Some(&request.id))?;
            let table = self.ready().await?;
            self.call(
                Operation::Delete,
                "delete",
                table.delete(&Filter::by(ENTITY_KEY, id)),
            )
            .await?;
            Ok(request)
        })
        .await
    }

    /// Returns one page of entities plus the matching total.
    pub async fn list(&self, params: ListParams) -> Response<PageResult<E>> {
        self.observe(Operation::List, async {
            let page_size = params.page_size.unwrap_or(self.config.page_size);
            let page_index = params.page_index.unwrap_or(self.config.page_index);
            if page_size == 0 {
                return Err(ServiceError::Validation(ValidationErrors::single(
                    "pageSize",
                    "must be greater than zero",
                )));
            }
            let offset = page_size.checked_mul(page_index).ok_or_else(|| {
                ServiceError::Validation(ValidationErrors::single(
                    "pageIndex",
                    "page offset is out of range",
                ))
            })?;

            let table = self.ready().await?;
            let filter = match params.id {
                Some(id) => Filter::by(ENTITY_KEY, id),
                None => Filter::all(),
            };
            let rows = self
                .call(
                    Operation::List,
                    "find",
                    table.find(
                        &filter.clone().with_limit(page_size).with_skip(offset),
                        FindOptions::default(),
                    ),
                )
                .await?;
            let counted = self
                .call(
                    Operation::List,
                    "execute",
                    table.execute(&Statement::Count(filter)),
                )
                .await?;
            let total = count_from_rows(&counted).map_err(ServiceError::query(Operation::List))?;

            let items = rows
                .into_iter()
                .map(from_record::<E>)
                .collect::<StoreResult<Vec<_>>>()
                .map_err(ServiceError::query(Operation::List))?;
            Ok(PageResult::new(items, page_index, page_size, total))
        })
        .await
    }

    /// Closes the cached binding; the next operation reconnects.
    pub async fn close(&self) -> StoreResult<()> {
        let binding = self.binding.lock().await.take();
        match binding {
            Some(binding) => {
                let closed =
                    with_deadline(self.config.db.request_timeout(), "close", binding.close()).await;
                match &closed {
                    Ok(()) => info!(
                        "event=entity_close module=service status=ok entity={}",
                        E::NAME
                    ),
                    Err(err) => warn!(
                        "event=entity_close module=service status=error entity={} error={}",
                        E::NAME,
                        err
                    ),
                }
                closed
            }
            None => Ok(()),
        }
    }

    /// Phase A: connect (cached) and seed the entity table when empty.
    async fn ready(&self) -> ServiceResult<Arc<dyn TableStore>> {
        let binding = self.binding().await?;
        let table = binding
            .table(E::TABLE)
            .map_err(ServiceError::query(Operation::Seed))?;

        let _seeding = self.seed_lock.lock().await;
        seed_if_empty::<E>(table.as_ref(), self.config.db.request_timeout()).await?;
        Ok(table)
    }

    async fn binding(&self) -> ServiceResult<Binding> {
        let mut cached = self.binding.lock().await;
        if let Some(binding) = cached.as_ref() {
            return Ok(binding.clone());
        }
        let binding = self.bootstrapper.connect(&self.config.db).await?;
        *cached = Some(binding.clone());
        Ok(binding)
    }

    /// Runs one table round-trip under the request timeout.
    async fn call<T>(
        &self,
        operation: Operation,
        method: &str,
        future: impl Future<Output = StoreResult<T>>,
    ) -> ServiceResult<T> {
        let label = format!("{}.{method}", E::TABLE);
        with_deadline(self.config.db.request_timeout(), &label, future)
            .await
            .map_err(ServiceError::query(operation))
    }

    async fn observe<T>(
        &self,
        operation: Operation,
        work: impl Future<Output = ServiceResult<T>>,
    ) -> Response<T> {
        let started_at = Instant::now();
        info!(
            "event={} module=service status=start entity={}",
            operation.event(),
            E::NAME
        );
        match work.await {
            Ok(data) => {
                info!(
                    "event={} module=service status=ok entity={} duration_ms={}",
                    operation.event(),
                    E::NAME,
                    started_at.elapsed().as_millis()
                );
                Response::ok(data)
            }
            Err(err) => {
                error!(
                    "event={} module=service status=error entity={} kind={:?} retryable={} duration_ms={} error={}",
                    operation.event(),
                    E::NAME,
                    err.kind(),
                    err.is_retryable(),
                    started_at.elapsed().as_millis(),
                    err
                );
                err.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::envelope::ErrorKind;
    use crate::model::garage::Garage;
    use crate::store::InMemoryConnector;

    fn service(connector: &InMemoryConnector) -> EntityService<Garage> {
        EntityService::new(
            ServiceConfig::default(),
            Arc::new(connector.clone()) as Arc<dyn StoreConnector>,
        )
    }

    #[test]
    fn list_params_accept_camel_case() {
        let params: ListParams =
            serde_json::from_value(serde_json::json!({"pageIndex": 2, "pageSize": 10})).unwrap();
        assert_eq!(params.page_index, Some(2));
        assert_eq!(params.page_size, Some(10));
        assert_eq!(params.id, None);
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected_before_connecting() {
        let connector = InMemoryConnector::new();
        let response = service(&connector)
            .list(ListParams {
                page_size: Some(0),
                ..ListParams::default()
            })
            .await;
        assert_eq!(response.error, Some(ErrorKind::Validation));
        assert!(connector.operations().is_empty());
    }

    #[tokio::test]
    async fn overflowing_offset_is_rejected() {
        let connector = InMemoryConnector::new();
        let response = service(&connector)
            .list(ListParams {
                page_index: Some(u32::MAX),
                page_size: Some(50),
                id: None,
            })
            .await;
        assert_eq!(response.error, Some(ErrorKind::Validation));
        assert!(response.message.contains("pageIndex"));
    }

    #[tokio::test]
    async fn binding_is_reused_until_close() {
        let connector = InMemoryConnector::new();
        let service = service(&connector);
        assert!(service.list(ListParams::default()).await.success);
        assert!(service.list(ListParams::default()).await.success);
        let opens = |ops: &[crate::store::StoreOp]| {
            ops.iter()
                .filter(|op| matches!(op, crate::store::StoreOp::Open { .. }))
                .count()
        };
        assert_eq!(opens(&connector.operations()), 2);

        service.close().await.unwrap();
        assert!(service.list(ListParams::default()).await.success);
        assert_eq!(opens(&connector.operations()), 4);
    }
}
