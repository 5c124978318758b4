//! First-access seeding of empty entity tables.

use super::{Operation, ServiceError, ServiceResult};
use crate::model::entity::{load_seed, to_record, Entity};
use crate::store::{with_deadline, Filter, FindOptions, TableStore};
use log::{debug, info};
use std::time::{Duration, Instant};

/// Inserts the entity's seed fixture when `table` holds no rows.
///
/// Records are saved one at a time; returns only after every record is
/// stored. Returns the number of records inserted (zero when the table
/// already had data).
pub(crate) async fn seed_if_empty<E: Entity>(
    table: &dyn TableStore,
    limit: Duration,
) -> ServiceResult<usize> {
    let find_op = format!("{}.find", E::TABLE);
    let existing = with_deadline(
        limit,
        &find_op,
        table.find(&Filter::all().with_limit(1), FindOptions::default()),
    )
    .await
    .map_err(ServiceError::query(Operation::Seed))?;
    if !existing.is_empty() {
        debug!(
            "event=entity_seed module=service status=skip entity={}",
            E::NAME
        );
        return Ok(0);
    }

    let started_at = Instant::now();
    let fixtures = load_seed::<E>().map_err(ServiceError::query(Operation::Seed))?;
    info!(
        "event=entity_seed module=service status=start entity={} records={}",
        E::NAME,
        fixtures.len()
    );

    let save_op = format!("{}.save", E::TABLE);
    let mut saved = 0;
    for fixture in &fixtures {
        let record = to_record(fixture).map_err(ServiceError::query(Operation::Seed))?;
        with_deadline(limit, &save_op, table.save(record))
            .await
            .map_err(ServiceError::query(Operation::Seed))?;
        debug!(
            "event=entity_seed module=service status=saved entity={} id={}",
            E::NAME,
            fixture.id()
        );
        saved += 1;
    }
    info!(
        "event=entity_seed module=service status=ok entity={} records={} duration_ms={}",
        E::NAME,
        saved,
        started_at.elapsed().as_millis()
    );
    Ok(saved)
}
