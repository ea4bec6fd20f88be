//! Transactional outbox. Rows are written inside the caller's transaction
//! and shipped to the broker later by [`crate::relay`].

use anyhow::{Context, Result};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

use crate::{models::CreateOutboxEntity, schema::outbox};

pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_SENT: &str = "SENT";

pub async fn publish<T: Serialize>(
    conn: &mut AsyncPgConnection,
    event_type: String,
    payload: T,
) -> Result<()> {
    let payload = serde_json::to_string(&payload).context("Failed to serialize event payload")?;

    diesel::insert_into(outbox::table)
        .values(CreateOutboxEntity {
            event_type,
            payload,
            status: STATUS_PENDING.into(),
        })
        .execute(conn)
        .await
        .context("Failed to insert outbox row")?;

    Ok(())
}
