//! Drains the outbox to RabbitMQ. Each PENDING row is published to the
//! `medtrax.events` topic exchange with its event type as routing key and
//! marked SENT once the broker confirms it. Failures leave the row PENDING
//! for the next tick.

use anyhow::{Context, Result, anyhow};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::FieldTable,
};
use tracing::{error, info};

use crate::{
    core::{app_state::AppState, outbox},
    models::OutboxEntity,
    schema::outbox as outbox_table,
};

pub const EXCHANGE: &str = "medtrax.events";
const BATCH_SIZE: i64 = 50;
const PERSISTENT: u8 = 2;

struct Publisher {
    // Held so the connection outlives the channel.
    _connection: Connection,
    channel: Channel,
}

impl Publisher {
    async fn connect(amqp_url: &str) -> Result<Self> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open a channel")?;

        channel
            .exchange_declare(
                EXCHANGE.into(),
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare exchange")?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    async fn publish(&self, row: &OutboxEntity) -> Result<()> {
        let confirmation = self
            .channel
            .basic_publish(
                EXCHANGE.into(),
                row.event_type.as_str().into(),
                BasicPublishOptions::default(),
                row.payload.as_bytes(),
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(anyhow!("Broker rejected outbox row #{}", row.id));
        }
        Ok(())
    }
}

/// Runs until the task is aborted. The broker connection is opened lazily
/// and re-opened after any publish failure.
pub async fn run(state: AppState, amqp_url: String) {
    let mut interval = tokio::time::interval(state.config.broker.poll_interval);
    let mut publisher: Option<Publisher> = None;

    loop {
        interval.tick().await;

        if publisher.is_none() {
            match Publisher::connect(&amqp_url).await {
                Ok(connected) => {
                    info!("Outbox relay connected to RabbitMQ");
                    publisher = Some(connected);
                }
                Err(err) => {
                    error!("Outbox relay could not connect: {:#}", err);
                    continue;
                }
            }
        }

        if let Some(active) = publisher.as_ref() {
            if let Err(err) = relay_pending(&state, active).await {
                error!("Outbox relay failed: {:#}", err);
                publisher = None;
            }
        }
    }
}

async fn relay_pending(state: &AppState, publisher: &Publisher) -> Result<()> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let pending: Vec<OutboxEntity> = outbox_table::table
        .filter(outbox_table::status.eq(outbox::STATUS_PENDING))
        .order(outbox_table::id.asc())
        .limit(BATCH_SIZE)
        .select(OutboxEntity::as_select())
        .load(conn)
        .await
        .context("Failed to load pending outbox rows")?;

    for row in pending {
        publisher.publish(&row).await?;

        diesel::update(outbox_table::table.find(row.id))
            .set((
                outbox_table::status.eq(outbox::STATUS_SENT),
                outbox_table::updated_at.eq(diesel::dsl::now),
            ))
            .execute(conn)
            .await
            .context("Failed to mark outbox row as sent")?;

        info!("Relayed {} (outbox #{})", row.event_type, row.id);
    }

    Ok(())
}
