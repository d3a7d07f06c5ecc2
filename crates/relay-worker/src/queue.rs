//! AMQP plumbing: connect with retry, declare the queues, and run the
//! consume loop with prefetch 1.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

use relay_core::dispatcher::{DLQ_QUEUE, Dispatcher, Disposition, TASK_QUEUE};

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Connect to the broker, retrying until it is reachable, and declare the
/// work queue and its DLQ (both durable). Prefetch is pinned to 1 so the
/// worker processes one task at a time.
pub async fn connect(rabbit_url: &str) -> Channel {
    loop {
        match try_connect(rabbit_url).await {
            Ok(channel) => return channel,
            Err(e) => {
                warn!(error = %e, "broker not reachable, retrying in 2s");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

async fn try_connect(rabbit_url: &str) -> Result<Channel> {
    let connection = Connection::connect(rabbit_url, ConnectionProperties::default())
        .await
        .context("failed to connect to broker")?;
    let channel = connection
        .create_channel()
        .await
        .context("failed to open channel")?;

    let durable = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };
    channel
        .queue_declare(TASK_QUEUE, durable, FieldTable::default())
        .await
        .context("failed to declare task queue")?;
    channel
        .queue_declare(DLQ_QUEUE, durable, FieldTable::default())
        .await
        .context("failed to declare DLQ")?;

    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .context("failed to set prefetch")?;

    Ok(channel)
}

/// Consume deliveries until the channel dies. Each delivery gets exactly
/// one ack or nack, decided by the dispatcher.
pub async fn consume(channel: &Channel, dispatcher: &Dispatcher) -> Result<()> {
    let mut consumer = channel
        .basic_consume(
            TASK_QUEUE,
            "relay-worker",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("failed to start consumer")?;

    info!(queue = TASK_QUEUE, "waiting for tasks");

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery.context("delivery failed, channel is broken")?;

        match dispatcher.handle_message(&delivery.data).await {
            Disposition::Ack => {
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .context("failed to ack delivery")?;
            }
            Disposition::NackRequeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await
                    .context("failed to nack delivery")?;
            }
        }
    }

    Ok(())
}
