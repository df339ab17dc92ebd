//! Delos chain module for Caryatid
//! Owns the canonical chain: fork choice, block application and storage

pub mod controller;
pub mod error;
pub mod fork_choice;
pub mod interfaces;
pub mod mutator;
pub mod processor;
pub mod stores;
#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use caryatid_sdk::{module, Context};
use config::Config;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, Instrument};

use delos_common::{
    codec,
    messages::{
        BroadcastBlockMessage, ChainMessage, Message, NewBlockMessage, SyncRequiredMessage,
    },
    Block, ChainParams, SlotCalculator,
};
use delos_module_block_verifier::verifier::Verifier;

use controller::ChainController;
use interfaces::{ChainObserver, ForkCase, OpenSchedule, PassthroughPipeline};
use stores::{FjallStore, Store};

const DEFAULT_SUBSCRIBE_TOPIC: &str = "delos.block.received";
const DEFAULT_PUBLISH_APPLIED_TOPIC: &str = "delos.block.applied";
const DEFAULT_PUBLISH_BROADCAST_TOPIC: &str = "delos.block.broadcast";
const DEFAULT_PUBLISH_SYNC_TOPIC: &str = "delos.chain.sync-required";

// Staleness is checked once a minute off the shared clock
const STALENESS_CHECK_TICKS: u64 = 60;

/// Events emitted by the controller observer, queued for async publishing
enum ChainEvent {
    Applied(Block),
    Broadcast(Block),
    SyncRequired(Block),
}

/// Shared event queue between the observer and the main loop
type EventQueue = Arc<std::sync::Mutex<Vec<ChainEvent>>>;

/// Observer that queues controller events for later async publishing
struct QueueObserver {
    events: EventQueue,
}

impl ChainObserver for QueueObserver {
    fn block_applied(&self, block: &Block) {
        self.events.lock().unwrap().push(ChainEvent::Applied(block.clone()));
    }

    fn block_broadcast(&self, block: &Block) {
        self.events.lock().unwrap().push(ChainEvent::Broadcast(block.clone()));
    }

    fn sync_required(&self, block: &Block) {
        self.events.lock().unwrap().push(ChainEvent::SyncRequired(block.clone()));
    }

    fn fork_detected(&self, block: &Block, case: ForkCase) {
        // Fork statistics are tracked by the rounds layer; just log here
        tracing::warn!(id = %block.id, ?case, "Fork detected");
    }
}

/// Chain module
/// Parameterised by the outer message enum used on the bus
#[module(
    message_type(Message),
    name = "chain",
    description = "Canonical chain with fork choice and block application"
)]
pub struct Chain;

impl Chain {
    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        // Get configuration
        let subscribe_topic = config
            .get_string("subscribe-topic")
            .unwrap_or(DEFAULT_SUBSCRIBE_TOPIC.to_string());
        info!("Creating block subscriber on '{subscribe_topic}'");

        let publish_applied_topic = config
            .get_string("publish-applied-topic")
            .unwrap_or(DEFAULT_PUBLISH_APPLIED_TOPIC.to_string());
        info!("Publishing applied blocks on '{publish_applied_topic}'");

        let publish_broadcast_topic = config
            .get_string("publish-broadcast-topic")
            .unwrap_or(DEFAULT_PUBLISH_BROADCAST_TOPIC.to_string());

        let publish_sync_topic = config
            .get_string("publish-sync-topic")
            .unwrap_or(DEFAULT_PUBLISH_SYNC_TOPIC.to_string());

        let verifier = Arc::new(Verifier::from_config(&config));
        let params = verifier.params().clone();
        let slots = SlotCalculator::new(&params);

        let store: Arc<dyn Store> = Arc::new(FjallStore::new(config.clone())?);

        // Bootstrap the tip: last stored block, or a fresh genesis
        let (tip, fresh_genesis) = match store.get_last_block()? {
            Some(block) => {
                info!(id = %block.id, height = block.height, "Resuming from stored tip");
                (block, false)
            }
            None => {
                let genesis = genesis_block(&params);
                info!(id = %genesis.id, "Empty store; starting from genesis");
                (genesis, true)
            }
        };

        let event_queue: EventQueue = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observer = Arc::new(QueueObserver {
            events: event_queue.clone(),
        });

        let controller = ChainController::new(
            params,
            verifier,
            store,
            Arc::new(PassthroughPipeline),
            Arc::new(OpenSchedule),
            observer,
            tip.clone(),
        );
        if fresh_genesis {
            controller.processor().mutator().save_genesis_block(&tip)?;
        }
        let controller = Arc::new(Mutex::new(controller));

        // Periodic staleness check off the shared clock
        let controller_tick = controller.clone();
        let tick_slots = slots;
        let mut tick_subscription = context.subscribe("clock.tick").await?;
        context.clone().run(async move {
            loop {
                let Ok((_, message)) = tick_subscription.read().await else {
                    return;
                };
                let controller = controller_tick.clone();
                if let Message::Clock(message) = message.as_ref() {
                    if (message.number % STALENESS_CHECK_TICKS) == 0 {
                        let now_unix = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or_default();
                        let now = tick_slots.epoch_time(now_unix);
                        if controller.lock().await.is_stale(now) {
                            debug!("No blocks received recently; chain may be stale");
                        }
                    }
                }
            }
        });

        // Main block-processing loop
        let mut subscription = context.subscribe(&subscribe_topic).await?;
        context.clone().run(async move {
            loop {
                let Ok((_, message)) = subscription.read().await else {
                    error!("Block message read failed");
                    return;
                };

                let Message::Chain(ChainMessage::BlockReceived(received)) = message.as_ref()
                else {
                    error!("Unexpected message type: {message:?}");
                    continue;
                };

                let span = info_span!("chain.process", block = %received.block.id);
                async {
                    let result = controller
                        .lock()
                        .await
                        .receive_block_from_network(received.block.clone(), received.received_at);
                    if let Err(e) = result {
                        error!("Failed to process block: {e}");
                    }

                    // Publish whatever the controller observed, in order
                    let events: Vec<ChainEvent> =
                        event_queue.lock().unwrap().drain(..).collect();
                    for event in events {
                        let (topic, msg) = match event {
                            ChainEvent::Applied(block) => (
                                &publish_applied_topic,
                                Message::from(NewBlockMessage { block }),
                            ),
                            ChainEvent::Broadcast(block) => (
                                &publish_broadcast_topic,
                                Message::from(BroadcastBlockMessage { block }),
                            ),
                            ChainEvent::SyncRequired(block) => (
                                &publish_sync_topic,
                                Message::from(SyncRequiredMessage { block }),
                            ),
                        };
                        context
                            .message_bus
                            .publish(topic, Arc::new(msg))
                            .await
                            .unwrap_or_else(|e| error!("Failed to publish: {e}"));
                    }
                }
                .instrument(span)
                .await;
            }
        });

        Ok(())
    }
}

/// The default genesis block: height 1, epoch start, no parent, no payload
fn genesis_block(params: &ChainParams) -> Block {
    let mut genesis = Block {
        version: params.block_version,
        height: 1,
        timestamp: 0,
        previous_block_id: None,
        ..Default::default()
    };
    genesis.id = codec::block_id(&genesis);
    genesis
}
