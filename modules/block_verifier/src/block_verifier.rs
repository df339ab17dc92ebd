//! Delos block verifier module for Caryatid
//! Runs the stateless verification battery over blocks announced on the bus
//! and publishes a Go/NoGo status for each

pub mod verifier;

use std::sync::Arc;

use anyhow::Result;
use caryatid_sdk::{module, Context};
use config::Config;
use tracing::{debug, error, info, info_span, Instrument};

use delos_common::messages::{BlockValidationMessage, ChainMessage, Message};
use delos_common::ValidationStatus;

use verifier::Verifier;

const DEFAULT_SUBSCRIBE_TOPIC: &str = "delos.block.received";
const DEFAULT_PUBLISH_TOPIC: &str = "delos.block.validated";

/// Block verifier module
/// Parameterised by the outer message enum used on the bus
#[module(
    message_type(Message),
    name = "block-verifier",
    description = "Stateless block verification battery"
)]
pub struct BlockVerifier;

impl BlockVerifier {
    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let subscribe_topic =
            config.get_string("subscribe-topic").unwrap_or(DEFAULT_SUBSCRIBE_TOPIC.to_string());
        info!("Creating block subscriber on '{subscribe_topic}'");

        let publish_topic =
            config.get_string("publish-topic").unwrap_or(DEFAULT_PUBLISH_TOPIC.to_string());
        info!("Publishing validation status on '{publish_topic}'");

        let verifier = Verifier::from_config(&config);

        let mut subscription = context.subscribe(&subscribe_topic).await?;
        context.clone().run(async move {
            loop {
                let Ok((_, message)) = subscription.read().await else {
                    return;
                };
                let Message::Chain(ChainMessage::BlockReceived(received)) = message.as_ref()
                else {
                    error!("Unexpected message type on '{subscribe_topic}'");
                    continue;
                };

                let block = &received.block;
                let span = info_span!("block_verifier.verify", block = %block.id);
                async {
                    let status = ValidationStatus::from(verifier.verify_stateless(block));
                    match &status {
                        ValidationStatus::Go => {
                            debug!(height = block.height, "Block verified");
                        }
                        ValidationStatus::NoGo(errors) => {
                            for error in errors {
                                error!(height = block.height, "Block verification failed: {error}");
                            }
                        }
                    }

                    let message = Message::from(BlockValidationMessage {
                        block_id: block.id,
                        status,
                    });
                    if let Err(e) =
                        context.message_bus.publish(&publish_topic, Arc::new(message)).await
                    {
                        error!("Failed to publish validation status: {e}");
                    }
                }
                .instrument(span)
                .await;
            }
        });

        Ok(())
    }
}
