/// Kafka consumers
pub mod alert_events;
pub mod group;
pub mod kafka_group;

pub use alert_events::{
    AckMode, AlertClaimHandler, AlertConsumerConfig, AlertEventsConsumer,
};
pub use group::{
    ConsumerError, ConsumerGroup, ConsumerState, GroupHandler, GroupSession, InboundMessage,
    MessageAcker, PartitionClaim,
};
pub use kafka_group::{KafkaConsumerGroup, KafkaGroupConfig};
