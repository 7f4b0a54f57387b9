//! Infrastructure layer: queue transport, broker, workers, sweeper,
//! storage, delivery, config.

pub mod broker;
pub mod config;
pub mod delivery;
pub mod enqueue;
pub mod storage;
pub mod sweeper;
pub mod transport;
pub mod worker;

pub use broker::{Broker, BrokerError};
pub use config::{Config, ConfigError, DatabaseConfig, QueueConfig, RedisConfig};
pub use delivery::{DeliveryError, MailTransport, SmtpMailer};
pub use enqueue::{EnqueueError, EnqueueRequest, TaskService};
pub use storage::{
    connect_pool, run_migrations, InMemoryTaskStore, InMemoryUserStore, PgTaskStore, PgUserStore,
    StorageError, TaskStore, UserStore,
};
pub use sweeper::{Sweeper, SweeperConfig};
pub use transport::{
    InMemoryTransport, QueueConsumer, QueueTransport, RedisTransport, TransportError,
};
pub use worker::{spawn_pool, SharedTaskReceiver, Worker, WorkerError, WorkerExit};
