mod events;
mod gateway;
mod metrics;

pub use events::{EventLog, EventLogConfig, UsageEvent, UsageEventKind};
pub use gateway::{Answer, AnswerSource, GatewayOutcome, QueryGateway};
pub use metrics::{Metrics, MetricsSummary, TimingStats};
