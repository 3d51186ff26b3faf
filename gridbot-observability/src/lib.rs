pub mod alert;
pub mod logging;
pub mod metrics;

pub use alert::{stopping_failed_alert, Alert, AlertSeverity, AlertSink, LoggingAlertSink};
pub use logging::{init_json_logging, init_logging};
pub use metrics::{Counter, Histogram, PipelineMetrics};
