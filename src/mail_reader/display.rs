use crate::log_store::LogRecord;
use log::{info, error};

pub fn display_records(records: &[LogRecord]) {
    records
        .iter()
        .for_each(|record| {
            match serde_json::to_string_pretty(record) {
                Ok(json) => info!("{}", json),
                Err(e) => error!("Error converting to JSON: {}", e),
            }
            info!("---");
        });
}
