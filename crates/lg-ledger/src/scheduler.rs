//! Periodic hotset version creation

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::ledger::{HotsetLedger, HotsetVersion, LedgerError};
use crate::registry::DomainSource;

/// Creates a new ledger version every `period`.
pub struct HotsetScheduler {
    ledger: Arc<HotsetLedger>,
    source: Arc<dyn DomainSource>,
    period: Duration,
}

impl HotsetScheduler {
    pub fn new(ledger: Arc<HotsetLedger>, source: Arc<dyn DomainSource>, period: Duration) -> Self {
        Self {
            ledger,
            source,
            period: period.max(Duration::from_millis(10)),
        }
    }

    /// Create one version now.
    pub async fn run_once(&self) -> Result<HotsetVersion, LedgerError> {
        let ledger = self.ledger.clone();
        let source = self.source.clone();
        match tokio::task::spawn_blocking(move || ledger.create_version(source.as_ref())).await {
            Ok(result) => result,
            Err(e) => Err(LedgerError::Task(e.to_string())),
        }
    }

    /// Run forever on the tokio runtime. The first version is cut after one period.
    pub fn spawn(self) -> JoinHandle<()> {
        log::info!("Hotset scheduler started, period {:?}", self.period);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(row) => log::info!("Scheduled hotset version {} created", row.version),
                    Err(e) => log::warn!("Scheduled hotset creation failed: {}", e),
                }
            }
        })
    }
}
