//! Periodic housekeeping: expire stale reservations and flag overdue loans

use std::time::Duration;

use tokio::{task::JoinHandle, time};

use super::Services;

/// Start the background sweep. Returns `None` when the interval is zero.
pub fn spawn(services: Services) -> Option<JoinHandle<()>> {
    let secs = services.borrowings.rules().sweep_interval_secs;
    if secs == 0 {
        tracing::info!("background sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_once(&services).await;
        }
    }))
}

/// One pass of the sweep; failures are logged and retried on the next tick
pub async fn run_once(services: &Services) {
    match services.reservations.sweep_expired().await {
        Ok(0) => {}
        Ok(expired) => tracing::info!(expired, "expired stale reservations"),
        Err(e) => tracing::error!(error = %e, "reservation sweep failed"),
    }

    if !services.borrowings.rules().auto_mark_overdue {
        return;
    }
    match services.borrowings.sweep_overdue().await {
        Ok(0) => {}
        Ok(marked) => tracing::info!(marked, "marked borrowings overdue"),
        Err(e) => tracing::error!(error = %e, "overdue sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LendingConfig,
        services::test_support::{fixture_clock, lazy_repository},
    };

    #[tokio::test]
    async fn zero_interval_disables_sweep() {
        let rules = LendingConfig {
            sweep_interval_secs: 0,
            ..LendingConfig::default()
        };
        let services = Services::new(lazy_repository(), rules, fixture_clock());
        assert!(spawn(services).is_none());
    }
}
