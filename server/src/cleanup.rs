use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::accounts::AccountStore;

/// Runs `job` every `interval`, starting one interval from now.
///
/// A failed run is logged and the next one is scheduled regardless, the task only stops
/// when aborted.
///
/// # Arguments
/// * `name` - The job's name, for the logs.
/// * `interval` - The time between two runs.
/// * `job` - Produces the future of each run, resolving to how many items it handled.
pub fn spawn_periodic<F, Fut, E>(name: &'static str, interval: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize, E>> + Send + 'static,
    E: Display + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match job().await {
                Ok(0) => debug!(job = name; "periodic job had nothing to do"),
                Ok(n) => info!(job = name, handled = n; "periodic job done"),
                Err(e) => warn!(job = name; "periodic job failed, retrying next interval: {e}"),
            }
        }
    })
}

/// Spawns the purge of accounts left unverified for longer than `ttl`.
pub fn spawn_account_purge(
    accounts: Arc<AccountStore>,
    interval: Duration,
    ttl: chrono::Duration,
) -> JoinHandle<()> {
    spawn_periodic("unverified account purge", interval, move || {
        let accounts = accounts.clone();
        async move { Ok::<_, std::convert::Infallible>(accounts.purge_unverified(Utc::now(), ttl)) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Account;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let handle = spawn_periodic("flaky", Duration::from_secs(3600), move || {
            let run = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if run % 2 == 0 {
                    Err(format!("run {run} failed"))
                } else {
                    Ok(run)
                }
            }
        });

        time::sleep(Duration::from_secs(3600 * 4 + 1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn purges_stale_accounts_every_interval() {
        let accounts = Arc::new(AccountStore::new());
        accounts.insert(Account::new("stale@example.com", Utc::now() - chrono::Duration::hours(48)));
        accounts.insert(Account::new("fresh@example.com", Utc::now()));

        let handle = spawn_account_purge(
            accounts.clone(),
            Duration::from_secs(60),
            chrono::Duration::hours(24),
        );
        assert_eq!(accounts.len(), 2);

        time::sleep(Duration::from_secs(61)).await;
        assert_eq!(accounts.len(), 1);
        handle.abort();
    }
}
