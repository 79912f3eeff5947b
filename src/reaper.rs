use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::waitlist::Waitlist;

/// Background task that periodically expires lapsed waitlist offers.
pub async fn run_offer_reaper(waitlist: Arc<Waitlist>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let expired = waitlist.expire_stale_offers(Utc::now()).await;
        if expired > 0 {
            info!("reaped {expired} expired waitlist offers");
        }
    }
}
