use super::{BridgeDriver, DriverState};
use crate::error::BridgeError;
use crate::normalize::{Normalizer, OutputDocument};
use crate::stats::StatRefreshJob;
use crate::vendor::Session;
use chrono::{DateTime, NaiveDate, Utc};

/// Vendor code of a rejected access token
const UNAUTHORIZED: i64 = 401;

impl BridgeDriver {
    /// Run one tick.
    ///
    /// Order: credential check, realtime fetch, launch of stale refreshes
    /// (not awaited), then build and emit once every cache is warm.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<OutputDocument> {
        self.state.send_replace(DriverState::Ticking);
        self.refreshes.retain(|h| !h.is_finished());

        let document = self.tick_inner(now).await;

        self.counters.ticks = self.counters.ticks.saturating_add(1);
        self.counters.last_tick_at = Some(now);
        if document.is_some() {
            self.counters.documents = self.counters.documents.saturating_add(1);
            self.counters.last_document_at = Some(now);
        } else {
            self.counters.skipped = self.counters.skipped.saturating_add(1);
        }
        self.state.send_replace(DriverState::Idle);
        document
    }

    async fn tick_inner(&mut self, now: DateTime<Utc>) -> Option<OutputDocument> {
        if !self.credentials.ensure_valid(now).await {
            self.logger.debug("No usable credential, skipping tick");
            return None;
        }
        let session = self.credentials.session(now)?;

        let realtime = match self.fetcher.fetch(&session).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if matches!(e, BridgeError::Rejected { code, .. } if code == UNAUTHORIZED) {
                    self.credentials.invalidate();
                }
                self.logger
                    .warn(&format!("Realtime fetch failed, skipping tick: {}", e));
                return None;
            }
        };

        let today = now.with_timezone(&self.tz).date_naive();
        self.launch_refreshes(now, today, &session);

        if !self.caches.all_warm() {
            self.logger
                .debug("Statistics caches not warm yet, nothing emitted");
            return None;
        }

        match Normalizer::build(self.adapter.as_ref(), &realtime, &self.caches.view(), today) {
            Ok(document) => {
                for sink in &self.sinks {
                    sink.emit(&document);
                }
                self.logger.trace(&format!(
                    "Emitted document: consumption={} grid={} modules={}",
                    document.payload.consumption, document.payload.grid, document.payload.modules
                ));
                Some(document)
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Could not build document: {}", e));
                None
            }
        }
    }

    fn launch_refreshes(&mut self, now: DateTime<Utc>, today: NaiveDate, session: &Session) {
        for cache in self.caches.stale(now) {
            self.logger
                .debug(&format!("Launching {} statistics refresh", cache.granularity()));
            let job = StatRefreshJob {
                client: self.client.clone(),
                cache,
                serial: self.serial().to_string(),
                session: session.clone(),
                date: today,
                closed: self.closed.clone(),
                logger: self.logger.clone(),
            };
            self.refreshes.push(tokio::spawn(job.run()));
        }
    }
}
