//! Round state machine: await first bet, run the multiplier, crash, settle,
//! then schedule the next round.

use super::{
    crash_point::{round_hash_hex, CrashPointGenerator},
    multiplier::MultiplierClock,
    round_table::{LiveRound, RoundTable},
    types::{round_to, RoundPhase},
};
use crate::{
    config::GameConfig,
    events::{BetSummary, CashoutSummary, EventBroadcaster, RoundEvent},
    game_store::GameStore,
    metrics::EngineMetrics,
};
use chrono::Utc;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
    time::{interval_at, sleep, timeout, Instant},
};
use tracing::{debug, error, info};

/// Phase timings of one round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundTiming {
    pub round_duration: Duration,
    pub tick_interval: Duration,
    pub bet_wait: Duration,
    pub min_round_gap: Duration,
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self::from(&GameConfig::default())
    }
}

impl From<&GameConfig> for RoundTiming {
    fn from(config: &GameConfig) -> Self {
        Self {
            round_duration: config.round_duration(),
            tick_interval: config.tick_interval(),
            bet_wait: config.bet_wait(),
            min_round_gap: config.min_round_gap(),
        }
    }
}

impl RoundTiming {
    /// Pause before the next round. A skipped multiplier phase counts as
    /// having used the whole duration budget.
    pub fn next_round_delay(&self, multiplier_elapsed: Option<Duration>) -> Duration {
        let elapsed = multiplier_elapsed.unwrap_or(self.round_duration);
        self.round_duration
            .saturating_sub(elapsed)
            .max(self.min_round_gap)
    }
}

/// Outcome of one completed round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub round_id: u64,
    pub crash_point: f64,
    pub total_bets: usize,
    pub total_cashouts: usize,
    /// `None` when no bet arrived and the multiplier never ran
    pub multiplier_elapsed: Option<Duration>,
    pub next_round_delay: Duration,
}

fn wall_clock_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

pub struct RoundLifecycleManager {
    table: Arc<RoundTable>,
    store: Arc<dyn GameStore>,
    events: EventBroadcaster,
    generator: CrashPointGenerator,
    server_seed: String,
    timing: RoundTiming,
    clock_ms: fn() -> u64,
    last_round_id: AtomicU64,
    metrics: Option<Arc<EngineMetrics>>,
}

impl RoundLifecycleManager {
    pub fn new(
        table: Arc<RoundTable>,
        store: Arc<dyn GameStore>,
        events: EventBroadcaster,
        config: &GameConfig,
    ) -> Self {
        Self {
            table,
            store,
            events,
            generator: CrashPointGenerator::new(config.max_crash_point),
            server_seed: config.server_seed.clone(),
            timing: RoundTiming::from(config),
            clock_ms: wall_clock_ms,
            last_round_id: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Millisecond clock used to mint round ids
    pub fn with_round_clock(mut self, clock_ms: fn() -> u64) -> Self {
        self.clock_ms = clock_ms;
        self
    }

    /// Continue numbering after rounds that already exist in storage
    pub fn resume_after(self, round_id: u64) -> Self {
        self.last_round_id.store(round_id, Ordering::SeqCst);
        self
    }

    /// Time-derived id, strictly greater than every id minted before
    fn next_round_id(&self) -> u64 {
        let now = (self.clock_ms)();
        let mut last = self.last_round_id.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_round_id
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    /// Open a new round for bets and announce it
    pub async fn start_round(&self) -> (u64, f64, oneshot::Receiver<()>) {
        let round_id = self.next_round_id();
        let crash_point = self.generator.generate(&self.server_seed, round_id);
        let (round, first_bet) = LiveRound::new(round_id, crash_point);

        {
            let mut guard = self.table.lock().await;
            *guard = Some(round);
            self.events.publish(RoundEvent::RoundStart {
                round_id,
                crash_point,
            });
        }

        if let Some(metrics) = &self.metrics {
            metrics.rounds_total.inc();
            metrics.current_multiplier.set(1.0);
        }
        info!("Round {} started, crash point {:.2}x", round_id, crash_point);
        debug!(
            "Round {} hash {} ({} observers)",
            round_id,
            round_hash_hex(&self.server_seed, round_id),
            self.events.observer_count()
        );
        (round_id, crash_point, first_bet)
    }

    /// Wait for the first bet or the bet window to close. Returns true when
    /// the round has bets and moves to the running phase.
    async fn await_first_bet(&self, first_bet: oneshot::Receiver<()>) -> bool {
        let signalled = matches!(timeout(self.timing.bet_wait, first_bet).await, Ok(Ok(())));

        let mut guard = self.table.lock().await;
        let Some(round) = guard.as_mut() else {
            return false;
        };
        round.close_bet_signal();

        // A bet can commit between the timeout firing and this lock
        if signalled || !round.record.bets.is_empty() {
            round.phase = RoundPhase::Running;
            true
        } else {
            // Closed under the same guard, so a bet queued on the lock sees it
            round.phase = RoundPhase::Crashed;
            info!("No bet received for round {}, skipping multiplier", round.round_id());
            false
        }
    }

    /// Tick the multiplier until the crash. Returns the elapsed phase time.
    async fn run_multiplier(&self, crash_point: f64) -> Duration {
        let started_at = Instant::now();
        let clock = MultiplierClock::starting_at(started_at, crash_point, self.timing.round_duration);
        let mut ticker = interval_at(started_at + self.timing.tick_interval, self.timing.tick_interval);

        loop {
            ticker.tick().await;
            let sample = clock.sample();

            let mut guard = self.table.lock().await;
            let Some(round) = guard.as_mut() else {
                return sample.elapsed;
            };
            round.multiplier = sample.multiplier;
            if sample.finished {
                round.phase = RoundPhase::Crashed;
            }
            self.events.publish(RoundEvent::MultiplierUpdate {
                multiplier: sample.multiplier,
            });
            drop(guard);

            if let Some(metrics) = &self.metrics {
                metrics.current_multiplier.set(sample.multiplier);
            }
            debug!("Multiplier {:.2}x", sample.multiplier);

            if sample.finished {
                return sample.elapsed;
            }
        }
    }

    /// Commit the crash, announce the tallies, flush the durable record and
    /// clear the round. Storage failures are logged and never propagate.
    async fn settle(&self, multiplier_elapsed: Option<Duration>) -> Option<RoundSummary> {
        let (mut record, persisted) = {
            let mut guard = self.table.lock().await;
            let round = guard.as_mut()?;
            round.phase = RoundPhase::Crashed;
            round.players.clear();

            let duration = multiplier_elapsed.map_or(0.0, |d| round_to(d.as_secs_f64(), 2));
            self.events.publish(RoundEvent::RoundCrash {
                crash_point: round.crash_point(),
                duration,
                total_bets: round.record.bets.len(),
                total_cashouts: round.record.cashouts.len(),
                all_bets: round
                    .record
                    .bets
                    .iter()
                    .map(|b| BetSummary {
                        player_id: b.player_id.clone(),
                        usd_amount: b.usd_amount,
                    })
                    .collect(),
                all_cashouts: round
                    .record
                    .cashouts
                    .iter()
                    .map(|c| CashoutSummary {
                        player_id: c.player_id.clone(),
                        usd_value: c.usd_value,
                        multiplier: c.multiplier,
                    })
                    .collect(),
            });
            (round.record.clone(), round.persisted)
        };

        info!(
            "Round {} crashed at {:.2}x | bets: {} | cashouts: {}",
            record.round_id,
            record.crash_point,
            record.bets.len(),
            record.cashouts.len()
        );

        if persisted {
            record.finalized_at = Some(Utc::now());
            if let Err(e) = self.store.finalize_round(&record).await {
                error!("Failed to save round {}: {}", record.round_id, e);
                if let Some(metrics) = &self.metrics {
                    metrics.settlement_failures_total.inc();
                }
            }
        }

        self.table.lock().await.take();

        if multiplier_elapsed.is_none() {
            if let Some(metrics) = &self.metrics {
                metrics.empty_rounds_total.inc();
            }
        }

        Some(RoundSummary {
            round_id: record.round_id,
            crash_point: record.crash_point,
            total_bets: record.bets.len(),
            total_cashouts: record.cashouts.len(),
            multiplier_elapsed,
            next_round_delay: self.timing.next_round_delay(multiplier_elapsed),
        })
    }

    /// Drive one full round from start to settlement
    pub async fn run_round(&self) -> Option<RoundSummary> {
        let (_round_id, crash_point, first_bet) = self.start_round().await;

        let multiplier_elapsed = if self.await_first_bet(first_bet).await {
            Some(self.run_multiplier(crash_point).await)
        } else {
            None
        };

        self.settle(multiplier_elapsed).await
    }

    /// Run rounds back to back until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Round engine started");
        loop {
            let summary = tokio::select! {
                summary = self.run_round() => summary,
                _ = shutdown.recv() => break,
            };

            let delay = summary
                .map(|s| s.next_round_delay)
                .unwrap_or(self.timing.min_round_gap);
            info!("Next round in {:.2}s", delay.as_secs_f64());

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.table.lock().await.take();
        info!("Round engine stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
