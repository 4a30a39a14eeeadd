use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::{Delivery, Inbox, RouterError};
use crate::bootstrap::ShutdownState;
use crate::config::RouterConfig;
use crate::coordinator::Batch;
use crate::machine::{Effect, Ignored, Transition};
use crate::messages::{CorrelationId, Envelope, ScheduleId, SendOutcome};
use crate::schedule::ScheduledMessage;
use crate::store::{SharedStorage, Versioned};
use crate::telemetry::counters;
use crate::timer::DurableTimer;
use crate::tracking::EventBus;
use crate::transport::Transport;

/// Router counters.
#[derive(Debug, Default)]
pub struct RouterStats {
    received: AtomicU64,
    applied: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub failed: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// What handling an envelope amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Applied,
    Ignored(Ignored),
}

/// Delivers envelopes to batches and scheduled messages.
pub struct Router {
    config: RouterConfig,
    storage: SharedStorage,
    timer: Arc<dyn DurableTimer>,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    inbox: Inbox,
    stats: RouterStats,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        storage: SharedStorage,
        timer: Arc<dyn DurableTimer>,
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        inbox: Inbox,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            storage,
            timer,
            transport,
            bus,
            inbox,
            stats: RouterStats::default(),
        })
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Dispatch inbox deliveries to shard workers until terminated.
    ///
    /// Keeps running while draining so in-flight work can finish.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Delivery>,
        mut shutdown_rx: watch::Receiver<ShutdownState>,
    ) {
        let shards = self.config.shards.max(1);
        let mut queues = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards);

        for shard in 0..shards {
            let (tx, mut shard_rx) = mpsc::unbounded_channel::<Delivery>();
            let router = self.clone();
            workers.push(tokio::spawn(async move {
                while let Some(delivery) = shard_rx.recv().await {
                    router.handle(delivery).await;
                }
                trace!(shard, "shard worker stopped");
            }));
            queues.push(tx);
        }

        info!(
            shards,
            transport = self.transport.name(),
            timer = self.timer.name(),
            "router started"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow_and_update() == ShutdownState::Terminated {
                        info!("router shutting down");
                        break;
                    }
                }

                delivery = rx.recv() => {
                    let Some(delivery) = delivery else {
                        info!("router inbox closed");
                        break;
                    };

                    let shard = shard_for(&delivery.envelope.correlation_id(), shards);
                    if let Err(e) = queues[shard].send(delivery) {
                        error!(shard, kind = e.0.envelope.kind(), "shard worker gone, dropping envelope");
                        self.inbox.done();
                    }
                }
            }
        }

        drop(queues);
        for worker in workers {
            worker.abort();
        }
    }

    /// Handle one delivery: process, account, and redeliver or dead-letter on failure.
    pub(crate) async fn handle(&self, delivery: Delivery) {
        let kind = delivery.envelope.kind();
        let correlation_id = delivery.envelope.correlation_id();
        let started = Instant::now();
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let result = self.process(&delivery.envelope).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(Handled::Applied) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                counters::envelope_handled(kind, "applied", elapsed);
                trace!(kind, correlation_id = %correlation_id, "envelope applied");
            }
            Ok(Handled::Ignored(reason)) => {
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                counters::envelope_handled(kind, "ignored", elapsed);
                counters::ignored(kind, reason.as_str());
                match reason {
                    Ignored::DuplicateConfirmation | Ignored::UnknownInstance => warn!(
                        kind,
                        correlation_id = %correlation_id,
                        reason = reason.as_str(),
                        "envelope ignored"
                    ),
                    _ => debug!(
                        kind,
                        correlation_id = %correlation_id,
                        reason = reason.as_str(),
                        "envelope ignored"
                    ),
                }
            }
            Err(e) if e.is_transient() && delivery.attempt < self.config.max_redeliveries => {
                counters::envelope_handled(kind, "retry", elapsed);
                self.schedule_redelivery(delivery, e);
                return;
            }
            Err(e) if e.is_transient() => {
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                counters::envelope_handled(kind, "dead_letter", elapsed);
                counters::dead_letter(kind);
                error!(
                    kind,
                    correlation_id = %correlation_id,
                    attempts = delivery.attempt + 1,
                    error = %e,
                    "redeliveries exhausted, dropping envelope"
                );
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                counters::envelope_handled(kind, "failed", elapsed);
                if e.is_invariant_violation() {
                    counters::invariant_violation(kind);
                    error!(kind, correlation_id = %correlation_id, error = %e, "invariant violation");
                } else {
                    warn!(kind, correlation_id = %correlation_id, error = %e, "envelope rejected");
                }
            }
        }

        self.inbox.done();
    }

    fn schedule_redelivery(&self, delivery: Delivery, cause: RouterError) {
        let delay = self.backoff(delivery.attempt);
        let kind = delivery.envelope.kind();
        self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
        counters::redelivery(kind);

        warn!(
            kind,
            correlation_id = %delivery.envelope.correlation_id(),
            attempt = delivery.attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "transient failure, redelivering"
        );

        let inbox = self.inbox.clone();
        let next = Delivery {
            envelope: delivery.envelope,
            attempt: delivery.attempt + 1,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = inbox.redeliver(next).await {
                warn!(kind, error = %e, "redelivery failed");
            }
        });
    }

    /// `base * 2^attempt`, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .redelivery_base_delay
            .saturating_mul(1u32 << attempt.min(20))
            .min(self.config.redelivery_max_delay)
    }

    /// Run load-decide-save, retrying in place on version conflicts, then the effects.
    async fn process(&self, envelope: &Envelope) -> Result<Handled, RouterError> {
        let mut conflicts = 0;
        let transition = loop {
            match self.decide(envelope, Utc::now()) {
                Err(RouterError::Store(e))
                    if e.is_conflict() && conflicts < self.config.conflict_retries =>
                {
                    conflicts += 1;
                    counters::store_conflict(record_kind(&envelope.correlation_id()));
                    debug!(kind = envelope.kind(), attempt = conflicts, error = %e, "version conflict, retrying");
                }
                result => break result?,
            }
        };

        match transition {
            Transition::Applied(effects) => {
                self.apply(effects).await?;
                Ok(Handled::Applied)
            }
            Transition::Ignored(reason) => Ok(Handled::Ignored(reason)),
        }
    }

    /// Load, feed the state machine, and persist. No effects run here.
    fn decide(&self, envelope: &Envelope, now: DateTime<Utc>) -> Result<Transition, RouterError> {
        match envelope {
            Envelope::CreateBatch(cmd) => {
                if let Some(existing) = self.storage.load_batch(cmd.batch_id)? {
                    return Ok(existing.record.redrive(cmd));
                }
                let (batch, effects) = Batch::create(cmd, now)?;
                self.storage.save_batch(&batch, None)?;

                counters::batch_created(batch.policy.name(), batch.scheduled_count);
                info!(
                    batch_id = %batch.batch_id,
                    messages = batch.scheduled_count,
                    policy = batch.policy.name(),
                    "batch created"
                );
                Ok(Transition::Applied(effects))
            }

            Envelope::PauseBatch(cmd) => match self.storage.load_batch(cmd.batch_id)? {
                Some(batch) => Ok(batch.record.pause(cmd)?),
                None => Ok(Transition::Ignored(Ignored::UnknownInstance)),
            },

            Envelope::ResumeBatch(cmd) => match self.storage.load_batch(cmd.batch_id)? {
                Some(batch) => Ok(batch.record.resume(cmd)?),
                None => Ok(Transition::Ignored(Ignored::UnknownInstance)),
            },

            Envelope::ScheduledMessageSent(notice) => {
                let Some(Versioned {
                    version,
                    record: mut batch,
                }) = self.storage.load_batch(notice.batch_id)?
                else {
                    return Ok(Transition::Ignored(Ignored::UnknownInstance));
                };

                let transition = batch.on_message_sent(notice, now)?;
                if transition.is_applied() {
                    self.storage.save_batch(&batch, Some(version))?;
                    if batch.is_completed() {
                        counters::batch_completed();
                        info!(
                            batch_id = %batch.batch_id,
                            messages = batch.scheduled_count,
                            "batch completed"
                        );
                    }
                }
                Ok(transition)
            }

            Envelope::ScheduleMessage(cmd) => {
                if self.storage.load_schedule(cmd.schedule_id)?.is_some() {
                    return Ok(Transition::Ignored(Ignored::DuplicateCreate));
                }
                let (schedule, effects) = ScheduledMessage::create(cmd, now);
                self.storage.save_schedule(&schedule, None)?;

                counters::schedule_created();
                debug!(
                    schedule_id = %schedule.schedule_id,
                    batch_id = %schedule.batch_id,
                    send_at = %schedule.current_fire_at_utc,
                    "message scheduled"
                );
                Ok(Transition::Applied(effects))
            }

            Envelope::PauseSchedule(cmd) => {
                self.update_schedule(cmd.schedule_id, |s| Ok(s.pause(cmd)))
            }

            Envelope::ResumeSchedule(cmd) => {
                self.update_schedule(cmd.schedule_id, |s| Ok(s.resume(cmd)?))
            }

            Envelope::SendConfirmed(confirmed) => {
                let transition = self.update_schedule(confirmed.schedule_id, |s| {
                    Ok(s.confirm(&confirmed.outcome, now))
                })?;
                if transition.is_applied() {
                    let cost = match &confirmed.outcome {
                        SendOutcome::Delivered { cost, .. } => *cost,
                        SendOutcome::Failed { .. } => 0,
                    };
                    counters::confirmation(confirmed.outcome.as_str(), cost);
                }
                Ok(transition)
            }

            Envelope::TimerFired(fired) => {
                let transition =
                    self.update_schedule(fired.schedule_id, |s| Ok(s.on_timer_fired(fired, now)))?;
                counters::timer_fired(match &transition {
                    Transition::Applied(_) => "sent",
                    Transition::Ignored(reason) => reason.as_str(),
                });
                Ok(transition)
            }
        }
    }

    fn update_schedule<F>(&self, id: ScheduleId, decide: F) -> Result<Transition, RouterError>
    where
        F: FnOnce(&mut ScheduledMessage) -> Result<Transition, RouterError>,
    {
        let Some(Versioned {
            version,
            record: mut schedule,
        }) = self.storage.load_schedule(id)?
        else {
            return Ok(Transition::Ignored(Ignored::UnknownInstance));
        };

        let transition = decide(&mut schedule)?;
        if transition.is_applied() {
            self.storage.save_schedule(&schedule, Some(version))?;
        }
        Ok(transition)
    }

    /// Run effects in order. Only called after the new state is persisted.
    async fn apply(&self, effects: Vec<Effect>) -> Result<(), RouterError> {
        for effect in effects {
            match effect {
                Effect::Track(event) => self.bus.publish(event),
                Effect::ArmTimer {
                    schedule_id,
                    fire_at,
                } => self.timer.register(schedule_id, fire_at),
                Effect::Send(cmd) => {
                    let schedule_id = cmd.schedule_id;
                    self.transport.send(cmd).await?;
                    counters::send_dispatched();
                    debug!(schedule_id = %schedule_id, transport = self.transport.name(), "send dispatched");
                }
                Effect::Route(envelope) => self.inbox.send(envelope).await?,
            }
        }
        Ok(())
    }
}

fn shard_for(id: &CorrelationId, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

fn record_kind(id: &CorrelationId) -> &'static str {
    match id {
        CorrelationId::Batch(_) => "batch",
        CorrelationId::Schedule(_) => "schedule",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{
        BatchId, CreateBatch, MessageMetadata, OutgoingSms, PauseBatch, PauseSchedule,
        ScheduleMessage, ScheduledMessageSent, SendNow, SmsPayload, TimerFired, TricklePolicy,
    };
    use crate::router;
    use crate::store::MemoryStorage;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTimer {
        registered: Mutex<Vec<(ScheduleId, DateTime<Utc>)>>,
    }

    impl DurableTimer for RecordingTimer {
        fn register(&self, schedule_id: ScheduleId, fire_at: DateTime<Utc>) {
            self.registered.lock().unwrap().push((schedule_id, fire_at));
        }

        fn cancel(&self, _schedule_id: ScheduleId) -> bool {
            false
        }

        fn pending(&self) -> usize {
            self.registered.lock().unwrap().len()
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    /// Fails the first `failures` sends with a transient error.
    struct FlakyTransport {
        failures: AtomicU64,
        sent: Mutex<Vec<SendNow>>,
    }

    impl FlakyTransport {
        fn new(failures: u64) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU64::new(failures),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, cmd: SendNow) -> Result<(), TransportError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Unavailable("gateway down".into()));
            }
            self.sent.lock().unwrap().push(cmd);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    struct Harness {
        router: Arc<Router>,
        rx: mpsc::Receiver<Delivery>,
        storage: SharedStorage,
        timer: Arc<RecordingTimer>,
        transport: Arc<FlakyTransport>,
        bus: Arc<EventBus>,
    }

    fn harness(failures: u64) -> Harness {
        let (inbox, rx) = router::channel(64);
        let storage: SharedStorage = Arc::new(MemoryStorage::new());
        let timer = Arc::new(RecordingTimer::default());
        let transport = FlakyTransport::new(failures);
        let bus = EventBus::new(64);
        let config = RouterConfig {
            max_redeliveries: 2,
            redelivery_base_delay: Duration::from_millis(100),
            redelivery_max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        let router = Router::new(
            config,
            storage.clone(),
            timer.clone(),
            transport.clone(),
            bus.clone(),
            inbox,
        );
        Harness {
            router,
            rx,
            storage,
            timer,
            transport,
            bus,
        }
    }

    fn create_batch(n: usize) -> CreateBatch {
        CreateBatch {
            batch_id: BatchId::new(),
            messages: (0..n)
                .map(|i| OutgoingSms::new(format!("+25884000000{}", i), "hello"))
                .collect(),
            policy: TricklePolicy::FixedSpacing {
                spacing: TimeDelta::minutes(1),
            },
            start_at_utc: Utc::now() + TimeDelta::hours(1),
            metadata: MessageMetadata::default(),
            confirmation_email: None,
        }
    }

    fn schedule_message(send_at: DateTime<Utc>) -> ScheduleMessage {
        ScheduleMessage {
            schedule_id: ScheduleId::new(),
            batch_id: BatchId::new(),
            payload: SmsPayload {
                target_address: "+258840000000".into(),
                body: "hello".into(),
                metadata: MessageMetadata::default(),
            },
            send_at_utc: send_at,
        }
    }

    #[tokio::test]
    async fn test_create_batch_persists_then_fans_out() {
        let mut h = harness(0);
        let cmd = create_batch(3);

        let handled = h
            .router
            .process(&Envelope::CreateBatch(cmd.clone()))
            .await
            .unwrap();
        assert_eq!(handled, Handled::Applied);

        let stored = h.storage.load_batch(cmd.batch_id).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.record.scheduled_count, 3);

        for expected in &stored.record.per_message {
            match h.rx.recv().await.unwrap().envelope {
                Envelope::ScheduleMessage(m) => {
                    assert_eq!(m.schedule_id, expected.schedule_id);
                    assert_eq!(m.send_at_utc, expected.scheduled_at_utc);
                }
                other => panic!("unexpected envelope {:?}", other),
            }
        }
    }

    fn drain_schedule_messages(rx: &mut mpsc::Receiver<Delivery>) -> Vec<ScheduleMessage> {
        let mut routed = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            if let Envelope::ScheduleMessage(m) = delivery.envelope {
                routed.push(m);
            }
        }
        routed
    }

    #[tokio::test]
    async fn test_duplicate_create_redrives_fan_out() {
        let mut h = harness(0);
        let cmd = create_batch(2);
        let mut events = h.bus.subscribe();

        h.router
            .process(&Envelope::CreateBatch(cmd.clone()))
            .await
            .unwrap();
        assert_eq!(drain_schedule_messages(&mut h.rx).len(), 2);

        let again = h
            .router
            .process(&Envelope::CreateBatch(cmd.clone()))
            .await
            .unwrap();
        assert_eq!(again, Handled::Applied);
        assert_eq!(drain_schedule_messages(&mut h.rx).len(), 2);

        let stored = h.storage.load_batch(cmd.batch_id).unwrap().unwrap();
        assert_eq!(stored.version, 1);

        let mut created = 0;
        while let Ok(event) = events.try_recv() {
            if event.name() == "batch_created" {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_create_after_persist_without_fan_out_completes_batch() {
        let mut h = harness(0);
        let cmd = create_batch(2);

        // Stored batch whose fan-out never left the process.
        let (batch, _) = Batch::create(&cmd, Utc::now()).unwrap();
        h.storage.save_batch(&batch, None).unwrap();

        let handled = h
            .router
            .process(&Envelope::CreateBatch(cmd.clone()))
            .await
            .unwrap();
        assert_eq!(handled, Handled::Applied);

        let routed = drain_schedule_messages(&mut h.rx);
        assert_eq!(routed.len(), 2);
        for m in routed {
            h.router
                .process(&Envelope::ScheduleMessage(m))
                .await
                .unwrap();
        }
        for entry in &batch.per_message {
            assert!(h.storage.load_schedule(entry.schedule_id).unwrap().is_some());
            h.router
                .process(&Envelope::ScheduledMessageSent(ScheduledMessageSent {
                    batch_id: cmd.batch_id,
                    schedule_id: entry.schedule_id,
                    outcome: SendOutcome::Delivered {
                        receipt: "R".into(),
                        sent_at_utc: Utc::now(),
                        cost: 1,
                    },
                }))
                .await
                .unwrap();
        }

        let stored = h.storage.load_batch(cmd.batch_id).unwrap().unwrap();
        assert!(stored.record.is_completed());
    }

    #[tokio::test]
    async fn test_create_for_completed_batch_is_ignored() {
        let mut h = harness(0);
        let cmd = create_batch(1);
        h.router
            .process(&Envelope::CreateBatch(cmd.clone()))
            .await
            .unwrap();
        let routed = drain_schedule_messages(&mut h.rx);
        h.router
            .process(&Envelope::ScheduledMessageSent(ScheduledMessageSent {
                batch_id: cmd.batch_id,
                schedule_id: routed[0].schedule_id,
                outcome: SendOutcome::Failed {
                    reason: "rejected".into(),
                    failed_at_utc: Utc::now(),
                },
            }))
            .await
            .unwrap();

        let again = h.router.process(&Envelope::CreateBatch(cmd)).await.unwrap();
        assert_eq!(again, Handled::Ignored(Ignored::DuplicateCreate));
        assert!(drain_schedule_messages(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_schedule_message_creates_once() {
        let h = harness(0);
        let cmd = schedule_message(Utc::now() + TimeDelta::minutes(5));
        let mut events = h.bus.subscribe();

        let first = h
            .router
            .process(&Envelope::ScheduleMessage(cmd.clone()))
            .await
            .unwrap();
        let second = h
            .router
            .process(&Envelope::ScheduleMessage(cmd.clone()))
            .await
            .unwrap();

        assert_eq!(first, Handled::Applied);
        assert_eq!(second, Handled::Ignored(Ignored::DuplicateCreate));

        let stored = h.storage.load_schedule(cmd.schedule_id).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(h.timer.registered.lock().unwrap().len(), 1);

        let mut created = 0;
        while let Ok(event) = events.try_recv() {
            if event.name() == "schedule_created" {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_schedule_arms_timer() {
        let h = harness(0);
        let cmd = schedule_message(Utc::now() + TimeDelta::minutes(5));

        h.router
            .process(&Envelope::ScheduleMessage(cmd.clone()))
            .await
            .unwrap();

        let registered = h.timer.registered.lock().unwrap().clone();
        assert_eq!(registered, vec![(cmd.schedule_id, cmd.send_at_utc)]);
    }

    #[tokio::test]
    async fn test_stale_pause_leaves_state() {
        let h = harness(0);
        let cmd = schedule_message(Utc::now() + TimeDelta::minutes(5));
        let at = Utc::now();
        h.router
            .process(&Envelope::ScheduleMessage(cmd.clone()))
            .await
            .unwrap();

        let pause = |request_at_utc| {
            Envelope::PauseSchedule(PauseSchedule {
                schedule_id: cmd.schedule_id,
                request_at_utc,
            })
        };
        assert_eq!(
            h.router.process(&pause(at)).await.unwrap(),
            Handled::Applied
        );
        assert_eq!(
            h.router.process(&pause(at)).await.unwrap(),
            Handled::Ignored(Ignored::StaleControl)
        );

        let stored = h.storage.load_schedule(cmd.schedule_id).unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert!(stored.record.paused);
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let h = harness(0);
        let fired = Envelope::TimerFired(TimerFired {
            schedule_id: ScheduleId::new(),
            fire_at_utc: Utc::now(),
        });

        assert_eq!(
            h.router.process(&fired).await.unwrap(),
            Handled::Ignored(Ignored::UnknownInstance)
        );
    }

    #[tokio::test]
    async fn test_batch_pause_rejected() {
        let h = harness(0);
        let cmd = create_batch(1);
        h.router
            .process(&Envelope::CreateBatch(cmd.clone()))
            .await
            .unwrap();

        let err = h
            .router
            .process(&Envelope::PauseBatch(PauseBatch {
                batch_id: cmd.batch_id,
                request_at_utc: Utc::now(),
            }))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("batch pause"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_send_failure_is_redelivered() {
        let mut h = harness(1);
        let cmd = schedule_message(Utc::now());
        h.router
            .process(&Envelope::ScheduleMessage(cmd.clone()))
            .await
            .unwrap();

        h.router
            .inbox()
            .send(Envelope::TimerFired(TimerFired {
                schedule_id: cmd.schedule_id,
                fire_at_utc: cmd.send_at_utc,
            }))
            .await
            .unwrap();
        let first = h.rx.recv().await.unwrap();
        h.router.handle(first).await;
        assert!(h.transport.sent.lock().unwrap().is_empty());
        assert_eq!(h.router.inbox().in_flight(), 1);

        let retry = h.rx.recv().await.unwrap();
        assert_eq!(retry.attempt, 1);
        h.router.handle(retry).await;

        assert_eq!(h.transport.sent.lock().unwrap().len(), 1);
        assert_eq!(h.router.inbox().in_flight(), 0);
        assert_eq!(h.router.stats().snapshot().redelivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_after_max_redeliveries() {
        let mut h = harness(u64::MAX);
        let cmd = schedule_message(Utc::now());
        h.router
            .process(&Envelope::ScheduleMessage(cmd.clone()))
            .await
            .unwrap();

        h.router
            .inbox()
            .send(Envelope::TimerFired(TimerFired {
                schedule_id: cmd.schedule_id,
                fire_at_utc: cmd.send_at_utc,
            }))
            .await
            .unwrap();
        let delivery = h.rx.recv().await.unwrap();
        h.router
            .handle(Delivery {
                attempt: 2,
                ..delivery
            })
            .await;

        let stats = h.router.stats().snapshot();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.redelivered, 0);
        assert_eq!(h.router.inbox().in_flight(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let h = harness(0);
        assert_eq!(h.router.backoff(0), Duration::from_millis(100));
        assert_eq!(h.router.backoff(2), Duration::from_millis(400));
        assert_eq!(h.router.backoff(10), Duration::from_secs(1));
    }

    #[test]
    fn test_shard_is_stable() {
        let id = CorrelationId::Schedule(ScheduleId::new());
        let shard = shard_for(&id, 8);
        assert!(shard < 8);
        assert_eq!(shard, shard_for(&id, 8));
    }
}
