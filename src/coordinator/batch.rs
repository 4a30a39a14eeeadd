use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CoordinatorError;
use crate::machine::{Effect, Ignored, Transition};
use crate::messages::{
    BatchId, CreateBatch, Envelope, MessageMetadata, OutgoingSms, PauseBatch, ResumeBatch,
    ScheduleId,
    ScheduleMessage, ScheduledEntry, ScheduledMessageSent, SendOutcome, SmsPayload,
    TrackingEvent, TricklePolicy,
};

/// Batch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Completed,
}

/// Per-message status as seen by the batch.
///
/// `Sending`, `Paused` and `Cancelled` are never entered by the coordinator;
/// they keep the stored layout stable for when those transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Scheduled,
    Sending,
    Sent,
    Paused,
    Cancelled,
    Failed,
}

impl MessageStatus {
    /// Whether a completion notice has been counted for this entry.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// One message of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMessage {
    pub schedule_id: ScheduleId,
    pub target_address: String,
    pub scheduled_at_utc: DateTime<Utc>,
    pub status: MessageStatus,
}

/// Durable state of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub policy: TricklePolicy,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub confirmation_email: Option<String>,
    pub scheduled_count: usize,
    pub confirmed_count: usize,
    pub per_message: Vec<BatchMessage>,
    pub status: BatchStatus,
    pub created_at_utc: DateTime<Utc>,
    #[serde(default)]
    pub completed_at_utc: Option<DateTime<Utc>>,
}

impl Batch {
    /// Compute timing and build the batch plus its fan-out.
    ///
    /// The returned effects must only run after the batch is persisted.
    pub fn create(
        cmd: &CreateBatch,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<Effect>), CoordinatorError> {
        if cmd.messages.is_empty() {
            return Err(CoordinatorError::EmptyBatch(cmd.batch_id));
        }

        let times = cmd.policy.timestamps(cmd.start_at_utc, cmd.messages.len())?;

        let per_message: Vec<BatchMessage> = cmd
            .messages
            .iter()
            .zip(&times)
            .enumerate()
            .map(|(index, (sms, at))| BatchMessage {
                schedule_id: ScheduleId::for_batch_message(cmd.batch_id, index),
                target_address: sms.target_address.clone(),
                scheduled_at_utc: *at,
                status: MessageStatus::Scheduled,
            })
            .collect();

        let batch = Self {
            batch_id: cmd.batch_id,
            policy: cmd.policy,
            metadata: cmd.metadata.clone(),
            confirmation_email: cmd.confirmation_email.clone(),
            scheduled_count: per_message.len(),
            confirmed_count: 0,
            per_message,
            status: BatchStatus::Active,
            created_at_utc: now,
            completed_at_utc: None,
        };

        let mut effects = Vec::with_capacity(batch.scheduled_count + 1);
        effects.push(Effect::Track(TrackingEvent::BatchCreated {
            batch_id: batch.batch_id,
            policy: batch.policy,
            metadata: batch.metadata.clone(),
            confirmation_email: batch.confirmation_email.clone(),
            schedules: batch
                .per_message
                .iter()
                .map(|m| ScheduledEntry {
                    schedule_id: m.schedule_id,
                    target_address: m.target_address.clone(),
                    scheduled_at_utc: m.scheduled_at_utc,
                })
                .collect(),
            created_at_utc: now,
        }));

        effects.extend(
            batch
                .per_message
                .iter()
                .zip(&cmd.messages)
                .map(|(entry, sms)| batch.schedule_effect(entry, sms)),
        );

        Ok((batch, effects))
    }

    /// Redelivered create for a batch that is already stored.
    ///
    /// While the batch is active the fan-out is routed again for every
    /// unresolved entry. Scheduler creation is idempotent per schedule id, so
    /// schedulers that already exist drop the copy. `BatchCreated` is not
    /// re-emitted and the stored record is left unchanged.
    pub fn redrive(&self, cmd: &CreateBatch) -> Transition {
        if self.is_completed() {
            return Transition::Ignored(Ignored::DuplicateCreate);
        }
        if cmd.messages.len() != self.per_message.len() {
            warn!(
                batch_id = %self.batch_id,
                stored = self.per_message.len(),
                received = cmd.messages.len(),
                "create for existing batch with different messages"
            );
            return Transition::Ignored(Ignored::DuplicateCreate);
        }

        let effects: Vec<Effect> = self
            .per_message
            .iter()
            .zip(&cmd.messages)
            .filter(|(entry, _)| !entry.status.is_resolved())
            .map(|(entry, sms)| self.schedule_effect(entry, sms))
            .collect();

        if effects.is_empty() {
            return Transition::Ignored(Ignored::DuplicateCreate);
        }
        debug!(batch_id = %self.batch_id, routed = effects.len(), "fan-out re-driven");
        Transition::Applied(effects)
    }

    fn schedule_effect(&self, entry: &BatchMessage, sms: &OutgoingSms) -> Effect {
        Effect::Route(Envelope::ScheduleMessage(ScheduleMessage {
            schedule_id: entry.schedule_id,
            batch_id: self.batch_id,
            payload: SmsPayload {
                target_address: sms.target_address.clone(),
                body: sms.body.clone(),
                metadata: self.metadata.clone(),
            },
            send_at_utc: entry.scheduled_at_utc,
        }))
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    /// Number of entries resolved with the given outcome kind.
    pub fn count(&self, status: MessageStatus) -> usize {
        self.per_message.iter().filter(|m| m.status == status).count()
    }

    /// Completion notice from one of the batch's schedulers.
    pub fn on_message_sent(
        &mut self,
        notice: &ScheduledMessageSent,
        now: DateTime<Utc>,
    ) -> Result<Transition, CoordinatorError> {
        if self.is_completed() {
            warn!(
                batch_id = %self.batch_id,
                schedule_id = %notice.schedule_id,
                "confirmation for completed batch"
            );
            return Ok(Transition::Ignored(Ignored::DuplicateConfirmation));
        }

        let batch_id = self.batch_id;
        let entry = self
            .per_message
            .iter_mut()
            .find(|m| m.schedule_id == notice.schedule_id)
            .ok_or(CoordinatorError::UnknownSchedule {
                batch_id,
                schedule_id: notice.schedule_id,
            })?;

        if entry.status.is_resolved() {
            warn!(
                batch_id = %batch_id,
                schedule_id = %notice.schedule_id,
                "duplicate confirmation"
            );
            return Ok(Transition::Ignored(Ignored::DuplicateConfirmation));
        }

        if self.confirmed_count >= self.scheduled_count {
            return Err(CoordinatorError::InvariantViolation {
                batch_id,
                detail: format!(
                    "confirmed_count {} would exceed scheduled_count {}",
                    self.confirmed_count + 1,
                    self.scheduled_count
                ),
            });
        }

        entry.status = match notice.outcome {
            SendOutcome::Delivered { .. } => MessageStatus::Sent,
            SendOutcome::Failed { .. } => MessageStatus::Failed,
        };
        self.confirmed_count += 1;

        debug!(
            batch_id = %batch_id,
            confirmed = self.confirmed_count,
            scheduled = self.scheduled_count,
            "message resolved"
        );

        if self.confirmed_count < self.scheduled_count {
            return Ok(Transition::Applied(Vec::new()));
        }

        self.status = BatchStatus::Completed;
        self.completed_at_utc = Some(now);

        Ok(Transition::Applied(vec![Effect::Track(
            TrackingEvent::BatchCompleted {
                batch_id,
                delivered: self.count(MessageStatus::Sent),
                failed: self.count(MessageStatus::Failed),
                completed_at_utc: now,
            },
        )]))
    }

    /// Batch-wide pause is not supported; per-message pause is the only control.
    pub fn pause(&self, _cmd: &PauseBatch) -> Result<Transition, CoordinatorError> {
        Err(CoordinatorError::Unsupported {
            operation: "batch pause",
        })
    }

    /// Batch-wide resume is not supported.
    pub fn resume(&self, _cmd: &ResumeBatch) -> Result<Transition, CoordinatorError> {
        Err(CoordinatorError::Unsupported {
            operation: "batch resume",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn create_cmd(n: usize) -> CreateBatch {
        CreateBatch {
            batch_id: BatchId::new(),
            messages: (0..n)
                .map(|i| OutgoingSms::new(format!("+25884000000{}", i), "reminder"))
                .collect(),
            policy: TricklePolicy::SpreadOverWindow {
                duration: TimeDelta::hours(1),
            },
            start_at_utc: t0(),
            metadata: MessageMetadata {
                topic: Some("clinic".into()),
                tags: vec!["reminder".into()],
            },
            confirmation_email: Some("ops@example.com".into()),
        }
    }

    fn sent(batch: &Batch, index: usize) -> ScheduledMessageSent {
        ScheduledMessageSent {
            batch_id: batch.batch_id,
            schedule_id: batch.per_message[index].schedule_id,
            outcome: SendOutcome::Delivered {
                receipt: format!("R{}", index),
                sent_at_utc: t0(),
                cost: 5,
            },
        }
    }

    #[test]
    fn test_create_fans_out() {
        let cmd = create_cmd(3);
        let (batch, effects) = Batch::create(&cmd, t0()).unwrap();

        assert_eq!(batch.scheduled_count, 3);
        assert_eq!(batch.confirmed_count, 0);
        assert_eq!(batch.status, BatchStatus::Active);
        assert_eq!(batch.per_message[2].scheduled_at_utc, t0() + TimeDelta::hours(1));
        assert!(batch
            .per_message
            .iter()
            .all(|m| m.status == MessageStatus::Scheduled));

        assert_eq!(effects.len(), 4);
        assert!(matches!(
            &effects[0],
            Effect::Track(TrackingEvent::BatchCreated { schedules, .. }) if schedules.len() == 3
        ));
        let routed: Vec<_> = effects[1..]
            .iter()
            .filter_map(|e| match e {
                Effect::Route(Envelope::ScheduleMessage(m)) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(routed.len(), 3);
        assert_eq!(routed[1].send_at_utc, t0() + TimeDelta::minutes(30));
        assert_eq!(routed[0].payload.metadata.topic.as_deref(), Some("clinic"));
    }

    #[test]
    fn test_create_is_deterministic() {
        let cmd = create_cmd(4);
        let (a, _) = Batch::create(&cmd, t0()).unwrap();
        let (b, _) = Batch::create(&cmd, t0()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let cmd = create_cmd(0);
        assert_eq!(
            Batch::create(&cmd, t0()).unwrap_err(),
            CoordinatorError::EmptyBatch(cmd.batch_id)
        );
    }

    #[test]
    fn test_completes_exactly_once() {
        let (mut batch, _) = Batch::create(&create_cmd(3), t0()).unwrap();

        for i in 0..2 {
            let effects = batch.on_message_sent(&sent(&batch, i), t0()).unwrap();
            assert_eq!(effects, Transition::Applied(Vec::new()));
        }
        assert!(!batch.is_completed());

        let last = batch.on_message_sent(&sent(&batch, 2), t0()).unwrap();
        assert!(matches!(
            &last.into_effects()[..],
            [Effect::Track(TrackingEvent::BatchCompleted { delivered: 3, failed: 0, .. })]
        ));
        assert!(batch.is_completed());
        assert_eq!(batch.confirmed_count, batch.scheduled_count);

        let again = batch.on_message_sent(&sent(&batch, 2), t0()).unwrap();
        assert_eq!(again, Transition::Ignored(Ignored::DuplicateConfirmation));
        assert_eq!(batch.confirmed_count, 3);
    }

    #[test]
    fn test_duplicate_confirmation_leaves_counters() {
        let (mut batch, _) = Batch::create(&create_cmd(2), t0()).unwrap();
        batch.on_message_sent(&sent(&batch, 0), t0()).unwrap();

        let dup = batch.on_message_sent(&sent(&batch, 0), t0()).unwrap();
        assert_eq!(dup, Transition::Ignored(Ignored::DuplicateConfirmation));
        assert_eq!(batch.confirmed_count, 1);
    }

    #[test]
    fn test_failed_notice_counts_towards_completion() {
        let (mut batch, _) = Batch::create(&create_cmd(1), t0()).unwrap();
        let notice = ScheduledMessageSent {
            outcome: SendOutcome::Failed {
                reason: "rejected".into(),
                failed_at_utc: t0(),
            },
            ..sent(&batch, 0)
        };

        batch.on_message_sent(&notice, t0()).unwrap();
        assert!(batch.is_completed());
        assert_eq!(batch.per_message[0].status, MessageStatus::Failed);
    }

    #[test]
    fn test_unknown_schedule_is_violation() {
        let (mut batch, _) = Batch::create(&create_cmd(2), t0()).unwrap();
        let notice = ScheduledMessageSent {
            schedule_id: ScheduleId::new(),
            ..sent(&batch, 0)
        };

        let err = batch.on_message_sent(&notice, t0()).unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(batch.confirmed_count, 0);
    }

    #[test]
    fn test_overcount_is_violation() {
        let (mut batch, _) = Batch::create(&create_cmd(2), t0()).unwrap();
        batch.confirmed_count = 2;

        let err = batch.on_message_sent(&sent(&batch, 0), t0()).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvariantViolation { .. }));
        assert_eq!(batch.per_message[0].status, MessageStatus::Scheduled);
    }

    #[test]
    fn test_redrive_routes_unresolved_entries() {
        let cmd = create_cmd(3);
        let (mut batch, _) = Batch::create(&cmd, t0()).unwrap();
        batch.on_message_sent(&sent(&batch, 1), t0()).unwrap();

        let effects = batch.redrive(&cmd).into_effects();
        let routed: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Route(Envelope::ScheduleMessage(m)) => Some(m.schedule_id),
                _ => None,
            })
            .collect();
        assert_eq!(effects.len(), 2);
        assert_eq!(
            routed,
            vec![batch.per_message[0].schedule_id, batch.per_message[2].schedule_id]
        );
        assert_eq!(batch.confirmed_count, 1);
    }

    #[test]
    fn test_redrive_after_completion_is_ignored() {
        let cmd = create_cmd(1);
        let (mut batch, _) = Batch::create(&cmd, t0()).unwrap();
        batch.on_message_sent(&sent(&batch, 0), t0()).unwrap();

        assert_eq!(
            batch.redrive(&cmd),
            Transition::Ignored(Ignored::DuplicateCreate)
        );
    }

    #[test]
    fn test_redrive_with_different_messages_is_ignored() {
        let cmd = create_cmd(2);
        let (batch, _) = Batch::create(&cmd, t0()).unwrap();
        let other = CreateBatch {
            messages: cmd.messages[..1].to_vec(),
            ..cmd
        };

        assert_eq!(
            batch.redrive(&other),
            Transition::Ignored(Ignored::DuplicateCreate)
        );
    }

    #[test]
    fn test_batch_pause_resume_unsupported() {
        let (batch, _) = Batch::create(&create_cmd(1), t0()).unwrap();
        let pause = PauseBatch {
            batch_id: batch.batch_id,
            request_at_utc: t0(),
        };
        let resume = ResumeBatch {
            batch_id: batch.batch_id,
            request_at_utc: t0(),
        };
        assert!(matches!(
            batch.pause(&pause),
            Err(CoordinatorError::Unsupported { .. })
        ));
        assert!(matches!(
            batch.resume(&resume),
            Err(CoordinatorError::Unsupported { .. })
        ));
    }
}
