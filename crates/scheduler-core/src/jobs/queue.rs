//! The durable priority queue (C3, §4.1).
//!
//! Two sorted sets do the work: `scheduler:delayed` holds jobs not yet due,
//! scored by `readyAt` in epoch milliseconds; `scheduler:ready` holds jobs
//! available for reservation, scored by `priorityRank * BAND + sequence` so
//! a lower-ranked (higher-priority) band always sorts before a
//! higher-ranked one, and FIFO order holds within a band via the monotonic
//! sequence. `reserve` promotes due members from `delayed` into `ready`
//! (idempotent, safe to race across workers) and then pops the lowest score
//! off `ready` with `ZPOPMIN`, which is atomic on its own and needs no Lua
//! scripting to avoid double-delivery. A third sorted set, `reservations`,
//! scored by lease expiry, lets any worker recover jobs abandoned by a
//! crashed one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::alerting::{AlertManager, Severity};
use crate::jobs::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::jobs::job::{EnqueueOptions, JobId, JobPriority, JobRecord};
use crate::jobs::retry::calculate_delay_ms;
use crate::jobs::{JobError, JobProcessingResult};
use crate::redis::RedisPool;

const DELAYED_KEY: &str = "scheduler:delayed";
const READY_KEY: &str = "scheduler:ready";
const RESERVATIONS_KEY: &str = "scheduler:reservations";
const COMPLETED_KEY: &str = "scheduler:completed";
const COMPLETED_COUNTER_KEY: &str = "scheduler:completed_count";
const SEQUENCE_KEY: &str = "scheduler:sequence";
const PAUSED_KEY: &str = "scheduler:paused";

/// Spread between priority bands, wide enough that a queue's lifetime
/// sequence count never bleeds into the next band up.
const PRIORITY_BAND: u64 = 1_000_000_000_000;

fn job_key(id: &JobId) -> String {
    format!("scheduler:job:{}", id)
}

fn ready_score(priority: JobPriority, sequence: u64) -> f64 {
    (priority.rank() * PRIORITY_BAND + sequence) as f64
}

fn epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct QueueCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub enum FailOutcome {
    Requeued {
        next_attempt_at: DateTime<Utc>,
        delay_ms: u64,
    },
    DeadLettered(DeadLetterEntry),
}

pub struct JobQueue {
    pool: RedisPool,
    dead_letter: DeadLetterQueue,
    alerts: Option<Arc<AlertManager>>,
}

impl JobQueue {
    pub fn new(pool: RedisPool) -> Self {
        let dead_letter = DeadLetterQueue::new(pool.clone());
        Self {
            pool,
            dead_letter,
            alerts: None,
        }
    }

    /// Wires a critical alert for every dead-letter move (§4.9).
    pub fn with_alerts(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn dead_letter(&self) -> &DeadLetterQueue {
        &self.dead_letter
    }

    /// Enqueues a job, returning its id. `delay_ms` of zero makes the job
    /// immediately reservable.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: serde_json::Value,
        campaign_id: &str,
        opts: EnqueueOptions,
    ) -> JobProcessingResult<JobId> {
        let id = JobId::new_v4();
        let now = Utc::now();
        let ready_at = now + chrono::Duration::milliseconds(opts.delay_ms as i64);

        let record = JobRecord {
            id,
            kind: kind.to_string(),
            campaign_id: campaign_id.to_string(),
            priority: opts.priority,
            payload,
            ready_at,
            attempts_made: 0,
            max_attempts: opts.max_attempts,
            backoff: opts.backoff,
            created_at: now,
            updated_at: now,
            last_error: None,
            lease_epoch: 0,
            remove_on_complete: opts.remove_on_complete,
            remove_on_fail: opts.remove_on_fail,
        };

        let mut conn = self.conn().await?;
        self.store_record(&mut conn, &record).await?;

        if opts.delay_ms > 0 {
            conn.zadd::<_, _, _, ()>(DELAYED_KEY, id.to_string(), epoch_ms(ready_at))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
        } else {
            let sequence: u64 = conn
                .incr(SEQUENCE_KEY, 1)
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
            conn.zadd::<_, _, _, ()>(READY_KEY, id.to_string(), ready_score(opts.priority, sequence))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
        }

        Ok(id)
    }

    /// Promotes due delayed jobs and expired reservations, then pops the
    /// highest-priority ready job, if any, marking it leased for
    /// `lease_ms`. Returns `None` when the queue is paused or empty.
    pub async fn reserve(&self, lease_ms: u64) -> JobProcessingResult<Option<JobRecord>> {
        if self.is_paused().await? {
            return Ok(None);
        }

        let mut conn = self.conn().await?;
        let now = Utc::now();

        self.promote_due(&mut conn, DELAYED_KEY, now).await?;
        self.recover_expired_reservations(&mut conn, now).await?;

        let popped: Vec<(String, f64)> = conn
            .zpopmin(READY_KEY, 1)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        let Some((raw_id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let id: JobId = raw_id
            .parse()
            .map_err(|e| JobError::Queue(format!("corrupt ready-set member {}: {}", raw_id, e)))?;

        let Some(mut record) = self.load_record(&mut conn, &id).await? else {
            // Job body vanished (e.g. manually deleted); drop the dangling id.
            return Ok(None);
        };

        record.lease_epoch += 1;
        record.updated_at = now;
        self.store_record(&mut conn, &record).await?;

        let lease_expiry = now + chrono::Duration::milliseconds(lease_ms as i64);
        conn.zadd::<_, _, _, ()>(RESERVATIONS_KEY, id.to_string(), epoch_ms(lease_expiry))
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        Ok(Some(record))
    }

    /// Acknowledges successful completion. `lease_epoch` must match the
    /// epoch handed out by `reserve`, guarding against a recovered,
    /// re-reserved job being double-acked by its original (stale) worker.
    pub async fn ack(&self, id: JobId, lease_epoch: u64) -> JobProcessingResult<()> {
        let mut conn = self.conn().await?;
        let Some(mut record) = self.load_record(&mut conn, &id).await? else {
            return Err(JobError::NotFound(id.to_string()));
        };
        if record.lease_epoch != lease_epoch {
            return Ok(()); // stale lease holder, already handled elsewhere
        }

        conn.zrem::<_, _, ()>(RESERVATIONS_KEY, id.to_string())
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        if record.remove_on_complete {
            conn.del::<_, ()>(job_key(&id))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
        } else {
            record.updated_at = Utc::now();
            self.store_record(&mut conn, &record).await?;
            conn.zadd::<_, _, _, ()>(COMPLETED_KEY, id.to_string(), epoch_ms(record.updated_at))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
        }

        conn.incr::<_, _, ()>(COMPLETED_COUNTER_KEY, 1)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        Ok(())
    }

    /// Records a failed attempt. Requeues with backoff if attempts remain,
    /// otherwise moves the job to the dead-letter sink.
    pub async fn fail(
        &self,
        id: JobId,
        lease_epoch: u64,
        error_message: &str,
    ) -> JobProcessingResult<FailOutcome> {
        self.fail_inner(id, lease_epoch, error_message, true).await
    }

    /// Records a terminal failure: moves straight to the dead-letter sink
    /// regardless of attempts remaining. Used for outcomes that retrying
    /// cannot fix — cross-tenancy mismatches, missing entities, malformed
    /// payloads, unknown job kinds.
    pub async fn fail_terminal(
        &self,
        id: JobId,
        lease_epoch: u64,
        error_message: &str,
    ) -> JobProcessingResult<FailOutcome> {
        self.fail_inner(id, lease_epoch, error_message, false).await
    }

    async fn fail_inner(
        &self,
        id: JobId,
        lease_epoch: u64,
        error_message: &str,
        requeue: bool,
    ) -> JobProcessingResult<FailOutcome> {
        let mut conn = self.conn().await?;
        let Some(mut record) = self.load_record(&mut conn, &id).await? else {
            return Err(JobError::NotFound(id.to_string()));
        };
        if record.lease_epoch != lease_epoch {
            // Lease already recovered and handled by another worker; no-op.
            return Ok(FailOutcome::Requeued {
                next_attempt_at: record.ready_at,
                delay_ms: 0,
            });
        }

        conn.zrem::<_, _, ()>(RESERVATIONS_KEY, id.to_string())
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        record.attempts_made += 1;
        record.last_error = Some(error_message.to_string());
        record.updated_at = Utc::now();

        if requeue && record.can_retry() {
            let delay_ms = calculate_delay_ms(&record.backoff, record.attempts_made, None);
            let next_attempt_at = record.updated_at + chrono::Duration::milliseconds(delay_ms as i64);
            record.ready_at = next_attempt_at;
            self.store_record(&mut conn, &record).await?;
            conn.zadd::<_, _, _, ()>(DELAYED_KEY, id.to_string(), epoch_ms(next_attempt_at))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
            Ok(FailOutcome::Requeued {
                next_attempt_at,
                delay_ms,
            })
        } else {
            let entry = DeadLetterEntry {
                original_job_id: id,
                kind: record.kind.clone(),
                campaign_id: record.campaign_id.clone(),
                priority: record.priority,
                payload: record.payload.clone(),
                last_error: error_message.to_string(),
                attempts_made: record.attempts_made,
                failed_at: record.updated_at,
            };
            self.dead_letter.add(entry.clone()).await?;
            if let Some(alerts) = &self.alerts {
                alerts
                    .send(
                        Severity::Critical,
                        "job moved to dead-letter queue",
                        format!(
                            "job {} (kind {}, campaign {}) exhausted retries: {}",
                            entry.original_job_id, entry.kind, entry.campaign_id, entry.last_error
                        ),
                    )
                    .await;
            }

            if record.remove_on_fail {
                conn.del::<_, ()>(job_key(&id))
                    .await
                    .map_err(|e| JobError::Queue(e.to_string()))?;
            } else {
                self.store_record(&mut conn, &record).await?;
            }

            Ok(FailOutcome::DeadLettered(entry))
        }
    }

    pub async fn counts(&self) -> JobProcessingResult<QueueCounts> {
        let mut conn = self.conn().await?;
        let waiting: u64 = conn
            .zcard(READY_KEY)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;
        let delayed: u64 = conn
            .zcard(DELAYED_KEY)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;
        let active: u64 = conn
            .zcard(RESERVATIONS_KEY)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;
        let completed: Option<u64> = conn
            .get(COMPLETED_COUNTER_KEY)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;
        let completed = completed.unwrap_or(0);
        let failed = self.dead_letter.count().await?;

        Ok(QueueCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    pub async fn pause(&self) -> JobProcessingResult<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(PAUSED_KEY, 1)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))
    }

    pub async fn resume(&self) -> JobProcessingResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(PAUSED_KEY)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))
    }

    pub async fn is_paused(&self) -> JobProcessingResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(PAUSED_KEY)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))
    }

    /// Deletes completed job bodies older than `max_age`. Returns the count removed.
    pub async fn clean_completed(&self, max_age: chrono::Duration) -> JobProcessingResult<u64> {
        let mut conn = self.conn().await?;
        let cutoff = epoch_ms(Utc::now() - max_age);
        let ids: Vec<String> = conn
            .zrangebyscore(COMPLETED_KEY, 0, cutoff)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        for id in &ids {
            conn.del::<_, ()>(format!("scheduler:job:{}", id))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
            conn.zrem::<_, _, ()>(COMPLETED_KEY, id)
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
        }

        Ok(ids.len() as u64)
    }

    pub async fn clean_failed(&self, max_age: chrono::Duration) -> JobProcessingResult<u64> {
        self.dead_letter.clean_older_than(Utc::now() - max_age).await
    }

    async fn conn(&self) -> JobProcessingResult<crate::redis::RedisConnection> {
        self.pool.get().await.map_err(|e| JobError::Queue(e.to_string()))
    }

    async fn store_record(
        &self,
        conn: &mut crate::redis::RedisConnection,
        record: &JobRecord,
    ) -> JobProcessingResult<()> {
        let serialized =
            serde_json::to_string(record).map_err(|e| JobError::BadPayload(e.to_string()))?;
        conn.set::<_, _, ()>(job_key(&record.id), serialized)
            .await
            .map_err(|e| JobError::Queue(e.to_string()))
    }

    async fn load_record(
        &self,
        conn: &mut crate::redis::RedisConnection,
        id: &JobId,
    ) -> JobProcessingResult<Option<JobRecord>> {
        let raw: Option<String> = conn
            .get(job_key(id))
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;
        match raw {
            Some(s) => {
                let record = serde_json::from_str(&s).map_err(|e| JobError::BadPayload(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn promote_due(
        &self,
        conn: &mut crate::redis::RedisConnection,
        zset_key: &str,
        now: DateTime<Utc>,
    ) -> JobProcessingResult<()> {
        let due: Vec<String> = conn
            .zrangebyscore(zset_key, 0, epoch_ms(now))
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        for raw_id in due {
            let Ok(id) = raw_id.parse::<JobId>() else {
                conn.zrem::<_, _, ()>(zset_key, &raw_id)
                    .await
                    .map_err(|e| JobError::Queue(e.to_string()))?;
                continue;
            };
            let Some(record) = self.load_record(conn, &id).await? else {
                conn.zrem::<_, _, ()>(zset_key, &raw_id)
                    .await
                    .map_err(|e| JobError::Queue(e.to_string()))?;
                continue;
            };

            let sequence: u64 = conn
                .incr(SEQUENCE_KEY, 1)
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
            conn.zadd::<_, _, _, ()>(READY_KEY, raw_id.clone(), ready_score(record.priority, sequence))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
            conn.zrem::<_, _, ()>(zset_key, &raw_id)
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
        }

        Ok(())
    }

    async fn recover_expired_reservations(
        &self,
        conn: &mut crate::redis::RedisConnection,
        now: DateTime<Utc>,
    ) -> JobProcessingResult<()> {
        let expired: Vec<String> = conn
            .zrangebyscore(RESERVATIONS_KEY, 0, epoch_ms(now))
            .await
            .map_err(|e| JobError::Queue(e.to_string()))?;

        for raw_id in expired {
            conn.zrem::<_, _, ()>(RESERVATIONS_KEY, &raw_id)
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;

            let Ok(id) = raw_id.parse::<JobId>() else { continue };
            let Some(record) = self.load_record(conn, &id).await? else {
                continue;
            };
            let sequence: u64 = conn
                .incr(SEQUENCE_KEY, 1)
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
            conn.zadd::<_, _, _, ()>(READY_KEY, raw_id, ready_score(record.priority, sequence))
                .await
                .map_err(|e| JobError::Queue(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_score_orders_critical_before_low_regardless_of_sequence() {
        let critical_late = ready_score(JobPriority::Critical, 1_000_000);
        let low_early = ready_score(JobPriority::Low, 1);
        assert!(critical_late < low_early);
    }

    #[test]
    fn ready_score_is_fifo_within_a_band() {
        let first = ready_score(JobPriority::Normal, 1);
        let second = ready_score(JobPriority::Normal, 2);
        assert!(first < second);
    }

    #[test]
    fn job_key_is_namespaced_by_id() {
        let id = JobId::nil();
        assert_eq!(job_key(&id), format!("scheduler:job:{}", id));
    }

    // Mirrors the teacher's `if let Ok(pool) = ...` pattern: these
    // assertions only run when a local Redis is reachable.
    #[tokio::test]
    async fn fail_terminal_dead_letters_on_the_first_attempt() {
        if let Ok(pool) = RedisPool::new("redis://127.0.0.1:6379/15").await {
            let queue = JobQueue::new(pool);
            let id = queue
                .enqueue("EventExpiration", serde_json::json!({}), "campaign-1", EnqueueOptions::default())
                .await
                .unwrap();
            let record = queue.reserve(60_000).await.unwrap().unwrap();
            assert_eq!(record.attempts_made, 0);

            let outcome = queue.fail_terminal(id, record.lease_epoch, "bad payload").await.unwrap();
            assert!(matches!(outcome, FailOutcome::DeadLettered(_)));
            assert_eq!(queue.dead_letter().count().await.unwrap() >= 1, true);
        }
    }
}
