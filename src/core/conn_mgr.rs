//! Connection manager: bucket sharding and the dispatch/job worker pipeline
//!
//! Producers submit pushes without blocking onto a bounded dispatch queue.
//! Dispatch workers serialize each job once and fan it out to the bounded
//! job queue of every bucket, waiting for space when a bucket falls behind.
//! Job workers drain their bucket's queue and perform the delivery.
//!
//! Single delivery to a room member walks the buckets in shard order, one at
//! a time, and stops at the first bucket that reports a delivery. Every
//! attempt carries its own acknowledgement channel so concurrent dispatch
//! workers can never consume each other's answers.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::config::GatewayConfig;
use crate::core::bucket::Bucket;
use crate::core::connection::Connection;
use crate::core::message::{BizMessage, JsonEncoder, MessageEncoder, PushType, WireMessage};
use crate::error::{Result, RustyPushError};
use crate::metrics::GatewayStats;

#[derive(Debug)]
enum JobPayload {
    Message(BizMessage),
    Encoded(WireMessage),
}

/// A push accepted for dispatch
#[derive(Debug)]
pub struct PushJob {
    push_type: PushType,
    payload: JobPayload,
}

impl PushJob {
    pub fn new(push_type: PushType, message: BizMessage) -> Self {
        Self {
            push_type,
            payload: JobPayload::Message(message),
        }
    }

    pub fn push_type(&self) -> &PushType {
        &self.push_type
    }

    /// Serialize on first use and reuse the result afterwards
    fn encode(&mut self, encoder: &dyn MessageEncoder) -> Result<WireMessage> {
        let wire = match &self.payload {
            JobPayload::Encoded(wire) => return Ok(wire.clone()),
            JobPayload::Message(message) => encoder.encode(message)?,
        };
        self.payload = JobPayload::Encoded(wire.clone());
        Ok(wire)
    }
}

/// Delivery work for a single bucket
struct BucketJob {
    push_type: PushType,
    message: WireMessage,
    /// Present for RoomOne only: receives whether this bucket delivered
    delivered: Option<oneshot::Sender<bool>>,
}

type SharedReceiver<T> = Arc<AsyncMutex<mpsc::Receiver<T>>>;

/// Queue ends handed to the worker pools when they start
struct PendingWorkers {
    dispatch_rx: mpsc::Receiver<PushJob>,
    job_rxs: Vec<mpsc::Receiver<BucketJob>>,
}

/// State every dispatch worker shares
struct DispatchContext {
    job_senders: Arc<[mpsc::Sender<BucketJob>]>,
    encoder: Arc<dyn MessageEncoder>,
    stats: Arc<GatewayStats>,
}

pub struct ConnectionManager {
    buckets: Vec<Arc<Bucket>>,
    job_senders: Arc<[mpsc::Sender<BucketJob>]>,
    dispatch_tx: mpsc::Sender<PushJob>,
    pending: Mutex<Option<PendingWorkers>>,
    encoder: Arc<dyn MessageEncoder>,
    stats: Arc<GatewayStats>,
    dispatch_worker_count: usize,
    bucket_job_worker_count: usize,
}

impl ConnectionManager {
    /// Build buckets and queues; workers start with [`ConnectionManager::run_async`]
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Self::with_encoder(config, Arc::new(JsonEncoder))
    }

    pub fn with_encoder(config: &GatewayConfig, encoder: Arc<dyn MessageEncoder>) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(GatewayStats::default());
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_channel_size);

        let mut buckets = Vec::with_capacity(config.bucket_count);
        let mut job_senders = Vec::with_capacity(config.bucket_count);
        let mut job_rxs = Vec::with_capacity(config.bucket_count);
        for bucket_idx in 0..config.bucket_count {
            buckets.push(Arc::new(Bucket::new(bucket_idx, stats.clone())));
            let (tx, rx) = mpsc::channel(config.bucket_job_channel_size);
            job_senders.push(tx);
            job_rxs.push(rx);
        }

        info!(
            "Created connection manager with {} buckets, dispatch queue {}, job queue {}",
            config.bucket_count, config.dispatch_channel_size, config.bucket_job_channel_size
        );

        Ok(Self {
            buckets,
            job_senders: job_senders.into(),
            dispatch_tx,
            pending: Mutex::new(Some(PendingWorkers {
                dispatch_rx,
                job_rxs,
            })),
            encoder,
            stats,
            dispatch_worker_count: config.dispatch_worker_count,
            bucket_job_worker_count: config.bucket_job_worker_count,
        })
    }

    /// Spawn the dispatch and job worker pools on the current tokio runtime
    ///
    /// Only the first call starts workers; later calls are ignored.
    pub fn run_async(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(pending) = pending else {
            warn!("Connection manager workers are already running");
            return;
        };

        self.spawn_job_workers(pending.job_rxs);
        self.spawn_dispatch_workers(pending.dispatch_rx);

        info!(
            "Started {} dispatch workers and {} job workers per bucket",
            self.dispatch_worker_count, self.bucket_job_worker_count
        );
    }

    fn spawn_job_workers(&self, job_rxs: Vec<mpsc::Receiver<BucketJob>>) {
        for (bucket, job_rx) in self.buckets.iter().zip(job_rxs) {
            let job_rx: SharedReceiver<BucketJob> = Arc::new(AsyncMutex::new(job_rx));
            for job_worker_idx in 0..self.bucket_job_worker_count {
                let bucket = bucket.clone();
                let job_rx = job_rx.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    Self::job_worker_main(job_worker_idx, bucket, job_rx, stats).await;
                });
            }
        }
    }

    fn spawn_dispatch_workers(&self, dispatch_rx: mpsc::Receiver<PushJob>) {
        let dispatch_rx: SharedReceiver<PushJob> = Arc::new(AsyncMutex::new(dispatch_rx));
        for dispatch_worker_idx in 0..self.dispatch_worker_count {
            let dispatch_rx = dispatch_rx.clone();
            let ctx = DispatchContext {
                job_senders: self.job_senders.clone(),
                encoder: self.encoder.clone(),
                stats: self.stats.clone(),
            };
            tokio::spawn(async move {
                Self::dispatch_worker_main(dispatch_worker_idx, dispatch_rx, ctx).await;
            });
        }
    }

    async fn dispatch_worker_main(
        worker_idx: usize,
        dispatch_rx: SharedReceiver<PushJob>,
        ctx: DispatchContext,
    ) {
        loop {
            let job = {
                let mut receiver = dispatch_rx.lock().await;
                receiver.recv().await
            };
            let Some(mut job) = job else {
                debug!("Dispatch worker {} shutting down", worker_idx);
                break;
            };
            ctx.stats.dispatch_pending.decr();

            let message = match job.encode(ctx.encoder.as_ref()) {
                Ok(message) => message,
                Err(e) => {
                    ctx.stats.serialize_fail.incr();
                    warn!("Dropping {} push, serialization failed: {}", job.push_type, e);
                    continue;
                }
            };

            match &job.push_type {
                PushType::RoomOne(room_id) => {
                    if !Self::dispatch_room_one(&ctx, &job.push_type, &message).await {
                        ctx.stats.room_one_miss.incr();
                        debug!("No member of room {} reached by single delivery", room_id);
                    }
                }
                _ => {
                    for (bucket_idx, sender) in ctx.job_senders.iter().enumerate() {
                        let bucket_job = BucketJob {
                            push_type: job.push_type.clone(),
                            message: message.clone(),
                            delivered: None,
                        };
                        Self::enqueue(&ctx, bucket_idx, sender, bucket_job).await;
                    }
                }
            }
        }
    }

    /// Offer the job to one bucket at a time until one of them delivers it
    async fn dispatch_room_one(
        ctx: &DispatchContext,
        push_type: &PushType,
        message: &WireMessage,
    ) -> bool {
        for (bucket_idx, sender) in ctx.job_senders.iter().enumerate() {
            let (delivered_tx, delivered_rx) = oneshot::channel();
            let bucket_job = BucketJob {
                push_type: push_type.clone(),
                message: message.clone(),
                delivered: Some(delivered_tx),
            };
            if !Self::enqueue(ctx, bucket_idx, sender, bucket_job).await {
                continue;
            }
            // A dropped acknowledgement means the job worker died mid-job
            if let Ok(true) = delivered_rx.await {
                return true;
            }
        }
        false
    }

    /// Blocking enqueue onto a bucket's job queue
    async fn enqueue(
        ctx: &DispatchContext,
        bucket_idx: usize,
        sender: &mpsc::Sender<BucketJob>,
        bucket_job: BucketJob,
    ) -> bool {
        ctx.stats.push_job_pending.incr();
        if sender.send(bucket_job).await.is_err() {
            ctx.stats.push_job_pending.decr();
            error!("Job queue of bucket {} is closed", bucket_idx);
            return false;
        }
        true
    }

    async fn job_worker_main(
        worker_idx: usize,
        bucket: Arc<Bucket>,
        job_rx: SharedReceiver<BucketJob>,
        stats: Arc<GatewayStats>,
    ) {
        loop {
            let job = {
                let mut receiver = job_rx.lock().await;
                receiver.recv().await
            };
            let Some(job) = job else {
                debug!(
                    "Job worker {} of bucket {} shutting down",
                    worker_idx,
                    bucket.index()
                );
                break;
            };
            stats.push_job_pending.decr();

            match &job.push_type {
                PushType::All => {
                    bucket.push_all(&job.message);
                }
                PushType::Room(room_id) => {
                    bucket.push_room(room_id, &job.message);
                }
                PushType::RoomOne(room_id) => {
                    let delivered = bucket.push_room_one(room_id, &job.message);
                    if let Some(delivered_tx) = job.delivered {
                        // The dispatcher only stops listening when it shuts down
                        let _ = delivered_tx.send(delivered);
                    }
                }
            }
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Index of the bucket that owns a connection id for its whole lifetime
    pub fn bucket_index(&self, conn_id: u64) -> usize {
        (conn_id % self.buckets.len() as u64) as usize
    }

    pub fn get_bucket(&self, conn_id: u64) -> &Arc<Bucket> {
        &self.buckets[self.bucket_index(conn_id)]
    }

    pub fn bucket(&self, bucket_idx: usize) -> Option<&Arc<Bucket>> {
        self.buckets.get(bucket_idx)
    }

    pub fn stats(&self) -> &Arc<GatewayStats> {
        &self.stats
    }

    pub fn add_conn(&self, conn: Arc<Connection>) {
        if self.get_bucket(conn.id).add_conn(conn) {
            self.stats.online_connections.incr();
        }
    }

    pub fn del_conn(&self, conn: &Connection) {
        if self.get_bucket(conn.id).del_conn(conn.id) {
            self.stats.online_connections.decr();
        }
    }

    pub fn join_room(&self, room_id: &str, conn: &Arc<Connection>) -> Result<()> {
        self.get_bucket(conn.id).join_room(room_id, conn)
    }

    pub fn leave_room(&self, room_id: &str, conn: &Connection) -> Result<()> {
        self.get_bucket(conn.id).leave_room(room_id, conn.id)
    }

    /// Push a message to every online connection
    pub fn push_all(&self, message: BizMessage) -> Result<()> {
        self.submit(PushJob::new(PushType::All, message))
    }

    /// Push a message to every member of a room
    pub fn push_room(&self, room_id: &str, message: BizMessage) -> Result<()> {
        self.submit(PushJob::new(PushType::Room(Arc::from(room_id)), message))
    }

    /// Push a message to exactly one member of a room
    pub fn push_room_one(&self, room_id: &str, message: BizMessage) -> Result<()> {
        self.submit(PushJob::new(PushType::RoomOne(Arc::from(room_id)), message))
    }

    /// Non-blocking submission onto the dispatch queue
    fn submit(&self, job: PushJob) -> Result<()> {
        self.stats.dispatch_pending.incr();
        match self.dispatch_tx.try_send(job) {
            Ok(()) => {
                self.stats.dispatch_total.incr();
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.stats.dispatch_pending.decr();
                self.stats.dispatch_fail.incr();
                debug!("Dispatch channel full, rejecting {} push", job.push_type());
                Err(RustyPushError::DispatchChannelFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dispatch_pending.decr();
                self.stats.dispatch_fail.incr();
                Err(RustyPushError::SystemError(
                    "Dispatch channel is closed".to_string(),
                ))
            }
        }
    }
}
