//! Logic tier fan-out of item batches to every gateway
//!
//! Each gateway has its own in-flight cap. A push that finds a gateway at its
//! cap is dropped for that gateway only, so one slow gateway never holds up
//! delivery to the others.

use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

use crate::config::{validate_max_pending, LogicConfig};
use crate::core::message::PushType;
use crate::error::{Result, RustyPushError};
use crate::logic::gate_conn::{GatewayConnection, HttpGatewayConnection};
use crate::metrics::{GatewayInFlight, LogicStats, LogicStatsSnapshot};

/// A batch of items accepted for fan-out
#[derive(Debug)]
pub struct LogicPushJob {
    push_type: PushType,
    items: Vec<Value>,
}

/// One destination gateway and its in-flight budget
struct GatewaySlot {
    conn: Arc<dyn GatewayConnection>,
    in_flight: Arc<Semaphore>,
    max_pending: usize,
}

pub struct GatewayConnManager {
    gateways: Arc<[GatewaySlot]>,
    dispatch_tx: mpsc::Sender<LogicPushJob>,
    pending: Mutex<Option<mpsc::Receiver<LogicPushJob>>>,
    stats: Arc<LogicStats>,
    dispatch_worker_count: usize,
}

impl GatewayConnManager {
    /// Connect to every configured gateway over HTTP
    pub fn new(config: &LogicConfig) -> Result<Self> {
        config.validate()?;

        let mut gateways: Vec<(Arc<dyn GatewayConnection>, usize)> =
            Vec::with_capacity(config.gateways.len());
        for endpoint in &config.gateways {
            let conn = HttpGatewayConnection::new(&endpoint.url, config.gateway_timeout)?;
            gateways.push((Arc::new(conn), config.max_pending_for(endpoint)));
        }

        Self::with_gateways(
            gateways,
            config.dispatch_channel_size,
            config.dispatch_worker_count,
        )
    }

    /// Build from already constructed gateway connections and their in-flight caps
    pub fn with_gateways(
        gateways: Vec<(Arc<dyn GatewayConnection>, usize)>,
        dispatch_channel_size: usize,
        dispatch_worker_count: usize,
    ) -> Result<Self> {
        if dispatch_channel_size == 0 || dispatch_worker_count == 0 {
            return Err(RustyPushError::ConfigError(
                "Logic dispatch channel size and worker count must be greater than zero"
                    .to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(gateways.len());
        for (conn, max_pending) in gateways {
            validate_max_pending(max_pending, &format!("max_pending of gateway {}", conn.name()))?;
            info!("Gateway {} with max {} in-flight pushes", conn.name(), max_pending);
            slots.push(GatewaySlot {
                conn,
                in_flight: Arc::new(Semaphore::new(max_pending)),
                max_pending,
            });
        }

        let (dispatch_tx, dispatch_rx) = mpsc::channel(dispatch_channel_size);

        Ok(Self {
            gateways: slots.into(),
            dispatch_tx,
            pending: Mutex::new(Some(dispatch_rx)),
            stats: Arc::new(LogicStats::default()),
            dispatch_worker_count,
        })
    }

    /// Spawn the dispatch worker pool on the current tokio runtime
    ///
    /// Only the first call starts workers; later calls are ignored.
    pub fn run_async(&self) {
        let dispatch_rx = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(dispatch_rx) = dispatch_rx else {
            warn!("Gateway connection manager workers are already running");
            return;
        };

        let dispatch_rx = Arc::new(AsyncMutex::new(dispatch_rx));
        for dispatch_worker_idx in 0..self.dispatch_worker_count {
            let dispatch_rx = dispatch_rx.clone();
            let gateways = self.gateways.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                Self::dispatch_worker_main(dispatch_worker_idx, dispatch_rx, gateways, stats)
                    .await;
            });
        }

        info!(
            "Started {} logic dispatch workers for {} gateways",
            self.dispatch_worker_count,
            self.gateways.len()
        );
    }

    async fn dispatch_worker_main(
        worker_idx: usize,
        dispatch_rx: Arc<AsyncMutex<mpsc::Receiver<LogicPushJob>>>,
        gateways: Arc<[GatewaySlot]>,
        stats: Arc<LogicStats>,
    ) {
        loop {
            let job = {
                let mut receiver = dispatch_rx.lock().await;
                receiver.recv().await
            };
            let Some(job) = job else {
                debug!("Logic dispatch worker {} shutting down", worker_idx);
                break;
            };

            let batch: Arc<[u8]> = match serde_json::to_vec(&job.items) {
                Ok(batch) => batch.into(),
                Err(e) => {
                    error!("Dropping {} push, serialization failed: {}", job.push_type, e);
                    continue;
                }
            };

            for slot in gateways.iter() {
                match slot.in_flight.clone().try_acquire_owned() {
                    Ok(permit) => {
                        let conn = slot.conn.clone();
                        let push_type = job.push_type.clone();
                        let batch = batch.clone();
                        let stats = stats.clone();
                        tokio::spawn(async move {
                            Self::do_push(conn, push_type, batch, stats, permit).await;
                        });
                    }
                    Err(_) => {
                        stats.gateway_drop.incr();
                        warn!(
                            "Gateway {} at its in-flight cap of {}, dropping {} push",
                            slot.conn.name(),
                            slot.max_pending,
                            job.push_type
                        );
                    }
                }
            }
        }
    }

    /// Deliver one batch to one gateway; the permit is released when this returns or unwinds
    async fn do_push(
        conn: Arc<dyn GatewayConnection>,
        push_type: PushType,
        batch: Arc<[u8]>,
        stats: Arc<LogicStats>,
        _permit: OwnedSemaphorePermit,
    ) {
        let result = match &push_type {
            PushType::All => conn.push_all(&batch).await,
            PushType::Room(room_id) => conn.push_room(room_id, &batch).await,
            PushType::RoomOne(room_id) => conn.push_room_one(room_id, &batch).await,
        };

        stats.gateway_push_total.incr();
        if let Err(e) = result {
            stats.gateway_push_fail.incr();
            warn!("Push {} to gateway {} failed: {}", push_type, conn.name(), e);
        }
    }

    pub fn gateway_count(&self) -> usize {
        self.gateways.len()
    }

    pub fn stats(&self) -> &Arc<LogicStats> {
        &self.stats
    }

    pub fn snapshot(&self) -> LogicStatsSnapshot {
        let gateways = self
            .gateways
            .iter()
            .map(|slot| GatewayInFlight {
                gateway: slot.conn.name().to_string(),
                in_flight: slot.max_pending - slot.in_flight.available_permits(),
                max_pending: slot.max_pending,
            })
            .collect();
        self.stats.snapshot(gateways)
    }

    pub fn push_all(&self, items: Vec<Value>) -> Result<()> {
        self.submit(LogicPushJob {
            push_type: PushType::All,
            items,
        })
    }

    pub fn push_room(&self, room_id: &str, items: Vec<Value>) -> Result<()> {
        self.submit(LogicPushJob {
            push_type: PushType::Room(Arc::from(room_id)),
            items,
        })
    }

    pub fn push_room_one(&self, room_id: &str, items: Vec<Value>) -> Result<()> {
        self.submit(LogicPushJob {
            push_type: PushType::RoomOne(Arc::from(room_id)),
            items,
        })
    }

    /// Non-blocking submission onto the dispatch queue
    fn submit(&self, job: LogicPushJob) -> Result<()> {
        let item_count = job.items.len() as u64;
        match self.dispatch_tx.try_send(job) {
            Ok(()) => {
                self.stats.dispatch_total.incr_by(item_count);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dispatch_fail.incr_by(item_count);
                Err(RustyPushError::LogicDispatchChannelFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dispatch_fail.incr_by(item_count);
                Err(RustyPushError::SystemError(
                    "Logic dispatch channel is closed".to_string(),
                ))
            }
        }
    }
}
