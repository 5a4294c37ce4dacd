//! gRPC bridge between the interceptor processes and the engine.
//!
//! One `InterceptService` serves every interceptor. Decision streams
//! are demultiplexed by ordered pair: each (from, to) gets its own worker
//! task with a bounded queue, shared across every open stream, so
//! decisions within a pair come out in arrival order even when two
//! connections carry the same pair, while unrelated pairs proceed
//! concurrently. Acks are correlated by sequence number, never by
//! response order.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use faultline_core::{NodeId, NodeInfo, PacketEvent, ValidatorKeys};

use crate::artifacts::ActionLog;
use crate::iteration::IterationController;
use crate::proto;
use crate::proto::intercept_server::{Intercept, InterceptServer};
use crate::runner::{AbortHandle, AbortReason};
use crate::strategy::StrategyEngine;

const PAIR_QUEUE_DEPTH: usize = 64;
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

type AckStream = Pin<Box<dyn Stream<Item = Result<proto::PacketAck, Status>> + Send>>;

/// One queued packet with the ack channel of the stream it arrived on.
struct PacketJob {
    packet: proto::Packet,
    ack_tx: mpsc::Sender<Result<proto::PacketAck, Status>>,
}

/// Pair workers live here, keyed by ordered pair and shared by every
/// open stream for the lifetime of the service.
type WorkerMap = Mutex<HashMap<(NodeId, NodeId), mpsc::Sender<PacketJob>>>;

/// The interception service implementation.
pub struct InterceptService {
    engine: Arc<StrategyEngine>,
    controller: Arc<IterationController>,
    log: Arc<ActionLog>,
    abort: AbortHandle,
    workers: Arc<WorkerMap>,
}

impl InterceptService {
    pub fn new(
        engine: Arc<StrategyEngine>,
        controller: Arc<IterationController>,
        log: Arc<ActionLog>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            engine,
            controller,
            log,
            abort,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wrap the service for `tonic`, with message limits raised enough
    /// for bulky consensus payloads.
    pub fn into_server(self) -> InterceptServer<Self> {
        InterceptServer::new(self)
            .max_decoding_message_size(MAX_MESSAGE_BYTES)
            .max_encoding_message_size(MAX_MESSAGE_BYTES)
    }
}

#[tonic::async_trait]
impl Intercept for InterceptService {
    async fn register(
        &self,
        request: Request<proto::TopologyInfo>,
    ) -> Result<Response<proto::ReadyAck>, Status> {
        let info = request.into_inner();
        let nodes = info
            .nodes
            .into_iter()
            .map(node_from_record)
            .collect::<Result<Vec<_>, Status>>()?;
        let count = nodes.len();
        self.engine
            .network()
            .register_nodes(nodes)
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        if let Err(err) = self.engine.ensure_setup().await {
            tracing::error!(%err, "strategy setup failed");
            self.controller.force_error();
            self.abort.trigger(AbortReason::Strategy(err.to_string()));
            return Err(Status::internal(err.to_string()));
        }
        self.controller.mark_handshake();
        tracing::info!(nodes = count, "interceptor registered");
        Ok(Response::new(proto::ReadyAck {
            accepted: true,
            detail: String::new(),
        }))
    }

    type InterceptStreamStream = AckStream;

    async fn intercept_stream(
        &self,
        request: Request<Streaming<proto::Packet>>,
    ) -> Result<Response<Self::InterceptStreamStream>, Status> {
        let inbound = request.into_inner();
        let (ack_tx, ack_rx) = mpsc::channel::<Result<proto::PacketAck, Status>>(PAIR_QUEUE_DEPTH);
        let shared = WorkerShared {
            engine: self.engine.clone(),
            controller: self.controller.clone(),
            log: self.log.clone(),
            abort: self.abort.clone(),
            workers: self.workers.clone(),
        };
        tokio::spawn(dispatch(inbound, ack_tx, shared));
        Ok(Response::new(Box::pin(ReceiverStream::new(ack_rx))))
    }

    async fn report_ledger_close(
        &self,
        request: Request<proto::LedgerClose>,
    ) -> Result<Response<proto::LedgerCloseAck>, Status> {
        let close = request.into_inner();
        self.controller
            .observe_ledger_close(close.node_id, close.ledger_seq, &close.ledger_hash);
        Ok(Response::new(proto::LedgerCloseAck {}))
    }
}

fn node_from_record(record: proto::NodeRecord) -> Result<NodeInfo, Status> {
    let port = |value: u32, name: &str| {
        u16::try_from(value)
            .map_err(|_| Status::invalid_argument(format!("{name} {value} is out of range")))
    };
    Ok(NodeInfo {
        id: record.id,
        address: record.address,
        peer_port: port(record.peer_port, "peer port")?,
        rpc_port: port(record.rpc_port, "rpc port")?,
        keys: ValidatorKeys {
            public_key: record.public_key,
            private_key: record.private_key,
        },
        unl: record.unl,
    })
}

#[derive(Clone)]
struct WorkerShared {
    engine: Arc<StrategyEngine>,
    controller: Arc<IterationController>,
    log: Arc<ActionLog>,
    abort: AbortHandle,
    workers: Arc<WorkerMap>,
}

/// Read one inbound stream and fan packets out to the shared per-pair
/// workers, tagging each with this stream's ack channel.
async fn dispatch(
    mut inbound: Streaming<proto::Packet>,
    ack_tx: mpsc::Sender<Result<proto::PacketAck, Status>>,
    shared: WorkerShared,
) {
    loop {
        match inbound.message().await {
            Ok(Some(packet)) => {
                let key = (packet.from_id, packet.to_id);
                let worker = {
                    let mut map = shared.workers.lock();
                    map.entry(key)
                        .or_insert_with(|| spawn_pair_worker(key, shared.clone()))
                        .clone()
                };
                let job = PacketJob {
                    packet,
                    ack_tx: ack_tx.clone(),
                };
                // A closed worker means a strategy failure already tore
                // the run down.
                if worker.send(job).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(status) => {
                tracing::warn!(%status, "decision stream closed by peer");
                break;
            }
        }
    }
}

/// Single-writer task for one ordered pair: decisions in arrival order,
/// regardless of which stream a packet came in on.
fn spawn_pair_worker(pair: (NodeId, NodeId), shared: WorkerShared) -> mpsc::Sender<PacketJob> {
    let (tx, mut rx) = mpsc::channel::<PacketJob>(PAIR_QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let event = PacketEvent {
                from: job.packet.from_id,
                to: job.packet.to_id,
                payload: job.packet.data,
                sequence: job.packet.sequence,
            };
            match shared.engine.process(&event).await {
                Ok((decision, source)) => {
                    shared
                        .log
                        .record(shared.controller.iteration_index(), &event, &decision, source);
                    let ack = proto::PacketAck {
                        sequence: event.sequence,
                        data: decision.payload,
                        action: decision.delay_ms,
                        send_amount: decision.duplicates,
                    };
                    // That stream may be gone; other streams keep this
                    // worker alive.
                    let _ = job.ack_tx.send(Ok(ack)).await;
                }
                Err(err) => {
                    tracing::error!(from = pair.0, to = pair.1, %err, "decision failed, aborting run");
                    shared.controller.force_error();
                    shared.abort.trigger(AbortReason::Strategy(err.to_string()));
                    let _ = job.ack_tx.send(Err(Status::internal(err.to_string()))).await;
                    break;
                }
            }
        }
    });
    tx
}
