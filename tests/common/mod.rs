//! In-memory fakes of the broker and the store.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc;

use weather_relay::broker::{BrokerChannel, Connector, DeliveryStream, Envelope, ExchangeKind};
use weather_relay::sink::Sink;
use weather_relay::{AppError, AppResult, PersistError, Reading};

pub const VALID_PAYLOAD: &[u8] =
    br#"{"stationId":3,"temperature":22.5,"humidity":60.0,"timestamp":"2025-11-11T12:30:45"}"#;

pub fn envelope(delivery_tag: u64, payload: &[u8]) -> Envelope {
    Envelope {
        delivery_tag,
        routing_key: "station.3".to_string(),
        payload: payload.to_vec(),
        redelivered: false,
    }
}

/// One recorded broker operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    DeclareExchange(String, ExchangeKind),
    DeclareQueue(String, Option<String>),
    Bind {
        queue: String,
        exchange: String,
        pattern: String,
    },
    Prefetch(u16),
    Consume(String),
    Publish {
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
    },
    Ack(u64),
    Reject(u64),
}

/// Records every call; deliveries are fed through the sender returned by `new`.
pub struct MockChannel {
    calls: Mutex<Vec<Call>>,
    deliveries: Mutex<Option<mpsc::UnboundedReceiver<AppResult<Envelope>>>>,
    pub fail_declare: AtomicBool,
    pub fail_publish: AtomicBool,
    pub fail_settle: AtomicBool,
}

impl MockChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<AppResult<Envelope>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Some(rx)),
            fail_declare: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            fail_settle: AtomicBool::new(false),
        });
        (channel, tx)
    }

    /// A channel whose delivery stream ends immediately.
    pub fn idle() -> Arc<Self> {
        let (channel, _tx) = Self::new();
        channel
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Ack(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    pub fn rejects(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Reject(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<(String, String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Publish {
                    exchange,
                    routing_key,
                    payload,
                } => Some((exchange, routing_key, payload)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> AppResult<()> {
        if self.fail_declare.load(Ordering::SeqCst) {
            return Err(AppError::TopologyError(format!("exchange '{name}'")));
        }
        self.record(Call::DeclareExchange(name.to_string(), kind));
        Ok(())
    }

    async fn declare_queue(&self, name: &str, dead_letter_exchange: Option<&str>) -> AppResult<()> {
        self.record(Call::DeclareQueue(
            name.to_string(),
            dead_letter_exchange.map(str::to_string),
        ));
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> AppResult<()> {
        self.record(Call::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
        });
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> AppResult<()> {
        self.record(Call::Prefetch(count));
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> AppResult<DeliveryStream> {
        self.record(Call::Consume(queue.to_string()));
        let rx = self
            .deliveries
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::Disconnected("already consuming".to_string()))?;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> AppResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::PublishError("channel closed".to_string()));
        }
        self.record(Call::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> AppResult<()> {
        if self.fail_settle.load(Ordering::SeqCst) {
            return Err(AppError::AckError {
                delivery_tag,
                reason: "channel closed".to_string(),
            });
        }
        self.record(Call::Ack(delivery_tag));
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> AppResult<()> {
        if self.fail_settle.load(Ordering::SeqCst) {
            return Err(AppError::AckError {
                delivery_tag,
                reason: "channel closed".to_string(),
            });
        }
        self.record(Call::Reject(delivery_tag));
        Ok(())
    }
}

/// Hands out scripted dial results; fails once the script runs out.
pub struct MockConnector {
    script: Mutex<VecDeque<Option<Arc<MockChannel>>>>,
    dials: AtomicU32,
}

impl MockConnector {
    pub fn new(script: Vec<Option<Arc<MockChannel>>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            dials: AtomicU32::new(0),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn dials(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn dial(&self) -> AppResult<Arc<dyn BrokerChannel>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front().flatten() {
            Some(channel) => Ok(channel as Arc<dyn BrokerChannel>),
            None => Err(AppError::ConnectionFailed("connection refused".to_string())),
        }
    }
}

/// What the fake store does on the next write.
#[derive(Debug, Clone)]
pub enum SinkBehavior {
    Succeed,
    Fail(PersistError),
    Hang,
}

/// Records committed readings; succeeds unless told otherwise.
pub struct MockSink {
    script: Mutex<VecDeque<SinkBehavior>>,
    stored: Mutex<Vec<Reading>>,
    persist_calls: AtomicU32,
    repairs: Mutex<Vec<PersistError>>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<SinkBehavior>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            stored: Mutex::new(Vec::new()),
            persist_calls: AtomicU32::new(0),
            repairs: Mutex::new(Vec::new()),
        })
    }

    pub fn stored(&self) -> Vec<Reading> {
        self.stored.lock().unwrap().clone()
    }

    pub fn persist_calls(&self) -> u32 {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub fn repairs(&self) -> u32 {
        self.repairs.lock().unwrap().len() as u32
    }

    /// The failure that triggered each repair, in order.
    pub fn repair_causes(&self) -> Vec<PersistError> {
        self.repairs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for MockSink {
    async fn persist(&self, reading: &Reading) -> Result<(), PersistError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SinkBehavior::Succeed);

        match behavior {
            SinkBehavior::Succeed => {
                self.stored.lock().unwrap().push(reading.clone());
                Ok(())
            }
            SinkBehavior::Fail(e) => Err(e),
            SinkBehavior::Hang => std::future::pending().await,
        }
    }

    async fn repair(&self, cause: &PersistError) {
        self.repairs.lock().unwrap().push(cause.clone());
    }
}
