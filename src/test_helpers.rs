//! In-memory aggregator used by unit tests.
//!
//! [`ScriptedConnector`] hands out `tokio::io::duplex` pipes whose far end
//! answers each received frame with the next scripted [`Step`].

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::{
    codec::{BetRecord, Message, encode_ack},
    connector::Connector,
    frame::FramedChannel,
};

/// Scripted reaction of the aggregator.
#[derive(Debug, Clone)]
pub enum Step {
    /// Refuse the next connection attempt.
    Refuse,
    /// Reply with raw bytes.
    Reply(Vec<u8>),
    /// Acknowledge an arbitrary number.
    Ack(u32),
    /// Acknowledge the last bet of the received batch.
    EchoAck,
    /// Read the request, then drop the connection without replying.
    Hangup,
}

type Hook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    received: Vec<Vec<u8>>,
    connects: usize,
}

/// Connector whose peer follows a fixed script.
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    hook: Arc<Option<Hook>>,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let script = Script {
            steps: steps.into_iter().collect(),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            hook: Arc::new(None),
        }
    }

    /// Run `hook` with the request index before each reply is sent.
    pub fn on_request(self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self {
            hook: Arc::new(Some(Box::new(hook))),
            ..self
        }
    }

    /// Frames received so far, in arrival order.
    pub fn received(&self) -> Vec<Vec<u8>> { self.lock().received.clone() }

    /// Connection attempts so far, refused ones included.
    pub fn connects(&self) -> usize { self.lock().connects }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn serve(self, stream: DuplexStream) {
        let mut channel = FramedChannel::new(stream);
        while let Ok(frame) = channel.recv_message().await {
            let (index, step) = {
                let mut script = self.lock();
                script.received.push(frame.clone());
                (script.received.len() - 1, script.steps.pop_front())
            };
            if let Some(hook) = &*self.hook {
                hook(index);
            }
            let reply = match step {
                Some(Step::Reply(bytes)) => bytes,
                Some(Step::Ack(number)) => encode_ack(number).to_vec(),
                Some(Step::EchoAck) => encode_ack(last_number(&frame)).to_vec(),
                Some(Step::Hangup | Step::Refuse) | None => return,
            };
            if channel.send_message(&reply).await.is_err() {
                return;
            }
        }
    }
}

fn last_number(frame: &[u8]) -> u32 {
    match Message::decode(frame) {
        Ok(Message::Batch { records, .. }) => records.last().map_or(0, |r| r.number),
        Ok(Message::SingleBet { record, .. }) => record.number,
        _ => 0,
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        {
            let mut script = self.lock();
            script.connects += 1;
            if matches!(script.steps.front(), Some(Step::Refuse)) {
                script.steps.pop_front();
                return Err(io::ErrorKind::ConnectionRefused.into());
            }
        }
        let (client, server) = tokio::io::duplex(16 * 1024);
        tokio::spawn(self.clone().serve(server));
        Ok(client)
    }
}

/// `count` valid bets with distinct, increasing numbers.
pub fn bets(count: usize) -> Vec<BetRecord> {
    (0..count)
        .map(|i| {
            let number = 7000 + u32::try_from(i).unwrap_or(u32::MAX - 7000);
            BetRecord::new("Juan", "Perez", "30904465", "1999-03-17", number)
        })
        .collect()
}
