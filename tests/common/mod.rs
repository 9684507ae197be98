//! In-process aggregator for integration tests.
//!
//! Stores batches, acknowledges them with the last bet number, runs the draw
//! once every expected agency has sent `DONE` and then answers winners
//! queries. Bets on [`WINNING_NUMBER`] win.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use agency_client::{
    BetRecord,
    FramedChannel,
    Message,
    codec::{encode_ack, encode_winners},
    message_type::MessageType,
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// Number that wins the draw.
pub const WINNING_NUMBER: u32 = 7574;

#[derive(Default)]
struct State {
    bets: Vec<(u8, BetRecord)>,
    known: BTreeSet<u8>,
    done: BTreeSet<u8>,
    winners: Option<BTreeMap<u8, Vec<String>>>,
    connections: usize,
    batches_to_drop: usize,
    not_ready_replies: usize,
}

/// Running aggregator bound to an ephemeral local port.
pub struct Aggregator {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl Aggregator {
    /// Start an aggregator that draws once `expected_agencies` are done.
    pub async fn start(expected_agencies: usize) -> Self { Self::start_flaky(expected_agencies, 0).await }

    /// Like [`start`](Self::start) but hangs up on the first `drop_batches`
    /// batches without storing or acknowledging them.
    pub async fn start_flaky(expected_agencies: usize, drop_batches: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(State {
            batches_to_drop: drop_batches,
            ..State::default()
        }));
        let shared = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                lock(&shared).connections += 1;
                tokio::spawn(serve(socket, Arc::clone(&shared), expected_agencies));
            }
        });
        Self { addr, state, task }
    }

    /// Address clients should dial.
    pub fn address(&self) -> String { self.addr.to_string() }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize { lock(&self.state).connections }

    /// Stored bets for `agency`, in arrival order.
    pub fn bets_for(&self, agency: u8) -> Vec<BetRecord> {
        lock(&self.state)
            .bets
            .iter()
            .filter(|(owner, _)| *owner == agency)
            .map(|(_, bet)| bet.clone())
            .collect()
    }

    /// `NOT_READY` replies sent so far.
    pub fn not_ready_replies(&self) -> usize { lock(&self.state).not_ready_replies }
}

impl Drop for Aggregator {
    fn drop(&mut self) { self.task.abort(); }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn serve(socket: TcpStream, state: Arc<Mutex<State>>, expected: usize) {
    let mut channel = FramedChannel::new(socket);
    while let Ok(frame) = channel.recv_message().await {
        let Some(reply) = handle(&frame, &state, expected) else {
            return;
        };
        if channel.send_message(&reply).await.is_err() {
            return;
        }
    }
}

fn handle(frame: &[u8], state: &Mutex<State>, expected: usize) -> Option<Vec<u8>> {
    let mut state = lock(state);
    match Message::decode(frame).ok()? {
        Message::Batch { agency, records } => {
            if state.batches_to_drop > 0 {
                state.batches_to_drop -= 1;
                return None;
            }
            let last = records.last().map_or(0, |r| r.number);
            state.known.insert(agency);
            state.bets.extend(records.into_iter().map(|r| (agency, r)));
            Some(encode_ack(last).to_vec())
        }
        Message::Done { agency } => {
            state.done.insert(agency);
            if state.winners.is_none() && state.known.len() >= expected && state.done == state.known {
                let mut winners: BTreeMap<u8, Vec<String>> = BTreeMap::new();
                for (owner, bet) in state.bets.iter().filter(|(_, b)| b.number == WINNING_NUMBER) {
                    winners.entry(*owner).or_default().push(bet.dni.clone());
                }
                state.winners = Some(winners);
            }
            Some(vec![0x01])
        }
        Message::GetWinners { agency } => {
            if let Some(winners) = &state.winners {
                let dnis = winners.get(&agency).cloned().unwrap_or_default();
                return encode_winners(&dnis).ok();
            }
            state.not_ready_replies += 1;
            Some(vec![MessageType::NotReady.into()])
        }
        Message::SingleBet { record, .. } => Some(encode_ack(record.number).to_vec()),
        Message::NotReady | Message::WinnersList(_) => None,
    }
}

/// Bets for `agency`: `count` losers followed by one winner with DNI `winner_dni`.
pub fn agency_bets(agency: u8, count: u32, winner_dni: &str) -> Vec<BetRecord> {
    let mut bets: Vec<BetRecord> = (0..count)
        .map(|i| {
            BetRecord::new(
                "Ana",
                "Gomez",
                format!("{agency}{i:07}"),
                "2001-12-01",
                10_000 + i,
            )
        })
        .collect();
    bets.push(BetRecord::new("Juan", "Perez", winner_dni, "1999-03-17", WINNING_NUMBER));
    bets
}
