use std::collections::{BTreeMap, VecDeque};
use std::io::BufRead;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use spacelink_frame::{LinkEncoding, PacketComm};
use spacelink_transfer::{ReceiveStatus, Transfer, TransferConfig};
use spacelink_transport::{Sender, UdpConfig, UdpLink, UdpSender, MAX_DATAGRAM};
use tracing::{debug, info, trace, warn};

use crate::cmd::{Env, RunArgs};
use crate::counters::Counters;
use crate::exit::{io_error, transfer_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::print_fields;
use crate::request::{error_reply, Request};

/// How often the outgoing spools are rescanned.
const RELOAD_INTERVAL: Duration = Duration::from_secs(10);

/// Pause between packet-generation passes.
const PASS_INTERVAL: Duration = Duration::from_millis(500);

/// Sleep when the send queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// State shared by the control, send, receive and request threads.
struct Agent {
    transfer: Mutex<Transfer>,
    /// Packets waiting for the send loop, addressed by `nodedest`.
    outbox: Mutex<VecDeque<PacketComm>>,
    /// Where each peer was last heard from (or was configured to be).
    routes: Mutex<BTreeMap<u8, SocketAddr>>,
    counters: Counters,
    link: LinkEncoding,
    running: Arc<AtomicBool>,
}

impl Agent {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn push(&self, packets: Vec<PacketComm>) {
        if !packets.is_empty() {
            lock(&self.outbox).extend(packets);
        }
    }
}

pub fn run(args: RunArgs, env: &Env) -> CliResult<i32> {
    let targets = args.targets()?;
    let nodes = env.node_table()?;
    let config = TransferConfig::default()
        .with_packet_size(args.packet_size)
        .with_waittime(Duration::from_secs(args.waittime));
    let mut transfer = Transfer::new(&env.root, nodes, &targets.node, config)
        .map_err(|err| transfer_error("transfer init failed", err))?;

    let udp = UdpConfig::default().with_throughput(if args.slow {
        UdpConfig::THROUGHPUT_LO
    } else {
        UdpConfig::THROUGHPUT_HI
    });
    let link = UdpLink::bind(SocketAddr::new(args.bind, args.port), &udp)
        .map_err(|err| transport_error("bind failed", err))?;

    let mut routes = BTreeMap::new();
    let mut throughputs = BTreeMap::new();
    if let Some(peer) = &targets.peer {
        let node_id = transfer
            .node_id(&peer.node)
            .map_err(|err| transfer_error("unknown peer", err))?;
        let ip = peer.ip.as_deref().unwrap_or("127.0.0.1");
        let addr = (ip, args.port)
            .to_socket_addrs()
            .map_err(|err| io_error(&format!("resolve {ip}"), err))?
            .next()
            .ok_or_else(|| CliError::usage(format!("no address for {ip}")))?;
        routes.insert(node_id, addr);
        if let Some(throughput) = peer.throughput {
            throughputs.insert(node_id, throughput);
        }
        info!(peer = %peer.node, node_id, %addr, "peer configured");
    }

    let peers: Vec<u8> = transfer.peers().collect();
    for peer in peers {
        if let Err(err) = transfer.outgoing_tx_load(peer) {
            warn!(peer, error = %err, "initial spool scan failed");
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let agent = Arc::new(Agent {
        transfer: Mutex::new(transfer),
        outbox: Mutex::new(VecDeque::new()),
        routes: Mutex::new(routes),
        counters: Counters::default(),
        link: args.link.encoding(),
        running,
    });

    let recv = {
        let agent = agent.clone();
        let link = link
            .try_clone()
            .map_err(|err| transport_error("socket clone failed", err))?;
        spawn("recv", move || recv_loop(&agent, &link))?
    };
    let send = {
        let agent = agent.clone();
        spawn("send", move || send_loop(&agent, &link, &udp, &throughputs))?
    };
    {
        // Blocks on stdin, so it is left running at shutdown.
        let agent = agent.clone();
        spawn("requests", move || request_loop(&agent))?;
    }

    info!(node = %targets.node, port = args.port, "agent running");
    control_loop(&agent);

    for handle in [recv, send] {
        if handle.join().is_err() {
            warn!("agent thread panicked");
        }
    }
    let counters = agent.counters.snapshot();
    info!(
        packets_in = counters.packets_in,
        packets_out = counters.packets_out,
        crc_errors = counters.crc_errors,
        "agent stopped"
    );
    print_fields(&counters.fields(), env.format);
    Ok(SUCCESS)
}

/// Rescan spools and generate packets for every reachable peer.
fn control_loop(agent: &Agent) {
    let mut next_reload = Instant::now() + RELOAD_INTERVAL;
    while agent.running() {
        let reload = Instant::now() >= next_reload;
        if reload {
            next_reload = Instant::now() + RELOAD_INTERVAL;
        }

        let routed: Vec<u8> = lock(&agent.routes).keys().copied().collect();
        let mut packets = Vec::new();
        {
            let mut transfer = lock(&agent.transfer);
            for node_id in routed {
                if reload {
                    if let Err(err) = transfer.outgoing_tx_load(node_id) {
                        warn!(node_id, error = %err, "spool scan failed");
                    }
                }
                let queued = lock(&agent.outbox).len() + packets.len();
                match transfer.get_outgoing_lpackets(node_id, queued) {
                    Ok(out) => packets.extend(out),
                    Err(err) => warn!(node_id, error = %err, "outgoing pass failed"),
                }
                match transfer.get_outgoing_rpackets(node_id) {
                    Ok(out) => packets.extend(out),
                    Err(err) => warn!(node_id, error = %err, "response pass failed"),
                }
            }
        }
        if !packets.is_empty() {
            trace!(count = packets.len(), "packets generated");
        }
        agent.push(packets);
        thread::sleep(PASS_INTERVAL);
    }
}

fn recv_loop(agent: &Agent, link: &UdpLink) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while agent.running() {
        let (len, from) = match link.recv(&mut buf) {
            Ok(Some(received)) => received,
            Ok(None) => continue,
            Err(err) => {
                Counters::bump(&agent.counters.recv_errors);
                warn!(error = %err, "receive failed");
                thread::sleep(IDLE_SLEEP);
                continue;
            }
        };

        let mut packet = PacketComm::default();
        if let Err(err) = packet.unpack(&agent.link, &buf[..len]) {
            Counters::bump(&agent.counters.crc_errors);
            debug!(%from, len, error = %err, "dropping undecodable datagram");
            continue;
        }
        Counters::bump(&agent.counters.packets_in);

        let from_node = packet.header.nodeorig;
        let mut transfer = lock(&agent.transfer);
        let responses = match transfer.receive_packet(&packet) {
            Ok(ReceiveStatus::Ignored) => {
                Counters::bump(&agent.counters.ignored);
                trace!(%from, packet_type = packet.packet_type(), "ignored packet");
                continue;
            }
            Ok(ReceiveStatus::Handled) => Vec::new(),
            Ok(ReceiveStatus::ResponseRequired) => transfer
                .get_outgoing_rpackets(from_node)
                .unwrap_or_else(|err| {
                    warn!(node_id = from_node, error = %err, "response pass failed");
                    Vec::new()
                }),
            Err(err) => {
                Counters::bump(&agent.counters.payload_errors);
                debug!(%from, error = %err, "dropping malformed packet");
                continue;
            }
        };
        drop(transfer);

        if lock(&agent.routes).insert(from_node, from) != Some(from) {
            info!(node_id = from_node, %from, "peer route learned");
        }
        agent.push(responses);
    }
}

fn send_loop(agent: &Agent, link: &UdpLink, udp: &UdpConfig, throughputs: &BTreeMap<u8, u32>) {
    let mut senders: BTreeMap<u8, UdpSender> = BTreeMap::new();
    while agent.running() {
        let Some(mut packet) = lock(&agent.outbox).pop_front() else {
            thread::sleep(IDLE_SLEEP);
            continue;
        };
        let node_id = packet.header.nodedest;
        let Some(addr) = lock(&agent.routes).get(&node_id).copied() else {
            Counters::bump(&agent.counters.send_errors);
            warn!(node_id, "no route to node, dropping packet");
            continue;
        };

        if senders.get(&node_id).is_none_or(|sender| sender.peer() != addr) {
            let config = match throughputs.get(&node_id) {
                Some(&throughput) => udp.clone().with_throughput(throughput),
                None => udp.clone(),
            };
            match UdpSender::from_link(link, addr, &config) {
                Ok(sender) => {
                    senders.insert(node_id, sender);
                }
                Err(err) => {
                    Counters::bump(&agent.counters.send_errors);
                    warn!(node_id, %addr, error = %err, "cannot open sender");
                    continue;
                }
            }
        }
        let Some(sender) = senders.get_mut(&node_id) else {
            continue;
        };

        let wire = match packet.pack(&agent.link) {
            Ok(wire) => wire,
            Err(err) => {
                Counters::bump(&agent.counters.send_errors);
                warn!(node_id, error = %err, "cannot encode packet");
                continue;
            }
        };
        match sender.send(&wire) {
            Ok(_) => Counters::bump(&agent.counters.packets_out),
            Err(err) => {
                Counters::bump(&agent.counters.send_errors);
                warn!(node_id, %addr, error = %err, "send failed");
            }
        }
    }
}

/// Answer operator requests typed on stdin, one JSON line each.
fn request_loop(agent: &Agent) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if !agent.running() {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let reply = match line.parse::<Request>() {
            Ok(request) => request
                .apply(&mut lock(&agent.transfer), &agent.counters)
                .unwrap_or_else(|err| error_reply(err)),
            Err(err) => error_reply(err),
        };
        println!("{reply}");
    }
}

fn spawn<F>(name: &str, body: F) -> CliResult<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|err| io_error(&format!("spawn {name} thread"), err))
}

/// Lock `mutex`, carrying on with the data if another thread panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
