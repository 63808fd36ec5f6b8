//! Loopback room driver - runs a host and a set of clients in one process
//! on a fixed tick

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::avatar::AvatarSource;
use crate::config::SessionConfig;
use crate::metrics::SessionMetrics;
use crate::net::loopback::{LoopbackNetwork, LoopbackTransport};
use crate::net::transport::AudioStream;
use crate::session::{BodyPart, PoseSource, Session, SessionError};
use crate::util::dual_quat::DualQuat;

/// Driver ticks per second
pub const TICK_RATE: u32 = 60;

/// Synthetic rig walking a circle, hands held either side of the head
#[derive(Debug, Clone)]
pub struct OrbitRig {
    phase: f32,
    radius: f32,
    height: f32,
    /// Radians per second
    speed: f32,
}

impl OrbitRig {
    /// Rigs with different seats start at different points on the circle
    pub fn new(seat: usize) -> Self {
        Self {
            phase: seat as f32 * 0.9,
            radius: 1.5 + seat as f32 * 0.25,
            height: 1.7,
            speed: 0.5,
        }
    }

    pub fn advance(&mut self, dt: f32) {
        self.phase = (self.phase + self.speed * dt) % std::f32::consts::TAU;
    }

    fn position(&self, lateral: f32, drop: f32) -> [f32; 3] {
        let (sin, cos) = self.phase.sin_cos();
        [
            cos * self.radius - sin * lateral,
            self.height - drop,
            sin * self.radius + cos * lateral,
        ]
    }
}

impl PoseSource for OrbitRig {
    fn sample(&self, part: BodyPart) -> Option<DualQuat> {
        let translation = match part {
            BodyPart::Head => self.position(0.0, 0.0),
            BodyPart::RightHand => self.position(0.3, 0.5),
            BodyPart::LeftHand => self.position(-0.3, 0.5),
        };
        Some(DualQuat::from_axis_angle_y(-self.phase, translation))
    }
}

/// What the room looked like when the driver stopped
#[derive(Debug, Clone, Default)]
pub struct RoomSummary {
    pub ticks: u64,
    /// Remote peers the host had avatars for
    pub host_peers: usize,
    /// Remote peers each client had avatars for
    pub client_peers: Vec<usize>,
    pub packages_sent: u64,
    pub rejected_joins: usize,
}

type RoomSession = Session<LoopbackTransport, AvatarSource>;

/// Host a room on an in-process network and let `clients` peers join it.
/// Runs until `max_ticks` (forever when `None`).
pub async fn run_loopback_room(
    config: SessionConfig,
    clients: usize,
    max_ticks: Option<u64>,
    metrics: Arc<SessionMetrics>,
) -> anyhow::Result<RoomSummary> {
    let network = LoopbackNetwork::new();

    let mut host: RoomSession = Session::new_with_metrics(
        config.clone(),
        network.transport(),
        AvatarSource::from_pool_size(config.avatar_pool_size),
        metrics.clone(),
    );
    host.set_local_stream(Some(AudioStream::new(0)));
    host.callbacks_mut().add_client_joined_callback(|peer_id, avatar| {
        info!("{} joined as {}", peer_id, avatar.name);
    });

    host.host();
    host.poll_transport()?;
    if !host.is_host() {
        anyhow::bail!("Could not register host id {}", config.server_id);
    }

    let mut peers: Vec<(RoomSession, OrbitRig)> = Vec::with_capacity(clients);
    for index in 0..clients {
        let mut client_config = config.clone();
        client_config.display_name = format!("{} {}", config.display_name, index + 1);

        let mut client = Session::new(
            client_config,
            network.transport(),
            AvatarSource::from_pool_size(config.avatar_pool_size),
        );
        client.set_local_stream(Some(AudioStream::new(index as u64 + 1)));
        client.join();
        peers.push((client, OrbitRig::new(index + 1)));
    }

    let mut host_rig = OrbitRig::new(0);
    let mut ticker = interval(Duration::from_secs(1) / TICK_RATE);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Room {} running with {} clients at {} Hz", config.server_id, clients, TICK_RATE);
    let mut summary = RoomSummary::default();
    let mut last_tick = Instant::now();

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let dt = (now - last_tick).as_secs_f32();
        last_tick = now;

        match host.poll_transport() {
            Ok(_) => {}
            Err(SessionError::AvatarUnavailable(peer_id)) => {
                warn!("Rejected {}: room is full", peer_id);
                summary.rejected_joins += 1;
            }
            Err(e) => warn!("Host event error: {}", e),
        }
        for (client, _) in peers.iter_mut() {
            if let Err(e) = client.poll_transport() {
                warn!("Client event error: {}", e);
            }
        }

        host_rig.advance(dt);
        host.update(dt, &host_rig);
        for (client, rig) in peers.iter_mut() {
            rig.advance(dt);
            client.update(dt, rig);
        }

        summary.ticks += 1;
        if summary.ticks % (TICK_RATE as u64 * 10) == 0 {
            info!(
                "Room: tick {}, {} peers | sent {} packages, {} bytes",
                summary.ticks,
                host.active_players().len(),
                metrics.packages_sent.load(Ordering::Relaxed),
                metrics.bytes_sent.load(Ordering::Relaxed)
            );
        }

        if max_ticks.is_some_and(|max| summary.ticks >= max) {
            break;
        }
    }

    summary.host_peers = host.active_players().len();
    summary.client_peers = peers
        .iter()
        .map(|(client, _)| client.active_players().len())
        .collect();
    summary.packages_sent = metrics.packages_sent.load(Ordering::Relaxed);

    for (client, _) in peers.iter_mut() {
        client.disconnect();
    }
    host.disconnect();
    debug!("Room {} closed after {} ticks", config.server_id, summary.ticks);

    Ok(summary)
}
