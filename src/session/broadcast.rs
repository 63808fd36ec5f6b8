//! Outbound batching
//!
//! Everything queued between flushes is merged into one package. The client
//! sends that package to the host; the host fans it out, leaving each
//! recipient's own entry out of its copy.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, warn};

use super::{deliver, Role, Session, SessionError};
use crate::avatar::AvatarAllocator;
use crate::net::protocol::{DataPackage, PlayerTransforms};
use crate::net::transport::Transport;
use crate::util::dual_quat::DualQuat;

/// Tracked body parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPart {
    Head,
    RightHand,
    LeftHand,
}

impl BodyPart {
    pub const ALL: [BodyPart; 3] = [BodyPart::Head, BodyPart::RightHand, BodyPart::LeftHand];
}

/// Where the local pose comes from (scene, tracker, test fixture)
pub trait PoseSource {
    /// Current pose of `part`; `None` keeps the last sampled value
    fn sample(&self, part: BodyPart) -> Option<DualQuat>;
}

impl PoseSource for PlayerTransforms {
    fn sample(&self, part: BodyPart) -> Option<DualQuat> {
        Some(match part {
            BodyPart::Head => self.head,
            BodyPart::RightHand => self.right_hand,
            BodyPart::LeftHand => self.left_hand,
        })
    }
}

impl<T: Transport, A: AvatarAllocator> Session<T, A> {
    /// Per-tick driver. Runs due staggered calls, then flushes once the
    /// send interval has elapsed. Returns the number of packages sent.
    pub fn update(&mut self, dt: f32, rig: &impl PoseSource) -> usize {
        self.run_due_calls(dt);

        if !self.has_send_target() {
            return 0;
        }

        if dt.is_finite() && dt > 0.0 {
            self.elapsed += dt;
        }
        if self.elapsed < self.config.send_interval_secs {
            return 0;
        }
        self.elapsed = 0.0;

        let started = Instant::now();
        self.sample_pose(rig);
        let sent = self.flush();
        self.metrics.record_flush_time(started.elapsed());
        sent
    }

    /// Time accumulated towards the next flush
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    fn has_send_target(&self) -> bool {
        match &self.role {
            Role::Hosting { connections } => !connections.is_empty(),
            Role::Connected { .. } => true,
            _ => false,
        }
    }

    fn sample_pose(&mut self, rig: &impl PoseSource) {
        for part in BodyPart::ALL {
            if let Some(pose) = rig.sample(part) {
                match part {
                    BodyPart::Head => self.local_pose.head = pose,
                    BodyPart::RightHand => self.local_pose.right_hand = pose,
                    BodyPart::LeftHand => self.local_pose.left_hand = pose,
                }
            }
        }
    }

    fn flush(&mut self) -> usize {
        match &mut self.role {
            Role::Connected { connection } => {
                if let Err(e) = self.package.set_transforms(&self.local_pose) {
                    warn!("Failed to queue local pose: {}", e);
                }
                let package = self.package.take();
                match package.encode() {
                    Ok(bytes) => deliver(&mut self.transport, &self.metrics, connection, bytes) as usize,
                    Err(e) => {
                        warn!("Failed to encode package for host: {}", e);
                        0
                    }
                }
            }
            Role::Hosting { connections } => {
                let Some(local_id) = self.identity.as_ref().and_then(|i| i.local_id.clone()) else {
                    return 0;
                };

                let mut own = DataPackage::new();
                match own.set_transforms(&self.local_pose) {
                    Ok(()) => {
                        self.package.insert_value(local_id.to_string(), own.into_value());
                    }
                    Err(e) => warn!("Failed to queue local pose: {}", e),
                }

                let mut sent = 0;
                for connection in connections.iter_mut().filter(|c| c.is_open()) {
                    let filtered = self.package.without(connection.peer_id.as_str());
                    if filtered.is_empty() {
                        continue;
                    }
                    match filtered.encode() {
                        Ok(bytes) => {
                            if deliver(&mut self.transport, &self.metrics, connection, bytes) {
                                sent += 1;
                            }
                        }
                        Err(e) => warn!("Failed to encode package for {}: {}", connection.peer_id, e),
                    }
                }

                self.package.clear();
                debug!("Flushed to {} peers", sent);
                sent
            }
            _ => 0,
        }
    }

    /// Queue `data` under `key` for the next flush, replacing any earlier
    /// value under the same key
    pub fn send_package<S: Serialize + ?Sized>(&mut self, key: &str, data: &S) -> Result<(), SessionError> {
        self.package.insert(key, data)?;
        Ok(())
    }

    /// Send `{key: data}` to every open connection right away, bypassing
    /// the batch. Returns the number of packages sent.
    pub fn send_package_immediately<S: Serialize + ?Sized>(
        &mut self,
        key: &str,
        data: &S,
    ) -> Result<usize, SessionError> {
        let bytes = DataPackage::single(key, data)?.encode()?;

        let sent = match &mut self.role {
            Role::Connected { connection } => {
                deliver(&mut self.transport, &self.metrics, connection, bytes) as usize
            }
            Role::Hosting { connections } => {
                let mut sent = 0;
                for connection in connections.iter_mut().filter(|c| c.is_open()) {
                    if deliver(&mut self.transport, &self.metrics, connection, bytes.clone()) {
                        sent += 1;
                    }
                }
                sent
            }
            _ => {
                debug!("Nothing connected, dropping immediate package {}", key);
                0
            }
        };
        Ok(sent)
    }
}
