//! Finding a host on the local network.
//!
//! [`Discovery`] runs a fixed number of observation cycles over one or more
//! [`Browser`]s and returns the first usable endpoint. Each cycle browses for
//! one interval and then pauses for another, so three 1.5 s cycles take 9 s.
//! Starting a new run cancels the one in progress.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use caramel_core::{CaramelError, Result, TransportFaultKind, DEFAULT_PORT, SERVICE_TYPE};
use caramel_settings::DiscoverySettings;

const LEGACY_QUERY: &[u8] = b"caramel?";

/// Address data pulled out of one resolved service record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub ip: Option<String>,
    pub port: Option<String>,
}

impl ServiceRecord {
    /// TXT properties win; the record's own address and port fill gaps.
    pub fn from_info(info: &ServiceInfo) -> Self {
        let ip = info
            .get_property_val_str("ip")
            .map(str::to_string)
            .or_else(|| info.get_addresses().iter().next().map(|a| a.to_string()));
        let port = info
            .get_property_val_str("port")
            .map(str::to_string)
            .or_else(|| Some(info.get_port().to_string()));
        Self { ip, port }
    }

    /// Usable only when the address parses and the port is non-zero.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.ip.as_deref()?.trim().parse().ok()?;
        let port: u16 = self.port.as_deref()?.trim().parse().ok()?;
        (port != 0).then(|| SocketAddr::new(ip, port))
    }
}

/// One way of looking for a host.
#[async_trait]
pub trait Browser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Observe for up to `window`; the first usable endpoint ends the cycle.
    async fn observe(&self, window: Duration, cancel: &CancellationToken)
        -> Result<Option<SocketAddr>>;
}

/// DNS-SD browse for the service type.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| CaramelError::TransportFault {
            kind: TransportFaultKind::Init,
            message: format!("mdns: {e}"),
        })?;
        Ok(Self { daemon })
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}

#[async_trait]
impl Browser for MdnsBrowser {
    fn name(&self) -> &'static str {
        "mdns"
    }

    async fn observe(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<SocketAddr>> {
        let events = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| CaramelError::TransportFault {
                kind: TransportFaultKind::Init,
                message: format!("mdns browse: {e}"),
            })?;
        let deadline = tokio::time::Instant::now() + window;

        let found = loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break None,
                r = tokio::time::timeout_at(deadline, events.recv_async()) => r,
            };
            match event {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    let record = ServiceRecord::from_info(&info);
                    match record.endpoint() {
                        Some(endpoint) => break Some(endpoint),
                        None => debug!(service = info.get_fullname(), ?record, "unusable record"),
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => break None,
            }
        };

        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            debug!(error = %e, "stop browse failed");
        }
        Ok(found)
    }
}

/// Legacy UDP query: any host listening answers with its address as text.
pub struct BroadcastBrowser {
    target: SocketAddr,
    service_port: u16,
}

impl BroadcastBrowser {
    /// Broadcast to the whole subnet on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port),
            service_port: port,
        }
    }

    /// Query a specific responder; the answer is paired with `service_port`.
    pub fn with_target(target: SocketAddr, service_port: u16) -> Self {
        Self {
            target,
            service_port,
        }
    }
}

#[async_trait]
impl Browser for BroadcastBrowser {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn observe(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<SocketAddr>> {
        let io_err = |e: std::io::Error| CaramelError::TransportFault {
            kind: TransportFaultKind::Init,
            message: format!("legacy query: {e}"),
        };
        let bind_ip = if self.target.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0))
            .await
            .map_err(io_err)?;
        socket.set_broadcast(true).map_err(io_err)?;
        socket.send_to(LEGACY_QUERY, self.target).await.map_err(io_err)?;

        let deadline = tokio::time::Instant::now() + window;
        let mut buf = [0u8; 128];
        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => return Ok(None),
                r = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)) => r,
            };
            match received {
                Ok(Ok((n, peer))) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    match text.trim().parse::<IpAddr>() {
                        Ok(ip) => return Ok(Some(SocketAddr::new(ip, self.service_port))),
                        Err(_) => debug!(%peer, answer = %text, "ignoring unparsable answer"),
                    }
                }
                Ok(Err(e)) => return Err(io_err(e)),
                Err(_) => return Ok(None),
            }
        }
    }
}

/// Runs observation cycles over the configured browsers.
pub struct Discovery {
    browsers: Vec<Arc<dyn Browser>>,
    cycles: u32,
    interval: Duration,
    active: Mutex<Option<(u64, CancellationToken)>>,
    runs: AtomicU64,
}

impl Discovery {
    pub fn new(browsers: Vec<Arc<dyn Browser>>, cycles: u32, interval: Duration) -> Self {
        Self {
            browsers,
            cycles: cycles.max(1),
            interval,
            active: Mutex::new(None),
            runs: AtomicU64::new(0),
        }
    }

    /// mDNS, plus the legacy query when enabled.
    pub fn from_settings(settings: &DiscoverySettings, service_port: u16) -> Result<Self> {
        let mut browsers: Vec<Arc<dyn Browser>> = vec![Arc::new(MdnsBrowser::new()?)];
        if settings.legacy_broadcast {
            let port = if service_port == 0 { DEFAULT_PORT } else { service_port };
            browsers.push(Arc::new(BroadcastBrowser::new(port)));
        }
        Ok(Self::new(browsers, settings.cycles, settings.cycle_interval()))
    }

    /// Worst-case time a run takes before giving up.
    pub fn budget(&self) -> Duration {
        self.interval * 2 * self.cycles
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Stop the run in progress, if any.
    pub fn cancel(&self) {
        if let Some((_, token)) = self.active.lock().take() {
            token.cancel();
        }
    }

    /// Look for a host. Cancels an earlier run that is still going.
    pub async fn run(&self) -> Result<SocketAddr> {
        let run_id = self.runs.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.active.lock().replace((run_id, token.clone())) {
            debug!("cancelling previous discovery run");
            previous.cancel();
        }

        let result = self.cycles_until_found(&token).await;

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|(id, _)| *id == run_id) {
            *active = None;
        }
        result
    }

    async fn cycles_until_found(&self, token: &CancellationToken) -> Result<SocketAddr> {
        for cycle in 1..=self.cycles {
            for browser in &self.browsers {
                if token.is_cancelled() {
                    return Err(CaramelError::Cancelled);
                }
                match browser.observe(self.interval, token).await {
                    Ok(Some(endpoint)) => {
                        info!(%endpoint, browser = browser.name(), cycle, "host found");
                        return Ok(endpoint);
                    }
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, browser = browser.name(), "browse failed"),
                }
            }
            debug!(cycle, "no host yet");
            tokio::select! {
                () = token.cancelled() => return Err(CaramelError::Cancelled),
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        if token.is_cancelled() {
            return Err(CaramelError::Cancelled);
        }
        Err(CaramelError::DiscoveryNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Answers on a given cycle, otherwise waits out the window.
    struct Scripted {
        calls: AtomicU32,
        answer_on: Option<u32>,
        endpoint: SocketAddr,
    }

    #[async_trait]
    impl Browser for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn observe(
            &self,
            window: Duration,
            cancel: &CancellationToken,
        ) -> Result<Option<SocketAddr>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(call) == self.answer_on {
                return Ok(Some(self.endpoint));
            }
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(window) => {}
            }
            Ok(None)
        }
    }

    fn scripted(answer_on: Option<u32>) -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: AtomicU32::new(0),
            answer_on,
            endpoint: "192.168.1.20:8649".parse().unwrap(),
        })
    }

    #[test]
    fn record_needs_ip_and_nonzero_port() {
        let ok = ServiceRecord {
            ip: Some("192.168.1.20".into()),
            port: Some("8649".into()),
        };
        assert_eq!(ok.endpoint(), Some("192.168.1.20:8649".parse().unwrap()));

        let zero = ServiceRecord {
            port: Some("0".into()),
            ..ok.clone()
        };
        assert_eq!(zero.endpoint(), None);

        let bad_ip = ServiceRecord {
            ip: Some("phone.local".into()),
            ..ok.clone()
        };
        assert_eq!(bad_ip.endpoint(), None);

        assert_eq!(ServiceRecord::default().endpoint(), None);
    }

    #[test]
    fn record_accepts_ipv6() {
        let record = ServiceRecord {
            ip: Some("fe80::1".into()),
            port: Some("8649".into()),
        };
        assert!(record.endpoint().unwrap().is_ipv6());
    }

    #[tokio::test(start_paused = true)]
    async fn found_on_second_cycle() {
        let browser = scripted(Some(2));
        let browsers: Vec<Arc<dyn Browser>> = vec![browser.clone()];
        let discovery = Discovery::new(browsers, 3, Duration::from_millis(1500));
        let endpoint = discovery.run().await.unwrap();
        assert_eq!(endpoint.port(), 8649);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 2);
        assert!(!discovery.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_cycles() {
        let browser = scripted(None);
        let browsers: Vec<Arc<dyn Browser>> = vec![browser.clone()];
        let discovery = Discovery::new(browsers, 3, Duration::from_millis(1500));
        let started = tokio::time::Instant::now();
        let err = discovery.run().await.unwrap_err();
        assert!(matches!(err, CaramelError::DiscoveryNotFound));
        assert_eq!(browser.calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(9_000));
        assert!(elapsed < Duration::from_millis(9_100));
        assert_eq!(discovery.budget(), Duration::from_secs(9));
    }

    #[test]
    fn default_settings_budget_is_nine_seconds() {
        let settings = DiscoverySettings::default();
        let discovery = Discovery::new(Vec::new(), settings.cycles, settings.cycle_interval());
        assert_eq!(discovery.budget(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn new_run_cancels_the_active_one() {
        let discovery = Arc::new(Discovery::new(
            vec![scripted(None) as Arc<dyn Browser>],
            3,
            Duration::from_millis(1500),
        ));
        let first = {
            let discovery = Arc::clone(&discovery);
            tokio::spawn(async move { discovery.run().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(discovery.is_running());

        let second = {
            let discovery = Arc::clone(&discovery);
            tokio::spawn(async move { discovery.run().await })
        };
        let first = first.await.unwrap();
        assert!(matches!(first, Err(CaramelError::Cancelled)));
        assert!(matches!(
            second.await.unwrap(),
            Err(CaramelError::DiscoveryNotFound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_stops_the_run() {
        let discovery = Arc::new(Discovery::new(
            vec![scripted(None) as Arc<dyn Browser>],
            3,
            Duration::from_millis(1500),
        ));
        let run = {
            let discovery = Arc::clone(&discovery);
            tokio::spawn(async move { discovery.run().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        discovery.cancel();
        assert!(matches!(run.await.unwrap(), Err(CaramelError::Cancelled)));
        assert!(!discovery.is_running());
    }
}
