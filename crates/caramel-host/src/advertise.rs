//! Making the host findable: a DNS-SD record and the optional legacy UDP
//! responder.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use caramel_core::{CaramelError, Result, TransportFaultKind, SERVICE_TYPE};

const MDNS_HOST_NAME: &str = "caramel-host.local.";

fn mdns_error(e: mdns_sd::Error) -> CaramelError {
    CaramelError::TransportFault {
        kind: TransportFaultKind::Init,
        message: format!("mdns: {e}"),
    }
}

/// Best guess at the LAN address other devices can reach. Connecting a UDP
/// socket sends nothing but selects the outbound interface.
pub fn detect_local_ip() -> IpAddr {
    let local = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|s| s.connect((Ipv4Addr::new(192, 168, 0, 1), 9)).map(|_| s))
        .and_then(|s| s.local_addr());
    match local {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

/// The address to publish: explicit setting, then a concrete bind address,
/// then detection.
pub fn advertised_ip(configured: Option<&str>, bind: &str) -> IpAddr {
    if let Some(raw) = configured {
        match raw.parse::<IpAddr>() {
            Ok(ip) => return ip,
            Err(_) => warn!(value = raw, "ignoring unparsable advertised address"),
        }
    }
    match bind.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => detect_local_ip(),
    }
}

/// Build the DNS-SD record. The address and port are also carried as TXT
/// properties for browsers that do not resolve A records.
pub fn service_record(instance: &str, ip: IpAddr, port: u16) -> Result<ServiceInfo> {
    let mut props = HashMap::new();
    props.insert("ip".to_string(), ip.to_string());
    props.insert("port".to_string(), port.to_string());
    ServiceInfo::new(
        SERVICE_TYPE,
        instance,
        MDNS_HOST_NAME,
        ip.to_string().as_str(),
        port,
        props,
    )
    .map_err(mdns_error)
}

/// Publishes one service record on the local network.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: Option<String>,
}

impl MdnsAdvertiser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new().map_err(mdns_error)?,
            fullname: None,
        })
    }

    /// Publish a record, replacing any earlier one.
    pub fn advertise(&mut self, instance: &str, ip: IpAddr, port: u16) -> Result<()> {
        self.withdraw();
        let record = service_record(instance, ip, port)?;
        let fullname = record.get_fullname().to_string();
        self.daemon.register(record).map_err(mdns_error)?;
        info!(service = %fullname, %ip, port, "advertising tracking service");
        self.fullname = Some(fullname);
        Ok(())
    }

    pub fn fullname(&self) -> Option<&str> {
        self.fullname.as_deref()
    }

    pub fn withdraw(&mut self) {
        if let Some(fullname) = self.fullname.take() {
            if let Err(e) = self.daemon.unregister(&fullname) {
                debug!(error = %e, service = %fullname, "unregister failed");
            }
        }
    }

    pub fn shutdown(self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mdns daemon shutdown failed");
        }
    }
}

/// Answers UDP discovery queries with the host's address as ASCII text.
pub struct LegacyResponder {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LegacyResponder {
    pub async fn start(bind: &str, port: u16, answer: IpAddr, delay: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(format!("{bind}:{port}"))
            .await
            .map_err(|e| CaramelError::from_bind(&e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| CaramelError::from_bind(&e))?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let reply = answer.to_string();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let received = tokio::select! {
                    () = token.cancelled() => break,
                    r = socket.recv_from(&mut buf) => r,
                };
                let peer = match received {
                    Ok((_, peer)) => peer,
                    Err(e) => {
                        debug!(error = %e, "legacy discovery receive failed");
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                    debug!(error = %e, %peer, "legacy discovery reply failed");
                    continue;
                }
                debug!(%peer, "answered legacy discovery query");
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        });

        info!(%local_addr, "legacy discovery responder listening");
        Ok(Self {
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LegacyResponder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
