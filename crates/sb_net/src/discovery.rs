//! mDNS service discovery.
//!
//! Every advertisement uses a service type of the form
//! `_shadowbox<CODE>._tcp.local.` where `CODE` is a random 4-letter
//! uppercase string (26^4 values). The code makes concurrent
//! advertisements unique; for private boxes it doubles as the shared
//! secret behind the AUTH frame.
//!
//! TXT records carry `box_id`, `owner`, `name` and `public` so browsers can
//! render a listing without opening a connection.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::NetError;

pub const SERVICE_PREFIX: &str = "_shadowbox";
pub const CODE_LEN: usize = 4;
/// Default single-shot resolve timeout.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

const META_SERVICE: &str = "_services._dns-sd._udp.local.";

/// `_shadowboxQWER._tcp.local.`
pub fn service_type(code: &str) -> String {
    format!("{SERVICE_PREFIX}{code}._tcp.local.")
}

/// Extract the code back out of a service type, if it is one of ours.
pub fn code_from_type(ty: &str) -> Option<String> {
    let rest = ty.strip_prefix(SERVICE_PREFIX)?;
    let code = rest.strip_suffix("._tcp.local.")?;
    if code.len() == CODE_LEN && code.chars().all(|c| c.is_ascii_uppercase()) {
        Some(code.to_string())
    } else {
        None
    }
}

/// Random 4-letter uppercase code.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| rng.gen_range(b'A'..=b'Z') as char)
        .collect()
}

/// Draw codes until one misses the in-use set.
fn next_free_code(in_use: &HashSet<String>) -> String {
    loop {
        let code = generate_code();
        if !in_use.contains(&code) {
            return code;
        }
    }
}

/// What an advertisement looks like to a browser.
#[derive(Debug, Clone)]
pub struct ShareInfo {
    pub code: String,
    pub box_id: Option<Uuid>,
    pub owner: String,
    pub name: String,
    pub is_public: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Added(ShareInfo),
    Updated(ShareInfo),
    Removed(String),
}

/// Process-wide discovery handle. Lifecycle:
/// `start → (advertise | browse | resolve)* → stop`.
pub struct Discovery {
    daemon: ServiceDaemon,
    /// code → registered fullname.
    advertised: Mutex<HashMap<String, String>>,
}

impl Discovery {
    pub fn start() -> Result<Self, NetError> {
        let daemon = ServiceDaemon::new().map_err(|e| NetError::Discovery(e.to_string()))?;
        Ok(Self {
            daemon,
            advertised: Mutex::new(HashMap::new()),
        })
    }

    /// Reserve a code that no active local advertisement uses. The entry is
    /// held (with an empty fullname) until `publish` or `withdraw`.
    pub async fn reserve_code(&self) -> String {
        let mut guard = self.advertised.lock().await;
        let in_use: HashSet<String> = guard.keys().cloned().collect();
        let code = next_free_code(&in_use);
        guard.insert(code.clone(), String::new());
        code
    }

    /// Publish an advertisement under a previously reserved code.
    pub async fn publish(
        &self,
        code: &str,
        box_id: Uuid,
        owner: &str,
        name: &str,
        port: u16,
        public: bool,
    ) -> Result<(), NetError> {
        let ty = service_type(code);
        let instance = format!("shadowbox-{code}");
        let host = format!("{instance}.local.");
        let box_id = box_id.to_string();
        let props = [
            ("box_id", box_id.as_str()),
            ("owner", owner),
            ("name", name),
            ("public", if public { "1" } else { "0" }),
        ];

        let info = ServiceInfo::new(&ty, &instance, &host, "", port, &props[..])
            .map_err(|e| NetError::Discovery(e.to_string()))?
            .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        self.daemon
            .register(info)
            .map_err(|e| NetError::Discovery(e.to_string()))?;

        self.advertised
            .lock()
            .await
            .insert(code.to_string(), fullname);
        tracing::info!(code, port, public, "advertisement published");
        Ok(())
    }

    /// Withdraw one advertisement (or release a reservation that never
    /// published).
    pub async fn withdraw(&self, code: &str) -> Result<(), NetError> {
        let fullname = self.advertised.lock().await.remove(code);
        match fullname {
            Some(fullname) if !fullname.is_empty() => {
                self.daemon
                    .unregister(&fullname)
                    .map_err(|e| NetError::Discovery(e.to_string()))?;
                tracing::info!(code, "advertisement withdrawn");
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(NetError::NotFound(format!("advertisement {code}"))),
        }
    }

    /// Single-shot lookup of one code with a bounded timeout.
    pub async fn resolve(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<(SocketAddr, ShareInfo), NetError> {
        let ty = service_type(code);
        let rx = self
            .daemon
            .browse(&ty)
            .map_err(|e| NetError::Discovery(e.to_string()))?;

        let result = tokio::time::timeout(timeout, async {
            loop {
                match rx.recv_async().await {
                    Ok(ServiceEvent::ServiceResolved(info)) => return Ok(info),
                    Ok(_) => continue,
                    Err(e) => return Err(NetError::Discovery(e.to_string())),
                }
            }
        })
        .await;
        let _ = self.daemon.stop_browse(&ty);

        let info = match result {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(NetError::NotFound(format!("code {code}"))),
        };

        let share = share_info_from(&info, code);
        let addr = info
            .get_addresses()
            .iter()
            .next()
            .copied()
            .ok_or_else(|| NetError::Discovery(format!("service {code} has no address")))?;
        Ok((SocketAddr::new(addr, info.get_port()), share))
    }

    /// Continuous browse of every ShadowBox advertisement on the LAN.
    ///
    /// Uses the `_services._dns-sd._udp` meta-query to learn service types,
    /// then browses each matching type. Events stop when the returned
    /// receiver is dropped or the daemon shuts down.
    pub fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, NetError> {
        let meta_rx = self
            .daemon
            .browse(META_SERVICE)
            .map_err(|e| NetError::Discovery(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let daemon = self.daemon.clone();

        tokio::spawn(async move {
            let mut browsed: HashSet<String> = HashSet::new();
            loop {
                let event = match meta_rx.recv_async().await {
                    Ok(event) => event,
                    Err(_) => break, // daemon gone
                };
                if tx.is_closed() {
                    break;
                }
                if let ServiceEvent::ServiceFound(_, ty) = event {
                    let Some(code) = code_from_type(&ty) else {
                        continue;
                    };
                    if !browsed.insert(ty.clone()) {
                        continue;
                    }
                    let Ok(sub_rx) = daemon.browse(&ty) else {
                        continue;
                    };
                    tokio::spawn(bridge_type(sub_rx, code, tx.clone()));
                }
            }
        });
        Ok(rx)
    }

    /// Withdraw everything and shut the daemon down.
    pub async fn stop(&self) {
        let codes: Vec<String> = self.advertised.lock().await.keys().cloned().collect();
        for code in codes {
            let _ = self.withdraw(&code).await;
        }
        let _ = self.daemon.shutdown();
    }
}

/// Forward one service type's events into the shared browse channel.
async fn bridge_type(
    rx: mdns_sd::Receiver<ServiceEvent>,
    code: String,
    tx: mpsc::Sender<DiscoveryEvent>,
) {
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        let event = match rx.recv_async().await {
            Ok(event) => event,
            Err(_) => break,
        };
        let out = match event {
            ServiceEvent::ServiceResolved(info) => {
                let share = share_info_from(&info, &code);
                if seen.insert(info.get_fullname().to_string()) {
                    DiscoveryEvent::Added(share)
                } else {
                    DiscoveryEvent::Updated(share)
                }
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                seen.remove(&fullname);
                DiscoveryEvent::Removed(code.clone())
            }
            _ => continue,
        };
        if tx.send(out).await.is_err() {
            break;
        }
    }
}

fn share_info_from(info: &ServiceInfo, code: &str) -> ShareInfo {
    let txt = |key: &str| {
        info.get_property_val_str(key)
            .map(str::to_string)
            .unwrap_or_default()
    };
    ShareInfo {
        code: code.to_string(),
        box_id: Uuid::parse_str(&txt("box_id")).ok(),
        owner: txt("owner"),
        name: txt("name"),
        is_public: txt("public") == "1",
        port: info.get_port(),
    }
}
