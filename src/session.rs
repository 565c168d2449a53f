use std::time::Duration;

use coap_lite::link_format::LinkFormatParser;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::coap::CoapClient;
use crate::command::{Command, Transport};
use crate::device::{
    Device, GatewayInfo, Group, Light, Mood, SmartTask, ATTR_GATEWAY_INFO, ROOT_DEVICES,
    ROOT_GATEWAY, ROOT_GROUPS, ROOT_MOODS, ROOT_SMART_TASKS,
};
use crate::{Error, Result};

/// What the gateway reported at startup. Never refreshed.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub lights: Vec<Light>,
    pub groups: Vec<Group>,
    pub moods: Vec<Mood>,
    pub tasks: Vec<SmartTask>,
    pub gateway: GatewayInfo,
}

pub struct Session<T> {
    transport: T,
}

impl Session<CoapClient> {
    pub async fn connect(host: &str, identity: &str, key: &str, timeout: Duration) -> Result<Self> {
        let client = CoapClient::connect(host, identity, key.as_bytes(), timeout).await?;
        info!("connected to gateway {} as {}", host, identity);
        Ok(Session::new(client))
    }
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Session { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a command and waits for the gateway to acknowledge it.
    pub async fn dispatch(&self, command: &Command) -> Result<()> {
        debug!("{}", command);
        self.transport.request(command).await?;
        Ok(())
    }

    async fn fetch<D: DeserializeOwned>(&self, command: Command) -> Result<D> {
        debug!("{}", command);
        let payload = self.transport.request(&command).await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    async fn fetch_children<D: DeserializeOwned>(&self, parent: &[String]) -> Result<Vec<D>> {
        let ids: Vec<u64> = self.fetch(Command::get(parent.iter().cloned())).await?;
        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            let path = parent.iter().cloned().chain(Some(id.to_string()));
            children.push(self.fetch(Command::get(path)).await?);
        }
        Ok(children)
    }

    pub async fn get_devices(&self) -> Result<Vec<Device>> {
        self.fetch_children(&[ROOT_DEVICES.to_string()]).await
    }

    pub async fn get_groups(&self) -> Result<Vec<Group>> {
        self.fetch_children(&[ROOT_GROUPS.to_string()]).await
    }

    /// Moods sit below a parent id of their own; only the first parent is read.
    pub async fn get_moods(&self) -> Result<Vec<Mood>> {
        let parents: Vec<u64> = self.fetch(Command::get([ROOT_MOODS])).await?;
        match parents.first() {
            Some(parent) => {
                self.fetch_children(&[ROOT_MOODS.to_string(), parent.to_string()])
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_smart_tasks(&self) -> Result<Vec<SmartTask>> {
        self.fetch_children(&[ROOT_SMART_TASKS.to_string()]).await
    }

    pub async fn get_gateway_info(&self) -> Result<GatewayInfo> {
        self.fetch(Command::get([ROOT_GATEWAY, ATTR_GATEWAY_INFO]))
            .await
    }

    /// Every resource path the gateway advertises, without the leading slash.
    pub async fn get_endpoints(&self) -> Result<Vec<String>> {
        let payload = self
            .transport
            .request(&Command::get([".well-known", "core"]))
            .await?;
        parse_link_format(&String::from_utf8_lossy(&payload))
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let lights: Vec<Light> = self
            .get_devices()
            .await?
            .iter()
            .filter_map(Device::light)
            .collect();
        match lights.first() {
            Some(light) => info!("found {} lights, first is {}", lights.len(), light),
            None => warn!("No lights found!"),
        }

        let groups = self.get_groups().await?;
        match groups.first() {
            Some(group) => info!("found {} groups, first is {}", groups.len(), group.name),
            None => warn!("No groups found!"),
        }

        let moods = self.get_moods().await?;
        match moods.first() {
            Some(mood) => info!("found {} moods, first is {}", moods.len(), mood.name),
            None => warn!("No moods found!"),
        }

        let tasks = self.get_smart_tasks().await?;
        info!("found {} smart tasks", tasks.len());

        let gateway = self.get_gateway_info().await?;
        info!(
            "gateway firmware {}, homekit id {}",
            gateway.firmware_version,
            gateway.homekit_id.as_deref().unwrap_or("none")
        );

        Ok(Snapshot {
            lights,
            groups,
            moods,
            tasks,
            gateway,
        })
    }

    /// Reads every advertised endpoint whose path is made of numeric ids.
    pub async fn dump_all(&self) -> Result<Vec<(String, Value)>> {
        let mut dumped = Vec::new();
        for endpoint in self.get_endpoints().await? {
            let parts: Vec<&str> = endpoint.split('/').collect();
            if !parts
                .iter()
                .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
            {
                continue;
            }
            let value = self.fetch(Command::get(parts)).await?;
            dumped.push((endpoint, value));
        }
        Ok(dumped)
    }
}

/// Pulls the paths out of a CoRE link-format listing such as
/// `</15001/65536>;ct=0;obs,</15001>;ct=0`.
fn parse_link_format(links: &str) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for link in LinkFormatParser::new(links) {
        let (path, _attributes) =
            link.map_err(|e| Error::Coap(format!("bad link format listing: {:?}", e)))?;
        let path = path.trim_start_matches('/');
        if !path.is_empty() {
            paths.push(path.to_string());
        }
    }
    Ok(paths)
}
