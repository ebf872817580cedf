//! Thin one-request BMC operation wrappers.
//!
//! Power, USB routing, UART and cooling are each a single dispatcher
//! round-trip with no retry or state-machine logic; the flash pipeline in
//! `bmckit-flash` is the stateful counterpart. Node numbers are 1-based
//! here and converted to the BMC's 0-based indexing on the wire.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{BmcClient, BmcRequest, BmcResponse, ClientError};

/// USB routing mode for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbMode {
    /// Node is USB host; devices attach to the board's USB-A port.
    Host,
    /// Node is USB device; the BMC or USB-A port is host.
    Device,
    /// Flashing mode: node reboots with USB_OTG in device mode.
    Flash,
}

impl UsbMode {
    fn wire_value(self, route_to_bmc: bool) -> u8 {
        let base = match self {
            UsbMode::Host => 0,
            UsbMode::Device => 1,
            UsbMode::Flash => 2,
        };
        if route_to_bmc { base | (1 << 2) } else { base }
    }
}

/// Current USB configuration as reported by the BMC.
#[derive(Debug, Clone)]
pub struct UsbStatus {
    pub node: String,
    pub mode: String,
    pub route: String,
}

/// A cooling device (fan) and its current speed.
#[derive(Debug, Clone)]
pub struct CoolingDevice {
    pub name: String,
    pub speed: u32,
    pub max_speed: u32,
}

/// Validates a 1-based node number and returns the 0-based wire index.
pub fn node_index(node: u8) -> Result<u8, ClientError> {
    if (1..=4).contains(&node) {
        Ok(node - 1)
    } else {
        Err(ClientError::InvalidNode(node))
    }
}

impl BmcClient {
    /// Returns per-node power state (`node`, `on`), sorted by node.
    pub async fn power_status(&self) -> Result<Vec<(u8, bool)>, ClientError> {
        let resp = self
            .send(&BmcRequest::api().query("opt", "get").query("type", "power"))
            .await?;
        let result = extract_result_object(&resp)?;

        let mut status = Vec::new();
        for (key, value) in &result {
            let Some(num) = key.strip_prefix("node").and_then(|n| n.parse::<u8>().ok())
            else {
                continue;
            };
            let on = match value {
                Value::Number(n) => n.as_f64().unwrap_or(0.0) > 0.0,
                Value::String(s) => s == "1" || s.eq_ignore_ascii_case("on"),
                _ => false,
            };
            status.push((num, on));
        }
        status.sort_unstable();
        Ok(status)
    }

    /// Powers a single node on.
    pub async fn power_on(&self, node: u8) -> Result<(), ClientError> {
        self.set_power(node, true).await
    }

    /// Powers a single node off.
    pub async fn power_off(&self, node: u8) -> Result<(), ClientError> {
        self.set_power(node, false).await
    }

    async fn set_power(&self, node: u8, on: bool) -> Result<(), ClientError> {
        node_index(node)?;
        let state = if on { "1" } else { "0" };
        let resp = self
            .send(
                &BmcRequest::api()
                    .query("opt", "set")
                    .query("type", "power")
                    .query(format!("node{node}"), state),
            )
            .await?;
        check_response(&resp)
    }

    /// Powers every node on or off at once.
    pub async fn power_all(&self, on: bool) -> Result<(), ClientError> {
        let state = if on { "1" } else { "0" };
        let mut req = BmcRequest::api().query("opt", "set").query("type", "power");
        for node in 1..=4u8 {
            req = req.query(format!("node{node}"), state);
        }
        let resp = self.send(&req).await?;
        check_response(&resp)
    }

    /// Resets (power-cycles) a node.
    pub async fn reset_node(&self, node: u8) -> Result<(), ClientError> {
        let index = node_index(node)?;
        let resp = self
            .send(
                &BmcRequest::api()
                    .query("opt", "set")
                    .query("type", "reset")
                    .query("node", index.to_string()),
            )
            .await?;
        check_response(&resp)
    }

    /// Returns the current USB configuration.
    pub async fn usb_status(&self) -> Result<UsbStatus, ClientError> {
        let resp = self
            .send(&BmcRequest::api().query("opt", "get").query("type", "usb"))
            .await?;
        let result = extract_result_object(&resp)?;

        let field = |name: &str| -> Result<String, ClientError> {
            result
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ClientError::Protocol(format!("missing {name} in USB status")))
        };

        Ok(UsbStatus {
            node: field("node")?,
            mode: field("mode")?,
            route: field("route")?,
        })
    }

    /// Sets a node's USB mode; `route_to_bmc` routes the bus to the BMC
    /// instead of the USB-A port.
    pub async fn set_usb_mode(
        &self,
        node: u8,
        mode: UsbMode,
        route_to_bmc: bool,
    ) -> Result<(), ClientError> {
        let index = node_index(node)?;
        let resp = self
            .send(
                &BmcRequest::api()
                    .query("opt", "set")
                    .query("type", "usb")
                    .query("node", index.to_string())
                    .query("mode", mode.wire_value(route_to_bmc).to_string()),
            )
            .await?;
        check_response(&resp)
    }

    /// Reads buffered UART output from a node.
    pub async fn uart_read(&self, node: u8) -> Result<String, ClientError> {
        let index = node_index(node)?;
        let resp = self
            .send(
                &BmcRequest::api()
                    .query("opt", "get")
                    .query("type", "uart")
                    .query("node", index.to_string()),
            )
            .await?;
        if !resp.is_success() {
            return Err(api_error(&resp));
        }

        let body: Value = resp.json()?;
        let Some(entries) = body.get("response").and_then(Value::as_array) else {
            return Err(ClientError::Protocol("missing response array".into()));
        };
        match entries.first() {
            None => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Object(obj)) if obj.get("output").and_then(Value::as_str).is_some() => {
                Ok(obj["output"].as_str().unwrap_or_default().to_string())
            }
            // Unknown shape: hand back the raw JSON rather than guessing.
            Some(_) => Ok(serde_json::to_string(entries)?),
        }
    }

    /// Writes a command line to a node's UART.
    pub async fn uart_write(&self, node: u8, command: &str) -> Result<(), ClientError> {
        let index = node_index(node)?;
        let resp = self
            .send(
                &BmcRequest::api()
                    .query("opt", "set")
                    .query("type", "uart")
                    .query("node", index.to_string())
                    .query("cmd", command),
            )
            .await?;
        check_response(&resp)
    }

    /// Returns every cooling device and its current/maximum speed.
    pub async fn cooling_status(&self) -> Result<Vec<CoolingDevice>, ClientError> {
        let resp = self
            .send(&BmcRequest::api().query("opt", "get").query("type", "cooling"))
            .await?;
        if !resp.is_success() {
            return Err(api_error(&resp));
        }

        let body: Value = resp.json()?;
        let entries = body
            .get("response")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut devices = Vec::new();
        for item in &entries {
            let Some(name) = item.get("name").and_then(Value::as_str) else {
                continue;
            };
            devices.push(CoolingDevice {
                name: name.to_string(),
                speed: item.get("speed").and_then(Value::as_u64).unwrap_or(0) as u32,
                max_speed: item.get("max_speed").and_then(Value::as_u64).unwrap_or(0) as u32,
            });
        }
        Ok(devices)
    }

    /// Sets a cooling device's speed.
    pub async fn set_cooling_speed(&self, device: &str, speed: u32) -> Result<(), ClientError> {
        let resp = self
            .send(
                &BmcRequest::api()
                    .query("opt", "set")
                    .query("type", "cooling")
                    .query("name", device)
                    .query("speed", speed.to_string()),
            )
            .await?;
        check_response(&resp)
    }

    /// Returns basic board information (IP, MAC, version and the like).
    pub async fn info(&self) -> Result<BTreeMap<String, String>, ClientError> {
        self.string_map(BmcRequest::api().query("opt", "get").query("type", "other"))
            .await
    }

    /// Returns details about the BMC daemon itself.
    pub async fn about(&self) -> Result<BTreeMap<String, String>, ClientError> {
        self.string_map(BmcRequest::api().query("opt", "get").query("type", "about"))
            .await
    }

    async fn string_map(&self, req: BmcRequest) -> Result<BTreeMap<String, String>, ClientError> {
        let resp = self.send(&req).await?;
        let result = extract_result_object(&resp)?;
        // Non-string values are dropped; the BMC reports these as strings.
        Ok(result
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect())
    }

    /// Reboots the BMC itself. Nodes lose power until it is back up.
    pub async fn reboot_bmc(&self) -> Result<(), ClientError> {
        let resp = self
            .send(&BmcRequest::api().query("opt", "set").query("type", "reboot"))
            .await?;
        check_response(&resp)
    }
}

/// Extracts the result object from the envelope shapes the BMC emits:
/// `{"result": {...}}`, `{"response": [{"result": [{...}]}]}`, or (for the
/// about endpoint) `{"response": [{"result": {...}}]}`.
fn extract_result_object(
    resp: &BmcResponse,
) -> Result<serde_json::Map<String, Value>, ClientError> {
    if !resp.is_success() {
        return Err(api_error(resp));
    }
    let body: Value = resp.json()?;

    if let Some(result) = body.get("result").and_then(Value::as_object)
        && !result.is_empty()
    {
        return Ok(result.clone());
    }

    if let Some(result) = body
        .get("response")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .and_then(|entry| entry.get("result"))
    {
        if let Some(obj) = result.as_object() {
            return Ok(obj.clone());
        }
        if let Some(obj) = result.as_array().and_then(|r| r.first()).and_then(Value::as_object) {
            return Ok(obj.clone());
        }
    }

    Err(ClientError::Protocol(format!(
        "could not extract result from response: {}",
        resp.text()
    )))
}

/// Fails on non-200 or on an `error` field in an otherwise OK body.
pub fn check_response(resp: &BmcResponse) -> Result<(), ClientError> {
    if !resp.is_success() {
        return Err(api_error(resp));
    }
    if let Ok(body) = resp.json::<Value>()
        && let Some(msg) = body.get("error").and_then(Value::as_str)
        && !msg.is_empty()
    {
        return Err(ClientError::Server(msg.to_string()));
    }
    Ok(())
}

fn api_error(resp: &BmcResponse) -> ClientError {
    ClientError::Api {
        status: resp.status,
        body: resp.text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{test_client, MockBmc};

    #[tokio::test]
    async fn power_status_parses_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"response":[{"result":[{"node1":"1","node2":"0","node3":"1","node4":"0"}]}]}"#;
        let bmc = MockBmc::start(vec![(200, body.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        let status = client.power_status().await.unwrap();
        assert_eq!(
            status,
            vec![(1, true), (2, false), (3, true), (4, false)]
        );
    }

    #[tokio::test]
    async fn power_status_parses_flat_result() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"result":{"node1":1,"node2":0}}"#;
        let bmc = MockBmc::start(vec![(200, body.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        let status = client.power_status().await.unwrap();
        assert_eq!(status, vec![(1, true), (2, false)]);
    }

    #[tokio::test]
    async fn power_on_sends_node_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let bmc = MockBmc::start(vec![(200, "{}".into())]).await;

        let client = test_client(&bmc.host, dir.path());
        client.power_on(2).await.unwrap();

        let head = bmc.requests.lock().unwrap()[0].clone();
        assert!(head.contains("opt=set"));
        assert!(head.contains("type=power"));
        assert!(head.contains("node2=1"));
    }

    #[tokio::test]
    async fn set_usb_mode_uses_zero_based_node() {
        let dir = tempfile::tempdir().unwrap();
        let bmc = MockBmc::start(vec![(200, "{}".into())]).await;

        let client = test_client(&bmc.host, dir.path());
        client.set_usb_mode(1, UsbMode::Device, false).await.unwrap();

        let head = bmc.requests.lock().unwrap()[0].clone();
        assert!(head.contains("node=0"));
        assert!(head.contains("mode=1"));
    }

    #[test]
    fn usb_mode_wire_values() {
        assert_eq!(UsbMode::Host.wire_value(false), 0);
        assert_eq!(UsbMode::Device.wire_value(false), 1);
        assert_eq!(UsbMode::Flash.wire_value(false), 2);
        assert_eq!(UsbMode::Device.wire_value(true), 5);
    }

    #[tokio::test]
    async fn uart_read_string_entry() {
        let dir = tempfile::tempdir().unwrap();
        let bmc = MockBmc::start(vec![(200, r#"{"response":["hello\n"]}"#.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        assert_eq!(client.uart_read(1).await.unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn uart_read_output_object() {
        let dir = tempfile::tempdir().unwrap();
        let bmc =
            MockBmc::start(vec![(200, r#"{"response":[{"output":"boot ok"}]}"#.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        assert_eq!(client.uart_read(1).await.unwrap(), "boot ok");
    }

    #[tokio::test]
    async fn cooling_status_parses_devices() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"response":[{"name":"fan0","speed":120,"max_speed":255}]}"#;
        let bmc = MockBmc::start(vec![(200, body.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        let devices = client.cooling_status().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "fan0");
        assert_eq!(devices[0].speed, 120);
        assert_eq!(devices[0].max_speed, 255);
    }

    #[tokio::test]
    async fn info_collects_string_fields() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"response":[{"result":[{"ip":"192.168.1.91","mac":"aa:bb","nodes":4}]}]}"#;
        let bmc = MockBmc::start(vec![(200, body.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        let info = client.info().await.unwrap();

        let head = bmc.requests.lock().unwrap()[0].clone();
        assert!(head.contains("type=other"));
        assert_eq!(info.get("ip").map(String::as_str), Some("192.168.1.91"));
        assert_eq!(info.get("mac").map(String::as_str), Some("aa:bb"));
        // Non-string values are skipped.
        assert!(!info.contains_key("nodes"));
    }

    #[tokio::test]
    async fn about_accepts_object_result_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"response":[{"result":{"api":"1.1","version":"2.0.5","buildroot":"2024"}}]}"#;
        let bmc = MockBmc::start(vec![(200, body.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        let about = client.about().await.unwrap();

        let head = bmc.requests.lock().unwrap()[0].clone();
        assert!(head.contains("type=about"));
        assert_eq!(about.get("version").map(String::as_str), Some("2.0.5"));
        assert_eq!(about.len(), 3);
    }

    #[tokio::test]
    async fn reboot_bmc_sends_reboot_request() {
        let dir = tempfile::tempdir().unwrap();
        let bmc = MockBmc::start(vec![(200, "{}".into())]).await;

        let client = test_client(&bmc.host, dir.path());
        client.reboot_bmc().await.unwrap();

        let head = bmc.requests.lock().unwrap()[0].clone();
        assert!(head.contains("opt=set"));
        assert!(head.contains("type=reboot"));
    }

    #[tokio::test]
    async fn error_field_in_ok_body_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let bmc = MockBmc::start(vec![(200, r#"{"error":"node unavailable"}"#.into())]).await;

        let client = test_client(&bmc.host, dir.path());
        let err = client.reset_node(1).await.unwrap_err();
        assert!(matches!(err, ClientError::Server(msg) if msg == "node unavailable"));
    }

    #[tokio::test]
    async fn invalid_node_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let bmc = MockBmc::start(vec![(200, "{}".into())]).await;

        let client = test_client(&bmc.host, dir.path());
        let err = client.power_on(5).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidNode(5)));
        assert_eq!(bmc.request_count(), 0);
    }
}
