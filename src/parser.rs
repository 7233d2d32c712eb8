//! XML and HTML parsing for ZTE router responses
//!
//! Every data endpoint answers with an `ajax_response_xml_root` document.
//! Lists live under `<CONTAINER><Instance>...</Instance></CONTAINER>`, where
//! each instance is a flat run of `<ParaName>`/`<ParaValue>` pairs.

use crate::error::RouterError;
use crate::models::{DeviceRecord, NetworkType, RouterDetails, WanStatus};
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashMap;
use xmltree::Element;

pub const XML_ROOT: &str = "ajax_response_xml_root";

const ERROR_FIELD: &str = "IF_ERRORSTR";
const AP_CONTAINER: &str = "OBJ_WLANAP_ID";
const CPU_MEM_CONTAINER: &str = "OBJ_CPUMEMUSAGE_ID";
const POWER_ON_CONTAINER: &str = "OBJ_POWERONTIME_ID";

/// Observed in firmware, not documented anywhere
const SUCCESS_TOKENS: [&str; 3] = ["SUCC", "SUCCESS", "OK"];

const CONNECT_TIME_FORMAT: &str = "%Y/%m/%d %a %H:%M:%S";
const NORMALIZED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a document and insist on the expected wrapper tag
pub fn parse_document(xml: &str) -> Result<Element, RouterError> {
    let root = Element::parse(xml.as_bytes())?;
    if root.name != XML_ROOT {
        return Err(RouterError::Protocol(format!(
            "unexpected XML root tag: {}",
            root.name
        )));
    }
    Ok(root)
}

fn is_success_token(value: &str) -> bool {
    let value = value.trim();
    SUCCESS_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(value))
}

/// Fail if the top-level error string is present and not a success token
pub fn check_error_field(root: &Element) -> Result<(), RouterError> {
    let Some(field) = root.get_child(ERROR_FIELD) else {
        return Ok(());
    };
    let value = field.get_text().map(|t| t.trim().to_string()).unwrap_or_default();
    if value.is_empty() || is_success_token(&value) {
        Ok(())
    } else {
        Err(RouterError::RouterReported(value))
    }
}

/// Login challenge: the token is the text of the root element
pub fn parse_login_token(xml: &str) -> Result<String, RouterError> {
    let root = parse_document(xml)?;
    root.get_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RouterError::Protocol("empty login token".to_string()))
}

/// Response to an administrative command such as restart
pub fn check_command_response(xml: &str) -> Result<(), RouterError> {
    let root = parse_document(xml)?;
    check_error_field(&root)
}

fn instances<'a>(root: &'a Element, container: &'a str) -> impl Iterator<Item = &'a Element> {
    root.children
        .iter()
        .filter_map(|n| n.as_element())
        .filter(move |e| e.name == container)
        .flat_map(|c| c.children.iter().filter_map(|n| n.as_element()))
        .filter(|e| e.name == "Instance")
}

/// Walk an instance's children as name/value pairs.
///
/// Returns `None` for an odd child count, which the firmware never emits for
/// a well-formed record.
fn instance_fields(instance: &Element) -> Option<Vec<(String, String)>> {
    let children: Vec<&Element> = instance
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .collect();

    if children.len() % 2 != 0 {
        tracing::warn!(
            "Unexpected instance structure, child count: {}",
            children.len()
        );
        return None;
    }

    let fields = children
        .chunks(2)
        .filter_map(|pair| {
            let name = pair[0].get_text()?.trim().to_string();
            let value = pair[1].get_text()?.trim().to_string();
            (!name.is_empty() && !value.is_empty()).then_some((name, value))
        })
        .collect();
    Some(fields)
}

/// Flatten every instance of `container` into a last-value-wins map
fn instance_maps(root: &Element, container: &str) -> Vec<HashMap<String, String>> {
    instances(root, container)
        .filter_map(instance_fields)
        .map(|fields| fields.into_iter().collect())
        .collect()
}

/// AP instance ID → ESSID, scoped to one document
pub fn parse_ap_map(root: &Element) -> HashMap<String, String> {
    instance_maps(root, AP_CONTAINER)
        .into_iter()
        .filter_map(|mut fields| {
            let id = fields.remove("_InstID")?;
            let essid = fields.remove("ESSID")?;
            Some((id, essid))
        })
        .collect()
}

/// `2024/01/15 Mon 10:30:45` → `2024-01-15T10:30:45`, raw string on failure
pub fn normalize_connect_time(raw: &str) -> String {
    match NaiveDateTime::parse_from_str(raw.trim(), CONNECT_TIME_FORMAT) {
        Ok(dt) => dt.format(NORMALIZED_TIME_FORMAT).to_string(),
        Err(_) => raw.to_string(),
    }
}

fn parse_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Parse a LAN or WLAN device listing
pub fn parse_devices(
    xml: &str,
    container: &str,
    network_type: NetworkType,
) -> Result<Vec<DeviceRecord>, RouterError> {
    let root = parse_document(xml)?;
    check_error_field(&root)?;

    let ap_map = parse_ap_map(&root);
    let mut devices = Vec::new();

    for instance in instances(&root, container) {
        let Some(fields) = instance_fields(instance) else {
            continue;
        };

        let mut device = DeviceRecord::new(network_type);
        for (name, value) in fields {
            match name.as_str() {
                "MACAddress" => device.mac_address = value.to_uppercase(),
                "IPAddress" => device.ip_address = value,
                "HostName" => device.host_name = value,
                "IconType" => device.icon_type = Some(value),
                "Active" => device.active = parse_truthy(&value),
                "LinkTime" => device.link_time = Some(value),
                "ConnectTime" => device.connect_time = Some(normalize_connect_time(&value)),
                "Port" | "AliasName" => device.port = Some(value),
                _ => {}
            }
        }

        if let Some(essid) = device.port.as_ref().and_then(|p| ap_map.get(p)) {
            device.port = Some(essid.clone());
        }

        if device.mac_address.is_empty() {
            tracing::debug!("Skipping device without MAC address: {:?}", device.host_name);
            continue;
        }
        devices.push(device);
    }

    tracing::debug!("Parsed {} {} devices", devices.len(), network_type);
    Ok(devices)
}

/// Named fields across every instance of every container, last value wins
fn collect_fields(root: &Element, containers: &[&str]) -> HashMap<String, String> {
    containers
        .iter()
        .flat_map(|c| instance_maps(root, c))
        .flatten()
        .collect()
}

pub fn parse_wan_status(xml: &str, container: &str) -> Result<WanStatus, RouterError> {
    let root = parse_document(xml)?;
    check_error_field(&root)?;
    let mut fields = collect_fields(&root, &[container]);

    Ok(WanStatus {
        wan_uptime: fields.remove("UpTime"),
        wan_connection_error: fields.remove("ConnError"),
        wan_connection_status: fields.remove("ConnStatus"),
        dhcp_lease_remaining: fields.remove("RemainLeaseTime"),
    })
}

pub fn parse_router_details(xml: &str) -> Result<RouterDetails, RouterError> {
    let root = parse_document(xml)?;
    check_error_field(&root)?;
    let mut fields = collect_fields(&root, &[CPU_MEM_CONTAINER, POWER_ON_CONTAINER]);

    Ok(RouterDetails {
        cpu_usage: fields.remove("CpuUsage1").or_else(|| fields.remove("CpuUsage")),
        memory_usage: fields.remove("MemUsage"),
        power_on_time: fields.remove("PowerOnTime"),
    })
}

/// Pull the anti-CSRF token out of a menu page.
///
/// Pages embed it as `_sessionTmpToken = "\x31\x32..."`.
pub fn extract_session_token(html: &str) -> Option<String> {
    let re = Regex::new(r#"_sessionTmpToken\s*=\s*"([^"]*)""#).ok()?;
    let raw = re.captures(html)?.get(1)?.as_str();

    let escape = Regex::new(r"\\x([0-9a-fA-F]{2})").ok()?;
    let decoded = escape.replace_all(raw, |caps: &regex::Captures| {
        u8::from_str_radix(&caps[1], 16)
            .map(|b| (b as char).to_string())
            .unwrap_or_default()
    });

    let token = decoded.trim().to_string();
    (!token.is_empty()).then_some(token)
}
