//! 配置校验模块
//!
//! 校验规则：
//! - identifier 非空
//! - 每个 flow 至少一个 input，URL 合法且不重复
//! - output scheme 仅支持 udp / rtp / srt / dektecasi
//! - 仅支持 RIST 输入，profile 不高于 main
//! - stream_id <= 65535
//! - minimal_bitrate 与 max_packet_time_ms 同时设置或同时为 0
//! - flow identifier 唯一

use std::collections::HashSet;
use std::net::SocketAddr;

use contracts::{
    parse_endpoint_url, ContractError, FlowConfig, RelayConfig, TelemetryConfig, TransportProfile,
};

/// 支持的输出 scheme
pub const OUTPUT_SCHEMES: [&str; 4] = ["udp", "rtp", "srt", "dektecasi"];

/// 校验 RelayConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &RelayConfig) -> Result<(), ContractError> {
    validate_identifier(config)?;
    for flow in &config.flows {
        validate_flow(flow)?;
    }
    validate_flow_ids(config)?;
    if let Some(telemetry) = &config.telemetry {
        validate_telemetry(telemetry)?;
    }
    Ok(())
}

fn validate_identifier(config: &RelayConfig) -> Result<(), ContractError> {
    if config.identifier.is_empty() {
        return Err(ContractError::config_validation(
            "identifier",
            "config identifier empty",
        ));
    }
    Ok(())
}

/// 校验单个 flow (flow 创建时也会调用)
pub fn validate_flow(flow: &FlowConfig) -> Result<(), ContractError> {
    let field = |name: &str| format!("flows[{}].{}", flow.identifier, name);

    if flow.inputs.is_empty() {
        return Err(ContractError::config_validation(
            field("inputs"),
            "at least 1 input required",
        ));
    }

    check_duplicate_urls(flow.inputs.iter().map(|i| i.url.as_str()))
        .map_err(|msg| ContractError::config_validation(field("inputs"), msg))?;
    for input in &flow.inputs {
        validate_url(&input.url)
            .map_err(|msg| ContractError::config_validation(field("inputs"), msg))?;
    }

    check_duplicate_urls(flow.outputs.iter().map(|o| o.url.as_str()))
        .map_err(|msg| ContractError::config_validation(field("outputs"), msg))?;
    for output in &flow.outputs {
        validate_output_url(&output.url)
            .map_err(|msg| ContractError::config_validation(field("outputs"), msg))?;
    }

    if flow.identifier.is_empty() {
        return Err(ContractError::config_validation(
            "flows[].identifier",
            "flow must have non-empty identifier",
        ));
    }

    if flow.input_type != FlowConfig::INPUT_TYPE_RIST {
        return Err(ContractError::config_validation(
            field("type"),
            format!("input type '{}' not supported, only RIST", flow.input_type),
        ));
    }

    if flow.profile > TransportProfile::Main {
        return Err(ContractError::config_validation(
            field("profile"),
            format!("invalid profile {:?}", flow.profile),
        ));
    }

    if let Some(stats_file) = &flow.stats_file {
        let parent = stats_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        if !parent.is_dir() {
            return Err(ContractError::config_validation(
                field("stats_file"),
                format!("directory of {} does not exist", stats_file.display()),
            ));
        }
    }

    if flow.stream_id > u32::from(u16::MAX) {
        return Err(ContractError::config_validation(
            field("stream_id"),
            format!("{} must be smaller than {}", flow.stream_id, u16::MAX),
        ));
    }

    if (flow.max_packet_time_ms > 0) != (flow.minimal_bitrate > 0) {
        return Err(ContractError::config_validation(
            field("minimal_bitrate"),
            "when using max_packet_time_ms or minimal_bitrate both have to be set higher than 0",
        ));
    }

    Ok(())
}

/// URL 及其 host:port 均不可重复
fn check_duplicate_urls<'a>(urls: impl Iterator<Item = &'a str>) -> Result<(), String> {
    let mut seen = HashSet::new();
    for raw in urls {
        let url = parse_endpoint_url(raw).map_err(|e| format!("invalid url {raw}: {e}"))?;
        let host_port = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        };
        if !seen.insert(raw.to_string()) {
            return Err(format!("duplicate url: {raw}"));
        }
        if !host_port.is_empty() && !seen.insert(host_port.clone()) {
            return Err(format!("duplicate url: {host_port}"));
        }
    }
    Ok(())
}

fn validate_url(raw: &str) -> Result<(), String> {
    if raw.is_empty() {
        return Err("empty url not allowed".to_string());
    }
    let url = parse_endpoint_url(raw).map_err(|e| format!("failed to parse {raw}: {e}"))?;
    if url.host_str().is_none() && url.port().is_none() {
        return Err(format!("{raw} has neither host nor port"));
    }
    Ok(())
}

fn validate_output_url(raw: &str) -> Result<(), String> {
    validate_url(raw)?;
    let url = parse_endpoint_url(raw).map_err(|e| format!("failed to parse {raw}: {e}"))?;
    if !OUTPUT_SCHEMES.contains(&url.scheme()) {
        return Err(format!("output type {} not supported", url.scheme()));
    }
    Ok(())
}

/// 校验 flow identifier 唯一性
fn validate_flow_ids(config: &RelayConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for flow in &config.flows {
        if !seen.insert(flow.identifier.as_str()) {
            return Err(ContractError::config_validation(
                format!("flows[identifier={}]", flow.identifier),
                "duplicate flow identifier",
            ));
        }
    }
    Ok(())
}

fn validate_telemetry(telemetry: &TelemetryConfig) -> Result<(), ContractError> {
    telemetry.listen.parse::<SocketAddr>().map_err(|e| {
        ContractError::config_validation(
            "telemetry.listen",
            format!("invalid address '{}': {e}", telemetry.listen),
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{InputConfig, OutputConfig};

    fn minimal_flow(id: &str) -> FlowConfig {
        let mut flow = FlowConfig::new(id);
        flow.inputs.push(InputConfig {
            url: "rist://@0.0.0.0:5000".into(),
        });
        flow.outputs.push(OutputConfig {
            identifier: "out".into(),
            url: "udp://127.0.0.1:6000".into(),
        });
        flow
    }

    fn minimal_config() -> RelayConfig {
        RelayConfig {
            identifier: "gw".into(),
            listen_http: None,
            telemetry: None,
            flows: vec![minimal_flow("a")],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_empty_identifier() {
        let mut config = minimal_config();
        config.identifier.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_flow_requires_input() {
        let mut flow = minimal_flow("a");
        flow.inputs.clear();
        let err = validate_flow(&flow).unwrap_err();
        assert!(err.to_string().contains("at least 1 input"));
    }

    #[test]
    fn test_duplicate_output_url() {
        let mut flow = minimal_flow("a");
        flow.outputs.push(flow.outputs[0].clone());
        let err = validate_flow(&flow).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_duplicate_output_host_port() {
        let mut flow = minimal_flow("a");
        flow.outputs.push(OutputConfig {
            identifier: "other".into(),
            url: "udp://127.0.0.1:6000?ttl=4".into(),
        });
        assert!(validate_flow(&flow).is_err());
    }

    #[test]
    fn test_unsupported_output_scheme() {
        let mut flow = minimal_flow("a");
        flow.outputs[0].url = "http://127.0.0.1:80".into();
        let err = validate_flow(&flow).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_listener_url_without_host_is_valid() {
        let mut flow = minimal_flow("a");
        flow.outputs[0].url = "srt://:9000?passphrase=abc".into();
        assert!(validate_flow(&flow).is_ok());
    }

    #[test]
    fn test_input_type_and_profile() {
        let mut flow = minimal_flow("a");
        flow.input_type = "SRT".into();
        assert!(validate_flow(&flow).is_err());

        let mut flow = minimal_flow("a");
        flow.profile = TransportProfile::Advanced;
        assert!(validate_flow(&flow).is_err());
    }

    #[test]
    fn test_stream_id_bounds() {
        let mut flow = minimal_flow("a");
        flow.stream_id = 65535;
        assert!(validate_flow(&flow).is_ok());
        flow.stream_id = 65536;
        assert!(validate_flow(&flow).is_err());
    }

    #[test]
    fn test_thresholds_both_or_neither() {
        let mut flow = minimal_flow("a");
        flow.minimal_bitrate = 500_000;
        assert!(validate_flow(&flow).is_err());
        flow.max_packet_time_ms = 2000;
        assert!(validate_flow(&flow).is_ok());
    }

    #[test]
    fn test_stats_file_directory_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let mut flow = minimal_flow("a");
        flow.stats_file = Some(dir.path().join("stats.json"));
        assert!(validate_flow(&flow).is_ok());
        flow.stats_file = Some(dir.path().join("missing").join("stats.json"));
        assert!(validate_flow(&flow).is_err());
    }

    #[test]
    fn test_duplicate_flow_ids() {
        let mut config = minimal_config();
        config.flows.push(minimal_flow("a"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate flow identifier"));
    }

    #[test]
    fn test_telemetry_address() {
        let mut config = minimal_config();
        config.telemetry = Some(TelemetryConfig::new("not-an-address"));
        assert!(validate(&config).is_err());
        config.telemetry = Some(TelemetryConfig::new("127.0.0.1:9100"));
        assert!(validate(&config).is_ok());
    }
}
