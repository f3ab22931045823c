//! 配置解析模块
//!
//! 支持 YAML (主要)、TOML 和 JSON 格式。

use contracts::{ContractError, RelayConfig};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML 格式 (推荐)
    Yaml,
    /// TOML 格式
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 YAML 格式配置
pub fn parse_yaml(content: &str) -> Result<RelayConfig, ContractError> {
    serde_yaml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("YAML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<RelayConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<RelayConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<RelayConfig, ContractError> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::TransportProfile;

    #[test]
    fn test_parse_yaml_legacy_keys() {
        let content = r#"
identifier: gateway-1
listenhttp: "127.0.0.1:8080"
flows:
  - identifier: news
    type: RIST
    ristprofile: main
    latency: 500
    streamid: 2000
    inputs:
      - url: "rist://@0.0.0.0:5000"
    outputs:
      - identifier: studio
        url: "udp://239.1.1.1:1234?ttl=8"
      - identifier: partner
        url: "srt://:9000?passphrase=secret"
    minimalbitrate: 1000000
    maxpackettime: 500
"#;
        let config = parse_yaml(content).unwrap();
        assert_eq!(config.identifier, "gateway-1");
        assert_eq!(config.listen_http.as_deref(), Some("127.0.0.1:8080"));
        let flow = &config.flows[0];
        assert_eq!(flow.profile, TransportProfile::Main);
        assert_eq!(flow.latency, 500);
        assert_eq!(flow.stream_id, 2000);
        assert_eq!(flow.outputs.len(), 2);
        assert_eq!(flow.max_packet_time_ms, 500);
    }

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
identifier = "gw"

[[flows]]
identifier = "a"
inputs = [{ url = "rist://@0.0.0.0:5000" }]
outputs = [{ identifier = "o", url = "rtp://127.0.0.1:6000" }]
"#;
        let config = parse_toml(content).unwrap();
        assert_eq!(config.flows.len(), 1);
        assert_eq!(config.flows[0].input_type, "RIST");
        assert_eq!(config.flows[0].profile, TransportProfile::Simple);
    }

    #[test]
    fn test_parse_json_invalid() {
        let result = parse_json("{ not json");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("YML"), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("ini"), None);
    }
}
