//! Flow 与配置重载指标
//!
//! 数据面计数器（输入包数、断流、丢弃）由 fanout / ingestion 直接记录；
//! 本模块负责控制面与健康状态指标。

use contracts::FlowStatus;
use metrics::{counter, gauge};

/// 记录 flow 健康快照
pub fn record_flow_status(flow: &str, status: &FlowStatus) {
    let flow = flow.to_string();
    gauge!("relay_flow_ok", "flow" => flow.clone()).set(if status.ok() { 1.0 } else { 0.0 });
    gauge!("relay_flow_bitrate_bps", "flow" => flow.clone()).set(status.bitrate as f64);
    gauge!("relay_flow_outputs", "flow" => flow.clone()).set(status.output_count as f64);
    gauge!("relay_flow_ms_since_last_packet", "flow" => flow).set(status.ms_since_last_packet as f64);
}

/// 记录一次配置应用 (`result` = "ok" / "error" / "rejected")
pub fn record_reconcile(result: &'static str) {
    counter!("relay_reconcile_total", "result" => result).increment(1);
}

/// 记录输出建立失败
pub fn record_output_setup_failure(flow: &str, scheme: &str) {
    counter!(
        "relay_output_setup_failures_total",
        "flow" => flow.to_string(),
        "scheme" => scheme.to_string()
    )
    .increment(1);
}

/// 记录因身份字段变化导致的 flow 重建
pub fn record_flow_restart(flow: &str) {
    counter!("relay_flow_restarts_total", "flow" => flow.to_string()).increment(1);
}

pub fn set_active_flows(count: usize) {
    gauge!("relay_flows_active").set(count as f64);
}
