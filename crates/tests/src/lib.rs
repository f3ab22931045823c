//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置文件到运行中 flow 的完整路径
//! - Supervisor + MockReceiver + 真实回环 UDP/TCP 套接字的 e2e 测试
//! - DatagramReceiver 输入到输出的转发

#[cfg(test)]
mod e2e_tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{DataBlock, FlowConfig, InputConfig, OutputConfig, RelayConfig};
    use flow::{FlowDeps, Supervisor};
    use ingestion::{DatagramReceiverFactory, MockReceiverFactory};
    use rand::Rng;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream, UdpSocket};

    const TS_PACKET: usize = 188;

    fn payload() -> Vec<u8> {
        let mut data = vec![0u8; TS_PACKET];
        rand::rng().fill(&mut data[..]);
        data[0] = 0x47;
        data
    }

    async fn udp_sink() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let url = format!("udp://{}", socket.local_addr().unwrap());
        (socket, url)
    }

    async fn recv_within(socket: &UdpSocket, wait: Duration) -> Option<Vec<u8>> {
        let mut buf = [0u8; 2048];
        match tokio::time::timeout(wait, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    fn relay_config(flows: Vec<FlowConfig>) -> RelayConfig {
        RelayConfig {
            identifier: "e2e".into(),
            listen_http: None,
            telemetry: None,
            flows,
        }
    }

    fn flow_config(id: &str, input: &str, outputs: &[&str]) -> FlowConfig {
        let mut flow = FlowConfig::new(id);
        flow.inputs.push(InputConfig { url: input.into() });
        flow.outputs = outputs
            .iter()
            .enumerate()
            .map(|(i, url)| OutputConfig {
                identifier: format!("out-{i}"),
                url: url.to_string(),
            })
            .collect();
        flow
    }

    async fn wait_for_outputs(supervisor: &Supervisor, flow: &str, count: usize) {
        let flow = supervisor.flow(flow).unwrap();
        for _ in 0..400 {
            if flow.output_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("flow never reached {count} outputs");
    }

    async fn http_get_json(addr: SocketAddr, path: &str) -> serde_json::Value {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");
        serde_json::from_str(body).unwrap()
    }

    /// Mock receiver -> engine -> UDP sink and caller-role stream sink
    #[tokio::test]
    async fn test_e2e_fanout_to_udp_and_stream() {
        let factory = Arc::new(MockReceiverFactory::new());
        let supervisor = Supervisor::new(FlowDeps::new(factory.clone()));

        let (udp, udp_url) = udp_sink().await;
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let srt_url = format!("srt://{}", tcp.local_addr().unwrap());

        let mut config = relay_config(vec![flow_config(
            "main",
            "rist://@127.0.0.1:7000",
            &[&udp_url, &srt_url],
        )]);
        config.listen_http = Some("127.0.0.1:0".into());
        supervisor.apply(config).await.unwrap();

        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(2), tcp.accept())
            .await
            .unwrap()
            .unwrap();
        wait_for_outputs(&supervisor, "main", 2).await;

        let sender = factory.latest("main").unwrap().sender();
        let blocks: Vec<Vec<u8>> = (0..10).map(|_| payload()).collect();
        for (seq, data) in blocks.iter().enumerate() {
            sender
                .send(DataBlock::new(data.clone(), seq as u32))
                .await
                .unwrap();
        }

        for expected in &blocks {
            let got = recv_within(&udp, Duration::from_secs(2)).await.unwrap();
            assert_eq!(&got, expected);
        }

        let mut streamed = vec![0u8; blocks.len() * TS_PACKET];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut streamed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(streamed, blocks.concat());

        let addr = supervisor.http_addr().await.unwrap();
        let status = http_get_json(addr, "/status").await;
        assert_eq!(status["status"], "OK");
        assert_eq!(status["OK"], true);
        assert_eq!(status["flows"]["main"]["packetcount"], 10);
        assert_eq!(status["flows"]["main"]["outputcount"], 2);

        supervisor.shutdown().await;
    }

    /// Reload: the removed output stops receiving, the added one starts
    #[tokio::test]
    async fn test_e2e_reload_swaps_outputs() {
        let factory = Arc::new(MockReceiverFactory::new());
        let supervisor = Supervisor::new(FlowDeps::new(factory.clone()));

        let (kept, kept_url) = udp_sink().await;
        let (removed, removed_url) = udp_sink().await;
        let (added, added_url) = udp_sink().await;
        let input = "rist://@127.0.0.1:7001";

        supervisor
            .apply(relay_config(vec![flow_config("f", input, &[&kept_url, &removed_url])]))
            .await
            .unwrap();
        wait_for_outputs(&supervisor, "f", 2).await;
        let receiver = factory.latest("f").unwrap();

        supervisor
            .apply(relay_config(vec![flow_config("f", input, &[&kept_url, &added_url])]))
            .await
            .unwrap();
        assert_eq!(factory.created().len(), 1, "receiver survives an output change");

        let block = payload();
        receiver
            .sender()
            .send(DataBlock::new(block.clone(), 0))
            .await
            .unwrap();

        assert_eq!(recv_within(&kept, Duration::from_secs(2)).await.unwrap(), block);
        assert_eq!(recv_within(&added, Duration::from_secs(2)).await.unwrap(), block);
        assert!(recv_within(&removed, Duration::from_millis(200)).await.is_none());
        wait_for_outputs(&supervisor, "f", 2).await;

        supervisor.shutdown().await;
        assert!(receiver.is_destroyed());
    }

    /// Config file text -> supervisor, then a flow removed by reload
    #[tokio::test]
    async fn test_e2e_yaml_config_and_flow_removal() {
        let factory = Arc::new(MockReceiverFactory::new());
        let supervisor = Supervisor::new(FlowDeps::new(factory.clone()));

        let yaml = r#"
identifier: gw
flows:
  - identifier: a
    inputs:
      - url: "rist://@127.0.0.1:7100"
    outputs:
      - identifier: local
        url: "udp://127.0.0.1:7200"
  - identifier: b
    profile: main
    streamid: 42
    inputs:
      - url: "rist://@127.0.0.1:7101"
"#;
        let config = ConfigLoader::load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        supervisor.apply(config.clone()).await.unwrap();
        assert_eq!(supervisor.registry().identifiers(), vec!["a", "b"]);
        assert_eq!(factory.latest("b").unwrap().configured_port(), Some(42));

        let mut reduced = config;
        reduced.flows.retain(|f| f.identifier == "a");
        supervisor.apply(reduced.clone()).await.unwrap();
        assert_eq!(supervisor.registry().identifiers(), vec!["a"]);
        assert!(factory.latest("b").unwrap().is_destroyed());
        assert_eq!(supervisor.running_config().await, Some(reduced));

        supervisor.shutdown().await;
    }

    /// Real UDP input through the datagram receiver
    #[tokio::test]
    async fn test_e2e_datagram_input_relays() {
        let supervisor = Supervisor::new(FlowDeps::new(Arc::new(DatagramReceiverFactory::default())));

        let input_port = {
            let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let (sink, sink_url) = udp_sink().await;
        supervisor
            .apply(relay_config(vec![flow_config(
                "live",
                &format!("rist://@127.0.0.1:{input_port}"),
                &[&sink_url],
            )]))
            .await
            .unwrap();
        wait_for_outputs(&supervisor, "live", 1).await;

        let source = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let block = payload();
        let mut relayed = None;
        for _ in 0..20 {
            source
                .send_to(&block, ("127.0.0.1", input_port))
                .await
                .unwrap();
            relayed = recv_within(&sink, Duration::from_millis(100)).await;
            if relayed.is_some() {
                break;
            }
        }
        assert_eq!(relayed.unwrap(), block);

        let status = supervisor.status_report();
        assert!(status.flows["live"].packet_count >= 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_e2e_shutdown_is_bounded() {
        let factory = Arc::new(MockReceiverFactory::new());
        let supervisor = Supervisor::new(FlowDeps::new(factory.clone()));
        let flows = (0..5)
            .map(|i| flow_config(&format!("f{i}"), &format!("rist://@127.0.0.1:{}", 7300 + i), &[]))
            .collect();
        supervisor.apply(relay_config(flows)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(3), supervisor.shutdown())
            .await
            .unwrap();
        assert!(factory.created().iter().all(|r| r.is_destroyed()));
        assert!(supervisor.registry().is_empty());
    }
}
