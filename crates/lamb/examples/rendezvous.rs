//! Run a broker in-process, connect one sender and one puller, and move a
//! record across the mt lane.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use lamb::fabric::{
    pad_record, Broker, BrokerConfig, ClientConfig, ClientType, Fabric, FabricConfig,
    HelloRequest, SessionClient,
};
use lamb::frame::Command;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = FabricConfig {
        broker: BrokerConfig {
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..BrokerConfig::default()
        },
        ..FabricConfig::default()
    };
    let fabric = Arc::new(Fabric::new(config));
    let broker = Broker::bind(Arc::clone(&fabric))?;
    let control = broker.local_addr();
    let handle = broker.spawn()?;
    println!("broker on {control}");

    let mut sender = SessionClient::connect(
        control,
        &HelloRequest::new(1, ClientType::Mt),
        ClientConfig::default(),
    )?;
    println!("sender session on port {}", sender.hello_response().port);
    let body = pad_record(b"13800138000 hello", ClientConfig::default().record_size)?;
    sender.push(Command::Submit, &body)?;
    sender.bye()?;

    let mut puller = SessionClient::connect(
        control,
        &HelloRequest::new(2, ClientType::Mt),
        ClientConfig::default(),
    )?;
    // The push is asynchronous to the pull; retry until it lands.
    for _ in 0..100 {
        if let Some(item) = puller.request()? {
            let text = String::from_utf8_lossy(&item.payload);
            println!("pulled {}: {}", item.kind, text.trim_end_matches('\0'));
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    puller.bye()?;

    println!("{:?}", fabric.snapshot());
    fabric.shutdown();
    let _ = handle.join();
    Ok(())
}
