//! Say hello to a running broker from async code.
//!
//! ```text
//! lamb serve --port 30000 &
//! cargo run -p lamb --example async-hello --features async -- 127.0.0.1:30000
//! ```

use futures_util::{SinkExt, StreamExt};
use lamb::fabric::{ClientType, HelloRequest, HelloResponse};
use lamb::frame::{Envelope, MessageCodec};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:30000".to_string());

    let stream = TcpStream::connect(&addr).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, MessageCodec::new());
    let mut writer = FramedWrite::new(write_half, MessageCodec::new());

    let request = HelloRequest::new(std::process::id().into(), ClientType::Server);
    writer.send(request.to_envelope()?).await?;

    let Some(reply) = reader.next().await else {
        return Err("broker closed the connection".into());
    };
    let envelope = Envelope::decode(&reply?)?;
    let response = HelloResponse::from_envelope(&envelope)?;
    println!("session endpoint {}:{}", response.addr, response.port);
    Ok(())
}
