//! Demo binary issuing concurrent correlated requests over one connection.

mod cli;
mod demo;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::sync::CancellationToken;
use wiremux::{
    Connection,
    ConnectionError,
    ConnectionSettings,
    Frame,
    FrameHeader,
    HelloInitializer,
    RequestIds,
    SocketOptions,
    TcpStreamFactory,
};

const OP_ECHO: i32 = 2004;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable structured logging for the demo.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let addr = if let Some(addr) = cli.connect {
        addr
    } else {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(demo::serve(listener));
        addr
    };

    let ids = Arc::new(RequestIds::new());
    let settings = ConnectionSettings::default()
        .with_max_lifetime(cli.max_lifetime_secs.map(Duration::from_secs));
    let connection = Arc::new(
        Connection::builder(
            TcpStreamFactory::new(SocketOptions::default().nodelay(true)),
            addr,
        )
        .settings(settings)
        .initializer(HelloInitializer::new("wiremux-demo", Arc::clone(&ids)))
        .build(),
    );
    let cancel = CancellationToken::new();
    connection.open(&cancel).await?;
    println!("connected: id={}, endpoint={addr}", connection.id());

    let payload = vec![b'x'; cli.payload_size];
    let mut requests = JoinSet::new();
    for _ in 0..cli.requests {
        let connection = Arc::clone(&connection);
        let cancel = cancel.clone();
        let request_id = ids.next_id();
        let request = Frame::build(FrameHeader::request(request_id, OP_ECHO), &payload)?;
        requests.spawn(async move {
            connection.send(&[request], &cancel).await?;
            let reply = connection.receive(request_id, &cancel).await?;
            Ok::<_, ConnectionError>((request_id, reply.body().len()))
        });
    }

    while let Some(joined) = requests.join_next().await {
        let (request_id, bytes) = joined??;
        println!("request {request_id}: {bytes} byte reply");
    }
    connection.dispose();
    Ok(())
}
