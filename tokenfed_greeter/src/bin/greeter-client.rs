use std::time::Duration;

use clap::Parser;
use tokenfed_greeter::{
    config::ClientOptions,
    helloworld::{greeter_client::GreeterClient, HelloRequest},
};
use tokenfed_tonic::AttachTokenLayer;
use tonic::transport::Endpoint;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = ClientOptions::parse();

    let source = opts.token_source().await?;
    let channel = Endpoint::from_shared(opts.server.clone())?
        .timeout(Duration::from_secs(opts.timeout_secs))
        .connect()
        .await?;

    let service = tower::ServiceBuilder::new()
        .layer(AttachTokenLayer::new(source))
        .service(channel);
    let mut client = GreeterClient::new(service);

    let reply = client
        .say_hello(HelloRequest {
            name: opts.name.clone(),
        })
        .await?;

    tracing::info!(message = %reply.get_ref().message, "received greeting");
    println!("{}", reply.into_inner().message);

    Ok(())
}
