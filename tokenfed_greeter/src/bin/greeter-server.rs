use clap::Parser;
use tokenfed_greeter::{config::ServerOptions, helloworld::greeter_server::GreeterServer, MyGreeter};
use tokenfed_tonic::{federated_auth_layer, TerseErrorHandler};
use tonic::transport::Server;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = ServerOptions::parse();

    let authority = opts.authority().await?;
    let on_error: TerseErrorHandler = TerseErrorHandler::new();

    tracing::info!(address = %opts.listen, "greeter listening");

    Server::builder()
        .layer(federated_auth_layer(authority, on_error))
        .add_service(GreeterServer::new(MyGreeter))
        .serve_with_shutdown(opts.listen, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error.message = %err, "unable to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
