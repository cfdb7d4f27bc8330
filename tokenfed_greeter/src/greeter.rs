use tokenfed::VerifiedCaller;
use tonic::{Request, Response, Status};

use crate::helloworld::{greeter_server::Greeter, HelloReply, HelloRequest};

/// Greets verified callers by name
#[derive(Clone, Copy, Debug, Default)]
pub struct MyGreeter;

#[tonic::async_trait]
impl Greeter for MyGreeter {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloReply>, Status> {
        // Only reachable without a caller if the verification layer is missing
        let caller = request
            .extensions()
            .get::<VerifiedCaller>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("caller was not verified"))?;

        let name = request.into_inner().name;
        tracing::info!(
            identity = %caller.identity(),
            routing_key = %caller.routing_key(),
            %name,
            "greeting caller"
        );

        Ok(Response::new(HelloReply {
            message: format!("Hello {name}"),
        }))
    }
}
