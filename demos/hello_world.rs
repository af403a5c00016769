use maker_http::{
    EntityTag, Encoding, Handled, Methods, Request, ResourceInfo, Responder, Response, Server,
    StatusCode,
};
use tokio::net::TcpListener;

struct HelloWorld;

impl Responder for HelloWorld {
    fn methods(&self) -> Methods {
        Methods::GET | Methods::POST
    }

    fn resource_info(&self, _: &Request) -> ResourceInfo {
        ResourceInfo {
            etag: Some(EntityTag::strong("hello-1")),
            ..ResourceInfo::default()
        }
    }

    fn get(&self, _: &Request, resp: &mut Response) -> Handled {
        // gzip is produced on demand for clients that ask for it
        resp.status(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .compute_from(Encoding::Gzip, Encoding::Identity)
            .body("Hello, world!\n".repeat(64))
    }

    fn post(&self, req: &Request, resp: &mut Response) -> Handled {
        let name = req
            .keyword("name")
            .and_then(|keyword| keyword.as_str())
            .unwrap_or("world");

        resp.header("Content-Type", "text/plain")
            .body(format!("Hello, {name}!\n"))
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await?)
        .route("/", HelloWorld)
        .build()
        .launch()
        .await
}
