//! Accepts connections one at a time and prints each parsed request.
//!
//! ```text
//! cargo run --example tcplistener
//! curl -X POST -d 'hello' localhost:42069/coffee
//! ```

use chillhttp::http::{ReadBuffer, read_request};
use clap::Parser;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(about = "Print the requests received on a TCP port")]
struct Args {
    #[arg(short, long, default_value_t = 42069)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    println!("Listening on :{}", args.port);

    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("Error accepting connection: {e}");
                continue;
            }
        };
        println!("Accepted connection from {peer}");

        let mut buf = ReadBuffer::default();
        match read_request(&mut stream, &mut buf).await {
            Ok(req) => {
                let line = req.line();
                println!("Request line:");
                println!("- Method: {}", line.method);
                println!("- Target: {}", line.target);
                println!("- Version: {}", line.version);
                println!("Headers:");
                for (name, value) in req.headers().iter() {
                    println!("- {name}: {value}");
                }
                println!("Body:");
                println!("{}", String::from_utf8_lossy(req.body()));
            }
            Err(e) => eprintln!("Error parsing request: {e}"),
        }
        println!("Connection to {peer} closed");
    }
}
