//! Photo booth server with a gphoto2 camera
//!
//! Run with: cargo run --example booth_server [OPTIONS]
//!
//! Examples:
//!   cargo run --example booth_server                      # API on 0.0.0.0:3001, MJPEG on 0.0.0.0:8080
//!   cargo run --example booth_server -- --api 127.0.0.1:4000
//!   cargo run --example booth_server -- --json --open     # plain JSON envelope, no identity needed
//!
//! ## Viewing the preview
//!
//! Connect a Socket.IO client to ws://localhost:3001/socket.io/?EIO=4&transport=websocket
//! and emit `start-preview`. The reply carries the stream URL, which any
//! browser can open directly:
//!
//!   http://localhost:8080/camera
//!
//! ## Without a camera
//!
//! Point `--tool` at any program that writes concatenated JPEGs to stdout.
//! Photo capture and detection also run through it.

use std::net::SocketAddr;
use std::path::PathBuf;

use booth_proxy::{BoothHandler, BoothServer, CaptureConfig, Dialect, ServerConfig, ToolCamera};

fn print_usage() {
    eprintln!("Usage: booth_server [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --api ADDR       control/API address (default 0.0.0.0:3001)");
    eprintln!("  --mjpeg ADDR     MJPEG viewer address (default 0.0.0.0:8080)");
    eprintln!("  --host NAME      host name placed in stream URLs (default localhost)");
    eprintln!("  --dir PATH       root for uploads/, previews/ and data/ (default .)");
    eprintln!("  --tool PROGRAM   capture tool (default gphoto2)");
    eprintln!("  --json           plain JSON envelope instead of Socket.IO");
    eprintln!("  --open           do not require a registered booth identity");
}

fn parse_args(args: &[String]) -> Result<ServerConfig, String> {
    let mut config = ServerConfig::default().base_dir(".");
    let mut tool = String::from("gphoto2");

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{} needs a value", name))
        };

        match arg.as_str() {
            "--api" => config = config.api_addr(parse_addr(&value("--api")?)?),
            "--mjpeg" => config = config.mjpeg_addr(parse_addr(&value("--mjpeg")?)?),
            "--host" => config = config.public_host(value("--host")?),
            "--dir" => config = config.base_dir(PathBuf::from(value("--dir")?)),
            "--tool" => tool = value("--tool")?,
            "--json" => config = config.dialect(Dialect::Json),
            "--open" => config = config.require_identity(false),
            other => return Err(format!("Unknown option: {}", other)),
        }
    }

    let capture = CaptureConfig::default().program(tool);
    Ok(config.capture(capture))
}

fn parse_addr(s: &str) -> Result<SocketAddr, String> {
    s.parse()
        .map_err(|_| format!("Invalid address '{}'. Expected format: IP:PORT", s))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("booth_proxy=debug".parse()?)
                .add_directive("booth_server=debug".parse()?),
        )
        .init();

    println!("Control/API: http://{}", config.api_addr);
    println!("MJPEG:       http://{}:{}/camera", config.public_host, config.mjpeg_addr.port());
    println!("Capture:     {}", config.capture.program);
    println!("Uploads:     {}", config.uploads_dir.display());
    println!();

    let camera = ToolCamera::new(config.capture.program.clone());
    let handler = BoothHandler::new(&config, camera);
    let server = BoothServer::new(config, handler);

    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nShutting down...");
            }
        })
        .await?;

    Ok(())
}
