use std::{env, process::exit, time::Duration};

use labeq_rs::{
    connection::{ConnectionManager, ConnectionSpec},
    protocol::ScpiProtocol,
};
use tokio::time::Instant;

fn ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        println!("Usage: ... <resource>");
        println!("  <resource>:");
        println!("    TCPIP0::<host>::<port>::SOCKET: SCPI over raw TCP");
        println!("    TCPIP0::<host>::INSTR: VISA, or raw TCP on port 5025 without it");
        println!("    ASRL<port>::INSTR: SCPI over serial");
        exit(1);
    }

    let spec: ConnectionSpec = args[1].parse()?;
    let mut scpi = ScpiProtocol::new(ConnectionManager::new(spec));

    let start = Instant::now();
    scpi.connect().await?;
    println!("Connect: {} ms", ms(start));

    let start = Instant::now();
    scpi.send("*CLS").await?;
    println!("Send: {} ms", ms(start));

    let start = Instant::now();
    let idn = scpi.query_text("*IDN?").await?;
    println!("Query: {} ms", ms(start));
    println!("  Data: {idn}");

    let start = Instant::now();
    let info = scpi.identify().await?;
    println!("Identify: {} ms", ms(start));
    println!("  {info}");

    scpi.connection_mut().set_timeout(Duration::from_secs(1));
    let start = Instant::now();
    let resp = scpi.query_text("*WAI").await;
    println!("Query with no reply (1 sec): {} ms", ms(start));
    if let Err(e) = resp {
        println!("  Error: {e}");
        println!("  Status: {}", scpi.status());
    }

    let start = Instant::now();
    scpi.connect().await?;
    println!("Reconnect: {} ms", ms(start));
    println!("  Status: {}", scpi.status());

    scpi.disconnect().await?;

    Ok(())
}
