use std::{env, process::exit, sync::Arc, time::Duration};

use labeq_rs::{
    bus::SystemConnector,
    connection::{ConnectionManager, ConnectionSpec, DEFAULT_TIMEOUT},
    discovery::{list_resources, probe},
    equipment::DriverKind,
    protocol::ScpiProtocol,
    resource::Resource,
};

fn usage() -> ! {
    println!("Usage: labeq <command> [args]");
    println!("  <command>:");
    println!("    list: scan serial ports (and VISA resources) and identify what answers");
    println!("    idn <resource>: identify one instrument");
    println!("    query <resource> <command>: send a query and print the reply");
    println!("    write <resource> <command>: send a command");
    println!("  <resource>");
    println!("    VISA-style resource, e.g. TCPIP0::192.168.1.10::5025::SOCKET or ASRL1::INSTR");
    println!("  LABEQ_TIMEOUT_MS overrides the {} ms timeout", DEFAULT_TIMEOUT.as_millis());
    exit(1);
}

fn timeout_from_env() -> Duration {
    match env::var("LABEQ_TIMEOUT_MS") {
        Ok(ms) => match ms.parse() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                println!("Ignoring bad LABEQ_TIMEOUT_MS '{ms}'");
                DEFAULT_TIMEOUT
            }
        },
        Err(_) => DEFAULT_TIMEOUT,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
    }
    let timeout = timeout_from_env();

    match (args[1].as_str(), &args[2..]) {
        ("list", []) => list(timeout).await?,
        ("idn", [resource]) => {
            let resource: Resource = resource.parse()?;
            let info = probe(&resource, timeout).await?;
            println!("{info}");
            match DriverKind::for_model(&info) {
                Some(kind) => println!("  driver: {}", kind.as_ref()),
                None => println!("  driver: none"),
            }
        }
        ("query", [resource, command]) => {
            let mut scpi = open(resource, timeout).await?;
            let upper = command.trim_end().to_uppercase();
            /* Waveform transfers are the only block replies worth special casing here */
            if upper.ends_with("CURV?") || upper.ends_with("CURVE?") {
                let data = scpi.query_block(command).await?;
                println!("{} bytes of block data", data.len());
            } else {
                println!("{}", scpi.query_text(command).await?);
            }
            scpi.disconnect().await?;
        }
        ("write", [resource, command]) => {
            let mut scpi = open(resource, timeout).await?;
            scpi.send(command).await?;
            scpi.disconnect().await?;
        }
        (cmd, _) => {
            println!("Unknown command or wrong arguments: '{cmd}'");
            usage();
        }
    }

    Ok(())
}

async fn open(resource: &str, timeout: Duration) -> labeq_rs::error::Result<ScpiProtocol> {
    let spec: ConnectionSpec = resource.parse()?;
    let mut scpi = ScpiProtocol::new(ConnectionManager::with_connector(
        spec.with_timeout(timeout),
        Arc::new(SystemConnector),
    ));
    scpi.connect().await?;
    Ok(scpi)
}

async fn list(timeout: Duration) -> labeq_rs::error::Result<()> {
    let resources = list_resources().await?;
    if resources.is_empty() {
        println!("No resources found");
    }

    for res in resources {
        match probe(&res, timeout).await {
            Ok(info) => {
                println!("{res}");
                println!("  manufacturer: {}", info.manufacturer);
                println!("  model:        {}", info.model);
                println!("  serial:       {}", info.serial.as_deref().unwrap_or("?"));
                println!("  firmware:     {}", info.version.as_deref().unwrap_or("?"));
            }
            Err(e) => println!("{res}: {e}"),
        }
    }
    Ok(())
}
